// LogWeave - main.rs
//
// Command-line entry point. Handles:
// 1. CLI argument parsing and file glob expansion
// 2. Config loading and logging initialisation (debug mode support)
// 3. Opening every file under the root merged view
// 4. Chaining the requested filters and printing the resulting view

use clap::Parser;
use logweave::app::printer::Printer;
use logweave::app::tail::{TailOptions, TailProgress};
use logweave::app::viewer::LogViewer;
use logweave::app::workspace::WorkspaceOptions;
use logweave::core::encoding::TextEncoding;
use logweave::platform::config::{load_config, AppConfig, PlatformPaths};
use logweave::util::error::{LogWeaveError, Result};
use logweave::util::{constants, logging};
use std::path::PathBuf;
use std::time::Duration;

/// How long to wait for the initial read of all files before printing.
const CATCH_UP_TIMEOUT: Duration = Duration::from_secs(60);

/// LogWeave - follow several log files as one time-ordered stream.
///
/// Every file is tailed live and merged by timestamp. Each `--filter` adds a
/// regex filter on top of the previous one.
#[derive(Parser, Debug)]
#[command(name = "LogWeave", version, about)]
struct Cli {
    /// Log files to open. Glob patterns are expanded.
    #[arg(required = true)]
    files: Vec<String>,

    /// Regex filter; repeat to chain filters.
    #[arg(short = 'f', long = "filter")]
    filter: Vec<String>,

    /// Keep lines that do NOT match the filters.
    #[arg(short = 'v', long = "invert")]
    invert: bool,

    /// Character encoding of the files (overrides config).
    #[arg(short = 'e', long = "encoding")]
    encoding: Option<String>,

    /// Config file to use instead of the platform default.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Print the current content and exit instead of following.
    #[arg(short = 'n', long = "no-follow")]
    no_follow: bool,

    /// Enable debug logging (equivalent to RUST_LOG=debug).
    #[arg(short = 'd', long = "debug")]
    debug: bool,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        tracing::error!(error = %e, "LogWeave failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let platform_paths = PlatformPaths::resolve();
    let (config_path, explicit) = match &cli.config {
        Some(path) => (path.clone(), true),
        None => (platform_paths.config_file(), false),
    };

    let (config, warnings) = match load_config(&config_path, explicit) {
        Ok(loaded) => loaded,
        Err(e) => {
            logging::init(cli.debug, None);
            return Err(e.into());
        }
    };
    logging::init(cli.debug, config.log_level.as_deref());
    for warning in &warnings {
        tracing::warn!("{warning}");
    }

    tracing::info!(
        version = constants::APP_VERSION,
        debug = cli.debug,
        config = %config_path.display(),
        "LogWeave starting"
    );

    let options = workspace_options(&config, cli.encoding.as_deref())?;
    let files = expand_paths(&cli.files);
    let viewer = LogViewer::new(options)?;

    let mut opened = 0usize;
    for path in &files {
        match viewer.open_file(path) {
            Ok(view) => {
                opened += 1;
                tracing::debug!(%view, path = %path.display(), "Opened");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Skipping file");
                eprintln!("Warning: {e}");
            }
        }
    }
    if opened == 0 {
        viewer.shutdown();
        return Err(LogWeaveError::Io {
            path: PathBuf::from(cli.files.join(" ")),
            operation: "open any input file",
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no readable files"),
        });
    }

    let mut node = viewer.root_node()?;
    for pattern in &cli.filter {
        node = viewer.add_filter(node, pattern, cli.invert)?;
    }
    let view = viewer.node_view(node)?;

    if !viewer.wait_until_caught_up(CATCH_UP_TIMEOUT)? {
        tracing::warn!("Timed out waiting for the initial read; printing what is loaded");
    }
    viewer.subscribe(view, Box::new(Printer::new(std::io::stdout())))?;

    let follow = config.ingest.follow_tail && !cli.no_follow;
    if !follow {
        viewer.shutdown();
        return Ok(());
    }

    tracing::info!(files = opened, "Following; interrupt to stop");
    loop {
        for progress in viewer.poll_progress() {
            report(&progress);
        }
        std::thread::sleep(Duration::from_millis(config.ingest.poll_interval_ms));
    }
}

/// Build workspace options from the validated config and CLI overrides.
fn workspace_options(config: &AppConfig, encoding: Option<&str>) -> Result<WorkspaceOptions> {
    let encoding = match encoding {
        Some(label) => TextEncoding::from_label(label)?,
        None => config.ingest.encoding,
    };
    Ok(WorkspaceOptions {
        parser: config.ingest.parser.clone(),
        tail: TailOptions {
            encoding,
            poll_interval: Duration::from_millis(config.ingest.poll_interval_ms),
        },
        ingest_interval: Duration::from_millis(config.ingest_interval_ms),
        merge_interval: Duration::from_millis(config.merge_interval_ms),
    })
}

/// Expand glob patterns. A pattern matching nothing (or not a valid glob)
/// is kept literally so the open error names it.
fn expand_paths(patterns: &[String]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for pattern in patterns {
        let matches: Vec<PathBuf> = match glob::glob(pattern) {
            Ok(paths) => paths.filter_map(|p| p.ok()).filter(|p| p.is_file()).collect(),
            Err(e) => {
                tracing::debug!(pattern, error = %e, "Not a glob pattern");
                Vec::new()
            }
        };
        if matches.is_empty() {
            files.push(PathBuf::from(pattern));
        } else {
            files.extend(matches);
        }
    }
    files.dedup();
    files
}

fn report(progress: &TailProgress) {
    match progress {
        TailProgress::FileError { path, message } => {
            tracing::warn!(path = %path.display(), error = %message, "Tail error");
        }
        TailProgress::Truncated { path } => {
            tracing::info!(path = %path.display(), "File truncated; reloading");
        }
        other => tracing::debug!(?other, "Tail progress"),
    }
}
