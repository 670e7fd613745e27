// LogWeave - platform/config.rs
//
// Platform data directory resolution and config.toml loading with startup
// validation.
//
// Uses the `directories` crate for XDG (Linux), AppData (Windows),
// Library (macOS) compliance.

use crate::core::encoding::TextEncoding;
use crate::core::parser::{LineParser, ParserConfig};
use crate::util::constants;
use crate::util::error::ConfigError;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Resolved platform paths for LogWeave configuration.
#[derive(Debug, Clone)]
pub struct PlatformPaths {
    /// Configuration directory (e.g. ~/.config/logweave/).
    pub config_dir: PathBuf,
}

impl PlatformPaths {
    /// Resolve platform-appropriate paths.
    ///
    /// Falls back to current directory if platform dirs cannot be determined.
    pub fn resolve() -> Self {
        if let Some(proj_dirs) = ProjectDirs::from("", "", constants::APP_ID) {
            let config_dir = proj_dirs.config_dir().to_path_buf();
            tracing::debug!(config = %config_dir.display(), "Platform paths resolved");
            Self { config_dir }
        } else {
            tracing::warn!("Could not determine platform directories, using current directory");
            Self {
                config_dir: PathBuf::from("."),
            }
        }
    }

    /// Default location of config.toml.
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(constants::CONFIG_FILE_NAME)
    }
}

// =============================================================================
// config.toml shape
// =============================================================================

/// Raw deserialisable shape of config.toml.
///
/// Unknown keys are silently ignored for forward compatibility.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub ingest: IngestSection,
    pub views: ViewsSection,
    pub logging: LoggingSection,
}

/// `[ingest]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct IngestSection {
    /// Regex locating the timestamp in a line.
    pub timestamp_regex: Option<String>,
    /// chrono strftime format for the matched timestamp.
    pub timestamp_format: Option<String>,
    /// Character encoding of tailed files.
    pub encoding: Option<String>,
    /// Keep following files after the initial read.
    pub follow_tail: Option<bool>,
    /// Reader poll interval in ms.
    pub poll_interval_ms: Option<u64>,
}

/// `[views]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct ViewsSection {
    pub merge_interval_ms: Option<u64>,
    pub ingest_interval_ms: Option<u64>,
}

/// `[logging]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: Option<String>,
}

// =============================================================================
// Validated config
// =============================================================================

/// How files are read and parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    pub parser: ParserConfig,
    pub encoding: TextEncoding,
    pub follow_tail: bool,
    pub poll_interval_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            parser: ParserConfig::default(),
            encoding: TextEncoding::Utf8,
            follow_tail: true,
            poll_interval_ms: constants::TAIL_POLL_INTERVAL_MS,
        }
    }
}

/// Validated application configuration derived from `config.toml`.
///
/// Invalid values produce actionable warnings and fall back to defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub ingest: IngestConfig,
    pub merge_interval_ms: u64,
    pub ingest_interval_ms: u64,
    /// Logging level string (for init before tracing is available).
    pub log_level: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ingest: IngestConfig::default(),
            merge_interval_ms: constants::MERGE_UPDATE_INTERVAL_MS,
            ingest_interval_ms: constants::INGEST_UPDATE_INTERVAL_MS,
            log_level: None,
        }
    }
}

/// Load and validate the config file at `path`.
///
/// Returns the validated config and a list of non-fatal warnings. A missing
/// file yields defaults. When `explicit` is set (the user named the file),
/// a missing, unreadable or unparseable file is an error; otherwise it is a
/// warning and defaults apply.
pub fn load_config(path: &Path, explicit: bool) -> Result<(AppConfig, Vec<String>), ConfigError> {
    let mut warnings: Vec<String> = Vec::new();

    if !explicit && !path.exists() {
        tracing::debug!(path = %path.display(), "No config.toml found; using defaults");
        return Ok((AppConfig::default(), warnings));
    }

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if explicit => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
        Err(e) => {
            let msg = format!(
                "Could not read config file '{}': {e}. Using defaults.",
                path.display()
            );
            tracing::warn!("{}", msg);
            warnings.push(msg);
            return Ok((AppConfig::default(), warnings));
        }
    };

    let raw: RawConfig = match toml::from_str(&content) {
        Ok(r) => r,
        Err(e) if explicit => {
            return Err(ConfigError::TomlParse {
                path: path.to_path_buf(),
                source: e,
            })
        }
        Err(e) => {
            let msg = format!(
                "Failed to parse config file '{}': {e}. Using defaults.",
                path.display()
            );
            tracing::warn!("{}", msg);
            warnings.push(msg);
            return Ok((AppConfig::default(), warnings));
        }
    };

    tracing::info!(path = %path.display(), "Loaded config.toml");
    let config = validate(raw, &mut warnings);

    if !warnings.is_empty() {
        tracing::warn!(
            count = warnings.len(),
            "Config validation produced warnings"
        );
    }
    Ok((config, warnings))
}

/// Validate each field against named constants, accumulating all problems.
pub fn validate(raw: RawConfig, warnings: &mut Vec<String>) -> AppConfig {
    let mut config = AppConfig::default();

    // -- Ingest: timestamp rule, checked as a unit --
    let parser = ParserConfig {
        timestamp_regex: raw.ingest.timestamp_regex,
        timestamp_format: raw.ingest.timestamp_format,
    };
    match LineParser::new(&parser) {
        Ok(_) => config.ingest.parser = parser,
        Err(e) => warnings.push(format!(
            "[ingest] {e}. Falling back to automatic timestamp detection."
        )),
    }

    // -- Ingest: encoding --
    if let Some(label) = raw.ingest.encoding {
        match TextEncoding::from_label(&label) {
            Ok(enc) => config.ingest.encoding = enc,
            Err(e) => warnings.push(format!(
                "[ingest] {e}. Using default ({}).",
                constants::DEFAULT_ENCODING
            )),
        }
    }

    if let Some(follow) = raw.ingest.follow_tail {
        config.ingest.follow_tail = follow;
    }

    // -- Ingest: poll_interval_ms --
    if let Some(ms) = raw.ingest.poll_interval_ms {
        let range = constants::MIN_TAIL_POLL_INTERVAL_MS..=constants::MAX_TAIL_POLL_INTERVAL_MS;
        if range.contains(&ms) {
            config.ingest.poll_interval_ms = ms;
        } else {
            warnings.push(out_of_range(
                "ingest.poll_interval_ms",
                ms,
                range.start(),
                range.end(),
                constants::TAIL_POLL_INTERVAL_MS,
            ));
        }
    }

    // -- Views: update intervals --
    let range = constants::MIN_UPDATE_INTERVAL_MS..=constants::MAX_UPDATE_INTERVAL_MS;
    if let Some(ms) = raw.views.merge_interval_ms {
        if range.contains(&ms) {
            config.merge_interval_ms = ms;
        } else {
            warnings.push(out_of_range(
                "views.merge_interval_ms",
                ms,
                range.start(),
                range.end(),
                constants::MERGE_UPDATE_INTERVAL_MS,
            ));
        }
    }
    if let Some(ms) = raw.views.ingest_interval_ms {
        if range.contains(&ms) {
            config.ingest_interval_ms = ms;
        } else {
            warnings.push(out_of_range(
                "views.ingest_interval_ms",
                ms,
                range.start(),
                range.end(),
                constants::INGEST_UPDATE_INTERVAL_MS,
            ));
        }
    }

    // -- Logging: level --
    if let Some(level) = raw.logging.level {
        let valid = ["error", "warn", "info", "debug", "trace"];
        if valid.contains(&level.to_lowercase().as_str()) {
            config.log_level = Some(level);
        } else {
            warnings.push(format!(
                "[logging] level = \"{level}\" is not recognised. \
                 Valid values: error, warn, info, debug, trace. Using default ({}).",
                constants::DEFAULT_LOG_LEVEL
            ));
        }
    }

    config
}

fn out_of_range(field: &str, value: u64, min: &u64, max: &u64, default: u64) -> String {
    let err = ConfigError::ValueOutOfRange {
        field: field.to_string(),
        value: value.to_string(),
        expected: format!("{min}-{max}"),
    };
    format!("{err}. Using default ({default}).")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join(constants::CONFIG_FILE_NAME);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_missing_default_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (config, warnings) =
            load_config(&dir.path().join("absent.toml"), false).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("absent.toml"), true).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_valid_config_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[ingest]
timestamp_regex = '\d{2}:\d{2}:\d{2}'
timestamp_format = '%H:%M:%S'
encoding = "latin1"
follow_tail = false
poll_interval_ms = 100

[views]
merge_interval_ms = 300
ingest_interval_ms = 20

[logging]
level = "debug"

[future_section]
whatever = 1
"#,
        );
        let (config, warnings) = load_config(&path, true).unwrap();
        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(
            config.ingest.parser.timestamp_format.as_deref(),
            Some("%H:%M:%S")
        );
        assert_eq!(config.ingest.encoding, TextEncoding::Latin1);
        assert!(!config.ingest.follow_tail);
        assert_eq!(config.ingest.poll_interval_ms, 100);
        assert_eq!(config.merge_interval_ms, 300);
        assert_eq!(config.ingest_interval_ms, 20);
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_invalid_values_warn_and_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[ingest]
timestamp_regex = '[broken'
encoding = "ebcdic"
poll_interval_ms = 1

[views]
merge_interval_ms = 999999

[logging]
level = "loud"
"#,
        );
        let (config, warnings) = load_config(&path, false).unwrap();
        assert_eq!(warnings.len(), 5, "{warnings:?}");
        assert_eq!(config, AppConfig::default());
        assert!(warnings.iter().any(|w| w.contains("poll_interval_ms")));
        assert!(warnings.iter().any(|w| w.contains("ebcdic")));
    }

    #[test]
    fn test_unparseable_implicit_config_warns() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "this is = = not toml");
        let (config, warnings) = load_config(&path, false).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(warnings.len(), 1);

        assert!(matches!(
            load_config(&path, true),
            Err(ConfigError::TomlParse { .. })
        ));
    }
}
