// LogWeave - tests/e2e_pipeline.rs
//
// End-to-end tests for the view pipeline.
//
// These run the real dispatcher thread, real reader threads tailing real
// files, and real regex filtering. Nothing is mocked: each test goes from
// bytes on disk to the lines a listener is told about.

use logweave::app::view::{View, ViewEvent, ViewId, ViewListener};
use logweave::app::viewer::LogViewer;
use logweave::app::workspace::{Navigate, WorkspaceOptions};
use logweave::core::model::Line;
use logweave::core::parser::ParserConfig;
use logweave::util::error::{LogWeaveError, ViewError};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// =============================================================================
// Helpers
// =============================================================================

/// Absolute path to the on-disk fixture files.
fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn fast_options() -> WorkspaceOptions {
    let mut options = WorkspaceOptions::default();
    options.tail.poll_interval = Duration::from_millis(20);
    options.ingest_interval = Duration::from_millis(10);
    options.merge_interval = Duration::from_millis(10);
    options
}

fn caught_up(viewer: &LogViewer) {
    assert!(
        viewer.wait_until_caught_up(Duration::from_secs(10)).unwrap(),
        "readers did not catch up"
    );
}

fn texts(viewer: &LogViewer, view: ViewId) -> Vec<String> {
    viewer
        .lines(view)
        .unwrap()
        .iter()
        .map(|l| l.text().to_string())
        .collect()
}

/// Poll until `view` holds `n` lines, flushing rate-limited updates.
fn wait_for_lines(viewer: &LogViewer, view: ViewId, n: usize) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        viewer.flush().unwrap();
        if viewer.lines(view).unwrap().len() >= n {
            return;
        }
        assert!(Instant::now() < deadline, "view never reached {n} lines");
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn append(path: &Path, lines: &[&str]) {
    let mut f = OpenOptions::new().append(true).open(path).unwrap();
    for l in lines {
        writeln!(f, "{l}").unwrap();
    }
    f.flush().unwrap();
}

/// Records every event a listener receives.
#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<ViewEvent>>>);

impl Recorder {
    fn events(&self) -> Vec<ViewEvent> {
        self.0.lock().unwrap().clone()
    }
}

impl ViewListener for Recorder {
    fn on_full_update(&mut self, _view: &View) {
        self.0.lock().unwrap().push(ViewEvent::FullUpdate);
    }
    fn on_incremental_update(&mut self, _view: &View, new_lines: &[Arc<Line>]) {
        self.0
            .lock()
            .unwrap()
            .push(ViewEvent::IncrementalUpdate(new_lines.to_vec()));
    }
    fn on_destroyed(&mut self, _view: &View) {
        self.0.lock().unwrap().push(ViewEvent::Destroyed);
    }
}

// =============================================================================
// Merging
// =============================================================================

/// Two fixture files interleave by timestamp under the root view.
#[test]
fn e2e_root_merges_fixtures_chronologically() {
    let viewer = LogViewer::new(fast_options()).unwrap();
    viewer.open_file(fixture("service_a.log")).unwrap();
    viewer.open_file(fixture("service_b.log")).unwrap();
    caught_up(&viewer);

    let root = viewer.root_view();
    let lines = viewer.lines(root).unwrap();
    assert_eq!(lines.len(), 9);

    let stamps: Vec<i64> = lines.iter().map(|l| l.timestamp()).collect();
    let mut sorted = stamps.clone();
    sorted.sort();
    assert_eq!(stamps, sorted, "root must be time-ordered");

    let indices: Vec<usize> = lines.iter().map(|l| l.index()).collect();
    assert_eq!(indices, (0..9).collect::<Vec<_>>());

    assert!(lines[0].text().contains("listening on"));
    assert!(lines[1].text().contains("worker pool started"));
    assert_eq!(viewer.line_count(root).unwrap(), 9);
    viewer.shutdown();
}

/// A file opened after the first still lands in time order.
#[test]
fn e2e_late_file_is_merged_into_place() {
    let viewer = LogViewer::new(fast_options()).unwrap();
    viewer.open_file(fixture("service_a.log")).unwrap();
    caught_up(&viewer);

    viewer.open_file(fixture("service_b.log")).unwrap();
    caught_up(&viewer);

    let lines = viewer.lines(viewer.root_view()).unwrap();
    assert_eq!(lines.len(), 9);
    assert!(lines.windows(2).all(|w| w[0].timestamp() <= w[1].timestamp()));
    assert!(lines.iter().enumerate().all(|(i, l)| l.index() == i));
    viewer.shutdown();
}

// =============================================================================
// Live tailing
// =============================================================================

/// Lines appended to a followed file reach the view and its listener.
#[test]
fn e2e_follows_appended_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("live.log");
    fs::write(&path, "2024-03-05 09:00:00 boot\n").unwrap();

    let viewer = LogViewer::new(fast_options()).unwrap();
    let file_view = viewer.open_file(&path).unwrap();
    caught_up(&viewer);

    let recorder = Recorder::default();
    viewer.subscribe(file_view, Box::new(recorder.clone())).unwrap();

    append(&path, &["2024-03-05 09:00:01 one", "2024-03-05 09:00:02 two"]);
    wait_for_lines(&viewer, file_view, 3);

    assert_eq!(
        texts(&viewer, file_view),
        vec!["2024-03-05 09:00:00 boot", "2024-03-05 09:00:01 one", "2024-03-05 09:00:02 two"]
    );
    let delivered: usize = recorder
        .events()
        .iter()
        .map(|e| match e {
            ViewEvent::IncrementalUpdate(lines) => lines.len(),
            _ => 0,
        })
        .sum();
    assert_eq!(delivered, 2, "both appended lines delivered incrementally");

    wait_for_lines(&viewer, viewer.root_view(), 3);
    viewer.shutdown();
}

/// A partial final line is held back until its newline arrives.
#[test]
fn e2e_partial_line_waits_for_newline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.log");
    fs::write(&path, "first\nsec").unwrap();

    let viewer = LogViewer::new(fast_options()).unwrap();
    let view = viewer.open_file(&path).unwrap();
    caught_up(&viewer);
    assert_eq!(texts(&viewer, view), vec!["first"]);

    let mut f = OpenOptions::new().append(true).open(&path).unwrap();
    f.write_all(b"ond\n").unwrap();
    drop(f);
    wait_for_lines(&viewer, view, 2);
    assert_eq!(texts(&viewer, view), vec!["first", "second"]);
    viewer.shutdown();
}

/// Truncating a file reloads it from the start.
#[test]
fn e2e_truncated_file_reloads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rotate.log");
    fs::write(&path, "old 1\nold 2\nold 3\n").unwrap();

    let viewer = LogViewer::new(fast_options()).unwrap();
    let view = viewer.open_file(&path).unwrap();
    caught_up(&viewer);
    assert_eq!(viewer.lines(view).unwrap().len(), 3);

    fs::write(&path, "new\n").unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while texts(&viewer, view) != vec!["new"] {
        assert!(Instant::now() < deadline, "file was not reloaded");
        std::thread::sleep(Duration::from_millis(20));
        viewer.flush().unwrap();
    }
    viewer.shutdown();
}

/// With a timestamp rule, unmatched lines attach to the record above.
#[test]
fn e2e_continuation_lines_group_under_record() {
    let mut options = fast_options();
    options.parser = ParserConfig {
        timestamp_regex: Some(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d{3}".into()),
        timestamp_format: Some("%Y-%m-%d %H:%M:%S%.3f".into()),
    };
    let viewer = LogViewer::new(options).unwrap();
    let view = viewer.open_file(fixture("stacktrace.log")).unwrap();
    caught_up(&viewer);

    let lines = viewer.lines(view).unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].additional_count(), 3);
    assert!(lines[0].additional_lines()[0].starts_with("java.lang.IllegalStateException"));
    assert!(lines[1].text().contains("job 43 started"));
    viewer.shutdown();
}

// =============================================================================
// Filters and derived merges
// =============================================================================

/// A filter view holds exactly the parent lines its regex selects.
#[test]
fn e2e_filter_matches_direct_regex() {
    let viewer = LogViewer::new(fast_options()).unwrap();
    viewer.open_file(fixture("service_a.log")).unwrap();
    viewer.open_file(fixture("service_b.log")).unwrap();
    caught_up(&viewer);

    let root = viewer.root_node().unwrap();
    let errors = viewer.add_filter(root, "ERROR|WARN", false).unwrap();
    let rest = viewer.add_filter(root, "ERROR|WARN", true).unwrap();
    viewer.flush().unwrap();

    let re = regex::Regex::new("ERROR|WARN").unwrap();
    let all = texts(&viewer, viewer.root_view());
    let expected: Vec<String> = all.iter().filter(|t| re.is_match(t)).cloned().collect();
    let complement: Vec<String> = all.iter().filter(|t| !re.is_match(t)).cloned().collect();

    assert_eq!(texts(&viewer, viewer.node_view(errors).unwrap()), expected);
    assert_eq!(texts(&viewer, viewer.node_view(rest).unwrap()), complement);
    assert_eq!(expected.len(), 3);
    viewer.shutdown();
}

/// Changing a filter's pattern recomputes its view in place.
#[test]
fn e2e_set_filter_recomputes() {
    let viewer = LogViewer::new(fast_options()).unwrap();
    viewer.open_file(fixture("service_b.log")).unwrap();
    caught_up(&viewer);

    let node = viewer.add_filter(viewer.root_node().unwrap(), "ERROR", false).unwrap();
    let view = viewer.node_view(node).unwrap();
    viewer.flush().unwrap();
    assert_eq!(viewer.lines(view).unwrap().len(), 1);

    viewer.set_filter(node, "database", false).unwrap();
    viewer.flush().unwrap();
    assert_eq!(viewer.lines(view).unwrap().len(), 2);
    assert_eq!(viewer.summary(view).unwrap().title, "grep database");
    viewer.shutdown();
}

/// Merging two filter views yields their union in time order.
#[test]
fn e2e_merge_of_filters_is_time_ordered() {
    let viewer = LogViewer::new(fast_options()).unwrap();
    viewer.open_file(fixture("service_a.log")).unwrap();
    viewer.open_file(fixture("service_b.log")).unwrap();
    caught_up(&viewer);

    let root = viewer.root_node().unwrap();
    let api = viewer.add_filter(root, r"\[api\]", false).unwrap();
    let errors = viewer.add_filter(root, "ERROR", false).unwrap();
    let merge = viewer.add_merge(&[api, errors]).unwrap();
    viewer.flush().unwrap();

    let lines = viewer.lines(viewer.node_view(merge).unwrap()).unwrap();
    // 5 api lines, plus the billing error (the api error appears twice).
    assert_eq!(lines.len(), 7);
    assert!(lines.windows(2).all(|w| w[0].timestamp() <= w[1].timestamp()));
    viewer.shutdown();
}

// =============================================================================
// View tree
// =============================================================================

/// Removing a node destroys its whole subtree; the root cannot be removed.
#[test]
fn e2e_remove_subtree_and_root_guard() {
    let viewer = LogViewer::new(fast_options()).unwrap();
    viewer.open_file(fixture("service_a.log")).unwrap();
    caught_up(&viewer);

    let root = viewer.root_node().unwrap();
    let outer = viewer.add_filter(root, "INFO", false).unwrap();
    let inner = viewer.add_filter(outer, "GET", false).unwrap();
    let inner_view = viewer.node_view(inner).unwrap();
    let recorder = Recorder::default();
    viewer.subscribe(inner_view, Box::new(recorder.clone())).unwrap();

    assert!(matches!(
        viewer.remove_node(root),
        Err(LogWeaveError::View(ViewError::RootRemoval))
    ));

    viewer.remove_node(outer).unwrap();
    assert!(matches!(recorder.events().last(), Some(ViewEvent::Destroyed)));
    assert!(viewer.lines(inner_view).is_err());
    assert!(viewer.node_view(inner).is_err());
    assert_eq!(viewer.focused_node().unwrap(), root);
    viewer.shutdown();
}

/// Navigation walks the tree and reports moves that cannot happen.
#[test]
fn e2e_navigation_between_siblings() {
    let viewer = LogViewer::new(fast_options()).unwrap();
    let root = viewer.root_node().unwrap();
    let first = viewer.add_filter(root, "a", false).unwrap();
    let second = viewer.add_filter(root, "b", false).unwrap();
    assert_eq!(viewer.focused_node().unwrap(), second);

    assert!(viewer.navigate(Navigate::Prev).unwrap());
    assert_eq!(viewer.focused_node().unwrap(), first);
    assert!(viewer.navigate(Navigate::Parent).unwrap());
    assert_eq!(viewer.focused_node().unwrap(), root);
    assert!(!viewer.navigate(Navigate::Parent).unwrap());
    viewer.shutdown();
}

/// Deactivating a file marks its lines inactive wherever they are merged.
#[test]
fn e2e_deactivated_file_is_marked_inactive() {
    let viewer = LogViewer::new(fast_options()).unwrap();
    let a = viewer.open_file(fixture("service_a.log")).unwrap();
    caught_up(&viewer);

    viewer.set_active(a, false).unwrap();
    assert!(!viewer.summary(a).unwrap().active);
    let lines = viewer.lines(viewer.root_view()).unwrap();
    assert!(lines.iter().all(|l| !l.source().is_active()));
    viewer.shutdown();
}
