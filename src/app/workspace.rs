// LogWeave - app/workspace.rs
//
// Owner of every view, the view tree, and external listeners. Lives on the
// dispatcher thread as the dispatcher's state: every method here runs there
// and nowhere else.
//
// Views are kept in an arena keyed by `ViewId`. Views never hold references
// to each other; a derived view is a `Subscriber::View(id)` entry in its
// upstream view's subscriber list, and events are routed by id through a
// FIFO outbox. A view that disappears mid-flight is simply skipped.
//
// Event flow:
//   reader thread -> `ingest` task -> feed buffer -> (rate limited) file view
//   file view -> root merge (rate limited tick) -> filters -> listeners

use crate::app::dispatcher::{assert_on_dispatcher, DispatchHandle};
use crate::app::filtered::{FilterUpdate, FilteredView};
use crate::app::merged::MergedView;
use crate::app::rate_limit::{self, RateLimiter, Throttled};
use crate::app::tail::{FeedSink, FeedUpdate, FileFeed, TailOptions, TailProgress, TailState};
use crate::app::tree::{NodeId, ViewTree};
use crate::app::view::{
    ListenerId, Subscriber, View, ViewEvent, ViewId, ViewKindTag, ViewListener,
};
use crate::core::filter::LineFilter;
use crate::core::model::{Color, Line, SourceInfo};
use crate::core::parser::{LineParser, ParserConfig};
use crate::util::constants::{INGEST_UPDATE_INTERVAL_MS, MERGE_UPDATE_INTERVAL_MS};
use crate::util::error::{Result, ViewError};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::time::Duration;

/// Title of the root view.
pub const ROOT_TITLE: &str = "all files";

/// Settings applied to every view a workspace creates.
#[derive(Debug, Clone)]
pub struct WorkspaceOptions {
    pub parser: ParserConfig,
    pub tail: TailOptions,
    pub ingest_interval: Duration,
    pub merge_interval: Duration,
}

impl Default for WorkspaceOptions {
    fn default() -> Self {
        Self {
            parser: ParserConfig::default(),
            tail: TailOptions::default(),
            ingest_interval: Duration::from_millis(INGEST_UPDATE_INTERVAL_MS),
            merge_interval: Duration::from_millis(MERGE_UPDATE_INTERVAL_MS),
        }
    }
}

/// Focus movements within the view tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigate {
    Next,
    Prev,
    Parent,
    FirstChild,
    To(usize),
}

/// Snapshot of one view for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSummary {
    pub id: ViewId,
    pub kind: ViewKindTag,
    pub title: String,
    pub color: Color,
    pub active: bool,
    pub label_len: usize,
    pub line_count: usize,
    pub node: Option<NodeId>,
    pub nav_index: Option<usize>,
}

enum ViewKind {
    File(FileFeed),
    Filtered(FilteredView),
    Merged(MergedView),
}

struct ViewEntry {
    view: View,
    kind: ViewKind,
}

pub struct Workspace {
    handle: DispatchHandle<Workspace>,
    options: WorkspaceOptions,
    views: HashMap<ViewId, ViewEntry>,
    next_view: u64,
    listeners: HashMap<ListenerId, (ViewId, Box<dyn ViewListener>)>,
    next_listener: u64,
    tree: ViewTree,
    outbox: VecDeque<(ViewId, ViewEvent)>,
    publishing: bool,
    progress: mpsc::Sender<TailProgress>,
    files_opened: usize,
}

impl Workspace {
    /// Build the workspace with its root view. Runs on the dispatcher.
    pub fn new(
        handle: DispatchHandle<Workspace>,
        options: WorkspaceOptions,
        progress: mpsc::Sender<TailProgress>,
    ) -> Self {
        assert_on_dispatcher();
        let root = ViewId(0);
        let mut root_view = View::new(root, ViewKindTag::Merged, ROOT_TITLE, Color::default());
        // Labels name the files in the view; there are none yet.
        root_view.set_label_len(0);
        let mut views = HashMap::new();
        views.insert(
            root,
            ViewEntry {
                view: root_view,
                kind: ViewKind::Merged(MergedView::new(&[], options.merge_interval)),
            },
        );
        tracing::debug!("Workspace created");
        Self {
            handle,
            options,
            views,
            next_view: 1,
            listeners: HashMap::new(),
            next_listener: 0,
            tree: ViewTree::new(root),
            outbox: VecDeque::new(),
            publishing: false,
            progress,
            files_opened: 0,
        }
    }

    fn alloc_view_id(&mut self) -> ViewId {
        let id = ViewId(self.next_view);
        self.next_view += 1;
        id
    }

    fn entry(&self, id: ViewId) -> Result<&ViewEntry> {
        Ok(self
            .views
            .get(&id)
            .ok_or(ViewError::UnknownView { id: id.0 })?)
    }

    pub fn root_view(&self) -> ViewId {
        ViewId(0)
    }

    pub fn tree(&self) -> &ViewTree {
        &self.tree
    }

    // =========================================================================
    // Files
    // =========================================================================

    /// Open `path`, start following it, and add it to the root merge.
    pub fn open_file(&mut self, path: &Path) -> Result<ViewId> {
        assert_on_dispatcher();
        let parser = LineParser::new(&self.options.parser)?;

        let id = self.alloc_view_id();
        let title = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let color = Color::palette(self.files_opened);
        let source = Arc::new(SourceInfo::new(title.clone(), color));

        let handle = self.handle.clone();
        let sink: FeedSink = Box::new(move |update| {
            handle.submit(move |ws: &mut Workspace| ws.ingest(id, update))
        });
        let feed = FileFeed::start(
            path,
            &self.options.tail,
            parser,
            source,
            sink,
            self.progress.clone(),
            self.options.ingest_interval,
        )?;
        self.files_opened += 1;

        self.views.insert(
            id,
            ViewEntry {
                view: View::new(id, ViewKindTag::File, title, color),
                kind: ViewKind::File(feed),
            },
        );
        self.attach_source(self.root_view(), id);
        tracing::info!(file = %path.display(), %id, "File opened");
        Ok(id)
    }

    /// Stop following a file and drop it from every merge.
    pub fn close_file(&mut self, id: ViewId) -> Result<()> {
        assert_on_dispatcher();
        if !matches!(self.entry(id)?.kind, ViewKind::File(_)) {
            return Err(ViewError::WrongKind {
                id: id.0,
                expected: "file",
            }
            .into());
        }
        self.destroy_view(id);
        Ok(())
    }

    /// Reader output arriving on the dispatcher.
    fn ingest(&mut self, id: ViewId, update: FeedUpdate) {
        match self.views.get_mut(&id) {
            Some(ViewEntry {
                kind: ViewKind::File(feed),
                ..
            }) => feed.push(update),
            // Closed while the task was queued.
            _ => return,
        }
        rate_limit::request(self, id);
    }

    /// Move buffered reader output into the file view and announce it.
    fn publish_ingested(&mut self, id: ViewId) {
        let Some(entry) = self.views.get_mut(&id) else {
            return;
        };
        let ViewKind::File(feed) = &mut entry.kind else {
            return;
        };

        let mut reset = false;
        let mut grew = false;
        let mut appended: Vec<Arc<Line>> = Vec::new();
        for update in feed.take_pending() {
            match update {
                FeedUpdate::Reset => {
                    reset = true;
                    grew = false;
                    appended.clear();
                }
                FeedUpdate::Lines(lines) => appended.extend(lines),
                FeedUpdate::Grew => grew = true,
            }
        }

        let event = if reset {
            entry.view.replace(appended);
            Some(ViewEvent::FullUpdate)
        } else if !appended.is_empty() {
            entry.view.append(appended.iter().cloned());
            Some(ViewEvent::IncrementalUpdate(appended))
        } else {
            None
        };

        if let Some(event) = event {
            self.publish(id, event);
        }
        if grew {
            self.publish(id, ViewEvent::CacheCleared);
        }
    }

    pub fn tail_states(&self) -> Vec<(ViewId, PathBuf, TailState)> {
        let mut out: Vec<_> = self
            .views
            .iter()
            .filter_map(|(id, e)| match &e.kind {
                ViewKind::File(feed) => Some((*id, feed.path().to_path_buf(), feed.state())),
                _ => None,
            })
            .collect();
        out.sort_by_key(|(id, ..)| *id);
        out
    }

    /// True once every open file has read its initial content.
    pub fn all_caught_up(&self) -> bool {
        self.views.values().all(|e| match &e.kind {
            ViewKind::File(feed) => feed.state() != TailState::Starting,
            _ => true,
        })
    }

    // =========================================================================
    // Derived views
    // =========================================================================

    /// Add a filtered view of `parent`'s view as its child and focus it.
    ///
    /// The pattern is compiled before anything changes, so an invalid
    /// pattern leaves the tree untouched.
    pub fn add_filter(&mut self, parent: NodeId, pattern: &str, inverted: bool) -> Result<NodeId> {
        assert_on_dispatcher();
        let filter = LineFilter::new(pattern, inverted)?;
        let parent_view = self.tree.view(parent)?;
        self.entry(parent_view)?;

        let id = self.alloc_view_id();
        let upstream = &self.entry(parent_view)?.view;
        let filtered = FilteredView::new(parent_view, filter);
        let mut view = View::new(
            id,
            ViewKindTag::Filtered,
            filtered.filter().title(),
            upstream.color(),
        );
        view.set_label_len(upstream.label_len());
        filtered.recompute(&mut view, upstream.lines());

        if let Some(up) = self.views.get_mut(&parent_view) {
            up.view.subscribe(Subscriber::View(id));
        }
        self.views.insert(
            id,
            ViewEntry {
                view,
                kind: ViewKind::Filtered(filtered),
            },
        );
        let node = self.tree.add_child(parent, id)?;
        tracing::info!(%id, parent = %parent_view, pattern, inverted, "Filter added");
        Ok(node)
    }

    /// Replace the predicate of the filtered view at `node`.
    ///
    /// On an invalid pattern the old predicate, title and lines stay.
    pub fn set_filter(&mut self, node: NodeId, pattern: &str, inverted: bool) -> Result<()> {
        assert_on_dispatcher();
        let filter = LineFilter::new(pattern, inverted)?;
        let id = self.tree.view(node)?;
        let mut entry = self
            .views
            .remove(&id)
            .ok_or(ViewError::UnknownView { id: id.0 })?;

        let result = match &mut entry.kind {
            ViewKind::Filtered(f) => {
                f.set_filter(filter);
                entry.view.set_title(f.filter().title());
                let parent_lines = self
                    .views
                    .get(&f.parent())
                    .map(|e| e.view.lines())
                    .unwrap_or_default();
                f.recompute(&mut entry.view, parent_lines);
                Ok(())
            }
            _ => Err(ViewError::WrongKind {
                id: id.0,
                expected: "filtered",
            }),
        };
        self.views.insert(id, entry);
        result?;
        self.publish(id, ViewEvent::FullUpdate);
        Ok(())
    }

    /// Merge the views at `nodes` into a new view and focus it.
    ///
    /// The merge is placed under the sources' common parent, or under the
    /// root if they have none in common.
    pub fn add_merge(&mut self, nodes: &[NodeId]) -> Result<NodeId> {
        assert_on_dispatcher();
        if nodes.is_empty() {
            return Err(ViewError::EmptyMerge.into());
        }
        let mut sources: Vec<ViewId> = Vec::with_capacity(nodes.len());
        for &node in nodes {
            let view = self.tree.view(node)?;
            self.entry(view)?;
            if !sources.contains(&view) {
                sources.push(view);
            }
        }

        let first_parent = self.tree.parent(nodes[0]);
        let parent = match first_parent {
            Some(p) if nodes.iter().all(|&n| self.tree.parent(n) == Some(p)) => p,
            _ => self.tree.root(),
        };

        let id = self.alloc_view_id();
        let titles: Vec<&str> = sources
            .iter()
            .filter_map(|s| self.views.get(s).map(|e| e.view.title()))
            .collect();
        let mut view = View::new(id, ViewKindTag::Merged, titles.join(" + "), Color::default());
        view.set_label_len(self.max_label_len(&sources));

        for source in &sources {
            if let Some(up) = self.views.get_mut(source) {
                up.view.subscribe(Subscriber::View(id));
            }
        }
        self.views.insert(
            id,
            ViewEntry {
                view,
                kind: ViewKind::Merged(MergedView::new(&sources, self.options.merge_interval)),
            },
        );
        let node = self.tree.add_child(parent, id)?;
        tracing::info!(%id, sources = sources.len(), "Merge added");
        rate_limit::request(self, id);
        Ok(node)
    }

    fn max_label_len(&self, sources: &[ViewId]) -> usize {
        sources
            .iter()
            .filter_map(|s| self.views.get(s).map(|e| e.view.label_len()))
            .max()
            .unwrap_or(0)
    }

    /// Add `source` to the merged view `merged`.
    fn attach_source(&mut self, merged: ViewId, source: ViewId) {
        let label = self.max_label_len(&[source]);
        let Some(ViewEntry {
            view,
            kind: ViewKind::Merged(m),
        }) = self.views.get_mut(&merged)
        else {
            return;
        };
        if !m.add_source(source) {
            return;
        }
        view.set_label_len(view.label_len().max(label));
        if let Some(up) = self.views.get_mut(&source) {
            up.view.subscribe(Subscriber::View(merged));
        }
        rate_limit::request(self, merged);
    }

    fn merge_tick(&mut self, id: ViewId) {
        let Some(mut entry) = self.views.remove(&id) else {
            return;
        };
        let event = match &mut entry.kind {
            ViewKind::Merged(m) => {
                let views = &self.views;
                m.tick(&mut entry.view, |src| views.get(&src).map(|e| e.view.lines()))
            }
            _ => None,
        };
        self.views.insert(id, entry);
        if let Some(event) = event {
            self.publish(id, event);
        }
    }

    // =========================================================================
    // Tree edits and navigation
    // =========================================================================

    /// Remove `node` and destroy every view in its subtree.
    pub fn remove_node(&mut self, node: NodeId) -> Result<()> {
        assert_on_dispatcher();
        let doomed = self.tree.remove(node)?;
        for id in doomed {
            self.destroy_view(id);
        }
        Ok(())
    }

    pub fn navigate(&mut self, nav: Navigate) -> bool {
        assert_on_dispatcher();
        match nav {
            Navigate::Next => self.tree.move_focus_next(),
            Navigate::Prev => self.tree.move_focus_prev(),
            Navigate::Parent => self.tree.move_focus_parent(),
            Navigate::FirstChild => self.tree.move_focus_first_child(),
            Navigate::To(index) => self.tree.move_focus_to(index),
        }
    }

    pub fn focused_node(&self) -> NodeId {
        self.tree.focus()
    }

    fn destroy_view(&mut self, id: ViewId) {
        // Downstream views and listeners hear about it while it still exists.
        self.deliver(id, &ViewEvent::Destroyed);

        let Some(mut entry) = self.views.remove(&id) else {
            return;
        };
        let upstream: Vec<ViewId> = match &mut entry.kind {
            ViewKind::File(feed) => {
                feed.stop();
                Vec::new()
            }
            ViewKind::Filtered(f) => vec![f.parent()],
            ViewKind::Merged(m) => m.sources().collect(),
        };
        for up in upstream {
            if let Some(e) = self.views.get_mut(&up) {
                e.view.unsubscribe(Subscriber::View(id));
            }
        }
        self.listeners.retain(|_, (view, _)| *view != id);
        entry.view.clear();
        tracing::debug!(%id, title = entry.view.title(), "View destroyed");
        self.drain_outbox();
    }

    // =========================================================================
    // Presentation
    // =========================================================================

    /// Enable or disable a view's lines for display.
    pub fn set_active(&mut self, id: ViewId, active: bool) -> Result<()> {
        assert_on_dispatcher();
        let entry = self
            .views
            .get_mut(&id)
            .ok_or(ViewError::UnknownView { id: id.0 })?;
        entry.view.set_active(active);
        if let ViewKind::File(feed) = &entry.kind {
            feed.source().set_active(active);
        }
        self.publish(id, ViewEvent::CacheCleared);
        Ok(())
    }

    pub fn lines(&self, id: ViewId) -> Result<Vec<Arc<Line>>> {
        Ok(self.entry(id)?.view.lines().to_vec())
    }

    /// Line count; a merged view reports the sum of its sources' counts.
    pub fn line_count(&self, id: ViewId) -> Result<usize> {
        let entry = self.entry(id)?;
        match &entry.kind {
            ViewKind::Merged(m) => Ok(m
                .sources()
                .filter_map(|s| self.line_count(s).ok())
                .sum()),
            _ => Ok(entry.view.len()),
        }
    }

    pub fn summary(&self, id: ViewId) -> Result<ViewSummary> {
        let entry = self.entry(id)?;
        let node = self.tree.node_for_view(id);
        Ok(ViewSummary {
            id,
            kind: entry.view.kind(),
            title: entry.view.title().to_string(),
            color: entry.view.color(),
            active: entry.view.is_active(),
            label_len: entry.view.label_len(),
            line_count: self.line_count(id)?,
            node,
            nav_index: node.and_then(|n| self.tree.nav_index(n)),
        })
    }

    /// Summaries of every live view, by id.
    pub fn list_views(&self) -> Vec<ViewSummary> {
        let mut ids: Vec<ViewId> = self.views.keys().copied().collect();
        ids.sort();
        ids.into_iter().filter_map(|id| self.summary(id).ok()).collect()
    }

    // =========================================================================
    // Listeners
    // =========================================================================

    /// Register `listener` on `view`. It immediately receives a full update.
    pub fn subscribe(&mut self, view: ViewId, mut listener: Box<dyn ViewListener>) -> Result<ListenerId> {
        assert_on_dispatcher();
        let entry = self
            .views
            .get_mut(&view)
            .ok_or(ViewError::UnknownView { id: view.0 })?;
        let lid = ListenerId(self.next_listener);
        self.next_listener += 1;
        entry.view.subscribe(Subscriber::Listener(lid));
        listener.on_full_update(&entry.view);
        self.listeners.insert(lid, (view, listener));
        Ok(lid)
    }

    pub fn unsubscribe(&mut self, listener: ListenerId) -> bool {
        assert_on_dispatcher();
        let Some((view, _)) = self.listeners.remove(&listener) else {
            return false;
        };
        if let Some(e) = self.views.get_mut(&view) {
            e.view.unsubscribe(Subscriber::Listener(listener));
        }
        true
    }

    // =========================================================================
    // Event routing
    // =========================================================================

    fn publish(&mut self, id: ViewId, event: ViewEvent) {
        self.outbox.push_back((id, event));
        self.drain_outbox();
    }

    /// Deliver queued events in order. Events raised while delivering join
    /// the back of the queue instead of nesting.
    fn drain_outbox(&mut self) {
        if self.publishing {
            return;
        }
        self.publishing = true;
        while let Some((id, event)) = self.outbox.pop_front() {
            self.deliver(id, &event);
        }
        self.publishing = false;
    }

    fn deliver(&mut self, id: ViewId, event: &ViewEvent) {
        let Some(entry) = self.views.get(&id) else {
            return;
        };
        tracing::trace!(%id, event = event.name(), "Deliver");
        for subscriber in entry.view.subscribers().to_vec() {
            match subscriber {
                Subscriber::Listener(lid) => self.notify_listener(lid, id, event),
                Subscriber::View(child) => self.on_upstream_event(child, id, event),
            }
        }
    }

    fn notify_listener(&mut self, lid: ListenerId, id: ViewId, event: &ViewEvent) {
        let Some(entry) = self.views.get(&id) else {
            return;
        };
        let Some((_, listener)) = self.listeners.get_mut(&lid) else {
            return;
        };
        let view = &entry.view;
        match event {
            ViewEvent::FullUpdate => listener.on_full_update(view),
            ViewEvent::IncrementalUpdate(lines) => listener.on_incremental_update(view, lines),
            ViewEvent::CacheCleared => listener.on_cache_cleared(view),
            ViewEvent::Destroyed => listener.on_destroyed(view),
        }
    }

    fn on_upstream_event(&mut self, child: ViewId, upstream: ViewId, event: &ViewEvent) {
        let Some(mut entry) = self.views.remove(&child) else {
            return;
        };
        let mut out = None;
        let mut tick = false;

        match &mut entry.kind {
            ViewKind::Filtered(f) => {
                let parent_lines = self
                    .views
                    .get(&upstream)
                    .map(|e| e.view.lines())
                    .unwrap_or_default();
                out = match event {
                    ViewEvent::FullUpdate => {
                        f.recompute(&mut entry.view, parent_lines);
                        Some(ViewEvent::FullUpdate)
                    }
                    ViewEvent::IncrementalUpdate(new_lines) => {
                        match f.on_incremental(&mut entry.view, new_lines, parent_lines) {
                            FilterUpdate::Unchanged => None,
                            FilterUpdate::Appended(lines) => {
                                Some(ViewEvent::IncrementalUpdate(lines))
                            }
                            FilterUpdate::Recomputed => Some(ViewEvent::FullUpdate),
                        }
                    }
                    ViewEvent::CacheCleared => Some(ViewEvent::CacheCleared),
                    // The tree removes filters together with their parent.
                    ViewEvent::Destroyed => None,
                };
            }
            ViewKind::Merged(m) => match event {
                ViewEvent::FullUpdate => {
                    m.invalidate();
                    tick = true;
                }
                ViewEvent::IncrementalUpdate(_) => tick = true,
                ViewEvent::CacheCleared => out = Some(ViewEvent::CacheCleared),
                ViewEvent::Destroyed => tick = m.remove_source(upstream),
            },
            ViewKind::File(_) => {}
        }

        self.views.insert(child, entry);
        if let Some(event) = out {
            self.publish(child, event);
        }
        if tick {
            rate_limit::request(self, child);
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Run every pending rate-limited update now, until none remain.
    pub fn flush(&mut self) {
        assert_on_dispatcher();
        loop {
            let mut ids: Vec<ViewId> = self.views.keys().copied().collect();
            ids.sort();
            let mut ran = false;
            for id in ids {
                ran |= rate_limit::flush(self, id);
            }
            if !ran {
                break;
            }
        }
    }

    /// Stop and join every reader thread.
    pub fn shutdown(&mut self) {
        for entry in self.views.values_mut() {
            if let ViewKind::File(feed) = &mut entry.kind {
                feed.stop();
            }
        }
        tracing::debug!("Workspace: readers stopped");
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Throttled for Workspace {
    type Key = ViewId;

    fn limiter(&mut self, key: ViewId) -> Option<&mut RateLimiter> {
        match &mut self.views.get_mut(&key)?.kind {
            ViewKind::File(feed) => Some(feed.limiter_mut()),
            ViewKind::Merged(m) => Some(m.limiter_mut()),
            ViewKind::Filtered(_) => None,
        }
    }

    fn run_throttled(&mut self, key: ViewId) {
        match self.views.get(&key).map(|e| e.view.kind()) {
            Some(ViewKindTag::File) => self.publish_ingested(key),
            Some(ViewKindTag::Merged) => self.merge_tick(key),
            _ => {}
        }
    }

    fn dispatch_handle(&self) -> DispatchHandle<Self> {
        self.handle.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::dispatcher::Dispatcher;
    use std::io::Write;
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    impl ViewListener for Recorder {
        fn on_full_update(&mut self, view: &View) {
            self.0.lock().unwrap().push(format!("full:{}", view.len()));
        }
        fn on_incremental_update(&mut self, _view: &View, new_lines: &[Arc<Line>]) {
            self.0.lock().unwrap().push(format!("inc:{}", new_lines.len()));
        }
        fn on_cache_cleared(&mut self, _view: &View) {
            self.0.lock().unwrap().push("cleared".into());
        }
        fn on_destroyed(&mut self, _view: &View) {
            self.0.lock().unwrap().push("destroyed".into());
        }
    }

    fn spawn() -> Dispatcher<Workspace> {
        Dispatcher::spawn("test-workspace", |handle| {
            let (tx, _rx) = mpsc::channel();
            Workspace::new(handle, WorkspaceOptions::default(), tx)
        })
        .unwrap()
    }

    /// Wait for every reader to catch up, then publish everything pending.
    fn settle(d: &Dispatcher<Workspace>) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !d.call(|ws| ws.all_caught_up()).unwrap() {
            assert!(Instant::now() < deadline, "readers did not catch up");
            std::thread::sleep(Duration::from_millis(10));
        }
        d.call(|ws| ws.flush()).unwrap();
    }

    fn write_log(dir: &tempfile::TempDir, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        for l in lines {
            writeln!(f, "{l}").unwrap();
        }
        path
    }

    fn texts(d: &Dispatcher<Workspace>, id: ViewId) -> Vec<String> {
        d.call(move |ws| {
            ws.lines(id)
                .unwrap()
                .iter()
                .map(|l| l.text().to_string())
                .collect()
        })
        .unwrap()
    }

    #[test]
    fn test_empty_root_has_no_label_width() {
        let d = spawn();
        let label = d.call(|ws| ws.summary(ViewId(0)).unwrap().label_len).unwrap();
        assert_eq!(label, 0);
    }

    #[test]
    fn test_root_merges_open_files_by_time() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_log(&dir, "a.log", &["2024-01-15 10:00:01 a1", "2024-01-15 10:00:03 a3"]);
        let b = write_log(&dir, "b.log", &["2024-01-15 10:00:02 b2"]);

        let d = spawn();
        d.call(move |ws| ws.open_file(&a)).unwrap().unwrap();
        d.call(move |ws| ws.open_file(&b)).unwrap().unwrap();
        settle(&d);

        let root = ViewId(0);
        assert_eq!(
            texts(&d, root),
            vec!["2024-01-15 10:00:01 a1", "2024-01-15 10:00:02 b2", "2024-01-15 10:00:03 a3"]
        );
        let (count, indices, label) = d
            .call(move |ws| {
                let idx: Vec<usize> = ws.lines(root).unwrap().iter().map(|l| l.index()).collect();
                (ws.line_count(root).unwrap(), idx, ws.summary(root).unwrap().label_len)
            })
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(label, "a.log".len());
    }

    #[test]
    fn test_missing_file_is_an_error_and_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.log");
        let d = spawn();
        let result = d.call(move |ws| ws.open_file(&missing)).unwrap();
        assert!(result.is_err());
        assert_eq!(d.call(|ws| ws.list_views().len()).unwrap(), 1);
    }

    #[test]
    fn test_invalid_filter_leaves_tree_unchanged() {
        let d = spawn();
        let (result, nodes) = d
            .call(|ws| {
                let root = ws.tree().root();
                (ws.add_filter(root, "[oops", false), ws.tree().len())
            })
            .unwrap();
        assert!(result.is_err());
        assert_eq!(nodes, 1);
    }

    #[test]
    fn test_filter_follows_appends_and_notifies_listener() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(
            &dir,
            "app.log",
            &["2024-01-15 10:00:01 ERROR one", "2024-01-15 10:00:02 INFO two"],
        );
        let d = spawn();
        let file = path.clone();
        d.call(move |ws| ws.open_file(&file)).unwrap().unwrap();
        settle(&d);

        let recorder = Recorder::default();
        let rec = recorder.clone();
        let (node, view) = d
            .call(move |ws| {
                let node = ws.add_filter(ws.tree().root(), "ERROR", false).unwrap();
                let view = ws.tree().view(node).unwrap();
                ws.subscribe(view, Box::new(rec)).unwrap();
                (node, view)
            })
            .unwrap();
        assert_eq!(recorder.events(), vec!["full:1"]);
        assert_eq!(d.call(|ws| ws.focused_node()).unwrap(), node);

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "2024-01-15 10:00:03 ERROR three").unwrap();
        writeln!(f, "2024-01-15 10:00:04 INFO four").unwrap();
        f.flush().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while texts(&d, view).len() < 2 {
            assert!(Instant::now() < deadline, "filtered view never grew");
            std::thread::sleep(Duration::from_millis(20));
            d.call(|ws| ws.flush()).unwrap();
        }
        assert_eq!(
            texts(&d, view),
            vec!["2024-01-15 10:00:01 ERROR one", "2024-01-15 10:00:03 ERROR three"]
        );
        assert!(recorder.events().contains(&"inc:1".to_string()));
    }

    #[test]
    fn test_set_filter_recomputes_and_bad_pattern_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(&dir, "app.log", &["10:00:00 ERROR a", "10:00:01 WARN b"]);
        let d = spawn();
        d.call(move |ws| ws.open_file(&path)).unwrap().unwrap();
        settle(&d);

        let node = d
            .call(|ws| ws.add_filter(ws.tree().root(), "ERROR", false).unwrap())
            .unwrap();
        let view = d.call(move |ws| ws.tree().view(node).unwrap()).unwrap();

        let bad = d.call(move |ws| ws.set_filter(node, "(", false)).unwrap();
        assert!(bad.is_err());
        assert_eq!(texts(&d, view), vec!["10:00:00 ERROR a"]);

        d.call(move |ws| ws.set_filter(node, "ERROR", true)).unwrap().unwrap();
        assert_eq!(texts(&d, view), vec!["10:00:01 WARN b"]);
        let title = d.call(move |ws| ws.summary(view).unwrap().title).unwrap();
        assert_eq!(title, "grep -v ERROR");
    }

    #[test]
    fn test_remove_node_destroys_subtree() {
        let d = spawn();
        let recorder = Recorder::default();
        let rec = recorder.clone();
        let (outcome, root_err, views_left) = d
            .call(move |ws| {
                let root = ws.tree().root();
                let f1 = ws.add_filter(root, "a", false).unwrap();
                let f2 = ws.add_filter(f1, "b", false).unwrap();
                let v2 = ws.tree().view(f2).unwrap();
                ws.subscribe(v2, Box::new(rec)).unwrap();
                let outcome = ws.remove_node(f1);
                let root_err = ws.remove_node(root);
                (outcome.is_ok(), root_err.is_err(), ws.list_views().len())
            })
            .unwrap();
        assert!(outcome);
        assert!(root_err);
        assert_eq!(views_left, 1);
        assert_eq!(recorder.events(), vec!["full:0", "destroyed"]);
    }

    #[test]
    fn test_set_active_fires_cache_cleared() {
        let recorder = Recorder::default();
        let rec = recorder.clone();
        let d = spawn();
        d.call(move |ws| {
            let root = ws.root_view();
            ws.subscribe(root, Box::new(rec)).unwrap();
            ws.set_active(root, false).unwrap();
        })
        .unwrap();
        assert_eq!(recorder.events(), vec!["full:0", "cleared"]);
    }

    #[test]
    fn test_empty_merge_rejected() {
        let d = spawn();
        let err = d.call(|ws| ws.add_merge(&[]).unwrap_err()).unwrap();
        assert!(err.to_string().contains("at least one source"));
    }

    #[test]
    fn test_merge_of_filters() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(
            &dir,
            "app.log",
            &["10:00:01 ERROR a", "10:00:02 WARN b", "10:00:03 INFO c"],
        );
        let d = spawn();
        d.call(move |ws| ws.open_file(&path)).unwrap().unwrap();
        settle(&d);

        let merged = d
            .call(|ws| {
                let root = ws.tree().root();
                let e = ws.add_filter(root, "ERROR", false).unwrap();
                let w = ws.add_filter(root, "WARN", false).unwrap();
                let node = ws.add_merge(&[w, e]).unwrap();
                ws.flush();
                ws.tree().view(node).unwrap()
            })
            .unwrap();
        assert_eq!(texts(&d, merged), vec!["10:00:01 ERROR a", "10:00:02 WARN b"]);
        assert_eq!(d.call(move |ws| ws.line_count(merged).unwrap()).unwrap(), 2);
    }

    fn indices(d: &Dispatcher<Workspace>, id: ViewId) -> Vec<usize> {
        d.call(move |ws| ws.lines(id).unwrap().iter().map(|l| l.index()).collect())
            .unwrap()
    }

    #[test]
    fn test_user_merge_leaves_root_numbering_intact() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(
            &dir,
            "app.log",
            &["10:00:01 ERROR a", "10:00:02 WARN b", "10:00:03 INFO c", "10:00:04 ERROR d"],
        );
        let d = spawn();
        d.call(move |ws| ws.open_file(&path)).unwrap().unwrap();
        settle(&d);

        let merged = d
            .call(|ws| {
                let root = ws.tree().root();
                let e = ws.add_filter(root, "ERROR", false).unwrap();
                let w = ws.add_filter(root, "WARN", false).unwrap();
                let node = ws.add_merge(&[e, w]).unwrap();
                ws.flush();
                ws.tree().view(node).unwrap()
            })
            .unwrap();

        assert_eq!(indices(&d, ViewId(0)), vec![0, 1, 2, 3]);
        assert_eq!(indices(&d, merged), vec![0, 1, 2]);
        assert_eq!(
            texts(&d, merged),
            vec!["10:00:01 ERROR a", "10:00:02 WARN b", "10:00:04 ERROR d"]
        );
    }

    #[test]
    fn test_merge_of_root_and_its_filter_numbers_each_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(&dir, "app.log", &["10:00:01 ERROR a", "10:00:02 INFO b"]);
        let d = spawn();
        d.call(move |ws| ws.open_file(&path)).unwrap().unwrap();
        settle(&d);

        let merged = d
            .call(|ws| {
                let root = ws.tree().root();
                let e = ws.add_filter(root, "ERROR", false).unwrap();
                let node = ws.add_merge(&[root, e]).unwrap();
                ws.flush();
                ws.tree().view(node).unwrap()
            })
            .unwrap();

        assert_eq!(indices(&d, merged), vec![0, 1, 2]);
        assert_eq!(indices(&d, ViewId(0)), vec![0, 1]);
        assert_eq!(
            texts(&d, merged),
            vec!["10:00:01 ERROR a", "10:00:01 ERROR a", "10:00:02 INFO b"]
        );
    }
}
