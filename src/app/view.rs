// LogWeave - app/view.rs
//
// State shared by every view kind: identity, presentation attributes, the
// ordered line buffer, and the subscriber list. Kind-specific behaviour lives
// in `tail` (ingestion), `filtered` and `merged`; the workspace owns every
// `View` and routes events between them.
//
// All of this is only ever touched on the dispatcher thread.

use std::fmt;
use std::sync::Arc;

use crate::core::model::{Color, Line};

/// Stable identifier of a live view. Never reused within a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(pub(crate) u64);

impl ViewId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view#{}", self.0)
    }
}

/// Identifier of a registered external listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

/// Notification a view sends to its subscribers.
#[derive(Debug, Clone)]
pub enum ViewEvent {
    /// The whole buffer may have changed; re-read it.
    FullUpdate,
    /// These lines were appended to the end of the buffer.
    IncrementalUpdate(Vec<Arc<Line>>),
    /// Line contents or presentation changed but the set of lines did not.
    CacheCleared,
    /// The view is being torn down.
    Destroyed,
}

impl ViewEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FullUpdate => "full",
            Self::IncrementalUpdate(_) => "incremental",
            Self::CacheCleared => "cache-cleared",
            Self::Destroyed => "destroyed",
        }
    }
}

/// Observer of a view, typically a renderer.
///
/// Callbacks run on the dispatcher thread and must not block.
pub trait ViewListener: Send {
    /// Called once on subscribe and whenever the buffer changed wholesale.
    fn on_full_update(&mut self, view: &View);

    fn on_incremental_update(&mut self, view: &View, new_lines: &[Arc<Line>]);

    fn on_cache_cleared(&mut self, _view: &View) {}

    fn on_destroyed(&mut self, _view: &View) {}
}

/// Who receives a view's events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscriber {
    /// A derived view fed by this one.
    View(ViewId),
    /// An external listener registered with the workspace.
    Listener(ListenerId),
}

/// Which kind of view this is, for callers that only need the label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKindTag {
    File,
    Filtered,
    Merged,
}

/// Common core of every view.
#[derive(Debug)]
pub struct View {
    id: ViewId,
    kind: ViewKindTag,
    title: String,
    color: Color,
    active: bool,
    label_len: usize,
    lines: Vec<Arc<Line>>,
    subscribers: Vec<Subscriber>,
}

impl View {
    pub(crate) fn new(id: ViewId, kind: ViewKindTag, title: impl Into<String>, color: Color) -> Self {
        let title = title.into();
        Self {
            id,
            kind,
            label_len: title.chars().count(),
            title,
            color,
            active: true,
            lines: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    pub fn id(&self) -> ViewId {
        self.id
    }

    pub fn kind(&self) -> ViewKindTag {
        self.kind
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Widest source label among the lines this view can contain, in chars.
    pub fn label_len(&self) -> usize {
        self.label_len
    }

    pub fn lines(&self) -> &[Arc<Line>] {
        &self.lines
    }

    pub fn line(&self, index: usize) -> Option<&Arc<Line>> {
        self.lines.get(index)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn subscribers(&self) -> &[Subscriber] {
        &self.subscribers
    }

    // --- Mutation (workspace and view kinds only) -----------------------

    pub(crate) fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub(crate) fn set_label_len(&mut self, label_len: usize) {
        self.label_len = label_len;
    }

    pub(crate) fn append(&mut self, lines: impl IntoIterator<Item = Arc<Line>>) {
        self.lines.extend(lines);
    }

    pub(crate) fn replace(&mut self, lines: Vec<Arc<Line>>) {
        self.lines = lines;
    }

    pub(crate) fn split_off(&mut self, at: usize) -> Vec<Arc<Line>> {
        self.lines.split_off(at)
    }

    pub(crate) fn clear(&mut self) {
        self.lines.clear();
    }

    pub(crate) fn subscribe(&mut self, subscriber: Subscriber) {
        if !self.subscribers.contains(&subscriber) {
            self.subscribers.push(subscriber);
        }
    }

    /// Returns `true` if the subscriber was present.
    pub(crate) fn unsubscribe(&mut self, subscriber: Subscriber) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| *s != subscriber);
        self.subscribers.len() != before
    }
}
