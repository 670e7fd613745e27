// LogWeave - core/model.rs
//
// Core data model types. Pure data definitions with no I/O and no threads.
//
// These types are the shared vocabulary across all layers: the parser
// produces `Line`s, every view holds `Arc<Line>`s, and renderers resolve a
// line's label and colour through its `LineSource`.

use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::util::constants::{SOURCE_PALETTE, TAB_WIDTH};

// =============================================================================
// Colour
// =============================================================================

/// RGB colour attached to a source or view for renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Colour number `n` of the source palette, wrapping around.
    pub fn palette(n: usize) -> Self {
        let (r, g, b) = SOURCE_PALETTE[n % SOURCE_PALETTE.len()];
        Self { r, g, b }
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::rgb(0xC0, 0xC0, 0xC0)
    }
}

// =============================================================================
// Line source
// =============================================================================

/// What a line needs to know about where it came from.
///
/// A capability, not ownership: lines keep their source alive for labelling
/// but never reach the view that buffers them through it.
pub trait LineSource: fmt::Debug + Send + Sync {
    fn title(&self) -> &str;
    fn color(&self) -> Color;
    fn is_active(&self) -> bool;
}

/// The `LineSource` of one opened file. Shared between the file's view and
/// every line parsed from it.
#[derive(Debug)]
pub struct SourceInfo {
    title: String,
    color: Color,
    active: AtomicBool,
}

impl SourceInfo {
    pub fn new(title: impl Into<String>, color: Color) -> Self {
        Self {
            title: title.into(),
            color,
            active: AtomicBool::new(true),
        }
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }
}

impl LineSource for SourceInfo {
    fn title(&self) -> &str {
        &self.title
    }

    fn color(&self) -> Color {
        self.color
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Line
// =============================================================================

/// One parsed log record plus any continuation text grouped under it.
///
/// The record itself is shared; `Line` pairs it with the position the
/// holding view gives it. A file view holds the lines its parser built, and
/// filtered views share them. A merged view holds its own `Line`s over the
/// same records (see `renumbered`), so numbering one merge never disturbs
/// another, and a record merged in twice gets two positions.
///
/// After construction only two things ever change:
///   - the continuation lines grow (the reader thread may append while the
///     dispatcher renders, so they sit behind a lock and are read as a
///     snapshot);
///   - `index` is rewritten by the merged view that owns this `Line`.
///
/// Equality and hashing use the sanitized raw text only.
#[derive(Debug)]
pub struct Line {
    record: Arc<Record>,
    index: AtomicUsize,
}

#[derive(Debug)]
struct Record {
    text: String,
    timestamp: i64,
    date_changes: u32,
    additional_lines: RwLock<Vec<String>>,
    source: Arc<dyn LineSource>,
}

impl Line {
    /// Build a line. Tabs in `text` are expanded before storage.
    pub fn new(
        index: usize,
        text: &str,
        timestamp: i64,
        date_changes: u32,
        source: Arc<dyn LineSource>,
    ) -> Self {
        Self {
            record: Arc::new(Record {
                text: expand_tabs(text).into_owned(),
                timestamp,
                date_changes,
                additional_lines: RwLock::new(Vec::new()),
                source,
            }),
            index: AtomicUsize::new(index),
        }
    }

    /// A new `Line` over the same record at `index`. Continuation lines
    /// appended through either are seen by both.
    pub fn renumbered(&self, index: usize) -> Self {
        Self {
            record: Arc::clone(&self.record),
            index: AtomicUsize::new(index),
        }
    }

    /// True when both refer to the same parsed record.
    pub fn same_record(&self, other: &Line) -> bool {
        Arc::ptr_eq(&self.record, &other.record)
    }

    /// Sanitized raw text of the first physical line.
    pub fn text(&self) -> &str {
        &self.record.text
    }

    /// Milliseconds; epoch-based for dated formats, midnight-based (plus
    /// whole days per detected date change) for time-of-day formats, 0 when
    /// the stream never produced a timestamp.
    pub fn timestamp(&self) -> i64 {
        self.record.timestamp
    }

    /// The parser's date-change counter at the time this line was parsed.
    pub fn date_changes(&self) -> u32 {
        self.record.date_changes
    }

    /// Position of this line in the view that numbered it: the file view
    /// for parsed lines, the merged view for its own `Line`s.
    pub fn index(&self) -> usize {
        self.index.load(Ordering::Relaxed)
    }

    /// Re-number the line. Only the merged view holding it calls this.
    pub(crate) fn set_index(&self, index: usize) {
        self.index.store(index, Ordering::Relaxed);
    }

    pub fn source(&self) -> &Arc<dyn LineSource> {
        &self.record.source
    }

    /// Append continuation text. Tabs are expanded.
    pub fn push_additional(&self, text: &str) {
        self.record
            .additional_lines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(expand_tabs(text).into_owned());
    }

    /// Snapshot of the continuation lines, safe against concurrent appends.
    pub fn additional_lines(&self) -> Vec<String> {
        self.record
            .additional_lines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn additional_count(&self) -> usize {
        self.record
            .additional_lines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Raw text and every continuation line, newline-joined.
    pub fn full_text(&self) -> String {
        let text = &self.record.text;
        let extra = self
            .record
            .additional_lines
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if extra.is_empty() {
            return text.clone();
        }
        let mut out = String::with_capacity(
            text.len() + extra.iter().map(|l| l.len() + 1).sum::<usize>(),
        );
        out.push_str(text);
        for l in extra.iter() {
            out.push('\n');
            out.push_str(l);
        }
        out
    }
}

impl PartialEq for Line {
    fn eq(&self, other: &Self) -> bool {
        self.record.text == other.record.text
    }
}

impl Eq for Line {}

impl Hash for Line {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.record.text.hash(state);
    }
}

/// Expand every tab to `TAB_WIDTH` spaces.
pub fn expand_tabs(raw: &str) -> Cow<'_, str> {
    if raw.contains('\t') {
        Cow::Owned(raw.replace('\t', &" ".repeat(TAB_WIDTH)))
    } else {
        Cow::Borrowed(raw)
    }
}

// =============================================================================
// Parse outcome
// =============================================================================

/// What one raw physical line turned into.
#[derive(Debug)]
pub enum ParseOutcome {
    /// A new record.
    NewLine(Line),
    /// Sanitized text that belongs to the previous record.
    Continuation(String),
}
