// LogWeave - app/merged.rs
//
// A view interleaving the lines of several source views by timestamp.
//
// Each source has a cursor: how many of its lines the merge has consumed.
// A merge tick (rate limited by the workspace) pulls everything past each
// cursor, orders the batch by (timestamp, position in source), and then:
//   - appends it if it starts no earlier than the current tail, firing an
//     incremental update (a full update on first population);
//   - otherwise merge-inserts it into the existing tail and fires a full
//     update, so the buffer stays time-ordered whatever order sources
//     deliver in.
// The merge buffers its own `Line`s over the source records and numbers
// only those, so a record shared with other merges, or merged in twice,
// keeps an independent position in each.
//
// A full update from any source invalidates the cursors; the next tick
// rebuilds from scratch.

use crate::app::rate_limit::RateLimiter;
use crate::app::view::{View, ViewEvent, ViewId};
use crate::core::model::Line;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cursor {
    view: ViewId,
    consumed: usize,
}

#[derive(Debug)]
pub struct MergedView {
    sources: Vec<Cursor>,
    limiter: RateLimiter,
    populated: bool,
    rebuild: bool,
}

impl MergedView {
    pub fn new(sources: &[ViewId], update_interval: Duration) -> Self {
        let mut merged = Self {
            sources: Vec::with_capacity(sources.len()),
            limiter: RateLimiter::new(update_interval),
            populated: false,
            rebuild: false,
        };
        for &source in sources {
            merged.add_source(source);
        }
        merged
    }

    pub fn sources(&self) -> impl Iterator<Item = ViewId> + '_ {
        self.sources.iter().map(|c| c.view)
    }

    pub fn has_source(&self, view: ViewId) -> bool {
        self.sources.iter().any(|c| c.view == view)
    }

    /// Add a source; its existing lines are merged in by the next tick.
    /// Returns `false` if it was already a source.
    pub fn add_source(&mut self, view: ViewId) -> bool {
        if self.has_source(view) {
            return false;
        }
        self.sources.push(Cursor { view, consumed: 0 });
        true
    }

    /// Drop a source; the next tick rebuilds without it.
    pub fn remove_source(&mut self, view: ViewId) -> bool {
        let before = self.sources.len();
        self.sources.retain(|c| c.view != view);
        let removed = self.sources.len() != before;
        self.rebuild |= removed;
        removed
    }

    /// A source changed wholesale.
    pub fn invalidate(&mut self) {
        self.rebuild = true;
    }

    pub(crate) fn limiter_mut(&mut self) -> &mut RateLimiter {
        &mut self.limiter
    }

    /// Pull new source lines into `view`. `lookup` resolves a source's
    /// current buffer; sources it cannot resolve contribute nothing.
    pub fn tick<'a>(
        &mut self,
        view: &mut View,
        lookup: impl Fn(ViewId) -> Option<&'a [Arc<Line>]>,
    ) -> Option<ViewEvent> {
        let shrunk = self.sources.iter().any(|c| {
            lookup(c.view).is_some_and(|lines| lines.len() < c.consumed)
        });
        let reset = self.rebuild || shrunk;
        if reset {
            self.rebuild = false;
            self.populated = false;
            for cursor in &mut self.sources {
                cursor.consumed = 0;
            }
            view.clear();
        }

        // (position in source, line); sorted by (timestamp, position).
        let mut batch: Vec<(usize, Arc<Line>)> = Vec::new();
        for cursor in &mut self.sources {
            let Some(lines) = lookup(cursor.view) else {
                continue;
            };
            let start = cursor.consumed;
            if lines.len() > start {
                batch.extend(
                    lines[start..]
                        .iter()
                        .enumerate()
                        .map(|(i, l)| (start + i, Arc::clone(l))),
                );
                cursor.consumed = lines.len();
            }
        }

        if batch.is_empty() {
            return reset.then_some(ViewEvent::FullUpdate);
        }
        batch.sort_by_key(|(pos, line)| (line.timestamp(), *pos));
        let first_ts = batch[0].1.timestamp();
        let batch: Vec<Arc<Line>> = batch
            .into_iter()
            .map(|(_, l)| Arc::new(l.renumbered(0)))
            .collect();

        let appendable = view
            .lines()
            .last()
            .map_or(true, |last| last.timestamp() <= first_ts);

        if appendable {
            let base = view.len();
            for (i, line) in batch.iter().enumerate() {
                line.set_index(base + i);
            }
            view.append(batch.iter().cloned());
            tracing::debug!(view = %view.id(), appended = batch.len(), total = view.len(), "Merge tick");
            if self.populated {
                return Some(ViewEvent::IncrementalUpdate(batch));
            }
            self.populated = true;
            return Some(ViewEvent::FullUpdate);
        }

        let at = view
            .lines()
            .partition_point(|l| l.timestamp() <= first_ts);
        let tail = view.split_off(at);
        let merged = merge_by_timestamp(tail, batch);
        for (i, line) in merged.iter().enumerate() {
            line.set_index(at + i);
        }
        tracing::debug!(
            view = %view.id(),
            insert_at = at,
            reordered = merged.len(),
            "Merge tick: late lines inserted"
        );
        view.append(merged);
        self.populated = true;
        Some(ViewEvent::FullUpdate)
    }
}

/// Stable two-way merge; `existing` wins ties.
fn merge_by_timestamp(existing: Vec<Arc<Line>>, incoming: Vec<Arc<Line>>) -> Vec<Arc<Line>> {
    let mut out = Vec::with_capacity(existing.len() + incoming.len());
    let mut a = existing.into_iter().peekable();
    let mut b = incoming.into_iter().peekable();
    loop {
        let take_a = match (a.peek(), b.peek()) {
            (Some(x), Some(y)) => x.timestamp() <= y.timestamp(),
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_a { a.next() } else { b.next() };
        out.extend(next);
    }
    out
}
