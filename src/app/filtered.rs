// LogWeave - app/filtered.rs
//
// A view holding the subset of its parent's lines that match a regex.
//
// Updates mirror the parent's events:
//   - full update: recompute from the parent's whole buffer;
//   - incremental update: filter only the new lines and append them, unless
//     a match would land before the current tail in time, in which case the
//     buffer is recomputed so it keeps the parent's order.

use crate::app::view::{View, ViewId};
use crate::core::filter::LineFilter;
use crate::core::model::Line;
use std::sync::Arc;

/// What an incremental update did to the filtered buffer.
#[derive(Debug)]
pub enum FilterUpdate {
    /// No new line matched.
    Unchanged,
    /// These matches were appended.
    Appended(Vec<Arc<Line>>),
    /// The buffer was recomputed from the parent.
    Recomputed,
}

#[derive(Debug)]
pub struct FilteredView {
    parent: ViewId,
    filter: LineFilter,
}

impl FilteredView {
    pub fn new(parent: ViewId, filter: LineFilter) -> Self {
        Self { parent, filter }
    }

    pub fn parent(&self) -> ViewId {
        self.parent
    }

    pub fn filter(&self) -> &LineFilter {
        &self.filter
    }

    /// Swap the predicate. The caller recomputes afterwards.
    pub fn set_filter(&mut self, filter: LineFilter) {
        self.filter = filter;
    }

    pub fn recompute(&self, view: &mut View, parent_lines: &[Arc<Line>]) {
        view.replace(self.filter.apply(parent_lines));
        tracing::debug!(
            view = %view.id(),
            parent = %self.parent,
            matched = view.len(),
            of = parent_lines.len(),
            "Filtered view recomputed"
        );
    }

    pub fn on_incremental(
        &self,
        view: &mut View,
        new_lines: &[Arc<Line>],
        parent_lines: &[Arc<Line>],
    ) -> FilterUpdate {
        let matched = self.filter.apply(new_lines);
        let Some(first) = matched.first() else {
            return FilterUpdate::Unchanged;
        };
        if view
            .lines()
            .last()
            .is_some_and(|last| last.timestamp() > first.timestamp())
        {
            tracing::debug!(
                view = %view.id(),
                "Filtered view: out-of-order match, recomputing"
            );
            self.recompute(view, parent_lines);
            return FilterUpdate::Recomputed;
        }
        view.append(matched.iter().cloned());
        FilterUpdate::Appended(matched)
    }
}
