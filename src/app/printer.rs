// LogWeave - app/printer.rs
//
// Headless renderer: a `ViewListener` that writes a view's lines as text.
//
// Each line is printed as `[label] text`, the label padded to the view's
// label width, followed by its continuation lines. Lines from inactive
// sources are skipped. A full update reprints the whole view under a header,
// since lines may have been re-ordered; incremental updates print only the
// new lines.

use crate::app::view::{View, ViewListener};
use crate::core::model::Line;
use std::io::Write;
use std::sync::Arc;

pub struct Printer<W: Write + Send> {
    out: W,
    headers: bool,
    printed_full: bool,
}

impl<W: Write + Send> Printer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            headers: true,
            printed_full: false,
        }
    }

    /// Do not print a header before reprinting a view.
    pub fn without_headers(mut self) -> Self {
        self.headers = false;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn print_lines(&mut self, width: usize, lines: &[Arc<Line>]) {
        for line in lines.iter().filter(|l| l.source().is_active()) {
            let label = line.source().title();
            // A closed pipe ends output; there is nobody left to report to.
            if writeln!(self.out, "[{label:<width$}] {}", line.text()).is_err() {
                return;
            }
            for extra in line.additional_lines() {
                let _ = writeln!(self.out, " {:<width$}  {extra}", "");
            }
        }
        let _ = self.out.flush();
    }
}

impl<W: Write + Send> ViewListener for Printer<W> {
    fn on_full_update(&mut self, view: &View) {
        if self.headers && (self.printed_full || !view.is_empty()) {
            let _ = writeln!(self.out, "==> {} ({} lines) <==", view.title(), view.len());
        }
        self.printed_full = true;
        self.print_lines(view.label_len(), view.lines());
    }

    fn on_incremental_update(&mut self, view: &View, new_lines: &[Arc<Line>]) {
        self.print_lines(view.label_len(), new_lines);
    }
}
