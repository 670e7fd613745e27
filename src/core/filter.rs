// LogWeave - core/filter.rs
//
// Regex line predicate used by filtered views.
// Core layer: pure logic, no I/O or threading concerns beyond rayon for
// large buffers.

use crate::core::model::Line;
use crate::util::constants::{MAX_REGEX_PATTERN_LENGTH, PARALLEL_FILTER_THRESHOLD};
use crate::util::error::FilterError;
use rayon::prelude::*;
use regex::Regex;
use std::sync::Arc;

/// A compiled, possibly inverted, regex over a line's raw text.
#[derive(Debug, Clone)]
pub struct LineFilter {
    pattern: String,
    regex: Regex,
    inverted: bool,
}

impl LineFilter {
    /// Compile `pattern`. Returns an error if the pattern is invalid.
    pub fn new(pattern: &str, inverted: bool) -> Result<Self, FilterError> {
        if pattern.len() > MAX_REGEX_PATTERN_LENGTH {
            return Err(FilterError::RegexTooLong {
                length: pattern.len(),
                max_length: MAX_REGEX_PATTERN_LENGTH,
            });
        }
        let regex = Regex::new(pattern).map_err(|e| FilterError::InvalidRegex {
            pattern: pattern.to_string(),
            source: e,
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
            inverted,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    /// Title a filtered view derives from its predicate.
    pub fn title(&self) -> String {
        if self.inverted {
            format!("grep -v {}", self.pattern)
        } else {
            format!("grep {}", self.pattern)
        }
    }

    /// Continuation lines are not consulted: they can still grow after the
    /// line was filtered, which would make results depend on timing.
    pub fn matches(&self, line: &Line) -> bool {
        self.regex.is_match(line.text()) != self.inverted
    }

    /// Matching lines of `lines`, in order.
    pub fn apply(&self, lines: &[Arc<Line>]) -> Vec<Arc<Line>> {
        if lines.len() >= PARALLEL_FILTER_THRESHOLD {
            lines
                .par_iter()
                .filter(|l| self.matches(l))
                .cloned()
                .collect()
        } else {
            lines.iter().filter(|l| self.matches(l)).cloned().collect()
        }
    }
}
