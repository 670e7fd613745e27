// LogWeave - core/parser.rs
//
// Per-stream stateful line parser.
// Core layer: takes one raw physical line at a time, never touches the
// filesystem and never blocks.
//
// A raw line becomes either a new `Line` or continuation text for the
// previous one (stack-trace frames, wrapped messages). With a timestamp rule
// configured, only lines the rule matches start a record; without one,
// every line does and timestamps are sniffed from common layouts.

use crate::core::model::{Line, LineSource, ParseOutcome};
use crate::util::constants::{DATE_CHANGE_THRESHOLD_MS, MAX_REGEX_PATTERN_LENGTH, MILLIS_PER_DAY};
use crate::util::error::ParserError;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use regex::Regex;
use std::sync::{Arc, OnceLock};

/// Timestamp settings for one ingested stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParserConfig {
    /// Regex locating the timestamp in a line. Lines it does not match are
    /// continuation lines.
    pub timestamp_regex: Option<String>,
    /// chrono format for the matched text. When absent the matched text is
    /// sniffed against the built-in layouts.
    pub timestamp_format: Option<String>,
}

/// A parsed timestamp before day-offset adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    pub millis: i64,
    /// True when only a time of day was available, so `millis` counts from
    /// midnight and date changes must be added by the parser.
    pub time_only: bool,
}

#[derive(Debug)]
struct TimestampRule {
    pattern: Regex,
    format: Option<String>,
}

impl TimestampRule {
    fn stamp(&self, matched: &str) -> Option<Stamp> {
        match &self.format {
            Some(format) => parse_with_format(matched, format).or_else(|| sniff_timestamp(matched)),
            None => sniff_timestamp(matched),
        }
    }
}

/// Stateful parser, one per ingested stream.
#[derive(Debug)]
pub struct LineParser {
    rule: Option<TimestampRule>,
    last_parsed_timestamp: i64,
    last_time_only: bool,
    date_change_count: u32,
    has_timestamp: bool,
    has_previous: bool,
}

impl LineParser {
    /// Build a parser, validating the regex and format eagerly.
    pub fn new(config: &ParserConfig) -> Result<Self, ParserError> {
        let rule = match &config.timestamp_regex {
            Some(pattern) if !pattern.is_empty() => {
                if pattern.len() > MAX_REGEX_PATTERN_LENGTH {
                    return Err(ParserError::RegexTooLong {
                        length: pattern.len(),
                        max_length: MAX_REGEX_PATTERN_LENGTH,
                    });
                }
                let compiled =
                    Regex::new(pattern).map_err(|e| ParserError::InvalidTimestampRegex {
                        pattern: pattern.clone(),
                        source: e,
                    })?;
                let format = match &config.timestamp_format {
                    Some(f) if !f.is_empty() => {
                        validate_format(f)?;
                        Some(f.clone())
                    }
                    _ => None,
                };
                Some(TimestampRule {
                    pattern: compiled,
                    format,
                })
            }
            _ => {
                if let Some(f) = config.timestamp_format.as_deref().filter(|f| !f.is_empty()) {
                    validate_format(f)?;
                    tracing::warn!(
                        format = f,
                        "Timestamp format given without a timestamp regex; format ignored"
                    );
                }
                None
            }
        };

        Ok(Self {
            rule,
            last_parsed_timestamp: 0,
            last_time_only: false,
            date_change_count: 0,
            has_timestamp: false,
            has_previous: false,
        })
    }

    /// A parser with no timestamp rule: every line is a record.
    pub fn plain() -> Self {
        Self {
            rule: None,
            last_parsed_timestamp: 0,
            last_time_only: false,
            date_change_count: 0,
            has_timestamp: false,
            has_previous: false,
        }
    }

    /// Parse one raw physical line (without its terminator).
    pub fn parse(
        &mut self,
        index: usize,
        raw: &str,
        source: &Arc<dyn LineSource>,
    ) -> ParseOutcome {
        let found = match &self.rule {
            None => Some(sniff_timestamp(raw)),
            Some(rule) => rule.pattern.find(raw).map(|m| rule.stamp(m.as_str())),
        };

        let stamp = match found {
            Some(stamp) => stamp,
            None if self.has_previous => {
                return ParseOutcome::Continuation(
                    crate::core::model::expand_tabs(raw).into_owned(),
                );
            }
            // Nothing to attach to yet: the line stands on its own.
            None => None,
        };

        let timestamp = match stamp {
            Some(stamp) => self.observe(stamp),
            None => self.current_effective(),
        };

        self.has_previous = true;
        ParseOutcome::NewLine(Line::new(
            index,
            raw,
            timestamp,
            self.date_change_count,
            Arc::clone(source),
        ))
    }

    /// Raw value of the most recent successfully parsed timestamp.
    pub fn last_parsed_timestamp(&self) -> i64 {
        self.last_parsed_timestamp
    }

    /// Number of backward timestamp jumps seen so far.
    pub fn date_change_count(&self) -> u32 {
        self.date_change_count
    }

    /// Forget all stream state. Used when a tailed file is truncated.
    pub fn reset(&mut self) {
        self.last_parsed_timestamp = 0;
        self.last_time_only = false;
        self.date_change_count = 0;
        self.has_timestamp = false;
        self.has_previous = false;
    }

    fn observe(&mut self, stamp: Stamp) -> i64 {
        if self.has_timestamp
            && stamp.millis < self.last_parsed_timestamp - DATE_CHANGE_THRESHOLD_MS
        {
            self.date_change_count += 1;
            tracing::debug!(
                from = self.last_parsed_timestamp,
                to = stamp.millis,
                changes = self.date_change_count,
                "Parser: date change detected"
            );
        }
        self.last_parsed_timestamp = stamp.millis;
        self.has_timestamp = true;
        self.last_time_only = stamp.time_only;
        self.effective(stamp)
    }

    fn effective(&self, stamp: Stamp) -> i64 {
        if stamp.time_only {
            stamp.millis + i64::from(self.date_change_count) * MILLIS_PER_DAY
        } else {
            stamp.millis
        }
    }

    /// Timestamp inherited by a record whose own timestamp is unreadable.
    fn current_effective(&self) -> i64 {
        if !self.has_timestamp {
            return 0;
        }
        self.effective(Stamp {
            millis: self.last_parsed_timestamp,
            time_only: self.last_time_only,
        })
    }
}

fn validate_format(format: &str) -> Result<(), ParserError> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(ParserError::InvalidTimestampFormat {
            format: format.to_string(),
            reason: "unrecognised strftime specifier".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Timestamp parsing
// =============================================================================

/// Parse `raw` with an explicit chrono format.
///
/// Tries a full date-time, then a date alone (midnight), then a time of
/// day alone. Year-less formats get the current UTC year injected.
pub fn parse_with_format(raw: &str, format: &str) -> Option<Stamp> {
    let trimmed = raw.trim();

    if let Ok(ndt) = NaiveDateTime::parse_from_str(trimmed, format) {
        return Some(dated(ndt));
    }
    if let Ok(nd) = NaiveDate::parse_from_str(trimmed, format) {
        return nd.and_hms_opt(0, 0, 0).map(dated);
    }
    if let Ok(t) = NaiveTime::parse_from_str(trimmed, format) {
        return Some(time_of_day(t));
    }
    if !format.contains("%Y") && !format.contains("%y") && !format.contains("%C") {
        let with_year = format!("{} {trimmed}", Utc::now().year());
        if let Ok(ndt) = NaiveDateTime::parse_from_str(&with_year, &format!("%Y {format}")) {
            return Some(dated(ndt));
        }
    }
    None
}

fn dated(ndt: NaiveDateTime) -> Stamp {
    Stamp {
        millis: ndt.and_utc().timestamp_millis(),
        time_only: false,
    }
}

fn time_of_day(t: NaiveTime) -> Stamp {
    Stamp {
        millis: i64::from(t.num_seconds_from_midnight()) * 1_000
            + i64::from(t.nanosecond() / 1_000_000),
        time_only: true,
    }
}

/// Find and parse any recognisable timestamp in `raw`, most precise layout
/// first. Falls back to a bare time of day.
pub fn sniff_timestamp(raw: &str) -> Option<Stamp> {
    struct Sniffer {
        re: Regex,
        parse: fn(&str) -> Option<Stamp>,
    }

    static SNIFFERS: OnceLock<Vec<Sniffer>> = OnceLock::new();

    let sniffers = SNIFFERS.get_or_init(|| {
        // Patterns are covered by the tests below.
        fn re(pat: &str) -> Regex {
            Regex::new(pat).expect("sniff_timestamp: invalid regex")
        }

        fn naive(s: &str, formats: &[&str]) -> Option<Stamp> {
            formats
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
                .map(dated)
        }

        vec![
            // 2024-01-15T14:30:22.123+05:30, 2024-01-15T14:30:22Z
            Sniffer {
                re: re(r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2})"),
                parse: |s| {
                    DateTime::parse_from_rfc3339(s).ok().map(|dt| Stamp {
                        millis: dt.timestamp_millis(),
                        time_only: false,
                    })
                },
            },
            // 2024-01-15 14:30:22,123 / 2024-01-15T14:30:22.123 / 2024/01/15 14:30:22
            Sniffer {
                re: re(r"\d{4}[-/]\d{2}[-/]\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?"),
                parse: |s| {
                    let s = s.replace(',', ".").replace('/', "-").replace('T', " ");
                    naive(&s, &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"])
                },
            },
            // 26.02.2026 22:07:56.535
            Sniffer {
                re: re(r"\d{2}\.\d{2}\.\d{4} \d{2}:\d{2}:\d{2}(?:\.\d+)?"),
                parse: |s| naive(s, &["%d.%m.%Y %H:%M:%S%.f", "%d.%m.%Y %H:%M:%S"]),
            },
            // 15/Jan/2024:14:30:22 +0000
            Sniffer {
                re: re(r"\d{2}/[A-Za-z]{3}/\d{4}:\d{2}:\d{2}:\d{2} [+-]\d{4}"),
                parse: |s| {
                    DateTime::parse_from_str(s, "%d/%b/%Y:%H:%M:%S %z")
                        .ok()
                        .map(|dt| Stamp {
                            millis: dt.timestamp_millis(),
                            time_only: false,
                        })
                },
            },
            // Jan 15 2024 14:30:22, Jan 15, 2024 14:30:22
            Sniffer {
                re: re(r"[A-Z][a-z]{2,8} \d{1,2},? \d{4} \d{2}:\d{2}:\d{2}"),
                parse: |s| {
                    let s = s.replace(',', " ");
                    let s = s.split_whitespace().collect::<Vec<_>>().join(" ");
                    naive(&s, &["%b %d %Y %H:%M:%S"])
                },
            },
            // BSD syslog, year-less: Jan 15 14:30:22 (current year injected)
            Sniffer {
                re: re(r"[A-Z][a-z]{2} [ \d]\d \d{2}:\d{2}:\d{2}"),
                parse: |s| {
                    let with_year = format!("{} {s}", Utc::now().year());
                    naive(&with_year, &["%Y %b %e %H:%M:%S"])
                },
            },
            // Bare time of day: 10:00:00.000, 10:00:00,000, 10:00:00
            Sniffer {
                re: re(r"\b\d{2}:\d{2}:\d{2}(?:[.,]\d{1,9})?\b"),
                parse: |s| {
                    let s = s.replace(',', ".");
                    NaiveTime::parse_from_str(&s, "%H:%M:%S%.f")
                        .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M:%S"))
                        .ok()
                        .map(time_of_day)
                },
            },
        ]
    });

    sniffers.iter().find_map(|sniffer| {
        sniffer
            .re
            .find(raw)
            .and_then(|m| (sniffer.parse)(m.as_str()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{Color, SourceInfo};

    fn source() -> Arc<dyn LineSource> {
        Arc::new(SourceInfo::new("test.log", Color::default()))
    }

    fn time_parser() -> LineParser {
        LineParser::new(&ParserConfig {
            timestamp_regex: Some(r"\d{2}:\d{2}:\d{2}\.\d{3}".to_string()),
            timestamp_format: Some("%H:%M:%S%.3f".to_string()),
        })
        .unwrap()
    }

    fn new_line(outcome: ParseOutcome) -> Line {
        match outcome {
            ParseOutcome::NewLine(line) => line,
            ParseOutcome::Continuation(text) => panic!("expected a new line, got {text:?}"),
        }
    }

    #[test]
    fn test_continuation_lines_grouped_in_order() {
        let mut parser = time_parser();
        let src = source();

        let head = new_line(parser.parse(0, "ERROR at 10:00:00.000 boom", &src));
        for raw in ["\tat com.example.Foo.bar(Foo.java:42)", "\tat com.example.Main.run(Main.java:7)"] {
            match parser.parse(1, raw, &src) {
                ParseOutcome::Continuation(text) => head.push_additional(&text),
                ParseOutcome::NewLine(_) => panic!("frame must be a continuation"),
            }
        }

        assert_eq!(head.timestamp(), 36_000_000);
        assert_eq!(
            head.additional_lines(),
            vec![
                "    at com.example.Foo.bar(Foo.java:42)".to_string(),
                "    at com.example.Main.run(Main.java:7)".to_string(),
            ]
        );
    }

    #[test]
    fn test_first_unmatched_line_stands_alone_with_zero_timestamp() {
        let mut parser = time_parser();
        let line = new_line(parser.parse(0, "=== log started ===", &source()));
        assert_eq!(line.timestamp(), 0);
        // The next unmatched line now has something to attach to.
        assert!(matches!(
            parser.parse(1, "more header", &source()),
            ParseOutcome::Continuation(_)
        ));
    }

    #[test]
    fn test_no_rule_every_line_is_new() {
        let mut parser = LineParser::plain();
        let a = new_line(parser.parse(0, "2024-01-15 14:30:22 started", &source()));
        let b = new_line(parser.parse(1, "no timestamp here", &source()));
        assert!(a.timestamp() > 0);
        assert_eq!(b.timestamp(), a.timestamp(), "untimed line inherits");
    }

    #[test]
    fn test_date_change_detected_on_backward_jump() {
        let mut parser = time_parser();
        let src = source();
        let late = new_line(parser.parse(0, "23:59:59.000 late", &src));
        let early = new_line(parser.parse(1, "00:00:01.000 early", &src));

        assert_eq!(parser.date_change_count(), 1);
        assert_eq!(early.date_changes(), 1);
        assert!(
            early.timestamp() > late.timestamp(),
            "time-of-day stamps after midnight sort after the previous day"
        );
        assert_eq!(parser.last_parsed_timestamp(), 1_000);
    }

    #[test]
    fn test_small_backward_jump_is_not_a_date_change() {
        let mut parser = time_parser();
        let src = source();
        parser.parse(0, "10:00:05.000 a", &src);
        parser.parse(1, "10:00:02.000 b", &src);
        assert_eq!(parser.date_change_count(), 0);
    }

    #[test]
    fn test_reset_forgets_stream_state() {
        let mut parser = time_parser();
        let src = source();
        parser.parse(0, "23:00:00.000 a", &src);
        parser.parse(1, "01:00:00.000 b", &src);
        parser.reset();
        assert_eq!(parser.date_change_count(), 0);
        assert_eq!(parser.last_parsed_timestamp(), 0);
        assert!(matches!(
            parser.parse(0, "untimed", &src),
            ParseOutcome::NewLine(_)
        ));
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let err = LineParser::new(&ParserConfig {
            timestamp_regex: Some("[bad".to_string()),
            timestamp_format: None,
        })
        .unwrap_err();
        assert!(matches!(err, ParserError::InvalidTimestampRegex { .. }));
    }

    #[test]
    fn test_invalid_format_rejected() {
        let err = LineParser::new(&ParserConfig {
            timestamp_regex: Some(r"\d+".to_string()),
            timestamp_format: Some("%Q".to_string()),
        })
        .unwrap_err();
        assert!(matches!(err, ParserError::InvalidTimestampFormat { .. }));
    }

    #[test]
    fn test_parse_with_format_datetime() {
        let stamp = parse_with_format("2024-01-15 14:30:22", "%Y-%m-%d %H:%M:%S").unwrap();
        assert!(!stamp.time_only);
        assert_eq!(stamp.millis, 1_705_329_022_000);
    }

    #[test]
    fn test_parse_with_format_time_only() {
        let stamp = parse_with_format("00:00:01.250", "%H:%M:%S%.3f").unwrap();
        assert!(stamp.time_only);
        assert_eq!(stamp.millis, 1_250);
    }

    #[test]
    fn test_sniff_layouts() {
        let utc = |s: &str| sniff_timestamp(s).map(|st| st.millis);
        assert_eq!(utc("event 2024-01-15T14:30:22Z done"), Some(1_705_329_022_000));
        assert_eq!(utc("2024-01-15 14:30:22,000 INFO x"), Some(1_705_329_022_000));
        assert_eq!(utc("2024/01/15 14:30:22 - x"), Some(1_705_329_022_000));
        assert_eq!(utc("[15.01.2024 14:30:22] x"), Some(1_705_329_022_000));
        assert_eq!(
            utc("1.2.3.4 - - [15/Jan/2024:14:30:22 +0000] \"GET /\""),
            Some(1_705_329_022_000)
        );
        assert_eq!(utc("Jan 15, 2024 14:30:22 - x"), Some(1_705_329_022_000));
    }

    #[test]
    fn test_sniff_bare_time_is_time_only() {
        let stamp = sniff_timestamp("worker 10:00:00.500 tick").unwrap();
        assert!(stamp.time_only);
        assert_eq!(stamp.millis, 36_000_500);
    }

    #[test]
    fn test_sniff_nothing() {
        assert!(sniff_timestamp("hello world").is_none());
        assert!(sniff_timestamp("").is_none());
    }
}
