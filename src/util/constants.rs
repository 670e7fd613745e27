// LogWeave - util/constants.rs
//
// Single source of truth for all named constants, limits, and defaults.

// =============================================================================
// Application metadata
// =============================================================================

/// Application display name.
pub const APP_NAME: &str = "LogWeave";

/// Application identifier used for config directories.
pub const APP_ID: &str = "LogWeave";

/// Current application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Parsing
// =============================================================================

/// Number of spaces a tab character expands to in stored line text.
pub const TAB_WIDTH: usize = 4;

/// A parsed timestamp that moves backwards by more than this many
/// milliseconds is treated as a date change (midnight rollover or a
/// format that cannot tell days apart).
pub const DATE_CHANGE_THRESHOLD_MS: i64 = 5_000;

/// Milliseconds in one day. Added per date change to time-of-day timestamps.
pub const MILLIS_PER_DAY: i64 = 86_400_000;

/// Maximum regex pattern length to prevent ReDoS.
pub const MAX_REGEX_PATTERN_LENGTH: usize = 4_096;

// =============================================================================
// Live tail limits
// =============================================================================

/// How often each reader thread polls its file for new content (ms).
pub const TAIL_POLL_INTERVAL_MS: u64 = 250;

/// How often the cancel flag is checked within each poll sleep interval (ms).
pub const TAIL_CANCEL_CHECK_INTERVAL_MS: u64 = 50;

/// Minimum user-configurable tail poll interval (ms).
pub const MIN_TAIL_POLL_INTERVAL_MS: u64 = 50;

/// Maximum user-configurable tail poll interval (ms).
pub const MAX_TAIL_POLL_INTERVAL_MS: u64 = 10_000; // 10 s

/// Maximum bytes read from a single file in one poll tick.
/// Prevents a large burst of new content from stalling the reader loop.
pub const MAX_TAIL_READ_BYTES_PER_TICK: usize = 512 * 1_024; // 512 KiB

/// Maximum accumulated size of the partial (in-progress) line buffer for a
/// single tailed file. Content beyond this without a newline is discarded.
pub const MAX_TAIL_PARTIAL_BYTES: usize = MAX_TAIL_READ_BYTES_PER_TICK * 4; // 2 MiB

// =============================================================================
// View update cadence
// =============================================================================

/// Minimum interval between published updates of an ingestion view (ms).
pub const INGEST_UPDATE_INTERVAL_MS: u64 = 50;

/// Minimum interval between merge ticks of a merged view (ms).
/// Coarser than ingestion: merging is more expensive and receives the
/// combined update volume of all its sources.
pub const MERGE_UPDATE_INTERVAL_MS: u64 = 150;

/// Bounds for the user-configurable update intervals (ms).
pub const MIN_UPDATE_INTERVAL_MS: u64 = 10;
pub const MAX_UPDATE_INTERVAL_MS: u64 = 5_000;

/// Parent buffers at least this long are re-filtered on the rayon pool
/// during a full recompute.
pub const PARALLEL_FILTER_THRESHOLD: usize = 50_000;

/// Palette assigned round-robin to opened files, as RGB triples.
pub const SOURCE_PALETTE: &[(u8, u8, u8)] = &[
    (0x4E, 0x9A, 0xF1),
    (0xE5, 0xA5, 0x0A),
    (0x3F, 0xB9, 0x50),
    (0xD9, 0x4F, 0x70),
    (0x9B, 0x6B, 0xDF),
    (0x2D, 0xB5, 0xB5),
    (0xE0, 0x7B, 0x39),
    (0x8C, 0x8C, 0x8C),
];

// =============================================================================
// Logging
// =============================================================================

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Maximum length of a log line included in debug output.
pub const DEBUG_MAX_LINE_PREVIEW: usize = 200;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration file name.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Default character encoding of tailed files.
pub const DEFAULT_ENCODING: &str = "utf-8";
