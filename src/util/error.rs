// LogWeave - util/error.rs
//
// Typed error hierarchy with context-preserving error chains.
// Configuration and I/O failures are recoverable and surface as these types;
// broken pipeline invariants are assertions, not errors.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Top-level error type for all LogWeave operations.
/// Errors are categorised by the subsystem that produced them.
#[derive(Debug)]
pub enum LogWeaveError {
    /// Line parser configuration was rejected.
    Parser(ParserError),

    /// Filter construction or pattern change failed.
    Filter(FilterError),

    /// A tailed file could not be opened or decoded.
    Tail(TailError),

    /// A view or tree operation referenced something invalid.
    View(ViewError),

    /// Configuration loading or validation failed.
    Config(ConfigError),

    /// I/O error with path context.
    Io {
        path: PathBuf,
        operation: &'static str,
        source: io::Error,
    },
}

impl fmt::Display for LogWeaveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parser(e) => write!(f, "Parser error: {e}"),
            Self::Filter(e) => write!(f, "Filter error: {e}"),
            Self::Tail(e) => write!(f, "Tail error: {e}"),
            Self::View(e) => write!(f, "View error: {e}"),
            Self::Config(e) => write!(f, "Configuration error: {e}"),
            Self::Io {
                path,
                operation,
                source,
            } => write!(
                f,
                "I/O error during {operation} on '{}': {source}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for LogWeaveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Parser(e) => Some(e),
            Self::Filter(e) => Some(e),
            Self::Tail(e) => Some(e),
            Self::View(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Io { source, .. } => Some(source),
        }
    }
}

// ---------------------------------------------------------------------------
// Parser errors
// ---------------------------------------------------------------------------

/// Errors in the per-stream line parser configuration.
#[derive(Debug)]
pub enum ParserError {
    /// The timestamp-match regex does not compile.
    InvalidTimestampRegex {
        pattern: String,
        source: regex::Error,
    },

    /// The timestamp-match regex exceeds the maximum allowed length.
    RegexTooLong { length: usize, max_length: usize },

    /// The chrono format string contains an invalid specifier.
    InvalidTimestampFormat { format: String, reason: String },
}

impl fmt::Display for ParserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTimestampRegex { pattern, source } => {
                write!(f, "invalid timestamp regex '{pattern}': {source}")
            }
            Self::RegexTooLong { length, max_length } => write!(
                f,
                "timestamp regex is {length} chars, exceeds maximum of {max_length}"
            ),
            Self::InvalidTimestampFormat { format, reason } => {
                write!(f, "invalid timestamp format '{format}': {reason}")
            }
        }
    }
}

impl std::error::Error for ParserError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidTimestampRegex { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ParserError> for LogWeaveError {
    fn from(e: ParserError) -> Self {
        Self::Parser(e)
    }
}

// ---------------------------------------------------------------------------
// Filter errors
// ---------------------------------------------------------------------------

/// Errors related to filter operations.
#[derive(Debug)]
pub enum FilterError {
    /// User-provided regex is invalid.
    InvalidRegex {
        pattern: String,
        source: regex::Error,
    },

    /// User-provided regex exceeds the maximum allowed length.
    RegexTooLong { length: usize, max_length: usize },
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRegex { pattern, source } => {
                write!(f, "Invalid filter regex '{pattern}': {source}")
            }
            Self::RegexTooLong { length, max_length } => write!(
                f,
                "Filter regex is {length} chars, exceeds maximum of {max_length}"
            ),
        }
    }
}

impl std::error::Error for FilterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidRegex { source, .. } => Some(source),
            Self::RegexTooLong { .. } => None,
        }
    }
}

impl From<FilterError> for LogWeaveError {
    fn from(e: FilterError) -> Self {
        Self::Filter(e)
    }
}

// ---------------------------------------------------------------------------
// Tail errors
// ---------------------------------------------------------------------------

/// Errors raised while constructing a file reader.
///
/// Failures *after* construction are not errors of this kind: they are
/// reported on the reader's progress channel as `TailProgress::FileError`.
#[derive(Debug)]
pub enum TailError {
    /// The file could not be opened for reading.
    Open { path: PathBuf, source: io::Error },

    /// The configured character encoding is not supported.
    UnsupportedEncoding { encoding: String },
}

impl fmt::Display for TailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open { path, source } => {
                write!(f, "Cannot open '{}': {source}", path.display())
            }
            Self::UnsupportedEncoding { encoding } => write!(
                f,
                "Unsupported encoding '{encoding}'. \
                 Expected one of: utf-8, utf-16le, utf-16be, latin1"
            ),
        }
    }
}

impl std::error::Error for TailError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open { source, .. } => Some(source),
            Self::UnsupportedEncoding { .. } => None,
        }
    }
}

impl From<TailError> for LogWeaveError {
    fn from(e: TailError) -> Self {
        Self::Tail(e)
    }
}

// ---------------------------------------------------------------------------
// View errors
// ---------------------------------------------------------------------------

/// Errors from view construction and view-tree edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewError {
    /// No live view has this id (never existed or already destroyed).
    UnknownView { id: u64 },

    /// No tree node has this id.
    UnknownNode { id: usize },

    /// The root node of the view tree cannot be removed.
    RootRemoval,

    /// A merged view needs at least one source.
    EmptyMerge,

    /// The operation needs a view of a different kind.
    WrongKind { id: u64, expected: &'static str },

    /// The dispatcher stopped before the request could run.
    DispatcherStopped,
}

impl fmt::Display for ViewError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownView { id } => write!(f, "no view with id {id}"),
            Self::UnknownNode { id } => write!(f, "no tree node with id {id}"),
            Self::RootRemoval => f.write_str("the root view cannot be removed"),
            Self::EmptyMerge => f.write_str("a merge needs at least one source view"),
            Self::WrongKind { id, expected } => write!(f, "view {id} is not a {expected} view"),
            Self::DispatcherStopped => f.write_str("the view dispatcher is no longer running"),
        }
    }
}

impl std::error::Error for ViewError {}

impl From<ViewError> for LogWeaveError {
    fn from(e: ViewError) -> Self {
        Self::View(e)
    }
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

/// Errors related to configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    /// TOML parsing failed.
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// A config value is out of the allowed range.
    ValueOutOfRange {
        field: String,
        value: String,
        expected: String,
    },

    /// I/O error reading config file.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TomlParse { path, source } => {
                write!(f, "Config parse error '{}': {source}", path.display())
            }
            Self::ValueOutOfRange {
                field,
                value,
                expected,
            } => write!(
                f,
                "Config '{field}' = '{value}' is out of range. Expected: {expected}"
            ),
            Self::Io { path, source } => {
                write!(f, "Config I/O error '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TomlParse { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ConfigError> for LogWeaveError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

/// Convenience type alias for LogWeave results.
pub type Result<T> = std::result::Result<T, LogWeaveError>;
