// LogWeave - app/tail.rs
//
// Ingestion: one background reader thread per opened file.
//
// Architecture:
//   - `FileFeed` lives in the workspace on the dispatcher thread; the
//     matching `Reader` runs on its own thread, polling the file for new
//     bytes on a fixed interval.
//   - The reader reads the file from the start, then keeps following it.
//     Parsed lines are handed to a sink as `FeedUpdate`s; the workspace's
//     sink forwards them to the dispatcher, where they are buffered in the
//     feed until its rate limiter publishes them to the view.
//   - Status and per-file errors go out on a `TailProgress` channel.
//   - An `Arc<AtomicBool>` cancel flag stops the reader; `stop` joins it.
//
// Resilience:
//   - Stat/read errors after start are non-fatal: logged as warnings, a
//     FileError message is sent, and polling continues.
//   - A file shorter than the current offset was truncated or rotated: the
//     offset, decoder, parser and line numbering restart from zero and the
//     view is told to reset.
//   - The poll loop sleeps in small sub-intervals so cancel is honoured
//     within TAIL_CANCEL_CHECK_INTERVAL_MS.
//   - MAX_TAIL_READ_BYTES_PER_TICK caps one read; MAX_TAIL_PARTIAL_BYTES caps
//     an unterminated line.

use crate::app::rate_limit::RateLimiter;
use crate::core::encoding::{Decoder, TextEncoding};
use crate::core::model::{Line, LineSource, ParseOutcome, SourceInfo};
use crate::core::parser::LineParser;
use crate::util::constants::{
    MAX_TAIL_PARTIAL_BYTES, MAX_TAIL_READ_BYTES_PER_TICK, TAIL_CANCEL_CHECK_INTERVAL_MS,
    TAIL_POLL_INTERVAL_MS,
};
use crate::util::error::TailError;
use crate::util::logging;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

// =============================================================================
// Public types
// =============================================================================

/// Reader lifecycle. Never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TailState {
    /// Reading the content that existed when the file was opened.
    Starting = 0,
    /// Caught up with the end of the file and following new writes.
    Tailing = 1,
    Stopped = 2,
}

impl TailState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Starting,
            1 => Self::Tailing,
            _ => Self::Stopped,
        }
    }
}

/// Status messages from reader threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailProgress {
    Started { path: PathBuf },
    /// Initial content fully read; `lines` records parsed so far.
    CaughtUp { path: PathBuf, lines: usize },
    Truncated { path: PathBuf },
    FileError { path: PathBuf, message: String },
    Stopped { path: PathBuf },
}

/// What a reader hands to the dispatcher after each read.
#[derive(Debug, Clone)]
pub enum FeedUpdate {
    /// New records, in file order.
    Lines(Vec<Arc<Line>>),
    /// Continuation text was appended to a record sent earlier.
    Grew,
    /// The file was truncated; everything sent before is void.
    Reset,
}

/// Receives reader output. Returning `false` stops the reader.
pub type FeedSink = Box<dyn FnMut(FeedUpdate) -> bool + Send + 'static>;

/// Per-file reader settings.
#[derive(Debug, Clone)]
pub struct TailOptions {
    pub encoding: TextEncoding,
    pub poll_interval: Duration,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            encoding: TextEncoding::Utf8,
            poll_interval: Duration::from_millis(TAIL_POLL_INTERVAL_MS),
        }
    }
}

// =============================================================================
// FileFeed (dispatcher side)
// =============================================================================

/// The ingestion side of one file view.
#[derive(Debug)]
pub struct FileFeed {
    path: PathBuf,
    source: Arc<SourceInfo>,
    state: Arc<AtomicU8>,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    pending: Vec<FeedUpdate>,
    limiter: RateLimiter,
}

impl FileFeed {
    /// Open `path` and start its reader thread.
    ///
    /// The file is opened here, so a missing or unreadable file fails
    /// construction instead of surfacing later as a progress message.
    pub fn start(
        path: &Path,
        options: &TailOptions,
        parser: LineParser,
        source: Arc<SourceInfo>,
        sink: FeedSink,
        progress: mpsc::Sender<TailProgress>,
        update_interval: Duration,
    ) -> Result<Self, TailError> {
        let open_err = |source: io::Error| TailError::Open {
            path: path.to_path_buf(),
            source,
        };
        let file = std::fs::File::open(path).map_err(open_err)?;
        if file.metadata().map_err(open_err)?.is_dir() {
            return Err(open_err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "is a directory",
            )));
        }
        drop(file);

        let cancel = Arc::new(AtomicBool::new(false));
        let state = Arc::new(AtomicU8::new(TailState::Starting as u8));

        let line_source: Arc<dyn LineSource> = source.clone();
        let reader = Reader {
            path: path.to_path_buf(),
            source: line_source,
            parser,
            decoder: Decoder::new(options.encoding),
            offset: 0,
            partial: String::new(),
            next_index: 0,
            last_line: None,
            sink,
            progress,
            cancel: Arc::clone(&cancel),
            state: Arc::clone(&state),
            poll_interval: options.poll_interval,
        };

        let worker = std::thread::Builder::new()
            .name(format!("tail:{}", source.title()))
            .spawn(move || reader.run())
            .map_err(open_err)?;

        tracing::info!(
            file = %path.display(),
            encoding = options.encoding.label(),
            "Tail: reader started"
        );

        Ok(Self {
            path: path.to_path_buf(),
            source,
            state,
            cancel,
            worker: Some(worker),
            pending: Vec::new(),
            limiter: RateLimiter::new(update_interval),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source(&self) -> &Arc<SourceInfo> {
        &self.source
    }

    pub fn state(&self) -> TailState {
        TailState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Stop the reader and wait for its thread. Idempotent.
    pub fn stop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!(file = %self.path.display(), "Tail: reader thread panicked");
            }
            tracing::debug!(file = %self.path.display(), "Tail: reader joined");
        }
        self.pending.clear();
    }

    pub(crate) fn push(&mut self, update: FeedUpdate) {
        self.pending.push(update);
    }

    pub(crate) fn take_pending(&mut self) -> Vec<FeedUpdate> {
        std::mem::take(&mut self.pending)
    }

    pub(crate) fn limiter_mut(&mut self) -> &mut RateLimiter {
        &mut self.limiter
    }
}

impl Drop for FileFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// Reader (background thread)
// =============================================================================

enum Poll {
    /// Bytes were consumed; poll again without sleeping.
    Read,
    /// Nothing new in the file.
    Idle,
    /// The sink refused an update.
    Closed,
}

struct Reader {
    path: PathBuf,
    source: Arc<dyn LineSource>,
    parser: LineParser,
    decoder: Decoder,
    /// Byte position of the next unread byte.
    offset: u64,
    /// Decoded text after the last newline: an in-progress line.
    partial: String,
    next_index: usize,
    /// Most recent record, the target of continuation lines.
    last_line: Option<Arc<Line>>,
    sink: FeedSink,
    progress: mpsc::Sender<TailProgress>,
    cancel: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    poll_interval: Duration,
}

impl Reader {
    fn run(mut self) {
        self.report(TailProgress::Started {
            path: self.path.clone(),
        });

        let slices = (self.poll_interval.as_millis() as u64 / TAIL_CANCEL_CHECK_INTERVAL_MS).max(1);

        'poll: loop {
            if self.cancelled() {
                break;
            }
            match self.poll_once() {
                Ok(Poll::Read) => continue,
                Ok(Poll::Closed) => {
                    tracing::debug!(file = %self.path.display(), "Tail: sink closed");
                    break;
                }
                Ok(Poll::Idle) => self.caught_up(),
                Err(e) => {
                    tracing::warn!(file = %self.path.display(), error = %e, "Tail: read error");
                    self.report(TailProgress::FileError {
                        path: self.path.clone(),
                        message: e.to_string(),
                    });
                    self.caught_up();
                }
            }

            for _ in 0..slices {
                std::thread::sleep(Duration::from_millis(TAIL_CANCEL_CHECK_INTERVAL_MS));
                if self.cancelled() {
                    break 'poll;
                }
            }
        }

        self.state.store(TailState::Stopped as u8, Ordering::SeqCst);
        self.report(TailProgress::Stopped {
            path: self.path.clone(),
        });
        tracing::debug!(file = %self.path.display(), "Tail: reader stopped");
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    // Progress listeners are optional; a closed channel is not an error.
    fn report(&self, msg: TailProgress) {
        let _ = self.progress.send(msg);
    }

    fn caught_up(&mut self) {
        if self
            .state
            .compare_exchange(
                TailState::Starting as u8,
                TailState::Tailing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            tracing::info!(
                file = %self.path.display(),
                lines = self.next_index,
                "Tail: initial content read, following"
            );
            self.report(TailProgress::CaughtUp {
                path: self.path.clone(),
                lines: self.next_index,
            });
        }
    }

    fn poll_once(&mut self) -> io::Result<Poll> {
        // ---------------------------------------------------------------
        // 1. Check current file size; handle truncation / rotation.
        // ---------------------------------------------------------------
        let current_size = std::fs::metadata(&self.path)?.len();

        if current_size < self.offset {
            tracing::info!(
                file = %self.path.display(),
                old_offset = self.offset,
                new_size = current_size,
                "Tail: file truncated or rotated, restarting from offset 0"
            );
            self.offset = 0;
            self.partial.clear();
            self.decoder.reset();
            self.parser.reset();
            self.next_index = 0;
            self.last_line = None;
            if !(self.sink)(FeedUpdate::Reset) {
                return Ok(Poll::Closed);
            }
            self.report(TailProgress::Truncated {
                path: self.path.clone(),
            });
        }

        if current_size == self.offset {
            return Ok(Poll::Idle);
        }

        // ---------------------------------------------------------------
        // 2. Read new bytes (capped per tick) and decode.
        // ---------------------------------------------------------------
        let available = (current_size - self.offset) as usize;
        let limit = available.min(MAX_TAIL_READ_BYTES_PER_TICK);
        let bytes = read_bytes_at(&self.path, self.offset, limit)?;
        if bytes.is_empty() {
            return Ok(Poll::Idle);
        }
        self.offset += bytes.len() as u64;

        let decoded = self.decoder.decode(&bytes);
        self.partial.push_str(&decoded);

        // ---------------------------------------------------------------
        // 3. Split at the last newline; carry the in-progress tail.
        // ---------------------------------------------------------------
        let Some(nl_pos) = self.partial.rfind('\n') else {
            self.enforce_partial_cap();
            return Ok(Poll::Read);
        };
        let rest = self.partial.split_off(nl_pos + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        self.enforce_partial_cap();

        // ---------------------------------------------------------------
        // 4. Parse complete lines.
        // ---------------------------------------------------------------
        let mut batch: Vec<Arc<Line>> = Vec::new();
        let mut grew = false;
        for raw in complete.lines() {
            match self.parser.parse(self.next_index, raw, &self.source) {
                ParseOutcome::NewLine(line) => {
                    let line = Arc::new(line);
                    self.next_index += 1;
                    self.last_line = Some(Arc::clone(&line));
                    batch.push(line);
                }
                ParseOutcome::Continuation(text) => {
                    if let Some(last) = &self.last_line {
                        last.push_additional(&text);
                        // The record already went out in an earlier batch.
                        grew |= batch.is_empty();
                    }
                }
            }
        }

        if !batch.is_empty() {
            tracing::debug!(
                file = %self.path.display(),
                count = batch.len(),
                first = logging::preview(batch[0].text()),
                "Tail: new lines"
            );
            if !(self.sink)(FeedUpdate::Lines(batch)) {
                return Ok(Poll::Closed);
            }
        }
        if grew && !(self.sink)(FeedUpdate::Grew) {
            return Ok(Poll::Closed);
        }
        Ok(Poll::Read)
    }

    fn enforce_partial_cap(&mut self) {
        if self.partial.len() > MAX_TAIL_PARTIAL_BYTES {
            tracing::warn!(
                file = %self.path.display(),
                bytes = self.partial.len(),
                "Tail: unterminated line exceeds cap, discarding"
            );
            self.partial.clear();
        }
    }
}

/// Read up to `limit` bytes from `path` starting at byte position `offset`.
fn read_bytes_at(path: &Path, offset: u64, limit: usize) -> io::Result<Vec<u8>> {
    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; limit];
    let n = file.read(&mut buf)?;
    buf.truncate(n);
    Ok(buf)
}
