// LogWeave - app/dispatcher.rs
//
// The single serialized execution context for all view state.
//
// Architecture:
//   - One worker thread owns the state value `S` outright; it is built on
//     that thread and dropped there, so no other thread can reach it.
//   - Every other thread holds a `DispatchHandle<S>` and sends boxed tasks
//     (`FnOnce(&mut S)`) over an mpsc channel. Tasks run strictly one at a
//     time in submission order.
//   - Delayed tasks (rate-limited updates) wait in a timer heap on the
//     worker and run once due.
//   - Sending never blocks, so reader threads can enqueue work without ever
//     waiting on the dispatcher.
//
// A task that submits further work from inside the dispatcher is queued
// behind the current task. Code already running on the dispatcher holds
// `&mut S` and calls the state directly instead of submitting.

use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Unit of work executed on the dispatcher.
pub type Task<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

enum Command<S> {
    Run(Task<S>),
    RunAt(Instant, Task<S>),
    Shutdown,
}

thread_local! {
    static ON_DISPATCHER: Cell<bool> = const { Cell::new(false) };
}

/// True when the calling thread is a dispatcher worker.
pub fn is_on_dispatcher() -> bool {
    ON_DISPATCHER.with(Cell::get)
}

/// Abort if view state is being touched from outside the dispatcher.
///
/// Failing here means the single-writer invariant is already broken, so
/// this panics instead of returning an error.
#[track_caller]
pub fn assert_on_dispatcher() {
    assert!(
        is_on_dispatcher(),
        "view state accessed outside the dispatcher thread ({:?})",
        std::thread::current().name()
    );
}

// =============================================================================
// DispatchHandle
// =============================================================================

/// Cloneable sender side of a dispatcher.
pub struct DispatchHandle<S> {
    tx: mpsc::Sender<Command<S>>,
}

impl<S> Clone for DispatchHandle<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S: 'static> DispatchHandle<S> {
    /// Enqueue `task`. Returns `false` once the dispatcher has shut down.
    ///
    /// A submit made from the dispatcher thread runs after the current task
    /// returns, not inline. Code that already holds `&mut S` there should
    /// call the state directly when it needs the effect now.
    pub fn submit(&self, task: impl FnOnce(&mut S) + Send + 'static) -> bool {
        self.tx.send(Command::Run(Box::new(task))).is_ok()
    }

    /// Enqueue `task` to run no earlier than `delay` from now.
    pub fn submit_after(&self, delay: Duration, task: impl FnOnce(&mut S) + Send + 'static) -> bool {
        self.tx
            .send(Command::RunAt(Instant::now() + delay, Box::new(task)))
            .is_ok()
    }

    /// Run `f` on the dispatcher and wait for its result.
    ///
    /// Returns `None` if the dispatcher stopped before running it. Calling
    /// this from the dispatcher itself would deadlock and panics instead.
    pub fn call<R: Send + 'static>(
        &self,
        f: impl FnOnce(&mut S) -> R + Send + 'static,
    ) -> Option<R> {
        assert!(
            !is_on_dispatcher(),
            "DispatchHandle::call from inside the dispatcher would deadlock"
        );
        let (tx, rx) = mpsc::sync_channel(1);
        if !self.submit(move |state| {
            let _ = tx.send(f(state));
        }) {
            return None;
        }
        rx.recv().ok()
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Owner of the dispatcher worker thread.
///
/// Dropping it (or calling `shutdown`) stops the worker after the task in
/// progress and drops the state on the worker thread.
pub struct Dispatcher<S: 'static> {
    handle: DispatchHandle<S>,
    worker: Option<JoinHandle<()>>,
}

impl<S: 'static> Dispatcher<S> {
    /// Start the worker thread and build the state on it with `init`.
    pub fn spawn<F>(name: &str, init: F) -> io::Result<Self>
    where
        F: FnOnce(DispatchHandle<S>) -> S + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let handle = DispatchHandle { tx };
        let worker_handle = handle.clone();

        let worker = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                ON_DISPATCHER.with(|flag| flag.set(true));
                let mut state = init(worker_handle);
                run_worker(&mut state, rx);
                tracing::debug!("Dispatcher: worker stopping");
                drop(state);
            })?;

        tracing::debug!(name, "Dispatcher started");
        Ok(Self {
            handle,
            worker: Some(worker),
        })
    }

    pub fn handle(&self) -> DispatchHandle<S> {
        self.handle.clone()
    }

    pub fn submit(&self, task: impl FnOnce(&mut S) + Send + 'static) -> bool {
        self.handle.submit(task)
    }

    pub fn call<R: Send + 'static>(
        &self,
        f: impl FnOnce(&mut S) -> R + Send + 'static,
    ) -> Option<R> {
        self.handle.call(f)
    }

    /// Stop the worker and wait for it to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.handle.tx.send(Command::Shutdown);
            if worker.join().is_err() {
                tracing::error!("Dispatcher worker panicked");
            }
        }
    }
}

impl<S: 'static> Drop for Dispatcher<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// Worker loop
// =============================================================================

struct Timer<S> {
    due: Instant,
    seq: u64,
    task: Task<S>,
}

// Min-heap on (due, seq): earliest first, FIFO among equal deadlines.
impl<S> Ord for Timer<S> {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.due, other.seq).cmp(&(self.due, self.seq))
    }
}

impl<S> PartialOrd for Timer<S> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<S> PartialEq for Timer<S> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<S> Eq for Timer<S> {}

fn run_worker<S>(state: &mut S, rx: mpsc::Receiver<Command<S>>) {
    let mut timers: BinaryHeap<Timer<S>> = BinaryHeap::new();
    let mut seq: u64 = 0;

    loop {
        let now = Instant::now();
        while timers.peek().is_some_and(|t| t.due <= now) {
            if let Some(timer) = timers.pop() {
                (timer.task)(state);
            }
        }

        let command = match timers.peek() {
            Some(next) => {
                match rx.recv_timeout(next.due.saturating_duration_since(Instant::now())) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
            None => match rx.recv() {
                Ok(command) => command,
                Err(_) => return,
            },
        };

        match command {
            Command::Run(task) => task(state),
            Command::RunAt(due, task) => {
                seq += 1;
                timers.push(Timer { due, seq, task });
            }
            Command::Shutdown => return,
        }
    }
}
