// LogWeave - app/rate_limit.rs
//
// Coalescing throttle for expensive view updates.
//
// A request runs the action immediately if nothing ran within the last
// interval; otherwise one deferred run is scheduled for when the interval
// expires and every further request until then joins it. The deferred run
// reads current state, so nothing a coalesced request wanted is lost.
//
// The limiter itself is plain data owned by dispatcher state. `request`
// wires it to a `DispatchHandle` so the deferred run is a timed dispatcher
// task.

use std::time::{Duration, Instant};

use crate::app::dispatcher::DispatchHandle;

/// What the caller should do with one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Throttle {
    /// Run the action now.
    RunNow,
    /// Schedule one deferred run after `delay`, redeemed with `ticket`.
    Schedule { delay: Duration, ticket: u64 },
    /// A deferred run is already pending and will cover this request.
    Coalesced,
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_interval: Duration,
    last_run: Option<Instant>,
    pending: Option<u64>,
    next_ticket: u64,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_run: None,
            pending: None,
            next_ticket: 0,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn request(&mut self, now: Instant) -> Throttle {
        if self.pending.is_some() {
            return Throttle::Coalesced;
        }
        match self.last_run {
            Some(last) if now.saturating_duration_since(last) < self.min_interval => {
                self.next_ticket += 1;
                self.pending = Some(self.next_ticket);
                Throttle::Schedule {
                    delay: self.min_interval - now.saturating_duration_since(last),
                    ticket: self.next_ticket,
                }
            }
            _ => {
                self.last_run = Some(now);
                Throttle::RunNow
            }
        }
    }

    /// Redeem a deferred run. Returns `true` if the action should run;
    /// stale tickets (already flushed or superseded) return `false`.
    pub fn fire(&mut self, ticket: u64, now: Instant) -> bool {
        if self.pending != Some(ticket) {
            return false;
        }
        self.pending = None;
        self.last_run = Some(now);
        true
    }

    /// Take the pending run early. Returns `true` if one was pending.
    pub fn take_pending(&mut self, now: Instant) -> bool {
        if self.pending.take().is_none() {
            return false;
        }
        self.last_run = Some(now);
        true
    }
}

// =============================================================================
// Dispatcher wiring
// =============================================================================

/// Dispatcher state that owns keyed rate limiters.
pub trait Throttled: Sized + 'static {
    type Key: Copy + Send + 'static;

    /// The limiter for `key`, or `None` if the keyed object is gone.
    fn limiter(&mut self, key: Self::Key) -> Option<&mut RateLimiter>;

    /// The throttled action itself.
    fn run_throttled(&mut self, key: Self::Key);

    fn dispatch_handle(&self) -> DispatchHandle<Self>;
}

/// Request the throttled action for `key`. Must run on the dispatcher.
pub fn request<S: Throttled>(state: &mut S, key: S::Key) {
    let Some(limiter) = state.limiter(key) else {
        return;
    };
    match limiter.request(Instant::now()) {
        Throttle::RunNow => state.run_throttled(key),
        Throttle::Schedule { delay, ticket } => {
            state
                .dispatch_handle()
                .submit_after(delay, move |s: &mut S| fire(s, key, ticket));
        }
        Throttle::Coalesced => {}
    }
}

fn fire<S: Throttled>(state: &mut S, key: S::Key, ticket: u64) {
    // The keyed object may have been destroyed while the run was queued.
    if state
        .limiter(key)
        .is_some_and(|l| l.fire(ticket, Instant::now()))
    {
        state.run_throttled(key);
    }
}

/// Run a pending deferred action now. Returns `true` if one ran.
pub fn flush<S: Throttled>(state: &mut S, key: S::Key) -> bool {
    if state
        .limiter(key)
        .is_some_and(|l| l.take_pending(Instant::now()))
    {
        state.run_throttled(key);
        return true;
    }
    false
}
