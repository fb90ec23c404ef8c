//! Time source and bounded waiting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic time source shared by the scheduler and drivers.
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock started.
    fn now(&self) -> Duration;

    /// Block for `duration`.
    fn sleep(&self, duration: Duration);

    /// Milliseconds since start, wrapping like a 32-bit hardware counter.
    fn millis(&self) -> u32 {
        self.now().as_millis() as u32
    }

    /// Microseconds since start, wrapping like a 32-bit hardware counter.
    fn micros(&self) -> u32 {
        self.now().as_micros() as u32
    }
}

/// Wall clock backed by [`Instant`].
#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock that only moves when told to. `sleep` advances it, so
/// timeouts elapse instantly in tests.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    micros: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.micros
            .fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_micros(self.micros.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Outcome of [`poll_until`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll<T> {
    Ready(T),
    TimedOut { elapsed: Duration },
}

impl<T> Poll<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Poll::Ready(value) => Some(value),
            Poll::TimedOut { .. } => None,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Poll::TimedOut { .. })
    }
}

const MIN_POLL_INTERVAL: Duration = Duration::from_micros(1);

/// Call `attempt` until it yields a value or `timeout` passes.
///
/// The attempt always runs at least once. Between attempts the clock sleeps
/// for `interval` (at least 1 µs, never past the deadline), so the loop
/// terminates on any clock that advances while sleeping.
pub fn poll_until<T>(
    clock: &dyn Clock,
    timeout: Duration,
    interval: Duration,
    mut attempt: impl FnMut() -> Option<T>,
) -> Poll<T> {
    let start = clock.now();
    let deadline = start + timeout;
    let interval = interval.max(MIN_POLL_INTERVAL);
    loop {
        if let Some(value) = attempt() {
            return Poll::Ready(value);
        }
        let now = clock.now();
        if now >= deadline {
            return Poll::TimedOut {
                elapsed: now.saturating_sub(start),
            };
        }
        clock.sleep(interval.min(deadline - now));
    }
}
