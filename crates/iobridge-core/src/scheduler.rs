//! STOPPED/RUNNING tick driver.
//!
//! While running, every tick pumps at most one frame and then runs every
//! library's `on_tick`. Ticks come either from a hardware timer (a
//! [`TickTimer`] whose interrupt calls [`IoServer::tick`]) or from the
//! cooperative loop in [`IoServer::run`], which asks [`Scheduler::due`]
//! against the server clock.
//!
//! [`IoServer::tick`]: crate::server::IoServer::tick
//! [`IoServer::run`]: crate::server::IoServer::run

use std::time::Duration;

use tracing::info;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running { period: Duration },
}

/// Start/stop hooks for a hardware tick source.
pub trait TickTimer: Send {
    fn start(&mut self, period: Duration);
    fn stop(&mut self);
}

pub struct Scheduler {
    state: SchedulerState,
    timer: Option<Box<dyn TickTimer>>,
    next_due: Option<Duration>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            state: SchedulerState::Stopped,
            timer: None,
            next_due: None,
        }
    }

    pub fn with_timer(mut self, timer: Box<dyn TickTimer>) -> Self {
        self.timer = Some(timer);
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, SchedulerState::Running { .. })
    }

    pub fn period(&self) -> Option<Duration> {
        match self.state {
            SchedulerState::Running { period } => Some(period),
            SchedulerState::Stopped => None,
        }
    }

    /// Enter RUNNING with a base rate in seconds.
    ///
    /// The rate is converted to whole microseconds; anything that is not a
    /// positive finite number of at least one microsecond is rejected and
    /// leaves the state unchanged.
    pub fn configure(&mut self, base_rate_seconds: f64) -> Result<Duration> {
        if !base_rate_seconds.is_finite() || base_rate_seconds <= 0.0 {
            return Err(CoreError::InvalidRate(base_rate_seconds));
        }
        let micros = (base_rate_seconds * 1e6) as u64;
        if micros == 0 {
            return Err(CoreError::InvalidRate(base_rate_seconds));
        }
        let period = Duration::from_micros(micros);
        let running = self.is_running();
        if let Some(timer) = self.timer.as_mut() {
            if running {
                timer.stop();
            }
            timer.start(period);
        }
        self.state = SchedulerState::Running { period };
        self.next_due = None;
        info!(period_us = micros, "scheduler running");
        Ok(period)
    }

    pub fn stop(&mut self) {
        if !self.is_running() {
            return;
        }
        if let Some(timer) = self.timer.as_mut() {
            timer.stop();
        }
        self.state = SchedulerState::Stopped;
        self.next_due = None;
        info!("scheduler stopped");
    }

    /// Soft-real-time check: whether a tick is due at `now`.
    ///
    /// The first call after `configure` is always due. A loop that falls
    /// more than one period behind skips the missed ticks instead of
    /// bursting.
    pub fn due(&mut self, now: Duration) -> bool {
        let Some(period) = self.period() else {
            return false;
        };
        match self.next_due {
            Some(next) if now < next => false,
            Some(next) if now < next + period => {
                self.next_due = Some(next + period);
                true
            }
            _ => {
                self.next_due = Some(now + period);
                true
            }
        }
    }

    /// Time left until the next soft tick, zero when one is due.
    pub fn until_due(&self, now: Duration) -> Option<Duration> {
        self.period()?;
        Some(self.next_due.map_or(Duration::ZERO, |next| next.saturating_sub(now)))
    }
}
