// scanlight-engine/src/scheduler.rs
// Sampling-loop timing: the tick cadence tracks a host yield point
// (display refresh stand-in), the decode cadence is capped separately.

use std::future::Future;
use std::time::{Duration, Instant};

/// Decode-rate settings for one session.  Immutable once scanning starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleConfig {
    pub target_rate_hz: f64,
}

impl ScheduleConfig {
    pub fn new(target_rate_hz: f64) -> Self {
        Self { target_rate_hz }
    }

    /// Minimum wall-clock spacing between successive decode attempts.
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_rate_hz.max(0.1))
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            target_rate_hz: 12.0,
        }
    }
}

/// Throttle state for the continuous sampling loop.
///
/// The loop driver lives in the engine; the decisions here are plain
/// synchronous functions so the throttle property can be tested without
/// a running loop.
#[derive(Debug)]
pub struct FrameScheduler {
    min_interval: Duration,
    last_attempt: Option<Instant>,
    armed: bool,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self {
            min_interval: ScheduleConfig::default().min_interval(),
            last_attempt: None,
            armed: false,
        }
    }

    pub fn arm(&mut self, config: ScheduleConfig) {
        self.min_interval = config.min_interval();
        self.last_attempt = None;
        self.armed = true;
    }

    pub fn disarm(&mut self) {
        self.armed = false;
        self.last_attempt = None;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Whether enough time has passed since the last performed attempt.
    /// A `false` answer is a no-op tick; the loop still reschedules.
    pub fn should_attempt(&self, now: Instant) -> bool {
        if !self.armed {
            return false;
        }
        match self.last_attempt {
            None => true,
            Some(last) => now.duration_since(last) >= self.min_interval,
        }
    }

    pub fn record_attempt(&mut self, now: Instant) {
        self.last_attempt = Some(now);
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Injectable yield point the loop suspends on between iterations.
pub trait TickSource: Send + 'static {
    fn next_tick(&mut self) -> impl Future<Output = ()> + Send;
}

/// Default yield point: a fixed-period timer approximating display refresh.
#[derive(Debug, Clone, Copy)]
pub struct FrameClock {
    period: Duration,
}

impl FrameClock {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        // ~60 Hz
        Self::new(Duration::from_micros(16_666))
    }
}

impl TickSource for FrameClock {
    fn next_tick(&mut self) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(self.period)
    }
}
