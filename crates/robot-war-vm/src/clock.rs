use std::{
    cell::Cell,
    fmt,
    time::{Duration, Instant},
};

/// Source of monotonic time for the scheduler, `time.monotonic()` and `time.sleep()`.
pub trait Clock: fmt::Debug {
    /// Time elapsed since the clock started.
    fn now(&self) -> Duration;

    /// Called once at the start of every scheduler tick.
    fn tick(&self) {}
}

/// Wall-clock monotonic time.
#[derive(Debug)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self { start: Instant::now() }
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
}

/// Deterministic clock that advances by a fixed step on every tick.
///
/// Starts at one step so `monotonic()` is strictly positive from the first instruction.
#[derive(Debug)]
pub struct FixedStepClock {
    step: Duration,
    now: Cell<Duration>,
}

impl FixedStepClock {
    #[must_use]
    pub fn new(step: Duration) -> Self {
        Self { step, now: Cell::new(step) }
    }
}

impl Clock for FixedStepClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn tick(&self) {
        self.now.set(self.now.get() + self.step);
    }
}
