use std::time::{Duration, Instant};

/// Monotonic frame clock feeding timestamps to the animation scheduler.
pub struct Time {
    start: Instant,
    last: Instant,
    pub delta: Duration,
}

impl Time {
    pub fn new() -> Self {
        let now = Instant::now();
        Self { start: now, last: now, delta: Duration::from_secs_f32(0.0) }
    }

    pub fn tick(&mut self) {
        let now = Instant::now();
        self.delta = now - self.last;
        self.last = now;
    }

    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    pub fn elapsed_seconds(&self) -> f32 {
        self.last.duration_since(self.start).as_secs_f32()
    }

    /// Seconds since the clock was created, sampled now rather than at the last tick.
    pub fn now_seconds(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Time {
    fn default() -> Self {
        Self::new()
    }
}
