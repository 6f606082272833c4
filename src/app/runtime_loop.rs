use super::PluginHost;
use crate::scheduler::TickReport;
use crate::time::Time;

/// Where frame timestamps come from.
pub enum FrameClock {
    Realtime(Time),
    /// Advances by `step` seconds per tick regardless of wall time.
    Fixed { now: f64, step: f64 },
}

impl FrameClock {
    pub fn fixed(step: f64) -> Self {
        Self::Fixed { now: 0.0, step }
    }

    fn advance(&mut self) -> f64 {
        match self {
            Self::Realtime(time) => {
                time.tick();
                time.now_seconds()
            }
            Self::Fixed { now, step } => {
                *now += *step;
                *now
            }
        }
    }
}

pub struct RuntimeTick {
    pub now: f64,
    pub report: TickReport,
    /// Seconds of wall time beyond the clamp that were skipped this tick.
    pub dropped_backlog: Option<f32>,
}

/// Drives a [`PluginHost`] from a [`FrameClock`].
pub struct RuntimeLoop {
    clock: FrameClock,
    last: Option<f64>,
    max_backlog: f32,
    ticks: u64,
}

impl RuntimeLoop {
    pub fn new(clock: FrameClock, max_backlog: f32) -> Self {
        Self { clock, last: None, max_backlog, ticks: 0 }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn tick(&mut self, host: &mut PluginHost) -> RuntimeTick {
        let now = self.clock.advance();
        let elapsed = self.last.map(|last| (now - last) as f32).unwrap_or(0.0);
        self.last = Some(now);
        let dropped_backlog = (elapsed > self.max_backlog).then(|| elapsed - self.max_backlog);
        if let Some(dropped) = dropped_backlog {
            log::debug!("[loop] frame took {elapsed:.3}s, skipping {dropped:.3}s");
        }
        let report = host.frame(now);
        self.ticks += 1;
        RuntimeTick { now, report, dropped_backlog }
    }

    /// Ticks until the scheduler goes idle or `max_ticks` is reached. Returns ticks run.
    pub fn run_until_idle(&mut self, host: &mut PluginHost, max_ticks: u32) -> u32 {
        let mut ran = 0;
        while ran < max_ticks && host.is_animating() {
            self.tick(host);
            ran += 1;
        }
        ran
    }
}
