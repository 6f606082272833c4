//! Cooperative per-frame callback dispatch.
//!
//! The scheduler never owns a thread. Whoever drives frames calls [`AnimationScheduler::tick`]
//! while [`AnimationScheduler::is_running`] reports pending work; the scheduler flips itself
//! off once a tick leaves both request sets empty.

use crate::error::isolate;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnimationHandle(u64);

impl AnimationHandle {
    pub fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOwner {
    External,
    Plugin(String),
}

impl RequestOwner {
    pub fn is_plugin(&self, id: &str) -> bool {
        matches!(self, RequestOwner::Plugin(owner) if owner == id)
    }
}

/// Continuous callback. Returning `Ok(false)` unregisters it.
pub type ContinuousCallback<T> = Box<dyn FnMut(&mut T, f32) -> anyhow::Result<bool>>;
pub type OneShotCallback<T> = Box<dyn FnOnce(&mut T, f32) -> anyhow::Result<()>>;

struct Continuous<T> {
    handle: AnimationHandle,
    owner: RequestOwner,
    callback: ContinuousCallback<T>,
}

struct OneShot<T> {
    handle: AnimationHandle,
    owner: RequestOwner,
    callback: OneShotCallback<T>,
}

/// Registration recorded while the scheduler itself is busy (for example from inside a
/// frame callback) and applied afterwards with [`AnimationScheduler::apply`].
pub enum DeferredRequest<T> {
    Continuous { handle: AnimationHandle, owner: RequestOwner, callback: ContinuousCallback<T> },
    OneShot { handle: AnimationHandle, owner: RequestOwner, callback: OneShotCallback<T> },
    Cancel(AnimationHandle),
}

pub struct DeferredRequests<T> {
    queue: Vec<DeferredRequest<T>>,
}

impl<T> Default for DeferredRequests<T> {
    fn default() -> Self {
        Self { queue: Vec::new() }
    }
}

impl<T> DeferredRequests<T> {
    pub fn request_animation(&mut self, owner: RequestOwner, callback: ContinuousCallback<T>) -> AnimationHandle {
        let handle = AnimationHandle::next();
        self.queue.push(DeferredRequest::Continuous { handle, owner, callback });
        handle
    }

    pub fn request_frame(&mut self, owner: RequestOwner, callback: OneShotCallback<T>) -> AnimationHandle {
        let handle = AnimationHandle::next();
        self.queue.push(DeferredRequest::OneShot { handle, owner, callback });
        handle
    }

    pub fn cancel(&mut self, handle: AnimationHandle) {
        self.queue.push(DeferredRequest::Cancel(handle));
    }

    /// Drops queued registrations belonging to `plugin_id`.
    pub fn discard_owned_by(&mut self, plugin_id: &str) -> usize {
        let before = self.queue.len();
        self.queue.retain(|request| match request {
            DeferredRequest::Continuous { owner, .. } | DeferredRequest::OneShot { owner, .. } => {
                !owner.is_plugin(plugin_id)
            }
            DeferredRequest::Cancel(_) => true,
        });
        before - self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn take(&mut self) -> Vec<DeferredRequest<T>> {
        std::mem::take(&mut self.queue)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickReport {
    pub ran: bool,
    pub delta_seconds: f32,
    pub continuous_invoked: usize,
    pub one_shots_invoked: usize,
    pub unregistered: usize,
    pub failures: usize,
    pub stopped: bool,
}

pub struct AnimationScheduler<T> {
    continuous: Vec<Continuous<T>>,
    one_shots: Vec<OneShot<T>>,
    running: bool,
    last_tick: Option<f64>,
    max_delta: f32,
    ticks: u64,
}

impl<T> Default for AnimationScheduler<T> {
    fn default() -> Self {
        Self::new(0.25)
    }
}

impl<T> AnimationScheduler<T> {
    pub fn new(max_delta_seconds: f32) -> Self {
        Self {
            continuous: Vec::new(),
            one_shots: Vec::new(),
            running: false,
            last_tick: None,
            max_delta: max_delta_seconds.max(0.0),
            ticks: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn continuous_count(&self) -> usize {
        self.continuous.len()
    }

    pub fn one_shot_count(&self) -> usize {
        self.one_shots.len()
    }

    pub fn has_pending_work(&self) -> bool {
        !self.continuous.is_empty() || !self.one_shots.is_empty()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn is_registered(&self, handle: AnimationHandle) -> bool {
        self.continuous.iter().any(|entry| entry.handle == handle)
            || self.one_shots.iter().any(|entry| entry.handle == handle)
    }

    pub fn request_animation(&mut self, owner: RequestOwner, callback: ContinuousCallback<T>) -> AnimationHandle {
        let handle = AnimationHandle::next();
        self.push_continuous(handle, owner, callback);
        handle
    }

    pub fn request_frame(&mut self, owner: RequestOwner, callback: OneShotCallback<T>) -> AnimationHandle {
        let handle = AnimationHandle::next();
        self.push_one_shot(handle, owner, callback);
        handle
    }

    /// Removes a continuous request. Unknown handles are ignored. The loop itself keeps
    /// running until the next tick notices there is nothing left to do.
    pub fn cancel_animation(&mut self, handle: AnimationHandle) -> bool {
        let before = self.continuous.len();
        self.continuous.retain(|entry| entry.handle != handle);
        let removed = before != self.continuous.len();
        if removed {
            log::trace!("[scheduler] cancelled animation {}", handle.raw());
        }
        removed
    }

    pub fn cancel_frame(&mut self, handle: AnimationHandle) -> bool {
        let before = self.one_shots.len();
        self.one_shots.retain(|entry| entry.handle != handle);
        before != self.one_shots.len()
    }

    /// Cancels every request owned by `plugin_id`, returning how many were dropped.
    pub fn cancel_owned_by(&mut self, plugin_id: &str) -> usize {
        let before = self.continuous.len() + self.one_shots.len();
        self.continuous.retain(|entry| !entry.owner.is_plugin(plugin_id));
        self.one_shots.retain(|entry| !entry.owner.is_plugin(plugin_id));
        let dropped = before - (self.continuous.len() + self.one_shots.len());
        if dropped > 0 {
            log::debug!("[scheduler] dropped {dropped} request(s) owned by '{plugin_id}'");
        }
        dropped
    }

    pub fn apply(&mut self, requests: Vec<DeferredRequest<T>>) {
        for request in requests {
            match request {
                DeferredRequest::Continuous { handle, owner, callback } => {
                    self.push_continuous(handle, owner, callback)
                }
                DeferredRequest::OneShot { handle, owner, callback } => {
                    self.push_one_shot(handle, owner, callback)
                }
                DeferredRequest::Cancel(handle) => {
                    if !self.cancel_animation(handle) {
                        self.cancel_frame(handle);
                    }
                }
            }
        }
    }

    /// Runs one frame pass at timestamp `now` (seconds).
    ///
    /// Continuous callbacks run before one-shots. A callback that errors or panics is logged
    /// and unregistered; the rest of the pass still runs.
    pub fn tick(&mut self, now: f64, target: &mut T) -> TickReport {
        let mut report = TickReport::default();
        if !self.running {
            return report;
        }
        let delta = match self.last_tick {
            Some(previous) => ((now - previous).max(0.0) as f32).min(self.max_delta),
            None => 0.0,
        };
        self.last_tick = Some(now);
        self.ticks += 1;
        report.ran = true;
        report.delta_seconds = delta;

        let mut continuous = std::mem::take(&mut self.continuous);
        continuous.retain_mut(|entry| {
            report.continuous_invoked += 1;
            let callback = &mut entry.callback;
            match isolate(|| callback(&mut *target, delta)) {
                Ok(true) => true,
                Ok(false) => {
                    report.unregistered += 1;
                    false
                }
                Err(err) => {
                    report.failures += 1;
                    log::error!("[scheduler] animation {} failed and was removed: {err:#}", entry.handle.raw());
                    false
                }
            }
        });
        self.continuous = continuous;

        let one_shots = std::mem::take(&mut self.one_shots);
        for entry in one_shots {
            report.one_shots_invoked += 1;
            let OneShot { handle, owner, callback } = entry;
            if let Err(err) = isolate(|| callback(&mut *target, delta)) {
                report.failures += 1;
                log::error!("[scheduler] frame request {} ({owner:?}) failed: {err:#}", handle.raw());
            }
        }

        if self.continuous.is_empty() && self.one_shots.is_empty() {
            self.stop();
            report.stopped = true;
        }
        report
    }

    /// Drops every request and stops the loop.
    pub fn clear(&mut self) {
        self.continuous.clear();
        self.one_shots.clear();
        self.stop();
    }

    fn stop(&mut self) {
        if self.running {
            log::trace!("[scheduler] idle, stopping frame loop");
        }
        self.running = false;
        self.last_tick = None;
    }

    fn start(&mut self) {
        if !self.running {
            log::trace!("[scheduler] starting frame loop");
            self.running = true;
        }
    }

    fn push_continuous(&mut self, handle: AnimationHandle, owner: RequestOwner, callback: ContinuousCallback<T>) {
        self.continuous.push(Continuous { handle, owner, callback });
        self.start();
    }

    fn push_one_shot(&mut self, handle: AnimationHandle, owner: RequestOwner, callback: OneShotCallback<T>) {
        self.one_shots.push(OneShot { handle, owner, callback });
        self.start();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        continuous: Vec<f32>,
        one_shots: usize,
        order: Vec<&'static str>,
    }

    fn scheduler() -> AnimationScheduler<Counter> {
        AnimationScheduler::new(1.0)
    }

    #[test]
    fn requesting_starts_the_loop() {
        let mut sched = scheduler();
        assert!(!sched.is_running());
        sched.request_animation(RequestOwner::External, Box::new(|_, _| Ok(true)));
        assert!(sched.is_running());
    }

    #[test]
    fn delta_is_measured_between_ticks_and_clamped() {
        let mut sched = scheduler();
        let mut counter = Counter::default();
        sched.request_animation(
            RequestOwner::External,
            Box::new(|c: &mut Counter, dt| {
                c.continuous.push(dt);
                Ok(true)
            }),
        );
        sched.tick(10.0, &mut counter);
        sched.tick(10.5, &mut counter);
        sched.tick(20.0, &mut counter);
        assert_eq!(counter.continuous, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn continuous_run_before_one_shots() {
        let mut sched = scheduler();
        let mut counter = Counter::default();
        sched.request_frame(
            RequestOwner::External,
            Box::new(|c: &mut Counter, _| {
                c.order.push("once");
                Ok(())
            }),
        );
        sched.request_animation(
            RequestOwner::External,
            Box::new(|c: &mut Counter, _| {
                c.order.push("loop");
                Ok(false)
            }),
        );
        let report = sched.tick(0.0, &mut counter);
        assert_eq!(counter.order, ["loop", "once"]);
        assert!(report.stopped);
    }

    #[test]
    fn one_shots_run_exactly_once() {
        let mut sched = scheduler();
        let mut counter = Counter::default();
        sched.request_animation(RequestOwner::External, Box::new(|_, _| Ok(true)));
        sched.request_frame(
            RequestOwner::External,
            Box::new(|c: &mut Counter, _| {
                c.one_shots += 1;
                Ok(())
            }),
        );
        sched.tick(0.0, &mut counter);
        sched.tick(0.1, &mut counter);
        assert_eq!(counter.one_shots, 1);
        assert_eq!(sched.one_shot_count(), 0);
    }

    #[test]
    fn cancel_does_not_stop_synchronously() {
        let mut sched = scheduler();
        let mut counter = Counter::default();
        let handle = sched.request_animation(RequestOwner::External, Box::new(|_, _| Ok(true)));
        assert!(sched.cancel_animation(handle));
        assert!(sched.is_running(), "loop stops on the next check, not immediately");
        let report = sched.tick(0.0, &mut counter);
        assert!(report.stopped);
        assert!(!sched.is_running());
    }

    #[test]
    fn cancelling_unknown_handle_is_noop() {
        let mut sched = scheduler();
        assert!(!sched.cancel_animation(AnimationHandle::next()));
        assert!(!sched.is_running());
    }

    #[test]
    fn failing_callback_is_removed_without_affecting_neighbours() {
        let mut sched = scheduler();
        let mut counter = Counter::default();
        sched.request_animation(RequestOwner::External, Box::new(|_, _| anyhow::bail!("bad frame")));
        sched.request_animation(RequestOwner::External, Box::new(|_, _| panic!("worse frame")));
        sched.request_animation(
            RequestOwner::External,
            Box::new(|c: &mut Counter, dt| {
                c.continuous.push(dt);
                Ok(true)
            }),
        );
        let report = sched.tick(0.0, &mut counter);
        assert_eq!(report.failures, 2);
        assert_eq!(sched.continuous_count(), 1);
        sched.tick(0.1, &mut counter);
        assert_eq!(counter.continuous.len(), 2);
    }

    #[test]
    fn deferred_requests_apply_after_the_fact() {
        let mut sched = scheduler();
        let mut deferred = DeferredRequests::default();
        let handle = deferred.request_animation(RequestOwner::Plugin("a".into()), Box::new(|_, _| Ok(true)));
        deferred.request_frame(RequestOwner::Plugin("b".into()), Box::new(|_, _| Ok(())));
        assert_eq!(deferred.discard_owned_by("b"), 1);
        sched.apply(deferred.take());
        assert!(sched.is_registered(handle));
        assert_eq!(sched.one_shot_count(), 0);

        deferred.cancel(handle);
        sched.apply(deferred.take());
        assert!(!sched.is_registered(handle));
    }

    #[test]
    fn cancel_owned_by_targets_one_plugin() {
        let mut sched = scheduler();
        sched.request_animation(RequestOwner::Plugin("a".into()), Box::new(|_, _| Ok(true)));
        sched.request_frame(RequestOwner::Plugin("a".into()), Box::new(|_, _| Ok(())));
        sched.request_animation(RequestOwner::Plugin("b".into()), Box::new(|_, _| Ok(true)));
        assert_eq!(sched.cancel_owned_by("a"), 2);
        assert_eq!(sched.continuous_count(), 1);
    }

    #[test]
    fn idle_tick_does_nothing() {
        let mut sched = scheduler();
        let mut counter = Counter::default();
        let report = sched.tick(1.0, &mut counter);
        assert!(!report.ran);
        assert_eq!(sched.ticks(), 0);
    }
}
