//! Aggregate progress over a batch of concurrent transfers.

use crate::RemoteError;
use hoist_schema::Resource;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Receives batch progress and per-resource failures.
pub trait DownloadObserver: Send + Sync {
    /// `percent` never decreases within a batch and reaches 100 at most once.
    fn progress(&self, percent: u8, remaining: Option<Duration>);

    fn resource_failed(&self, _resource: &Resource, _error: &RemoteError) {}
}

pub struct NoopObserver;

impl DownloadObserver for NoopObserver {
    fn progress(&self, _percent: u8, _remaining: Option<Duration>) {}
}

struct State {
    totals: Vec<u64>,
    downloaded: Vec<u64>,
    last_percent: Option<u8>,
    last_emit: Option<Instant>,
    finished: bool,
}

/// Shared accumulator written by every worker of a batch.
///
/// Per-resource counts are clamped to the resource's total and only move
/// forward, so a transfer restarted on another transport does not pull the
/// aggregate back. Until [`finish`](Self::finish) the reported percentage is
/// capped at 99.
pub struct ProgressTracker<'a> {
    state: Mutex<State>,
    interval: Duration,
    started: Instant,
    observer: &'a dyn DownloadObserver,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(totals: Vec<u64>, interval: Duration, observer: &'a dyn DownloadObserver) -> Self {
        let downloaded = vec![0; totals.len()];
        Self {
            state: Mutex::new(State {
                totals,
                downloaded,
                last_percent: None,
                last_emit: None,
                finished: false,
            }),
            interval,
            started: Instant::now(),
            observer,
        }
    }

    /// Raise the expected size of resource `index`; smaller values are ignored.
    pub fn revise_total(&self, index: usize, total: u64) {
        let mut state = self.state.lock();
        if let Some(t) = state.totals.get_mut(index) {
            *t = (*t).max(total);
        }
    }

    /// Record that `bytes` of resource `index` have been received so far.
    pub fn update(&self, index: usize, bytes: u64) {
        let mut state = self.state.lock();
        if state.finished || index >= state.totals.len() {
            return;
        }
        let clamped = bytes.min(state.totals[index]);
        if clamped > state.downloaded[index] {
            state.downloaded[index] = clamped;
        }

        let now = Instant::now();
        if let Some(last) = state.last_emit {
            if now.duration_since(last) < self.interval {
                return;
            }
        }
        let (percent, remaining) = self.snapshot(&state, now);
        let percent = percent.min(99);
        if matches!(state.last_percent, Some(last) if percent <= last) {
            return;
        }
        state.last_percent = Some(percent);
        state.last_emit = Some(now);
        self.observer.progress(percent, remaining);
    }

    /// End the batch. A completed batch reports 100 exactly once; an aborted
    /// one reports nothing further.
    pub fn finish(&self, aborted: bool) {
        let mut state = self.state.lock();
        if state.finished {
            return;
        }
        state.finished = true;
        if !aborted {
            state.last_percent = Some(100);
            self.observer.progress(100, Some(Duration::ZERO));
        }
    }

    pub fn downloaded(&self) -> u64 {
        self.state.lock().downloaded.iter().sum()
    }

    pub fn total(&self) -> u64 {
        self.state.lock().totals.iter().sum()
    }

    fn snapshot(&self, state: &State, now: Instant) -> (u8, Option<Duration>) {
        let total: u64 = state.totals.iter().sum();
        let done: u64 = state.downloaded.iter().sum();
        if total == 0 {
            return (0, None);
        }
        let percent = (u128::from(done) * 100 / u128::from(total)) as u8;

        let elapsed = now.duration_since(self.started).as_secs_f64();
        let remaining = (done > 0 && elapsed > 0.0).then(|| {
            let rate = done as f64 / elapsed;
            Duration::from_secs_f64((total - done) as f64 / rate)
        });
        (percent, remaining)
    }
}
