//! Interpolated batch progress.
//!
//! Real completions arrive in discrete, unevenly-spaced bursts; the
//! estimator keeps the visible percentage moving between them. A pure
//! state machine (`ProgressModel`) owns the arithmetic; `ProgressTracker`
//! drives it from a periodic ticker task that real settlements always
//! supersede.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::types::{BatchEvent, BatchObserver};

// ═══════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Interval between synthetic nudges.
    pub tick_interval: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(200),
        }
    }
}

/// Interpolation never claims more than this until ground truth arrives.
const INTERPOLATION_CAP: f32 = 90.0;

/// Per-tick percentage step floor.
const MIN_STEP: f32 = 0.5;

// ═══════════════════════════════════════════════════════════
// Model
// ═══════════════════════════════════════════════════════════

/// Pure progress state: a percentage and a completed-count that blend
/// synthetic interpolation with real completions.
#[derive(Debug)]
pub struct ProgressModel {
    total: usize,
    percent: f32,
    completed: usize,
}

impl ProgressModel {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            percent: 0.0,
            completed: 0,
        }
    }

    /// Per-tick step: spreads the interpolation cap over roughly thirty
    /// ticks per image, floored so tiny batches still visibly move.
    pub fn step(&self) -> f32 {
        (INTERPOLATION_CAP / (self.total as f32 * 30.0)).max(MIN_STEP)
    }

    /// Synthetic advance between real completions.
    pub fn tick(&mut self) -> (usize, f32) {
        self.percent = (self.percent + self.step()).min(INTERPOLATION_CAP);
        let estimated = ((self.percent / 100.0) * self.total as f32).floor() as usize;
        let estimated = estimated.min(self.total.saturating_sub(1));
        self.completed = self.completed.max(estimated);
        (self.completed, self.percent)
    }

    /// Ground truth from a real settlement, overriding interpolation.
    pub fn settle(&mut self, settled: usize) -> (usize, f32) {
        self.completed = settled;
        self.percent = ((settled as f32 / self.total.max(1) as f32) * 100.0).round();
        (self.completed, self.percent)
    }

    /// Whole-batch settlement: exactly 100% and the full count.
    pub fn finish(&mut self) -> (usize, f32) {
        self.completed = self.total;
        self.percent = 100.0;
        (self.completed, self.percent)
    }
}

// ═══════════════════════════════════════════════════════════
// Tracker
// ═══════════════════════════════════════════════════════════

struct TickerGuard {
    token: CancellationToken,
    _handle: JoinHandle<()>,
}

/// Drives a `ProgressModel` from a periodic ticker task and publishes
/// snapshots through the batch observer. Each real settlement stops the
/// running ticker, publishes exact numbers, and starts a fresh ticker
/// for the next interval.
pub struct ProgressTracker {
    model: Arc<Mutex<ProgressModel>>,
    config: ProgressConfig,
    observer: Arc<dyn BatchObserver>,
    ticker: Mutex<Option<TickerGuard>>,
}

impl ProgressTracker {
    /// Reset to zero, publish the starting snapshot, and begin ticking.
    pub fn start(
        total: usize,
        config: ProgressConfig,
        observer: Arc<dyn BatchObserver>,
    ) -> Self {
        let tracker = Self {
            model: Arc::new(Mutex::new(ProgressModel::new(total))),
            config,
            observer,
            ticker: Mutex::new(None),
        };
        tracker.publish(0, 0.0);
        tracker.spawn_ticker();
        tracker
    }

    /// A real settlement: publish exact numbers; keep interpolating only
    /// while the batch is still running.
    pub fn settle(&self, settled: usize, more_coming: bool) {
        self.stop_ticker();
        if let Ok(mut model) = self.model.lock() {
            let (completed, percent) = model.settle(settled);
            drop(model);
            self.publish(completed, percent);
        }
        if more_coming {
            self.spawn_ticker();
        }
    }

    /// Whole-batch settlement: force 100% before final results go out.
    pub fn finish(&self) {
        self.stop_ticker();
        if let Ok(mut model) = self.model.lock() {
            let (completed, percent) = model.finish();
            drop(model);
            self.publish(completed, percent);
        }
    }

    /// Cancellation path: stop ticking without claiming completion.
    pub fn teardown(&self) {
        self.stop_ticker();
    }

    fn publish(&self, completed: usize, percent: f32) {
        self.observer.on_event(&BatchEvent::Progress { completed, percent });
    }

    fn spawn_ticker(&self) {
        self.stop_ticker();
        let token = CancellationToken::new();
        let child = token.clone();
        let model = self.model.clone();
        let observer = self.observer.clone();
        let interval = self.config.tick_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick completes immediately
            loop {
                tokio::select! {
                    biased;
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        let snapshot = model.lock().ok().map(|mut m| m.tick());
                        if let Some((completed, percent)) = snapshot {
                            debug!(completed, percent, "interpolated progress tick");
                            observer.on_event(&BatchEvent::Progress { completed, percent });
                        }
                    }
                }
            }
        });

        if let Ok(mut guard) = self.ticker.lock() {
            *guard = Some(TickerGuard {
                token,
                _handle: handle,
            });
        }
    }

    fn stop_ticker(&self) {
        if let Ok(mut guard) = self.ticker.lock() {
            if let Some(ticker) = guard.take() {
                ticker.token.cancel();
            }
        }
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::recognition::types::RecordingObserver;

    // ── ProgressModel ──

    #[test]
    fn step_spreads_cap_over_thirty_ticks_per_image() {
        let model = ProgressModel::new(3);
        assert!((model.step() - 1.0).abs() < f32::EPSILON); // 90 / 90
    }

    #[test]
    fn step_has_half_percent_floor() {
        let model = ProgressModel::new(50);
        assert!((model.step() - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn tick_caps_at_ninety_percent() {
        let mut model = ProgressModel::new(1);
        for _ in 0..100 {
            model.tick();
        }
        let (_, percent) = model.tick();
        assert!((percent - 90.0).abs() < f32::EPSILON);
    }

    #[test]
    fn tick_estimate_never_reaches_total() {
        let mut model = ProgressModel::new(2);
        let mut max_count = 0;
        for _ in 0..200 {
            let (count, _) = model.tick();
            max_count = max_count.max(count);
        }
        assert_eq!(max_count, 1, "estimate must stay below imageCount");
    }

    #[test]
    fn settle_publishes_rounded_ground_truth() {
        let mut model = ProgressModel::new(3);
        model.tick();
        let (count, percent) = model.settle(1);
        assert_eq!(count, 1);
        assert!((percent - 33.0).abs() < f32::EPSILON);
    }

    #[test]
    fn finish_forces_exact_completion() {
        let mut model = ProgressModel::new(4);
        model.tick();
        model.settle(2);
        let (count, percent) = model.finish();
        assert_eq!(count, 4);
        assert!((percent - 100.0).abs() < f32::EPSILON);
    }

    #[test]
    fn count_is_monotone_over_a_realistic_run() {
        let mut model = ProgressModel::new(3);
        let mut counts = vec![];
        counts.push(model.tick().0);
        counts.push(model.tick().0);
        counts.push(model.settle(1).0);
        counts.push(model.tick().0);
        counts.push(model.settle(2).0);
        counts.push(model.settle(3).0);
        counts.push(model.finish().0);
        assert!(counts.windows(2).all(|w| w[0] <= w[1]), "{counts:?}");
        assert_eq!(*counts.last().unwrap(), 3);
    }

    // ── ProgressTracker ──

    #[tokio::test(start_paused = true)]
    async fn tracker_starts_at_zero_and_interpolates() {
        let observer = Arc::new(RecordingObserver::default());
        let tracker = ProgressTracker::start(4, ProgressConfig::default(), observer.clone());

        tokio::time::sleep(Duration::from_millis(450)).await;
        tracker.teardown();

        let progress = observer.progress_snapshots();
        assert_eq!(progress[0], (0, 0.0));
        assert!(progress.len() >= 3, "expected interpolated ticks: {progress:?}");
        assert!(progress[1].1 > 0.0 && progress[1].1 <= 90.0);
    }

    #[tokio::test(start_paused = true)]
    async fn settle_overrides_interpolation_with_ground_truth() {
        let observer = Arc::new(RecordingObserver::default());
        let tracker = ProgressTracker::start(2, ProgressConfig::default(), observer.clone());

        tokio::time::sleep(Duration::from_millis(250)).await;
        tracker.settle(1, true);
        tokio::task::yield_now().await;

        let progress = observer.progress_snapshots();
        let last = progress.last().copied().unwrap();
        assert_eq!(last, (1, 50.0));
        tracker.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn finish_publishes_exactly_one_hundred() {
        let observer = Arc::new(RecordingObserver::default());
        let tracker = ProgressTracker::start(3, ProgressConfig::default(), observer.clone());

        tokio::time::sleep(Duration::from_millis(250)).await;
        tracker.finish();

        let last = observer.progress_snapshots().last().copied().unwrap();
        assert_eq!(last, (3, 100.0));
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_stops_ticks() {
        let observer = Arc::new(RecordingObserver::default());
        let tracker = ProgressTracker::start(3, ProgressConfig::default(), observer.clone());
        tracker.teardown();

        let before = observer.progress_snapshots().len();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(observer.progress_snapshots().len(), before);
    }
}
