//! Sequential extraction engine.
//!
//! Processes the working set strictly one image at a time — the
//! upstream service is rate-limited, so sequencing is a backpressure
//! decision, not a platform limitation. Each image gets a primary call,
//! a batch-style fallback call, and bounded retries with linear backoff;
//! one image exhausting its attempts never aborts the batch. A single
//! shared cancellation token covers every call and every wait.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::RecognitionService;
use super::progress::{ProgressConfig, ProgressTracker};
use super::types::{BatchEvent, BatchObserver, ImageItem, ItemState, OcrResult, RecognitionMode};
use super::RecognitionError;

// ═══════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════

/// Retry and pacing parameters for one batch run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Additional attempts after the first (3 attempts total).
    pub max_retries: u32,
    /// Backoff before the first retry.
    pub backoff_base: Duration,
    /// Added per retry already made.
    pub backoff_step: Duration,
    /// Pause after each successful image, so settlements don't burst
    /// the upstream service.
    pub settle_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base: Duration::from_millis(200),
            backoff_step: Duration::from_millis(150),
            settle_delay: Duration::from_millis(120),
        }
    }
}

/// User-facing description for an image whose attempts are exhausted.
/// Transport detail stays in the logs.
const RECOGNITION_FAILED: &str = "recognition failed";

// ═══════════════════════════════════════════════════════════
// Outcomes
// ═══════════════════════════════════════════════════════════

/// How a batch run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchRunOutcome {
    Completed { done: usize, failed: usize },
    Cancelled,
}

enum ItemOutcome {
    Done(OcrResult),
    Failed,
    Cancelled,
}

// ═══════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════

pub struct ExtractionEngine {
    service: Arc<dyn RecognitionService>,
    config: EngineConfig,
    progress_config: ProgressConfig,
}

impl ExtractionEngine {
    pub fn new(
        service: Arc<dyn RecognitionService>,
        config: EngineConfig,
        progress_config: ProgressConfig,
    ) -> Self {
        Self {
            service,
            config,
            progress_config,
        }
    }

    /// Run the batch over the working set, mutating items in place.
    ///
    /// On cancellation the whole batch is abandoned: every item returns
    /// to `Idle` and no further images are consumed.
    pub async fn process_batch(
        &self,
        items: &mut [ImageItem],
        mode: RecognitionMode,
        cancel: &CancellationToken,
        observer: Arc<dyn BatchObserver>,
    ) -> BatchRunOutcome {
        let total = items.len();
        observer.on_event(&BatchEvent::Started { image_count: total });
        let progress =
            ProgressTracker::start(total, self.progress_config.clone(), observer.clone());

        let mut done = 0usize;
        let mut failed = 0usize;
        let mut cancelled = false;

        for index in 0..total {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let item = &mut items[index];
            item.state = ItemState::Processing;
            observer.on_event(&BatchEvent::ItemState {
                item_id: item.id,
                state: ItemState::Processing,
            });

            match self.extract_with_retries(item, mode, cancel).await {
                ItemOutcome::Done(result) => {
                    item.settle_done(result);
                    done += 1;
                    info!(item = %item.id, label = %item.label, "image recognized");
                    observer.on_event(&BatchEvent::ItemState {
                        item_id: item.id,
                        state: ItemState::Done,
                    });
                    progress.settle(done + failed, done + failed < total);
                    if index + 1 < total
                        && !sleep_cancellable(self.config.settle_delay, cancel).await
                    {
                        cancelled = true;
                        break;
                    }
                }
                ItemOutcome::Failed => {
                    item.settle_error(RECOGNITION_FAILED);
                    failed += 1;
                    warn!(item = %item.id, label = %item.label, "image failed after all attempts");
                    observer.on_event(&BatchEvent::ItemState {
                        item_id: item.id,
                        state: ItemState::Error,
                    });
                    progress.settle(done + failed, done + failed < total);
                }
                ItemOutcome::Cancelled => {
                    cancelled = true;
                    break;
                }
            }
        }

        if cancelled {
            progress.teardown();
            for item in items.iter_mut() {
                if item.state != ItemState::Idle {
                    item.reset_idle();
                    observer.on_event(&BatchEvent::ItemState {
                        item_id: item.id,
                        state: ItemState::Idle,
                    });
                }
            }
            observer.on_event(&BatchEvent::Cancelled);
            info!("batch cancelled");
            return BatchRunOutcome::Cancelled;
        }

        // Force exact completion numbers before final results go out.
        progress.finish();
        observer.on_event(&BatchEvent::Completed { done, failed });
        info!(done, failed, "batch settled");
        BatchRunOutcome::Completed { done, failed }
    }

    /// One image: primary call, fallback call, then backoff and repeat,
    /// up to `max_retries` extra rounds.
    async fn extract_with_retries(
        &self,
        item: &ImageItem,
        mode: RecognitionMode,
        cancel: &CancellationToken,
    ) -> ItemOutcome {
        let bytes = item.prepared.upload.as_slice();
        let format = item.prepared.wire_format.as_str();

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = self.config.backoff_base + self.config.backoff_step * (attempt - 1);
                debug!(item = %item.id, attempt, backoff_ms = backoff.as_millis() as u64, "retrying recognition");
                if !sleep_cancellable(backoff, cancel).await {
                    return ItemOutcome::Cancelled;
                }
            }

            if cancel.is_cancelled() {
                return ItemOutcome::Cancelled;
            }
            match self.service.extract_single(bytes, format, mode, cancel).await {
                Ok(result) => return ItemOutcome::Done(result),
                Err(RecognitionError::Cancelled) => return ItemOutcome::Cancelled,
                Err(e) => {
                    debug!(item = %item.id, error = %e, "primary call failed, trying batch fallback");
                }
            }

            if cancel.is_cancelled() {
                return ItemOutcome::Cancelled;
            }
            match self
                .service
                .extract_batch_of_one(bytes, format, mode, cancel)
                .await
            {
                Ok(result) => return ItemOutcome::Done(result),
                Err(RecognitionError::Cancelled) => return ItemOutcome::Cancelled,
                Err(e) => {
                    warn!(item = %item.id, attempt, error = %e, "recognition attempt failed");
                }
            }
        }

        ItemOutcome::Failed
    }
}

/// Sleep that returns false if the token fires first.
async fn sleep_cancellable(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
