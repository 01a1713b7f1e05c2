//! Batch session — the pipeline's produced interface.
//!
//! One session drives one batch at a time: intake, sequential
//! extraction, segmentation, and the selection hand-off. Issuing a new
//! batch supersedes the previous one (its token is cancelled and its
//! working set released), and the working set is released on every exit
//! path — confirm, dismiss, cancel, or replacement.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::pipeline::intake::{
    prepare_upload, validate_candidate, CandidateFile, IntakeError, PreviewRegistry,
};
use crate::pipeline::recognition::{
    BatchObserver, BatchRunOutcome, ExtractionEngine, ImageItem, RecognitionMode,
    RecognitionService,
};
use crate::pipeline::segmentation::{segment_batch, TextSegment};
use crate::pipeline::selection::SelectionModel;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no usable images in batch")]
    EmptyBatch,
}

/// How a batch run ended, batch-level.
///
/// `TotalFailure` is surfaced distinctly from per-image failures so the
/// caller can tell "recognition is broadly down" apart from a few bad
/// photos; `Cancelled` is an acknowledgment, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchCompletion {
    Full,
    Partial,
    TotalFailure,
    Cancelled,
}

/// Result of one `run_batch` call.
#[derive(Debug)]
pub struct BatchReport {
    pub completion: BatchCompletion,
    /// Flat segment list, intake order then in-image order. Empty for
    /// cancelled and totally-failed batches.
    pub segments: Vec<TextSegment>,
    pub done: usize,
    pub failed: usize,
    /// Files rejected at intake, with the reason. These never entered
    /// the batch.
    pub rejected: Vec<(String, IntakeError)>,
}

impl BatchReport {
    /// Selection model over this report's segments.
    pub fn into_selection(self) -> SelectionModel {
        SelectionModel::new(self.segments)
    }
}

pub struct BatchSession {
    service: Arc<dyn RecognitionService>,
    config: PipelineConfig,
    previews: Arc<PreviewRegistry>,
    cancel: Mutex<Option<CancellationToken>>,
    working_set: Mutex<Option<Vec<ImageItem>>>,
}

impl BatchSession {
    pub fn new(service: Arc<dyn RecognitionService>, config: PipelineConfig) -> Self {
        Self {
            service,
            config,
            previews: PreviewRegistry::new(),
            cancel: Mutex::new(None),
            working_set: Mutex::new(None),
        }
    }

    /// Registry backing this session's preview handles, for display.
    pub fn preview_registry(&self) -> Arc<PreviewRegistry> {
        self.previews.clone()
    }

    /// Run one batch over the supplied files.
    ///
    /// Any prior batch is superseded: its token is cancelled and its
    /// working set released before intake begins. Per-file validation
    /// failures are reported without affecting the rest of the batch.
    pub async fn run_batch(
        &self,
        files: Vec<CandidateFile>,
        mode: RecognitionMode,
        observer: Arc<dyn BatchObserver>,
    ) -> Result<BatchReport, PipelineError> {
        let cancel = self.replace_token();
        self.release_working_set();

        let mut rejected = Vec::new();
        let mut items: Vec<ImageItem> = Vec::new();
        for file in files {
            match validate_candidate(&file, &self.config.intake) {
                Ok(()) => {
                    let prepared = prepare_upload(&file, &self.config.intake);
                    let preview = self.previews.register(prepared.upload.clone());
                    items.push(ImageItem::new(
                        format!("image {}", items.len() + 1),
                        prepared,
                        preview,
                    ));
                }
                Err(e) => {
                    warn!(file = %file.file_name, error = %e, "file rejected at intake");
                    rejected.push((file.file_name, e));
                }
            }
        }

        if items.is_empty() {
            return Err(PipelineError::EmptyBatch);
        }

        info!(images = items.len(), mode = %mode, "batch starting");
        let engine = ExtractionEngine::new(
            self.service.clone(),
            self.config.engine.clone(),
            self.config.progress.clone(),
        );
        let outcome = engine
            .process_batch(&mut items, mode, &cancel, observer)
            .await;

        let report = match outcome {
            BatchRunOutcome::Cancelled => {
                // Items drop here; preview handles revoke themselves.
                BatchReport {
                    completion: BatchCompletion::Cancelled,
                    segments: Vec::new(),
                    done: 0,
                    failed: 0,
                    rejected,
                }
            }
            BatchRunOutcome::Completed { done, failed } => {
                let completion = if done == 0 {
                    BatchCompletion::TotalFailure
                } else if failed > 0 {
                    BatchCompletion::Partial
                } else {
                    BatchCompletion::Full
                };
                let segments = if done == 0 {
                    Vec::new()
                } else {
                    segment_batch(&items)
                };
                // Keep the working set alive for preview display until
                // the user confirms or dismisses.
                if let Ok(mut working) = self.working_set.lock() {
                    *working = Some(items);
                }
                BatchReport {
                    completion,
                    segments,
                    done,
                    failed,
                    rejected,
                }
            }
        };

        Ok(report)
    }

    /// Raise the current batch's shared cancellation signal.
    pub fn cancel_batch(&self) {
        if let Ok(guard) = self.cancel.lock() {
            if let Some(token) = guard.as_ref() {
                token.cancel();
            }
        }
    }

    /// Export the selected segments and release the working set.
    pub fn confirm(&self, model: SelectionModel) -> String {
        let merged = model.export();
        self.release_working_set();
        merged
    }

    /// Discard segments and working set without producing output.
    pub fn dismiss(&self) {
        self.release_working_set();
    }

    fn replace_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut guard) = self.cancel.lock() {
            if let Some(old) = guard.take() {
                old.cancel();
            }
            *guard = Some(token.clone());
        }
        token
    }

    fn release_working_set(&self) {
        if let Ok(mut working) = self.working_set.lock() {
            working.take();
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
