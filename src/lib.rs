//! Chatlens — chat-screenshot dialogue extraction pipeline.
//!
//! Takes a batch of chat-screen photographs, extracts text from each via
//! an external vision recognition service, and turns the output into
//! selectable, speaker-attributed dialogue segments that merge back into
//! a single text block.
//!
//! Stages: intake (validate + re-encode) → sequential extraction with
//! fallback, bounded retries and cancellation → interpolated progress →
//! dialogue segmentation → selection & export.

pub mod config;
pub mod pipeline;

pub use pipeline::intake::{
    CandidateFile, IntakeConfig, IntakeError, PreparedImage, PreviewHandle, PreviewRegistry,
};
pub use pipeline::recognition::{
    BatchEvent, BatchObserver, BatchRunOutcome, EngineConfig, ExtractionEngine,
    HttpRecognitionClient, ImageItem, ItemState, MockRecognitionService, NoopObserver, OcrResult,
    ProgressConfig, RecognitionError, RecognitionMode, RecognitionService, RecordingObserver,
    SpeakerSide, StructuredMessage,
};
pub use pipeline::segmentation::{segment_batch, TextSegment};
pub use pipeline::selection::SelectionModel;
pub use pipeline::session::{BatchCompletion, BatchReport, BatchSession, PipelineError};

use tracing_subscriber::EnvFilter;

/// Initialize tracing from `RUST_LOG`, falling back to the crate default.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();
}
