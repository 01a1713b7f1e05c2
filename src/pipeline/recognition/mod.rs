pub mod client;
pub mod engine;
pub mod progress;
pub mod types;

pub use client::*;
pub use engine::*;
pub use progress::*;
pub use types::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("recognition request failed: {0}")]
    Http(String),

    #[error("recognition service returned HTTP {0}")]
    Status(u16),

    #[error("empty response from recognition service")]
    EmptyResponse,

    #[error("unparseable recognition response: {0}")]
    Parse(String),

    #[error("recognition cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for RecognitionError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}
