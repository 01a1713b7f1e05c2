pub mod prepare;
pub mod preview;

pub use prepare::*;
pub use preview::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("not an image: declared type {0}")]
    NotAnImage(String),

    #[error("file too large: {size} bytes (limit {limit})")]
    Oversize { size: usize, limit: usize },
}
