pub mod aggregate;
pub mod filter;
pub mod grammar;
pub mod types;

pub use types::{CiContext, Comment, FileContext, ProducerResult, ReviewContext, SinkComment};

use thiserror::Error;

/// A review context that breaks one of its invariants.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("File context for {0} is not among the changed files")]
    UnknownFile(String),

    #[error("Producer result stored under {key} belongs to {producer}")]
    ProducerKeyMismatch { key: String, producer: String },

    #[error("Comment on {file}:{line} is not on an added line")]
    UnanchoredComment { file: String, line: usize },
}
