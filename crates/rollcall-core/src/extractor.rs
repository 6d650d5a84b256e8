//! Boundary to the face embedding extractor.

use crate::types::Detection;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("could not decode image: {0}")]
    BadImage(String),
    #[error("extraction failed: {0}")]
    Failure(String),
}

/// Turns an encoded still image into zero or more face detections.
///
/// Implementations must rank detections by confidence, highest first;
/// enrollment keeps only the top detection and relies on that order.
/// `embedding_dim` is fixed for the lifetime of the extractor and every
/// returned descriptor has exactly that many components.
pub trait EmbeddingExtractor {
    fn embedding_dim(&self) -> usize;

    fn detect(&mut self, image: &[u8]) -> Result<Vec<Detection>, ExtractError>;
}
