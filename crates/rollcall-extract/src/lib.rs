//! rollcall-extract: face detection and embedding extraction.
//!
//! Wraps a fused ONNX pipeline graph (detection, alignment, and embedding
//! in one session) behind the `EmbeddingExtractor` trait from
//! rollcall-core.

pub mod onnx;
mod prep;

pub use onnx::{DetectorMode, ModelError, OnnxExtractor};
