//! Fused face-pipeline graph via ONNX Runtime.
//!
//! The graph takes one normalized RGB image and emits three tensors:
//! `scores` `[N]`, `boxes` `[N, 4]` (corner coordinates in input space),
//! and `embeddings` `[N, D]`, one row per face candidate. Detection
//! decoding, suppression, and alignment all happen inside the graph, so
//! this crate only prepares input and demaps output.

use crate::prep;
use ort::session::Session;
use ort::value::TensorRef;
use rollcall_core::extractor::{EmbeddingExtractor, ExtractError};
use rollcall_core::types::{Detection, Embedding};
use std::path::Path;
use thiserror::Error;

const FAST_MODEL_FILE: &str = "face_pipeline_fast.onnx";
const FULL_MODEL_FILE: &str = "face_pipeline_full.onnx";
const FAST_INPUT_SIZE: usize = 320;
const FULL_INPUT_SIZE: usize = 640;
/// Candidates at or below this score are dropped before demapping.
const DETECTION_SCORE_FLOOR: f32 = 0.5;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0}")]
    NotFound(String),
    #[error("model contract violation: {0}")]
    Contract(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Which pipeline variant to load. Fast trades recall on small or
/// off-angle faces for roughly a quarter of the inference cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorMode {
    Fast,
    Full,
}

impl DetectorMode {
    pub fn model_file(&self) -> &'static str {
        match self {
            DetectorMode::Fast => FAST_MODEL_FILE,
            DetectorMode::Full => FULL_MODEL_FILE,
        }
    }

    pub fn input_size(&self) -> usize {
        match self {
            DetectorMode::Fast => FAST_INPUT_SIZE,
            DetectorMode::Full => FULL_INPUT_SIZE,
        }
    }
}

/// Output tensor indices: (scores, boxes, embeddings).
type PipelineOutputs = (usize, usize, usize);

/// Discover output tensor ordering by name.
///
/// Exports may carry the canonical names or generic numeric ones; when any
/// name is missing the standard positional ordering is assumed.
fn discover_outputs(names: &[String]) -> PipelineOutputs {
    let find = |target: &str| names.iter().position(|n| n == target);
    match (find("scores"), find("boxes"), find("embeddings")) {
        (Some(scores), Some(boxes), Some(embeddings)) => {
            tracing::debug!("face pipeline: using name-based output tensor mapping");
            (scores, boxes, embeddings)
        }
        _ => {
            tracing::info!(
                ?names,
                "face pipeline: output names not recognized, using positional mapping \
                 [0]=scores, [1]=boxes, [2]=embeddings"
            );
            (0, 1, 2)
        }
    }
}

/// Extractor backed by the fused ONNX pipeline.
#[derive(Debug)]
pub struct OnnxExtractor {
    session: Session,
    input_size: usize,
    embedding_dim: usize,
    output_indices: PipelineOutputs,
}

impl OnnxExtractor {
    /// Load a pipeline model from the given path.
    ///
    /// `embedding_dim` is the descriptor width the graph was exported
    /// with; output rows are validated against it on every pass.
    pub fn load(
        model_path: &str,
        mode: DetectorMode,
        embedding_dim: usize,
    ) -> Result<Self, ModelError> {
        if !Path::new(model_path).exists() {
            return Err(ModelError::NotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            mode = ?mode,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded face pipeline model"
        );

        if output_names.len() < 3 {
            return Err(ModelError::Contract(format!(
                "pipeline graph requires 3 outputs (scores, boxes, embeddings), got {}",
                output_names.len()
            )));
        }

        let output_indices = discover_outputs(&output_names);

        Ok(Self {
            session,
            input_size: mode.input_size(),
            embedding_dim,
            output_indices,
        })
    }
}

impl EmbeddingExtractor for OnnxExtractor {
    fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    fn detect(&mut self, image: &[u8]) -> Result<Vec<Detection>, ExtractError> {
        let decoded =
            image::load_from_memory(image).map_err(|e| ExtractError::BadImage(e.to_string()))?;
        let src_w = decoded.width();
        let src_h = decoded.height();

        let (input, letterbox) = prep::to_input_tensor(&decoded, self.input_size);
        let input_tensor = TensorRef::from_array_view(input.view())
            .map_err(|e| ExtractError::Failure(e.to_string()))?;
        let outputs = self
            .session
            .run(ort::inputs![input_tensor])
            .map_err(|e| ExtractError::Failure(e.to_string()))?;

        let (scores_idx, boxes_idx, embeddings_idx) = self.output_indices;
        let (_, scores) = outputs[scores_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| ExtractError::Failure(format!("scores: {e}")))?;
        let (_, boxes) = outputs[boxes_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| ExtractError::Failure(format!("boxes: {e}")))?;
        let (_, embeddings) = outputs[embeddings_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| ExtractError::Failure(format!("embeddings: {e}")))?;

        let candidates = scores.len();
        if boxes.len() != candidates * 4 {
            return Err(ExtractError::Failure(format!(
                "box tensor holds {} values for {candidates} candidates",
                boxes.len()
            )));
        }
        if embeddings.len() != candidates * self.embedding_dim {
            return Err(ExtractError::Failure(format!(
                "embedding tensor holds {} values for {candidates} candidates of width {}",
                embeddings.len(),
                self.embedding_dim
            )));
        }

        let mut detections = Vec::new();
        for i in 0..candidates {
            let confidence = scores[i];
            if confidence <= DETECTION_SCORE_FLOOR {
                continue;
            }

            let at = i * 4;
            let raw = [boxes[at], boxes[at + 1], boxes[at + 2], boxes[at + 3]];
            let region = prep::to_source_box(raw, &letterbox, src_w, src_h);

            let row = &embeddings[i * self.embedding_dim..(i + 1) * self.embedding_dim];
            detections.push(Detection {
                embedding: Embedding::new(prep::l2_normalized(row)),
                region,
                confidence,
            });
        }

        detections.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        tracing::debug!(candidates, kept = detections.len(), "face pipeline pass");
        Ok(detections)
    }
}
