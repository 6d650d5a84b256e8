use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Label reported for a face that matched nothing in the gallery.
pub const UNKNOWN_LABEL: &str = "unknown";

/// An enrolled person: an opaque unique key (roll number, badge id, ...)
/// plus a human-readable display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub key: String,
    pub name: String,
}

impl Identity {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self { key: key.into(), name: name.into() }
    }
}

#[derive(Error, Debug)]
pub enum EmbeddingTextError {
    #[error("empty descriptor text")]
    Empty,
    #[error("component {index} ({token:?}) is not a finite number")]
    BadComponent { index: usize, token: String },
}

/// Fixed-length face descriptor vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Number of components.
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Lower = more similar. Compares up to the shorter length; callers
    /// that care about dimensionality must check it beforehand.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Encode as comma-separated decimal text, the storage wire format.
    ///
    /// Round-trips exactly through [`from_text`](Self::from_text).
    pub fn to_text(&self) -> String {
        self.values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Decode the comma-separated storage format.
    ///
    /// Every component must parse as a finite `f32`; NaN and infinities
    /// are rejected so they can never poison distance computations.
    pub fn from_text(text: &str) -> Result<Self, EmbeddingTextError> {
        if text.trim().is_empty() {
            return Err(EmbeddingTextError::Empty);
        }

        let mut values = Vec::new();
        for (index, token) in text.split(',').enumerate() {
            let trimmed = token.trim();
            match trimmed.parse::<f32>() {
                Ok(v) if v.is_finite() => values.push(v),
                _ => {
                    return Err(EmbeddingTextError::BadComponent {
                        index,
                        token: trimmed.to_string(),
                    })
                }
            }
        }

        Ok(Self { values })
    }
}

/// Bounding box for a detected face, in source image pixels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// A single detected face: its descriptor plus where it was found.
#[derive(Debug, Clone)]
pub struct Detection {
    pub embedding: Embedding,
    pub region: BoundingBox,
    pub confidence: f32,
}

/// Result of matching one probe descriptor against the gallery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    /// The accepted identity, or `None` for an unknown face.
    pub identity: Option<Identity>,
    /// Distance to the nearest gallery identity. `None` when the gallery
    /// held nothing to compare against.
    pub distance: Option<f32>,
}

impl MatchResult {
    pub fn matched(identity: Identity, distance: f32) -> Self {
        Self { identity: Some(identity), distance: Some(distance) }
    }

    pub fn unknown(distance: Option<f32>) -> Self {
        Self { identity: None, distance }
    }

    pub fn is_match(&self) -> bool {
        self.identity.is_some()
    }

    /// The matched identity key, or [`UNKNOWN_LABEL`].
    pub fn label(&self) -> &str {
        match &self.identity {
            Some(identity) => &identity.key,
            None => UNKNOWN_LABEL,
        }
    }
}
