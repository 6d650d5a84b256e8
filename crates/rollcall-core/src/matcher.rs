//! Nearest-neighbor matching against a gallery snapshot.

use crate::cache::{DescriptorRecord, Snapshot};
use crate::types::{Embedding, MatchResult};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("query has {got} components, gallery expects {want}")]
    DimensionMismatch { got: usize, want: usize },
}

/// Strategy for comparing probe descriptors against a gallery snapshot.
pub trait Matcher {
    /// Match one probe against every identity in the snapshot.
    fn best_match(
        &self,
        query: &Embedding,
        snapshot: &Snapshot,
        threshold: f32,
    ) -> Result<MatchResult, MatchError>;

    /// Match a batch of probes. Results correspond to queries by position.
    fn match_all(
        &self,
        queries: &[Embedding],
        snapshot: &Snapshot,
        threshold: f32,
    ) -> Result<Vec<MatchResult>, MatchError>;
}

/// Euclidean-distance matcher.
///
/// An identity's score is the minimum distance across all of its enrolled
/// descriptors, so extra enrollment photos can only help. A probe is
/// accepted when the best score is at or below the threshold; on an exact
/// tie between identities the one earlier in snapshot order wins.
pub struct EuclideanMatcher;

impl EuclideanMatcher {
    fn nearest<'a>(
        query: &Embedding,
        snapshot: &'a Snapshot,
    ) -> Option<(&'a DescriptorRecord, f32)> {
        let mut best: Option<(&DescriptorRecord, f32)> = None;
        for record in snapshot.records() {
            let score = record
                .embeddings
                .iter()
                .map(|e| query.euclidean_distance(e))
                .fold(f32::INFINITY, f32::min);
            // Strict improvement only, so an exact tie keeps the earlier record.
            if best.as_ref().map_or(true, |(_, b)| score < *b) {
                best = Some((record, score));
            }
        }
        best
    }
}

impl Matcher for EuclideanMatcher {
    fn best_match(
        &self,
        query: &Embedding,
        snapshot: &Snapshot,
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        if query.dim() != snapshot.dim() {
            return Err(MatchError::DimensionMismatch {
                got: query.dim(),
                want: snapshot.dim(),
            });
        }

        Ok(match Self::nearest(query, snapshot) {
            None => MatchResult::unknown(None),
            Some((_, score)) if score > threshold => MatchResult::unknown(Some(score)),
            Some((record, score)) => MatchResult::matched(record.identity.clone(), score),
        })
    }

    fn match_all(
        &self,
        queries: &[Embedding],
        snapshot: &Snapshot,
        threshold: f32,
    ) -> Result<Vec<MatchResult>, MatchError> {
        match queries.len() {
            0 => Ok(Vec::new()),
            1 => Ok(vec![self.best_match(&queries[0], snapshot, threshold)?]),
            _ => {
                // Group photos carry a handful of faces; one scoped thread
                // per probe keeps the batch latency near a single scan.
                let mut slots: Vec<Option<Result<MatchResult, MatchError>>> =
                    (0..queries.len()).map(|_| None).collect();
                std::thread::scope(|scope| {
                    for (slot, query) in slots.iter_mut().zip(queries) {
                        scope.spawn(move || {
                            *slot = Some(self.best_match(query, snapshot, threshold));
                        });
                    }
                });
                slots
                    .into_iter()
                    .map(|slot| slot.expect("scoped matcher thread fills its slot"))
                    .collect()
            }
        }
    }
}
