//! Enrollment and recognition flows on top of the cache and store.

use crate::cache::{CacheError, DescriptorCache};
use crate::extractor::{EmbeddingExtractor, ExtractError};
use crate::matcher::{EuclideanMatcher, MatchError, Matcher};
use crate::store::{DescriptorStore, StoreError};
use crate::types::{BoundingBox, Embedding, Identity, MatchResult};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("no face detected in the enrollment photo")]
    NoFaceDetected,
    #[error("extractor: {0}")]
    Extractor(#[from] ExtractError),
    #[error("descriptor has {got} components, cache expects {want}")]
    DimensionMismatch { got: usize, want: usize },
    #[error("descriptor store write failed: {0}")]
    StoreWrite(#[from] StoreError),
    #[error("descriptor persisted but cache refresh failed: {0}")]
    CacheRefreshFailed(CacheError),
}

#[derive(Error, Debug)]
pub enum RecognizeError {
    #[error("extractor: {0}")]
    Extractor(#[from] ExtractError),
    #[error("matcher: {0}")]
    Match(#[from] MatchError),
}

/// One recognized (or unrecognized) face in an image.
#[derive(Debug, Clone)]
pub struct FaceMatch {
    pub result: MatchResult,
    pub region: BoundingBox,
    pub confidence: f32,
}

/// Result of a recognition pass over one image.
#[derive(Debug)]
pub enum RecognitionOutcome {
    /// No face present in the image.
    NoFace,
    /// One entry per detected face, in detection order.
    Faces(Vec<FaceMatch>),
}

/// Writes new descriptors and keeps the cache in step with the store.
pub struct EnrollmentService {
    store: Arc<dyn DescriptorStore>,
    cache: Arc<DescriptorCache>,
}

impl EnrollmentService {
    pub fn new(store: Arc<dyn DescriptorStore>, cache: Arc<DescriptorCache>) -> Self {
        Self { store, cache }
    }

    /// Enroll one photo for an identity.
    ///
    /// The photo must contain at least one face; when it contains several,
    /// the highest-confidence detection is kept. The descriptor is
    /// persisted first, then the cache is refreshed so the new enrollment
    /// is visible to the next recognition. A refresh failure after a
    /// successful write surfaces as [`EnrollError::CacheRefreshFailed`];
    /// the write stands and the cache serves its previous snapshot.
    pub fn enroll<X>(
        &self,
        extractor: &mut X,
        identity: &Identity,
        image: &[u8],
    ) -> Result<(), EnrollError>
    where
        X: EmbeddingExtractor + ?Sized,
    {
        let detections = extractor.detect(image)?;
        let found = detections.len();
        let Some(best) = detections.into_iter().next() else {
            return Err(EnrollError::NoFaceDetected);
        };
        if found > 1 {
            tracing::debug!(
                identity = %identity.key,
                faces = found,
                "enrollment photo has multiple faces, keeping the highest-confidence one"
            );
        }

        let want = self.cache.dim();
        if best.embedding.dim() != want {
            return Err(EnrollError::DimensionMismatch {
                got: best.embedding.dim(),
                want,
            });
        }

        self.store.append(identity, &best.embedding)?;
        tracing::info!(
            identity = %identity.key,
            confidence = best.confidence,
            "descriptor enrolled"
        );

        self.cache
            .refresh()
            .map_err(EnrollError::CacheRefreshFailed)?;
        Ok(())
    }
}

/// Matches faces in an image against the published gallery snapshot.
pub struct RecognitionService {
    cache: Arc<DescriptorCache>,
    threshold: f32,
}

impl RecognitionService {
    pub fn new(cache: Arc<DescriptorCache>, threshold: f32) -> Self {
        Self { cache, threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Recognize every face in an image.
    ///
    /// Reads only the currently published snapshot: no store access and no
    /// implicit refresh, so a recognition burst costs the store nothing.
    pub fn recognize<X>(
        &self,
        extractor: &mut X,
        image: &[u8],
    ) -> Result<RecognitionOutcome, RecognizeError>
    where
        X: EmbeddingExtractor + ?Sized,
    {
        let detections = extractor.detect(image)?;
        if detections.is_empty() {
            return Ok(RecognitionOutcome::NoFace);
        }

        let snapshot = self.cache.snapshot();
        if !snapshot.is_loaded() {
            tracing::warn!("recognizing against a never-loaded cache, every face will be unknown");
        }

        let queries: Vec<Embedding> = detections.iter().map(|d| d.embedding.clone()).collect();
        let results = EuclideanMatcher.match_all(&queries, &snapshot, self.threshold)?;

        let faces: Vec<FaceMatch> = detections
            .into_iter()
            .zip(results)
            .map(|(detection, result)| FaceMatch {
                result,
                region: detection.region,
                confidence: detection.confidence,
            })
            .collect();

        tracing::debug!(
            faces = faces.len(),
            matched = faces.iter().filter(|f| f.result.is_match()).count(),
            snapshot_version = snapshot.version(),
            "recognition pass complete"
        );
        Ok(RecognitionOutcome::Faces(faces))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::Detection;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct FakeExtractor {
        dim: usize,
        detections: Vec<Detection>,
        fail: bool,
    }

    impl FakeExtractor {
        fn returning(dim: usize, detections: Vec<Detection>) -> Self {
            Self { dim, detections, fail: false }
        }

        fn failing(dim: usize) -> Self {
            Self { dim, detections: Vec::new(), fail: true }
        }
    }

    impl EmbeddingExtractor for FakeExtractor {
        fn embedding_dim(&self) -> usize {
            self.dim
        }

        fn detect(&mut self, _image: &[u8]) -> Result<Vec<Detection>, ExtractError> {
            if self.fail {
                return Err(ExtractError::Failure("synthetic failure".into()));
            }
            Ok(self.detections.clone())
        }
    }

    fn det(values: &[f32], confidence: f32, x: f32) -> Detection {
        Detection {
            embedding: Embedding::new(values.to_vec()),
            region: BoundingBox { x, y: 10.0, width: 40.0, height: 40.0 },
            confidence,
        }
    }

    fn setup(dim: usize) -> (Arc<MemoryStore>, Arc<DescriptorCache>) {
        let store = Arc::new(MemoryStore::new());
        let store_dyn: Arc<dyn DescriptorStore> = store.clone();
        let cache = Arc::new(DescriptorCache::new(store_dyn, dim));
        (store, cache)
    }

    fn enroller(store: &Arc<MemoryStore>, cache: &Arc<DescriptorCache>) -> EnrollmentService {
        let store_dyn: Arc<dyn DescriptorStore> = store.clone();
        EnrollmentService::new(store_dyn, cache.clone())
    }

    #[test]
    fn test_enroll_persists_and_refreshes_cache() {
        let (store, cache) = setup(2);
        let service = enroller(&store, &cache);
        let mut extractor = FakeExtractor::returning(2, vec![det(&[1.0, 0.0], 0.95, 1.0)]);

        service
            .enroll(&mut extractor, &Identity::new("S1", "Ada"), b"jpeg")
            .unwrap();

        assert_eq!(store.len(), 1);
        let snap = cache.snapshot();
        assert!(snap.is_loaded());
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.records()[0].identity.key, "S1");
        assert_eq!(snap.records()[0].embeddings[0].values, vec![1.0, 0.0]);
    }

    #[test]
    fn test_enroll_rejects_photo_without_a_face() {
        let (store, cache) = setup(2);
        let service = enroller(&store, &cache);
        let mut extractor = FakeExtractor::returning(2, Vec::new());

        let err = service
            .enroll(&mut extractor, &Identity::new("S1", "Ada"), b"jpeg")
            .unwrap_err();
        assert!(matches!(err, EnrollError::NoFaceDetected));
        assert!(store.is_empty());
        assert!(!cache.snapshot().is_loaded());
    }

    #[test]
    fn test_enroll_keeps_top_ranked_detection() {
        let (store, cache) = setup(2);
        let service = enroller(&store, &cache);
        // Extractor contract: ranked by confidence, highest first.
        let mut extractor = FakeExtractor::returning(
            2,
            vec![det(&[0.7, 0.7], 0.98, 1.0), det(&[0.1, 0.1], 0.55, 2.0)],
        );

        service
            .enroll(&mut extractor, &Identity::new("S1", "Ada"), b"jpeg")
            .unwrap();

        let rows = store.list_all().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1.values, vec![0.7, 0.7]);
    }

    #[test]
    fn test_enroll_rejects_wrong_dimension() {
        let (store, cache) = setup(2);
        let service = enroller(&store, &cache);
        let mut extractor = FakeExtractor::returning(3, vec![det(&[1.0, 0.0, 0.0], 0.9, 1.0)]);

        let err = service
            .enroll(&mut extractor, &Identity::new("S1", "Ada"), b"jpeg")
            .unwrap_err();
        match err {
            EnrollError::DimensionMismatch { got, want } => {
                assert_eq!(got, 3);
                assert_eq!(want, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(store.is_empty());
    }

    struct ReadOnlyStore;

    impl DescriptorStore for ReadOnlyStore {
        fn list_all(&self) -> Result<Vec<(Identity, Embedding)>, StoreError> {
            Ok(Vec::new())
        }

        fn append(&self, _: &Identity, _: &Embedding) -> Result<(), StoreError> {
            Err(StoreError::WriteFailed("store is read-only".into()))
        }
    }

    #[test]
    fn test_enroll_write_failure_leaves_cache_untouched() {
        let store: Arc<dyn DescriptorStore> = Arc::new(ReadOnlyStore);
        let cache = Arc::new(DescriptorCache::new(store.clone(), 2));
        let service = EnrollmentService::new(store, cache.clone());
        let mut extractor = FakeExtractor::returning(2, vec![det(&[1.0, 0.0], 0.9, 1.0)]);

        let err = service
            .enroll(&mut extractor, &Identity::new("S1", "Ada"), b"jpeg")
            .unwrap_err();
        assert!(matches!(err, EnrollError::StoreWrite(_)));
        assert!(!cache.snapshot().is_loaded());
    }

    /// Accepts writes but fails reads on demand, to exercise the
    /// write-succeeded-refresh-failed path.
    struct TrapStore {
        rows: Mutex<Vec<(Identity, Embedding)>>,
        fail_reads: AtomicBool,
    }

    impl DescriptorStore for TrapStore {
        fn list_all(&self) -> Result<Vec<(Identity, Embedding)>, StoreError> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(StoreError::ReadFailed("read path down".into()));
            }
            Ok(self.rows.lock().unwrap().clone())
        }

        fn append(&self, identity: &Identity, embedding: &Embedding) -> Result<(), StoreError> {
            self.rows
                .lock()
                .unwrap()
                .push((identity.clone(), embedding.clone()));
            Ok(())
        }
    }

    #[test]
    fn test_enroll_refresh_failure_is_reported_but_write_stands() {
        let store = Arc::new(TrapStore {
            rows: Mutex::new(Vec::new()),
            fail_reads: AtomicBool::new(false),
        });
        let store_dyn: Arc<dyn DescriptorStore> = store.clone();
        let cache = Arc::new(DescriptorCache::new(store_dyn.clone(), 2));
        cache.refresh().unwrap();
        let service = EnrollmentService::new(store_dyn, cache.clone());

        store.fail_reads.store(true, Ordering::SeqCst);
        let mut extractor = FakeExtractor::returning(2, vec![det(&[1.0, 0.0], 0.9, 1.0)]);
        let err = service
            .enroll(&mut extractor, &Identity::new("S1", "Ada"), b"jpeg")
            .unwrap_err();

        assert!(matches!(err, EnrollError::CacheRefreshFailed(_)));
        // The descriptor was persisted; only the cache is behind.
        assert_eq!(store.rows.lock().unwrap().len(), 1);
        assert!(cache.snapshot().is_empty());

        // Once reads recover, a manual refresh catches the cache up.
        store.fail_reads.store(false, Ordering::SeqCst);
        cache.refresh().unwrap();
        assert_eq!(cache.snapshot().len(), 1);
    }

    #[test]
    fn test_enroll_extractor_failure() {
        let (store, cache) = setup(2);
        let service = enroller(&store, &cache);
        let mut extractor = FakeExtractor::failing(2);

        let err = service
            .enroll(&mut extractor, &Identity::new("S1", "Ada"), b"jpeg")
            .unwrap_err();
        assert!(matches!(err, EnrollError::Extractor(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_recognize_reports_no_face() {
        let (_, cache) = setup(2);
        cache.refresh().unwrap();
        let service = RecognitionService::new(cache, 0.6);
        let mut extractor = FakeExtractor::returning(2, Vec::new());

        let outcome = service.recognize(&mut extractor, b"jpeg").unwrap();
        assert!(matches!(outcome, RecognitionOutcome::NoFace));
    }

    #[test]
    fn test_recognize_matches_in_detection_order() {
        let (store, cache) = setup(2);
        store.append(&Identity::new("S1", "Ada"), &Embedding::new(vec![1.0, 0.0])).unwrap();
        store.append(&Identity::new("S2", "Grace"), &Embedding::new(vec![0.0, 1.0])).unwrap();
        cache.refresh().unwrap();
        let service = RecognitionService::new(cache, 0.6);

        let mut extractor = FakeExtractor::returning(
            2,
            vec![
                det(&[0.0, 0.95], 0.9, 1.0),
                det(&[9.0, 9.0], 0.8, 2.0),
                det(&[1.05, 0.0], 0.7, 3.0),
            ],
        );
        let outcome = service.recognize(&mut extractor, b"jpeg").unwrap();
        let faces = match outcome {
            RecognitionOutcome::Faces(faces) => faces,
            RecognitionOutcome::NoFace => panic!("expected faces"),
        };

        assert_eq!(faces.len(), 3);
        assert_eq!(faces[0].result.label(), "S2");
        assert_eq!(faces[1].result.label(), "unknown");
        assert!(faces[1].result.distance.is_some());
        assert_eq!(faces[2].result.label(), "S1");
        // Regions and confidences ride along with each face.
        assert_eq!(faces[0].region.x, 1.0);
        assert_eq!(faces[1].region.x, 2.0);
        assert_eq!(faces[2].region.x, 3.0);
        assert_eq!(faces[0].confidence, 0.9);
    }

    #[test]
    fn test_recognize_does_not_touch_the_store() {
        let (store, cache) = setup(2);
        store.append(&Identity::new("S1", "Ada"), &Embedding::new(vec![1.0, 0.0])).unwrap();
        cache.refresh().unwrap();
        let version_before = cache.snapshot().version();
        let service = RecognitionService::new(cache.clone(), 0.6);

        // A row lands in the store after the last refresh.
        store.append(&Identity::new("S2", "Grace"), &Embedding::new(vec![0.0, 1.0])).unwrap();

        let mut extractor = FakeExtractor::returning(2, vec![det(&[0.0, 1.0], 0.9, 1.0)]);
        let outcome = service.recognize(&mut extractor, b"jpeg").unwrap();
        let faces = match outcome {
            RecognitionOutcome::Faces(faces) => faces,
            RecognitionOutcome::NoFace => panic!("expected faces"),
        };
        // Not visible yet: recognition never refreshes on its own.
        assert_eq!(faces[0].result.label(), "unknown");
        assert_eq!(cache.snapshot().version(), version_before);
        assert_eq!(store.len(), 2);

        // An explicit refresh makes the new enrollment visible.
        cache.refresh().unwrap();
        let mut extractor = FakeExtractor::returning(2, vec![det(&[0.0, 1.0], 0.9, 1.0)]);
        let outcome = service.recognize(&mut extractor, b"jpeg").unwrap();
        match outcome {
            RecognitionOutcome::Faces(faces) => assert_eq!(faces[0].result.label(), "S2"),
            RecognitionOutcome::NoFace => panic!("expected faces"),
        }
    }

    #[test]
    fn test_recognize_empty_gallery_is_unknown_without_distance() {
        let (_, cache) = setup(2);
        cache.refresh().unwrap();
        let service = RecognitionService::new(cache, 0.6);

        let mut extractor = FakeExtractor::returning(2, vec![det(&[1.0, 1.0], 0.9, 1.0)]);
        let outcome = service.recognize(&mut extractor, b"jpeg").unwrap();
        match outcome {
            RecognitionOutcome::Faces(faces) => {
                assert_eq!(faces.len(), 1);
                assert!(!faces[0].result.is_match());
                assert!(faces[0].result.distance.is_none());
            }
            RecognitionOutcome::NoFace => panic!("expected faces"),
        }
    }

    #[test]
    fn test_recognize_extractor_failure() {
        let (_, cache) = setup(2);
        cache.refresh().unwrap();
        let service = RecognitionService::new(cache, 0.6);
        let mut extractor = FakeExtractor::failing(2);

        let err = service.recognize(&mut extractor, b"jpeg").unwrap_err();
        assert!(matches!(err, RecognizeError::Extractor(_)));
    }
}
