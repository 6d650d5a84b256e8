//! rollcall-core: descriptor cache and matching engine for face attendance.
//!
//! Enrolled face descriptors live in an immutable, atomically swapped
//! in-memory snapshot; recognition answers nearest-neighbor queries against
//! that snapshot with a Euclidean-distance matcher and never blocks on, or
//! reaches into, the backing store.

pub mod cache;
pub mod extractor;
pub mod matcher;
pub mod service;
pub mod store;
pub mod types;

pub use cache::{CacheError, DescriptorCache, DescriptorRecord, Snapshot};
pub use extractor::{EmbeddingExtractor, ExtractError};
pub use matcher::{EuclideanMatcher, MatchError, Matcher};
pub use service::{
    EnrollError, EnrollmentService, FaceMatch, RecognitionOutcome, RecognitionService,
    RecognizeError,
};
pub use store::{AttendanceSink, DescriptorStore, MarkOutcome, MemoryStore, StoreError};
pub use types::{BoundingBox, Detection, Embedding, Identity, MatchResult, UNKNOWN_LABEL};
