use crate::engine::{EngineError, EngineHandle};
use chrono::{Local, NaiveDate};
use rollcall_core::{
    AttendanceSink, BoundingBox, DescriptorCache, EnrollError, Identity, MarkOutcome,
    RecognitionOutcome,
};
use rollcall_store::SqliteStore;
use serde::Serialize;
use std::sync::Arc;
use zbus::interface;

/// D-Bus interface for the rollcall attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
///
/// Methods that return structured data return JSON strings, so the wire
/// signature stays stable while the payloads grow.
pub struct AttendanceService {
    engine: EngineHandle,
    store: Arc<SqliteStore>,
    cache: Arc<DescriptorCache>,
    threshold: f32,
    detector_mode: String,
}

impl AttendanceService {
    pub fn new(
        engine: EngineHandle,
        store: Arc<SqliteStore>,
        cache: Arc<DescriptorCache>,
        threshold: f32,
        detector_mode: String,
    ) -> Self {
        Self { engine, store, cache, threshold, detector_mode }
    }
}

#[derive(Serialize)]
struct EnrollReply<'a> {
    enrolled: bool,
    identity: &'a str,
    /// True when the descriptor was persisted but the cache refresh
    /// failed; recognition serves the previous snapshot until the next
    /// successful refresh.
    cache_stale: bool,
}

#[derive(Serialize)]
struct RecognizeReply {
    no_face: bool,
    faces: Vec<FaceReply>,
}

#[derive(Serialize)]
struct FaceReply {
    identity: Option<Identity>,
    distance: Option<f32>,
    region: BoundingBox,
    confidence: f32,
}

#[derive(Serialize)]
struct MarkReply<'a> {
    identity: &'a str,
    marked: bool,
    already_marked: bool,
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(format!("encode reply: {e}")))
}

fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(err.to_string())
}

fn join_err(err: tokio::task::JoinError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(format!("task join: {err}"))
}

/// Parse a `YYYY-MM-DD` day argument, empty meaning today.
fn day_or_today(day: &str) -> Result<NaiveDate, zbus::fdo::Error> {
    let trimmed = day.trim();
    if trimmed.is_empty() {
        return Ok(Local::now().date_naive());
    }
    trimmed
        .parse::<NaiveDate>()
        .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("day {trimmed:?}: {e}")))
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Enroll a person from one photo.
    async fn enroll(
        &self,
        identity: &str,
        name: &str,
        photo: Vec<u8>,
    ) -> zbus::fdo::Result<String> {
        if identity.trim().is_empty() || name.trim().is_empty() {
            return Err(zbus::fdo::Error::InvalidArgs(
                "identity and name must be non-empty".into(),
            ));
        }
        tracing::info!(identity, name, bytes = photo.len(), "enroll requested");

        match self.engine.enroll(Identity::new(identity, name), photo).await {
            Ok(()) => to_json(&EnrollReply { enrolled: true, identity, cache_stale: false }),
            Err(EngineError::Enroll(EnrollError::CacheRefreshFailed(err))) => {
                tracing::warn!(
                    identity,
                    error = %err,
                    "descriptor persisted but cache refresh failed; serving previous snapshot"
                );
                to_json(&EnrollReply { enrolled: true, identity, cache_stale: true })
            }
            Err(err) => Err(to_fdo(err)),
        }
    }

    /// Recognize every face in a photo against the enrolled gallery.
    async fn recognize(&self, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::debug!(bytes = image.len(), "recognize requested");
        let outcome = self.engine.recognize(image).await.map_err(to_fdo)?;
        let reply = match outcome {
            RecognitionOutcome::NoFace => RecognizeReply { no_face: true, faces: Vec::new() },
            RecognitionOutcome::Faces(faces) => RecognizeReply {
                no_face: false,
                faces: faces
                    .into_iter()
                    .map(|f| FaceReply {
                        identity: f.result.identity,
                        distance: f.result.distance,
                        region: f.region,
                        confidence: f.confidence,
                    })
                    .collect(),
            },
        };
        to_json(&reply)
    }

    /// Mark an identity present for today.
    async fn mark_attendance(&self, identity: &str) -> zbus::fdo::Result<String> {
        tracing::info!(identity, "mark attendance requested");
        let store = self.store.clone();
        let key = identity.to_string();
        let outcome = tokio::task::spawn_blocking(move || store.record(&key))
            .await
            .map_err(join_err)?
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;

        to_json(&MarkReply {
            identity,
            marked: outcome == MarkOutcome::Marked,
            already_marked: outcome == MarkOutcome::AlreadyMarked,
        })
    }

    /// List enrolled identities with descriptor counts.
    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        let store = self.store.clone();
        let summaries = tokio::task::spawn_blocking(move || store.identities())
            .await
            .map_err(join_err)?
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        to_json(&summaries)
    }

    /// Attendance entries for a day (`YYYY-MM-DD`), today when empty.
    async fn list_attendance(&self, day: &str) -> zbus::fdo::Result<String> {
        let date = day_or_today(day)?;
        let store = self.store.clone();
        let entries = tokio::task::spawn_blocking(move || store.attendance_for_day(date))
            .await
            .map_err(join_err)?
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        to_json(&entries)
    }

    /// Remove an identity's descriptors. Returns whether anything went.
    async fn remove_identity(&self, identity: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(identity, "remove requested");
        let store = self.store.clone();
        let key = identity.to_string();
        let removed = tokio::task::spawn_blocking(move || store.remove(&key))
            .await
            .map_err(join_err)?
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;

        if removed > 0 {
            let cache = self.cache.clone();
            let refreshed = tokio::task::spawn_blocking(move || cache.refresh())
                .await
                .map_err(join_err)?;
            if let Err(err) = refreshed {
                tracing::warn!(
                    identity,
                    error = %err,
                    "descriptors removed but cache refresh failed; serving previous snapshot"
                );
            }
        }
        Ok(removed > 0)
    }

    /// Rebuild the descriptor cache from the store.
    async fn refresh(&self) -> zbus::fdo::Result<String> {
        tracing::info!("manual cache refresh requested");
        let cache = self.cache.clone();
        tokio::task::spawn_blocking(move || cache.refresh())
            .await
            .map_err(join_err)?
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;

        let snap = self.cache.snapshot();
        Ok(serde_json::json!({
            "version": snap.version(),
            "identities": snap.len(),
            "descriptors": snap.embedding_count(),
        })
        .to_string())
    }

    /// Daemon status snapshot.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let snap = self.cache.snapshot();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "cache": {
                "loaded": snap.is_loaded(),
                "version": snap.version(),
                "identities": snap.len(),
                "descriptors": snap.embedding_count(),
            },
            "match_threshold": self.threshold,
            "embedding_dim": self.cache.dim(),
            "detector_mode": self.detector_mode,
        })
        .to_string())
    }
}
