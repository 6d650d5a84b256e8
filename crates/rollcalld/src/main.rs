use anyhow::{Context, Result};
use rollcall_core::{DescriptorCache, DescriptorStore, EnrollmentService, RecognitionService};
use rollcall_extract::OnnxExtractor;
use rollcall_store::SqliteStore;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::{BusKind, Config};
use dbus_interface::AttendanceService;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env();

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create data directory {}", parent.display()))?;
    }
    let store = Arc::new(SqliteStore::open(&config.db_path).context("open descriptor store")?);
    tracing::info!(path = %config.db_path.display(), "descriptor store opened");

    let store_dyn: Arc<dyn DescriptorStore> = store.clone();
    let cache = Arc::new(DescriptorCache::new(store_dyn.clone(), config.embedding_dim));
    // Fail fast: an unreadable gallery is a configuration problem, not
    // something to discover on the first recognition.
    cache.refresh().context("initial descriptor cache refresh")?;
    let snapshot = cache.snapshot();
    tracing::info!(
        identities = snapshot.len(),
        descriptors = snapshot.embedding_count(),
        "descriptor cache primed"
    );

    let model_path = config.model_path();
    let extractor = OnnxExtractor::load(&model_path, config.detector_mode, config.embedding_dim)
        .context("load face pipeline model")?;

    let enroller = EnrollmentService::new(store_dyn, cache.clone());
    let recognizer = RecognitionService::new(cache.clone(), config.match_threshold);
    let engine = engine::spawn_engine(extractor, enroller, recognizer);

    let service = AttendanceService::new(
        engine,
        store.clone(),
        cache.clone(),
        config.match_threshold,
        format!("{:?}", config.detector_mode).to_lowercase(),
    );

    let builder = match config.bus {
        BusKind::Session => {
            zbus::connection::Builder::session().context("connect to session bus")?
        }
        BusKind::System => zbus::connection::Builder::system().context("connect to system bus")?,
    };
    let _conn = builder
        .name("org.rollcall.Attendance1")
        .context("claim bus name")?
        .serve_at("/org/rollcall/Attendance1", service)
        .context("register attendance interface")?
        .build()
        .await
        .context("register on the bus")?;

    tracing::info!(bus = ?config.bus, "rollcalld ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
