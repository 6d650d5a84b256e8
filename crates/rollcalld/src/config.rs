use rollcall_extract::DetectorMode;
use std::path::PathBuf;

/// Which message bus to register on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Session,
    System,
}

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Euclidean distance at or below which a face matches.
    pub match_threshold: f32,
    /// Descriptor width the pipeline model was exported with.
    pub embedding_dim: usize,
    /// Pipeline variant to load.
    pub detector_mode: DetectorMode,
    /// Bus to register the attendance service on.
    pub bus: BusKind,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/usr/share/rollcall/models"));

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        let detector_mode = match std::env::var("ROLLCALL_DETECTOR_MODE").as_deref() {
            Ok("full") => DetectorMode::Full,
            _ => DetectorMode::Fast,
        };

        let bus = match std::env::var("ROLLCALL_BUS").as_deref() {
            Ok("system") => BusKind::System,
            _ => BusKind::Session,
        };

        Self {
            model_dir,
            db_path,
            match_threshold: env_f32("ROLLCALL_MATCH_THRESHOLD", 0.6),
            embedding_dim: env_usize("ROLLCALL_EMBEDDING_DIM", 128),
            detector_mode,
            bus,
        }
    }

    /// Path to the pipeline model for the configured mode.
    pub fn model_path(&self) -> String {
        self.model_dir
            .join(self.detector_mode.model_file())
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
