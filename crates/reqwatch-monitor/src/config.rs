//! Monitor configuration and file-backed hot reload.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// When records are written to the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Only completed records are saved.
    #[default]
    History,
    /// In-flight records are added and updated as well.
    Live,
}

impl StorageMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "history" => Some(StorageMode::History),
            "live" => Some(StorageMode::Live),
            "hybrid" => {
                tracing::warn!("Monitor mode 'hybrid' is deprecated, using 'live'");
                Some(StorageMode::Live)
            }
            _ => None,
        }
    }
}

/// How bounding boxes of service requests are captured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BboxMode {
    None,
    #[default]
    NoWfs,
    Full,
}

impl BboxMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Some(BboxMode::None),
            "no_wfs" => Some(BboxMode::NoWfs),
            "full" => Some(BboxMode::Full),
            _ => None,
        }
    }
}

/// How much of a request body is buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLimit {
    Nothing,
    Unbounded,
    Bytes(usize),
}

impl BodyLimit {
    /// `0` captures nothing, negative values capture everything.
    pub fn from_max_body_size(max: i64) -> Self {
        match max {
            0 => BodyLimit::Nothing,
            n if n < 0 => BodyLimit::Unbounded,
            n => BodyLimit::Bytes(n as usize),
        }
    }
}

pub const DEFAULT_STORAGE: &str = "memory";
pub const DEFAULT_MAX_BODY_SIZE: i64 = 1024;
pub const DEFAULT_BBOX_CRS: &str = "EPSG:4326";

/// Monitor settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    /// Name of the record store backend.
    pub storage: String,
    pub mode: StorageMode,
    /// Bytes of request body to keep; `0` none, negative unbounded.
    pub max_body_size: i64,
    pub bbox_mode: BboxMode,
    pub bbox_crs: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            storage: DEFAULT_STORAGE.to_string(),
            mode: StorageMode::default(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            bbox_mode: BboxMode::default(),
            bbox_crs: DEFAULT_BBOX_CRS.to_string(),
        }
    }
}

/// Configuration file contents before defaults and aliases are applied.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    storage: Option<String>,
    mode: Option<String>,
    max_body_size: Option<i64>,
    bbox_mode: Option<String>,
    #[serde(alias = "bboxLogCrs")]
    bbox_crs: Option<String>,
}

impl From<RawConfig> for MonitorConfig {
    fn from(raw: RawConfig) -> Self {
        let defaults = MonitorConfig::default();

        let mode = raw.mode.as_deref().map(|m| {
            StorageMode::parse(m).unwrap_or_else(|| {
                tracing::warn!(mode = m, "Unknown monitor mode, using default");
                defaults.mode
            })
        });
        let bbox_mode = raw.bbox_mode.as_deref().map(|m| {
            BboxMode::parse(m).unwrap_or_else(|| {
                tracing::warn!(bbox_mode = m, "Unknown bbox mode, using default");
                defaults.bbox_mode
            })
        });

        Self {
            storage: non_blank(raw.storage).unwrap_or(defaults.storage),
            mode: mode.unwrap_or(defaults.mode),
            max_body_size: raw.max_body_size.unwrap_or(defaults.max_body_size),
            bbox_mode: bbox_mode.unwrap_or(defaults.bbox_mode),
            bbox_crs: non_blank(raw.bbox_crs).unwrap_or(defaults.bbox_crs),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

impl MonitorConfig {
    /// Parses a JSON object of monitor settings. Missing keys take defaults
    /// and unknown keys are ignored.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(content)?;
        Ok(raw.into())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn body_limit(&self) -> BodyLimit {
        BodyLimit::from_max_body_size(self.max_body_size)
    }

    pub fn with_storage(mut self, storage: impl Into<String>) -> Self {
        self.storage = storage.into();
        self
    }

    pub fn with_mode(mut self, mode: StorageMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_body_size(mut self, max_body_size: i64) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    pub fn with_bbox_mode(mut self, bbox_mode: BboxMode) -> Self {
        self.bbox_mode = bbox_mode;
        self
    }

    pub fn with_bbox_crs(mut self, bbox_crs: impl Into<String>) -> Self {
        self.bbox_crs = bbox_crs.into();
        self
    }
}

struct Cached {
    config: MonitorConfig,
    modified: Option<SystemTime>,
}

/// Serves the current configuration, re-reading the backing file whenever
/// its modification time changes.
pub struct ConfigWatcher {
    path: Option<PathBuf>,
    cached: Mutex<Cached>,
}

impl ConfigWatcher {
    /// A watcher over a fixed configuration with no backing file.
    pub fn fixed(config: MonitorConfig) -> Self {
        Self {
            path: None,
            cached: Mutex::new(Cached { config, modified: None }),
        }
    }

    /// Watches `path`. A missing or unreadable file starts from defaults.
    pub fn watch(path: impl Into<PathBuf>) -> Self {
        let watcher = Self {
            path: Some(path.into()),
            cached: Mutex::new(Cached {
                config: MonitorConfig::default(),
                modified: None,
            }),
        };
        watcher.refresh();
        watcher
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The current configuration, reloaded first if the file changed.
    pub fn current(&self) -> MonitorConfig {
        self.refresh();
        let Ok(cached) = self.cached.lock() else {
            tracing::warn!("Failed to acquire config lock");
            return MonitorConfig::default();
        };
        cached.config.clone()
    }

    /// Reloads when the file's modification time moved. Returns whether a
    /// new configuration was installed.
    pub fn refresh(&self) -> bool {
        let Some(path) = &self.path else { return false };

        let modified = match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                tracing::debug!(path = %path.display(), "Config file not readable: {}", e);
                return false;
            }
        };

        let Ok(mut cached) = self.cached.lock() else {
            tracing::warn!("Failed to acquire config lock");
            return false;
        };
        if cached.modified == Some(modified) {
            return false;
        }

        match MonitorConfig::load(path) {
            Ok(config) => {
                tracing::info!(path = %path.display(), storage = %config.storage, "Loaded monitor config");
                cached.config = config;
                cached.modified = Some(modified);
                true
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "Failed to reload monitor config, keeping previous: {}", e);
                cached.modified = Some(modified);
                false
            }
        }
    }
}
