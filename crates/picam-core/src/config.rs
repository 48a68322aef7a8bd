use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::PicamError;
use crate::types::Resolution;

/// Path to an optional JSON config file.
pub const CONFIG_PATH_ENV: &str = "PICAM_CONFIG";

pub const WIDTH_ENV: &str = "PICAM_WIDTH";
pub const HEIGHT_ENV: &str = "PICAM_HEIGHT";
pub const FPS_ENV: &str = "PICAM_FPS";
pub const SOURCE_ENV: &str = "PICAM_SOURCE";
pub const SNAPSHOT_DIR_ENV: &str = "PICAM_SNAPSHOT_DIR";
pub const SNAPSHOT_INTERVAL_ENV: &str = "PICAM_SNAPSHOT_INTERVAL";

/// Settings for one preview session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub width: u32,
    pub height: u32,
    #[serde(alias = "targetFPS")]
    pub fps: u32,
    /// GStreamer source element placed at the head of the capture pipeline.
    pub source: String,
    #[serde(alias = "windowTitle")]
    pub window_title: String,
    /// Navigation key name that ends the session.
    #[serde(alias = "quitKey")]
    pub quit_key: String,
    #[serde(alias = "snapshotDir")]
    pub snapshot_dir: PathBuf,
    /// Every Nth frame is written to disk. 0 disables snapshots.
    #[serde(alias = "snapshotInterval")]
    pub snapshot_interval: u64,
    #[serde(alias = "keyPollMs")]
    pub key_poll_ms: u64,
    #[serde(alias = "readTimeoutMs")]
    pub read_timeout_ms: u64,
    #[serde(alias = "openTimeoutMs")]
    pub open_timeout_ms: u64,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            width: Resolution::HD.width,
            height: Resolution::HD.height,
            fps: 30,
            source: "libcamerasrc".to_owned(),
            window_title: "Pi Cam".to_owned(),
            quit_key: "q".to_owned(),
            snapshot_dir: std::env::temp_dir(),
            snapshot_interval: 60,
            key_poll_ms: 1,
            read_timeout_ms: 5_000,
            open_timeout_ms: 5_000,
        }
    }
}

impl PreviewConfig {
    /// Defaults, then `$PICAM_CONFIG` (if set), then `PICAM_*` overrides.
    pub fn load() -> Result<Self, PicamError> {
        let mut cfg = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, PicamError> {
        debug!("Reading preview config from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Apply `PICAM_*` overrides. `lookup` abstracts the environment.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), PicamError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(WIDTH_ENV) {
            self.width = parse_number(WIDTH_ENV, &v)?;
        }
        if let Some(v) = lookup(HEIGHT_ENV) {
            self.height = parse_number(HEIGHT_ENV, &v)?;
        }
        if let Some(v) = lookup(FPS_ENV) {
            self.fps = parse_number(FPS_ENV, &v)?;
        }
        if let Some(v) = lookup(SOURCE_ENV) {
            self.source = v.trim().to_owned();
        }
        if let Some(v) = lookup(SNAPSHOT_DIR_ENV) {
            self.snapshot_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup(SNAPSHOT_INTERVAL_ENV) {
            self.snapshot_interval = parse_number(SNAPSHOT_INTERVAL_ENV, &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), PicamError> {
        let invalid = |reason: &str| PicamError::ConfigurationInvalid { reason: reason.to_owned() };
        if self.width == 0 || self.height == 0 {
            return Err(invalid("width and height must be non-zero"));
        }
        if self.fps == 0 {
            return Err(invalid("fps must be non-zero"));
        }
        if self.source.trim().is_empty() {
            return Err(invalid("source element must be set"));
        }
        if self.quit_key.is_empty() {
            return Err(invalid("quit key must be set"));
        }
        // A zero pull or state wait only succeeds when the camera is already ahead of us.
        if self.read_timeout_ms == 0 {
            return Err(invalid("read timeout must be non-zero"));
        }
        if self.open_timeout_ms == 0 {
            return Err(invalid("open timeout must be non-zero"));
        }
        Ok(())
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn key_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.key_poll_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, PicamError> {
    value.trim().parse().map_err(|_| PicamError::ConfigurationInvalid {
        reason: format!("{key}={value:?} is not a valid number"),
    })
}
