//! Runtime configuration
//!
//! Every section has defaults, so a partial (or missing) JSON file is fine.

use crate::utils::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming a JSON config file
pub const CONFIG_ENV: &str = "SCREENCLIP_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub recorder: RecorderConfig,
    pub trim: TrimConfig,
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        config.validate()?;
        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Load from `SCREENCLIP_CONFIG` if set, otherwise defaults
    pub fn from_env() -> AppResult<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        let pip = &self.recorder.pip;
        if !(pip.scale > 0.0 && pip.scale < 1.0) {
            return Err(AppError::Config(format!(
                "pip.scale must be in (0, 1), got {}",
                pip.scale
            )));
        }
        if self.recorder.keyframe_interval == 0 {
            return Err(AppError::Config("keyframeInterval must be > 0".to_string()));
        }
        if self.recorder.chunk_interval_ms == 0 {
            return Err(AppError::Config("chunkIntervalMs must be > 0".to_string()));
        }
        if pip.margin > MAX_PIP_MARGIN {
            return Err(AppError::Config(format!(
                "pip.margin must be at most {}, got {}",
                MAX_PIP_MARGIN, pip.margin
            )));
        }
        Ok(())
    }
}

/// What to do when an audio device disappears mid-session.
///
/// Losing a video track always ends the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AudioLossPolicy {
    /// Surface `DeviceLost` and end the session
    #[default]
    Abort,
    /// Drop the lost audio input and keep recording
    ContinueVideoOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderConfig {
    /// Recorder timeslice: a chunk is emitted at least this often
    pub chunk_interval_ms: u64,
    /// Frames between keyframes in the capture container
    pub keyframe_interval: u32,
    pub audio_loss_policy: AudioLossPolicy,
    pub pip: PipConfig,
    /// Capacity of the session event broadcast channel
    pub event_capacity: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            chunk_interval_ms: 1000,
            keyframe_interval: 60,
            audio_loss_policy: AudioLossPolicy::Abort,
            pip: PipConfig::default(),
            event_capacity: 100,
        }
    }
}

impl RecorderConfig {
    /// Never zero, even for an unvalidated config
    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms.max(1))
    }
}

/// Largest accepted overlay margin, in pixels
pub const MAX_PIP_MARGIN: u32 = 4096;

/// Picture-in-picture overlay placement
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipConfig {
    /// Overlay width as a fraction of the primary frame width
    pub scale: f64,
    /// Distance from the bottom-right edges, in pixels
    pub margin: u32,
    /// Corner radius as a fraction of the overlay's smaller side
    pub corner_radius_ratio: f64,
}

impl Default for PipConfig {
    fn default() -> Self {
        Self {
            scale: 0.25,
            margin: 20,
            corner_radius_ratio: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrimConfig {
    pub thumbnail_max_width: u32,
    pub keyframe_interval: u32,
}

impl Default for TrimConfig {
    fn default() -> Self {
        Self {
            thumbnail_max_width: 320,
            keyframe_interval: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    pub refresh_endpoint: String,
    /// Tokens expiring within this window are refreshed in the background
    pub proactive_threshold_secs: u64,
    pub storage_key: String,
    pub request_timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            refresh_endpoint: "http://localhost:8787/auth/refresh".to_string(),
            proactive_threshold_secs: 300,
            storage_key: "auth.tokenRecord".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl AuthConfig {
    pub fn proactive_threshold(&self) -> Duration {
        Duration::from_secs(self.proactive_threshold_secs)
    }
}
