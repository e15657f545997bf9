//! Capture trait definitions
//!
//! Platform-agnostic seams for capability providers and the device tracks
//! they hand out. Platform backends implement these; tests use fakes.

use crate::media::MediaSample;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// The capability providers the platform exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CaptureKind {
    ScreenCapture,
    CameraCapture,
    MicrophoneCapture,
}

impl fmt::Display for CaptureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureKind::ScreenCapture => "screen",
            CaptureKind::CameraCapture => "camera",
            CaptureKind::MicrophoneCapture => "microphone",
        };
        f.write_str(name)
    }
}

/// Permission status as last reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    Granted,
    /// The platform will ask the user on request
    Prompt,
    Denied,
}

/// Where a track's media comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackSource {
    Screen,
    Camera,
    SystemAudio,
    Microphone,
}

impl TrackSource {
    pub fn is_video(self) -> bool {
        matches!(self, TrackSource::Screen | TrackSource::Camera)
    }
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Description of a live device track
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub id: String,
    pub label: String,
    pub source: TrackSource,
    /// Video tracks only
    pub resolution: Option<Resolution>,
    /// Video tracks only
    pub frame_rate: Option<f64>,
    /// Audio tracks only
    pub sample_rate: Option<u32>,
    /// Audio tracks only
    pub channels: Option<u16>,
}

/// Constraints passed to a provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    pub resolution: Option<Resolution>,
    pub frame_rate: Option<f64>,
    /// Screen capture only: also ask for the system audio loopback. The
    /// platform may grant video and silently withhold audio.
    pub system_audio: bool,
}

/// Errors from capability providers and the capture pipeline
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    /// The user dismissed the share/permission prompt
    #[error("Capture prompt dismissed by the user")]
    Cancelled,

    #[error("{0} permission denied")]
    PermissionDenied(CaptureKind),

    #[error("{0} capture is not available on this device")]
    Unavailable(CaptureKind),

    #[error("Device error: {0}")]
    Device(String),
}

impl From<CaptureError> for crate::utils::AppError {
    fn from(error: CaptureError) -> Self {
        use crate::utils::AppError;
        match error {
            CaptureError::Cancelled => AppError::Cancelled,
            CaptureError::PermissionDenied(kind) => AppError::PermissionDenied(kind.to_string()),
            CaptureError::Unavailable(kind) => {
                AppError::PermissionDenied(format!("{} unavailable", kind))
            }
            CaptureError::Device(msg) => AppError::Capture(msg),
        }
    }
}

/// A live device track
#[async_trait]
pub trait DeviceTrack: Send {
    fn info(&self) -> &TrackInfo;

    /// Next sample, or `None` once the track has ended. A track that ends
    /// without `stop()` having been called was lost (unplugged, revoked).
    ///
    /// Must be cancel safe: the composite stream races every track and drops
    /// the futures that lose.
    async fn next_sample(&mut self) -> Option<MediaSample>;

    /// Stop the underlying device
    fn stop(&mut self);
}

/// A permission-gated source of device tracks
#[async_trait]
pub trait CaptureProvider: Send + Sync {
    fn kind(&self) -> CaptureKind;

    /// Whether the hardware/API exists at all
    fn is_available(&self) -> bool;

    fn permission(&self) -> PermissionState;

    /// Ask the platform for tracks. May suspend on a user prompt.
    async fn request(
        &self,
        request: &CaptureRequest,
    ) -> Result<Vec<Box<dyn DeviceTrack>>, CaptureError>;
}

/// Registry of the providers available on this host
#[derive(Clone, Default)]
pub struct CaptureProviders {
    providers: HashMap<CaptureKind, Arc<dyn CaptureProvider>>,
}

impl CaptureProviders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: Arc<dyn CaptureProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn register(&mut self, provider: Arc<dyn CaptureProvider>) {
        tracing::debug!("Registering {} capture provider", provider.kind());
        self.providers.insert(provider.kind(), provider);
    }

    pub fn get(&self, kind: CaptureKind) -> Option<&Arc<dyn CaptureProvider>> {
        self.providers.get(&kind)
    }

    /// Fails with the first kind that is missing, unavailable or denied
    pub fn check(&self, kinds: &[CaptureKind]) -> Result<(), CaptureError> {
        for kind in kinds {
            let provider = self.get(*kind).ok_or(CaptureError::Unavailable(*kind))?;
            if !provider.is_available() {
                return Err(CaptureError::Unavailable(*kind));
            }
            if provider.permission() == PermissionState::Denied {
                return Err(CaptureError::PermissionDenied(*kind));
            }
        }
        Ok(())
    }
}
