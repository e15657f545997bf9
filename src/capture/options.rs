//! What the user asked to capture

use super::traits::{CaptureKind, CaptureRequest, Resolution};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CaptureMode {
    Screen,
    Camera,
    /// Screen with the camera composited picture-in-picture
    ScreenAndCamera,
}

impl CaptureMode {
    /// Providers that must be usable for this mode to start
    pub fn required_capabilities(self) -> Vec<CaptureKind> {
        match self {
            CaptureMode::Screen => vec![CaptureKind::ScreenCapture],
            CaptureMode::Camera => vec![CaptureKind::CameraCapture],
            CaptureMode::ScreenAndCamera => {
                vec![CaptureKind::ScreenCapture, CaptureKind::CameraCapture]
            }
        }
    }

    pub fn uses_screen(self) -> bool {
        matches!(self, CaptureMode::Screen | CaptureMode::ScreenAndCamera)
    }

    pub fn uses_camera(self) -> bool {
        matches!(self, CaptureMode::Camera | CaptureMode::ScreenAndCamera)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureOptions {
    pub mode: CaptureMode,
    pub system_audio: bool,
    pub microphone: bool,
    pub resolution: Option<Resolution>,
    pub frame_rate: Option<f64>,
}

impl CaptureOptions {
    pub fn new(mode: CaptureMode) -> Self {
        Self {
            mode,
            system_audio: false,
            microphone: false,
            resolution: None,
            frame_rate: None,
        }
    }

    pub fn with_system_audio(mut self, enabled: bool) -> Self {
        self.system_audio = enabled;
        self
    }

    pub fn with_microphone(mut self, enabled: bool) -> Self {
        self.microphone = enabled;
        self
    }

    pub(crate) fn request_for(&self, kind: CaptureKind) -> CaptureRequest {
        CaptureRequest {
            resolution: self.resolution,
            frame_rate: self.frame_rate,
            system_audio: kind == CaptureKind::ScreenCapture && self.system_audio,
        }
    }
}
