//! Recording state management
//!
//! Defines the session state machine and session tracking.

use crate::capture::{CaptureMode, CaptureOptions, CaptureWarning};
use crate::media::MediaBlob;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Current state of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "status", content = "reason")]
pub enum SessionStatus {
    /// No session
    #[default]
    Idle,
    CheckingPermissions,
    /// Waiting for devices (and possibly the user) to grant capture
    Starting,
    Recording,
    Paused,
    /// Flushing the recorder and releasing devices
    Stopping,
    /// Result blob available
    Stopped,
    Error(SessionErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionErrorKind {
    PermissionDenied,
    DeviceLost,
    CaptureFailed,
}

impl SessionStatus {
    /// Recording or paused: devices are held and the recorder is running
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Recording | SessionStatus::Paused)
    }

    /// States a session only leaves through explicit user action
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            SessionStatus::Idle | SessionStatus::Stopped | SessionStatus::Error(_)
        )
    }

    pub fn can_transition_to(&self, next: &SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Idle, CheckingPermissions)
                | (CheckingPermissions, Starting)
                | (CheckingPermissions, Error(_))
                | (Starting, Recording)
                | (Starting, Idle)
                | (Starting, Error(_))
                | (Recording, Paused)
                | (Paused, Recording)
                | (Recording, Stopping)
                | (Paused, Stopping)
                | (Recording, Error(SessionErrorKind::DeviceLost))
                | (Paused, Error(SessionErrorKind::DeviceLost))
                | (Stopping, Stopped)
                | (Stopped, Idle)
                | (Error(_), Idle)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Idle => f.write_str("idle"),
            SessionStatus::CheckingPermissions => f.write_str("checking permissions"),
            SessionStatus::Starting => f.write_str("starting"),
            SessionStatus::Recording => f.write_str("recording"),
            SessionStatus::Paused => f.write_str("paused"),
            SessionStatus::Stopping => f.write_str("stopping"),
            SessionStatus::Stopped => f.write_str("stopped"),
            SessionStatus::Error(kind) => write!(f, "error ({:?})", kind),
        }
    }
}

/// Active-time accounting for one session
#[derive(Debug, Clone, Default)]
pub struct SessionClock {
    started: Option<Instant>,
    paused_at: Option<Instant>,
    paused_total: Duration,
    stopped_at: Option<Instant>,
}

impl SessionClock {
    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    pub fn pause(&mut self) {
        if self.paused_at.is_none() {
            self.paused_at = Some(Instant::now());
        }
    }

    pub fn resume(&mut self) {
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_total += paused_at.elapsed();
        }
    }

    pub fn stop(&mut self) {
        self.resume();
        self.stopped_at = Some(Instant::now());
    }

    /// Accumulated paused time, including an ongoing pause
    pub fn paused(&self) -> Duration {
        self.paused_total + self.paused_at.map(|p| p.elapsed()).unwrap_or_default()
    }

    /// Recorded time: wall time since start minus pauses
    pub fn elapsed(&self) -> Duration {
        let Some(started) = self.started else {
            return Duration::ZERO;
        };
        let end = self.stopped_at.unwrap_or_else(Instant::now);
        end.saturating_duration_since(started)
            .saturating_sub(self.paused())
    }
}

/// Information about a recording session
#[derive(Debug, Clone)]
pub struct RecordingSession {
    pub id: Uuid,
    pub mode: CaptureMode,
    pub options: CaptureOptions,
    pub status: SessionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub clock: SessionClock,
    /// Present exactly when the session is stopped
    pub result: Option<MediaBlob>,
    pub last_error: Option<String>,
    pub warnings: Vec<CaptureWarning>,
}

impl RecordingSession {
    pub fn new(options: CaptureOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode: options.mode,
            options,
            status: SessionStatus::Idle,
            started_at: None,
            stopped_at: None,
            clock: SessionClock::default(),
            result: None,
            last_error: None,
            warnings: Vec::new(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.elapsed()
    }

    /// Serializable summary for the metadata store
    pub fn record(&self) -> RecordingRecord {
        RecordingRecord {
            id: self.id,
            mode: self.mode,
            started_at: self.started_at,
            stopped_at: self.stopped_at,
            duration_ms: self.clock.elapsed().as_millis() as u64,
            paused_ms: self.clock.paused().as_millis() as u64,
            size_bytes: self.result.as_ref().map(|b| b.len()).unwrap_or(0),
            mime_type: self
                .result
                .as_ref()
                .map(|b| b.mime_type().to_string())
                .unwrap_or_default(),
            warnings: self.warnings.clone(),
        }
    }
}

/// A finished recording as handed to the metadata store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingRecord {
    pub id: Uuid,
    pub mode: CaptureMode,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub paused_ms: u64,
    pub size_bytes: usize,
    pub mime_type: String,
    pub warnings: Vec<CaptureWarning>,
}

/// Events emitted during a session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum SessionEvent {
    StatusChanged {
        session_id: Option<Uuid>,
        status: SessionStatus,
    },
    Warning {
        warning: CaptureWarning,
    },
    /// The recorder emitted a chunk
    ChunkRecorded { size: usize },
}
