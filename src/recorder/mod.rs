//! Recording session module
//!
//! - `SessionController`: the lifecycle state machine the UI drives
//! - `MediaRecorder`: encodes a composite stream into timesliced chunks
//! - `state`: session status, clock and events

pub mod controller;
pub mod media_recorder;
pub mod state;

pub use controller::{RecordingStore, SessionController, StopOutcome, LAST_OPTIONS_KEY};
pub use media_recorder::{MediaRecorder, RecorderOutput};
pub use state::{
    RecordingRecord, RecordingSession, SessionClock, SessionErrorKind, SessionEvent, SessionStatus,
};
