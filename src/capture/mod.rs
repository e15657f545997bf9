//! Device capture
//!
//! Capability providers hand out device tracks; the pipeline composes them
//! into a single recordable stream.

pub mod compositor;
pub mod mixer;
pub mod options;
pub mod pipeline;
pub mod traits;

pub use options::{CaptureMode, CaptureOptions};
pub use pipeline::{CapturePipeline, CaptureWarning, CompositeStream, StreamEvent};
pub use traits::{
    CaptureError, CaptureKind, CaptureProvider, CaptureProviders, CaptureRequest, DeviceTrack,
    PermissionState, Resolution, TrackInfo, TrackSource,
};
