//! Clip trimming
//!
//! Trimming decodes the source from the keyframe before `start`, redraws
//! every frame in range onto an off-screen surface and re-encodes it. The
//! capture container cannot be cut on byte boundaries.

pub mod engine;
pub mod surface;
pub mod types;

pub use engine::TrimEngine;
pub use surface::Surface;
pub use types::{Thumbnail, TrimRange};
