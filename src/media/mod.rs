//! Capture container
//!
//! Recordings are stored in a chunked, delta-coded container. Delta frames are
//! XOR-coded against the previous frame, so any byte range that does not start
//! at the header is undecodable on its own: editing means decoding and
//! re-encoding.

pub mod blob;
pub mod decoder;
pub mod encoder;
pub mod format;
pub mod types;

pub use blob::{MediaBlob, PreviewHandle, CONTAINER_MIME};
pub use decoder::{DecodedSamples, MediaDecoder};
pub use encoder::MediaEncoder;
pub use types::{AudioFormat, AudioPacket, MediaSample, StreamFormat, VideoFormat, VideoFrame};

use std::time::Duration;
use thiserror::Error;

/// Container encode/decode errors
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a capture container")]
    BadMagic,

    #[error("Unsupported container version {0}")]
    UnsupportedVersion(u8),

    #[error("Container truncated at byte {0}")]
    Truncated(usize),

    #[error("Corrupt packet at byte {offset}: {reason}")]
    Corrupt { offset: usize, reason: String },

    #[error("Delta frame at {0:?} has no preceding keyframe")]
    MissingKeyframe(Duration),

    #[error("Frame size mismatch: got {got} bytes, expected {expected}")]
    FrameSize { got: usize, expected: usize },

    #[error("Encoding error: {0}")]
    Encoding(String),
}
