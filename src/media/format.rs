//! Container wire format
//!
//! ```text
//! header:  "SCLP" | version u8 | width u32 | height u32 | fps*1000 u32 | has_audio u8
//!          [ sample_rate u32 | channels u16 ]
//! packet:  kind u8 | timestamp_us u64 | len u32 | payload
//! ```
//!
//! All integers are little-endian. Key payloads are raw RGBA; delta payloads
//! are `(zero_run u32, literal_len u32, literal bytes)*` over the XOR with the
//! previous frame; audio payloads are interleaved i16 samples.

use super::types::{AudioFormat, StreamFormat, VideoFormat};
use super::MediaError;
use std::time::Duration;

pub const MAGIC: &[u8; 4] = b"SCLP";
pub const VERSION: u8 = 1;
pub const PACKET_HEADER_LEN: usize = 1 + 8 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    VideoKey = 1,
    VideoDelta = 2,
    Audio = 3,
}

impl PacketKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(PacketKind::VideoKey),
            2 => Some(PacketKind::VideoDelta),
            3 => Some(PacketKind::Audio),
            _ => None,
        }
    }

    pub fn is_video(self) -> bool {
        matches!(self, PacketKind::VideoKey | PacketKind::VideoDelta)
    }
}

pub fn write_header(out: &mut Vec<u8>, format: &StreamFormat) {
    out.extend_from_slice(MAGIC);
    out.push(VERSION);
    out.extend_from_slice(&format.video.width.to_le_bytes());
    out.extend_from_slice(&format.video.height.to_le_bytes());
    let milli_fps = (format.video.frame_rate * 1000.0).round() as u32;
    out.extend_from_slice(&milli_fps.to_le_bytes());
    match format.audio {
        Some(audio) => {
            out.push(1);
            out.extend_from_slice(&audio.sample_rate.to_le_bytes());
            out.extend_from_slice(&audio.channels.to_le_bytes());
        }
        None => out.push(0),
    }
}

pub fn write_packet(out: &mut Vec<u8>, kind: PacketKind, timestamp: Duration, payload: &[u8]) {
    out.push(kind as u8);
    out.extend_from_slice(&(timestamp.as_micros() as u64).to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
}

/// Bounds-checked little-endian cursor
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8], MediaError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(MediaError::Truncated(self.pos))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8, MediaError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, MediaError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32, MediaError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Result<u64, MediaError> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_le_bytes(buf))
    }
}

pub fn read_header(reader: &mut ByteReader<'_>) -> Result<StreamFormat, MediaError> {
    let magic = reader.take(4).map_err(|_| MediaError::BadMagic)?;
    if magic != MAGIC {
        return Err(MediaError::BadMagic);
    }
    let version = reader.u8()?;
    if version != VERSION {
        return Err(MediaError::UnsupportedVersion(version));
    }
    let width = reader.u32()?;
    let height = reader.u32()?;
    let frame_rate = reader.u32()? as f64 / 1000.0;
    let audio = match reader.u8()? {
        0 => None,
        _ => Some(AudioFormat {
            sample_rate: reader.u32()?,
            channels: reader.u16()?,
        }),
    };
    Ok(StreamFormat {
        video: VideoFormat {
            width,
            height,
            frame_rate,
        },
        audio,
    })
}

/// Location of one packet inside a container
#[derive(Debug, Clone, Copy)]
pub struct PacketEntry {
    pub kind: PacketKind,
    pub timestamp: Duration,
    /// Offset of the payload
    pub offset: usize,
    pub len: usize,
}

/// Read the next packet header and skip its payload
pub fn read_packet_entry(reader: &mut ByteReader<'_>) -> Result<PacketEntry, MediaError> {
    let start = reader.position();
    let kind_byte = reader.u8()?;
    let kind = PacketKind::from_byte(kind_byte).ok_or_else(|| MediaError::Corrupt {
        offset: start,
        reason: format!("unknown packet kind {}", kind_byte),
    })?;
    let timestamp = Duration::from_micros(reader.u64()?);
    let len = reader.u32()? as usize;
    let offset = reader.position();
    reader.take(len)?;
    Ok(PacketEntry {
        kind,
        timestamp,
        offset,
        len,
    })
}

/// Zero-run-length pack `current XOR previous`
pub fn encode_delta(previous: &[u8], current: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0;
    let len = current.len();
    while i < len {
        let run_start = i;
        while i < len && current[i] == previous[i] {
            i += 1;
        }
        let zero_run = (i - run_start) as u32;
        let literal_start = i;
        while i < len && current[i] != previous[i] {
            i += 1;
        }
        out.extend_from_slice(&zero_run.to_le_bytes());
        out.extend_from_slice(&((i - literal_start) as u32).to_le_bytes());
        out.extend(
            current[literal_start..i]
                .iter()
                .zip(&previous[literal_start..i])
                .map(|(c, p)| c ^ p),
        );
    }
    out
}

/// Apply a delta payload to `frame` in place
pub fn apply_delta(frame: &mut [u8], payload: &[u8], offset: usize) -> Result<(), MediaError> {
    let corrupt = |reason: &str| MediaError::Corrupt {
        offset,
        reason: reason.to_string(),
    };
    let mut reader = ByteReader::new(payload);
    let mut pos = 0usize;
    while !reader.is_at_end() {
        let zero_run = reader.u32()? as usize;
        let literal_len = reader.u32()? as usize;
        pos = pos
            .checked_add(zero_run)
            .filter(|p| *p <= frame.len())
            .ok_or_else(|| corrupt("delta run past end of frame"))?;
        let literal = reader.take(literal_len)?;
        let end = pos
            .checked_add(literal_len)
            .filter(|end| *end <= frame.len())
            .ok_or_else(|| corrupt("delta literal past end of frame"))?;
        for (dst, x) in frame[pos..end].iter_mut().zip(literal) {
            *dst ^= x;
        }
        pos = end;
    }
    Ok(())
}
