//! Chunked container encoder
//!
//! Plays the role of a media recorder: samples go in, opaque chunks come out.
//! Only the concatenation of every chunk, in order, is a decodable container.

use super::format::{self, PacketKind};
use super::types::{AudioPacket, StreamFormat, VideoFrame};
use super::MediaError;
use bytes::Bytes;
use std::time::Duration;

pub struct MediaEncoder {
    format: StreamFormat,
    keyframe_interval: u32,
    frames_since_key: u32,
    previous: Option<Vec<u8>>,
    pending: Vec<u8>,
    video_frames: u64,
    audio_packets: u64,
    last_timestamp: Duration,
    finished: bool,
}

impl MediaEncoder {
    pub fn new(format: StreamFormat, keyframe_interval: u32) -> Self {
        let mut pending = Vec::new();
        format::write_header(&mut pending, &format);
        Self {
            format,
            keyframe_interval: keyframe_interval.max(1),
            frames_since_key: 0,
            previous: None,
            pending,
            video_frames: 0,
            audio_packets: 0,
            last_timestamp: Duration::ZERO,
            finished: false,
        }
    }

    pub fn format(&self) -> &StreamFormat {
        &self.format
    }

    pub fn video_frames(&self) -> u64 {
        self.video_frames
    }

    pub fn audio_packets(&self) -> u64 {
        self.audio_packets
    }

    /// Largest timestamp written so far
    pub fn last_timestamp(&self) -> Duration {
        self.last_timestamp
    }

    /// Encode a frame at `timestamp`, rescaling it if its size differs from the stream's
    pub fn write_video(&mut self, timestamp: Duration, frame: &VideoFrame) -> Result<(), MediaError> {
        self.ensure_open()?;
        if !frame.is_well_formed() {
            return Err(MediaError::FrameSize {
                got: frame.data.len(),
                expected: VideoFrame::expected_len(frame.width, frame.height),
            });
        }

        let video = self.format.video;
        let resized;
        let data = if frame.width != video.width || frame.height != video.height {
            resized = frame.resized(video.width, video.height);
            &resized.data
        } else {
            &frame.data
        };

        let key_due = self.frames_since_key == 0 || self.frames_since_key >= self.keyframe_interval;
        let delta = match self.previous.as_mut() {
            Some(previous) if !key_due => {
                let delta = format::encode_delta(previous, data);
                previous.copy_from_slice(data);
                Some(delta)
            }
            _ => None,
        };
        match delta {
            Some(delta) => {
                format::write_packet(&mut self.pending, PacketKind::VideoDelta, timestamp, &delta);
                self.frames_since_key += 1;
            }
            None => {
                format::write_packet(&mut self.pending, PacketKind::VideoKey, timestamp, data);
                self.previous = Some(data.to_vec());
                self.frames_since_key = 1;
            }
        }

        self.video_frames += 1;
        self.last_timestamp = self.last_timestamp.max(timestamp);
        Ok(())
    }

    pub fn write_audio(&mut self, timestamp: Duration, packet: &AudioPacket) -> Result<(), MediaError> {
        self.ensure_open()?;
        let Some(expected) = self.format.audio else {
            return Err(MediaError::Encoding(
                "stream was opened without an audio track".to_string(),
            ));
        };
        if packet.format() != expected {
            return Err(MediaError::Encoding(format!(
                "audio format {:?} does not match stream format {:?}",
                packet.format(),
                expected
            )));
        }

        let payload: Vec<u8> = packet.samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        format::write_packet(&mut self.pending, PacketKind::Audio, timestamp, &payload);
        self.audio_packets += 1;
        self.last_timestamp = self.last_timestamp.max(timestamp);
        Ok(())
    }

    /// Start a fresh keyframe on the next video frame
    pub fn request_keyframe(&mut self) {
        self.frames_since_key = 0;
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Hand out everything buffered since the previous chunk
    pub fn take_chunk(&mut self) -> Option<Bytes> {
        if self.pending.is_empty() {
            return None;
        }
        Some(Bytes::from(std::mem::take(&mut self.pending)))
    }

    /// Flush the final chunk. No more samples are accepted afterwards.
    pub fn finish(&mut self) -> Option<Bytes> {
        self.finished = true;
        tracing::debug!(
            "Encoder finished: {} video frames, {} audio packets",
            self.video_frames,
            self.audio_packets
        );
        self.take_chunk()
    }

    fn ensure_open(&self) -> Result<(), MediaError> {
        if self.finished {
            return Err(MediaError::Encoding("encoder already finished".to_string()));
        }
        Ok(())
    }
}
