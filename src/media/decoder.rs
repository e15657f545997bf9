//! Container decoder
//!
//! `MediaDecoder::open` only indexes packet headers, so probing duration is
//! cheap. Pixel decoding happens lazily in [`DecodedSamples`], a finite
//! iterator that consumes the decoder and cannot be restarted.

use super::blob::MediaBlob;
use super::format::{self, ByteReader, PacketEntry, PacketKind};
use super::types::{AudioPacket, MediaSample, StreamFormat, VideoFrame};
use super::MediaError;
use bytes::Bytes;
use std::iter::FusedIterator;
use std::time::Duration;

pub struct MediaDecoder {
    data: Bytes,
    format: StreamFormat,
    packets: Vec<PacketEntry>,
}

impl MediaDecoder {
    /// Parse the header and index every packet
    pub fn open(blob: &MediaBlob) -> Result<Self, MediaError> {
        let data = blob.bytes();
        let mut reader = ByteReader::new(&data);
        let format = format::read_header(&mut reader)?;
        let mut packets = Vec::new();
        while !reader.is_at_end() {
            packets.push(format::read_packet_entry(&mut reader)?);
        }

        tracing::debug!(
            "Opened container: {}x{} @ {}fps, {} packets, audio={:?}",
            format.video.width,
            format.video.height,
            format.video.frame_rate,
            packets.len(),
            format.audio
        );

        Ok(Self {
            data,
            format,
            packets,
        })
    }

    pub fn format(&self) -> &StreamFormat {
        &self.format
    }

    pub fn video_frame_count(&self) -> usize {
        self.packets.iter().filter(|p| p.kind.is_video()).count()
    }

    /// End of the last sample: last frame time plus one frame interval, or
    /// the end of the last audio packet, whichever is later.
    pub fn duration(&self) -> Duration {
        let frame_interval = self.format.video.frame_interval();
        let channels = self
            .format
            .audio
            .map(|a| a.channels.max(1) as usize)
            .unwrap_or(1);
        let sample_rate = self.format.audio.map(|a| a.sample_rate).unwrap_or(0);

        self.packets
            .iter()
            .map(|p| match p.kind {
                PacketKind::VideoKey | PacketKind::VideoDelta => p.timestamp + frame_interval,
                PacketKind::Audio if sample_rate > 0 => {
                    let frames = p.len / 2 / channels;
                    p.timestamp + Duration::from_secs_f64(frames as f64 / sample_rate as f64)
                }
                PacketKind::Audio => p.timestamp,
            })
            .max()
            .unwrap_or(Duration::ZERO)
    }

    /// Decode every sample from the beginning
    pub fn samples(self) -> DecodedSamples {
        DecodedSamples::new(self, 0, Duration::ZERO)
    }

    /// Position at the last keyframe at or before `start`. Frames between the
    /// keyframe and `start` are decoded but not yielded; audio is yielded if it
    /// overlaps `start`.
    pub fn seek(self, start: Duration) -> DecodedSamples {
        let position = self.keyframe_before(start);
        DecodedSamples::new(self, position, start)
    }

    /// The frame visible at `at`: the last frame whose timestamp is `<= at`,
    /// or the first frame if `at` precedes it.
    pub fn frame_at(self, at: Duration) -> Result<Option<VideoFrame>, MediaError> {
        let position = self.keyframe_before(at);
        let mut visible = None;
        for sample in DecodedSamples::new(self, position, Duration::ZERO) {
            let MediaSample::Video(frame) = sample? else {
                continue;
            };
            if frame.timestamp > at {
                if visible.is_none() {
                    visible = Some(frame);
                }
                break;
            }
            visible = Some(frame);
        }
        Ok(visible)
    }

    fn keyframe_before(&self, at: Duration) -> usize {
        self.packets
            .iter()
            .enumerate()
            .filter(|(_, p)| p.kind == PacketKind::VideoKey && p.timestamp <= at)
            .map(|(i, _)| i)
            .last()
            .unwrap_or(0)
    }
}

/// Lazily decoded samples in container order
pub struct DecodedSamples {
    decoder: MediaDecoder,
    position: usize,
    yield_from: Duration,
    reference: Option<Vec<u8>>,
    done: bool,
}

impl DecodedSamples {
    fn new(decoder: MediaDecoder, position: usize, yield_from: Duration) -> Self {
        Self {
            decoder,
            position,
            yield_from,
            reference: None,
            done: false,
        }
    }

    pub fn format(&self) -> &StreamFormat {
        &self.decoder.format
    }

    fn decode_packet(&mut self, entry: PacketEntry) -> Result<Option<MediaSample>, MediaError> {
        let payload = &self.decoder.data[entry.offset..entry.offset + entry.len];
        let video = self.decoder.format.video;
        match entry.kind {
            PacketKind::VideoKey => {
                let expected = VideoFrame::expected_len(video.width, video.height);
                if payload.len() != expected {
                    return Err(MediaError::FrameSize {
                        got: payload.len(),
                        expected,
                    });
                }
                self.reference = Some(payload.to_vec());
            }
            PacketKind::VideoDelta => {
                let reference = self
                    .reference
                    .as_mut()
                    .ok_or(MediaError::MissingKeyframe(entry.timestamp))?;
                format::apply_delta(reference, payload, entry.offset)?;
            }
            PacketKind::Audio => {
                let Some(audio) = self.decoder.format.audio else {
                    return Err(MediaError::Corrupt {
                        offset: entry.offset,
                        reason: "audio packet in a video-only container".to_string(),
                    });
                };
                let samples: Vec<i16> = payload
                    .chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]))
                    .collect();
                let packet =
                    AudioPacket::new(entry.timestamp, audio.sample_rate, audio.channels, samples);
                if packet.end() <= self.yield_from && packet.timestamp < self.yield_from {
                    return Ok(None);
                }
                return Ok(Some(MediaSample::Audio(packet)));
            }
        }

        if entry.timestamp < self.yield_from {
            return Ok(None);
        }
        let data = self.reference.clone().unwrap_or_default();
        Ok(Some(MediaSample::Video(VideoFrame::new(
            video.width,
            video.height,
            entry.timestamp,
            data,
        ))))
    }
}

impl Iterator for DecodedSamples {
    type Item = Result<MediaSample, MediaError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let Some(entry) = self.decoder.packets.get(self.position).copied() else {
                self.done = true;
                break;
            };
            self.position += 1;
            match self.decode_packet(entry) {
                Ok(Some(sample)) => return Some(Ok(sample)),
                Ok(None) => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

impl FusedIterator for DecodedSamples {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaEncoder, VideoFormat};

    fn encode(frames: u32, fps: f64) -> MediaBlob {
        let format = StreamFormat {
            video: VideoFormat {
                width: 8,
                height: 4,
                frame_rate: fps,
            },
            audio: None,
        };
        let mut encoder = MediaEncoder::new(format, 10);
        let mut chunks = Vec::new();
        for i in 0..frames {
            let ts = Duration::from_micros((i as f64 * 1_000_000.0 / fps).round() as u64);
            let frame = VideoFrame::solid(8, 4, ts, [i as u8, 0, 0, 255]);
            encoder.write_video(ts, &frame).unwrap();
            if i % 7 == 0 {
                chunks.extend(encoder.take_chunk());
            }
        }
        chunks.extend(encoder.finish());
        MediaBlob::from_chunks(chunks)
    }

    #[test]
    fn test_duration_counts_last_frame_interval() {
        let decoder = MediaDecoder::open(&encode(30, 10.0)).unwrap();
        assert_eq!(decoder.video_frame_count(), 30);
        assert!((decoder.duration().as_secs_f64() - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_seek_decodes_through_deltas() {
        let decoder = MediaDecoder::open(&encode(30, 10.0)).unwrap();
        let frames: Vec<VideoFrame> = decoder
            .seek(Duration::from_millis(1500))
            .filter_map(|s| match s.unwrap() {
                MediaSample::Video(f) => Some(f),
                MediaSample::Audio(_) => None,
            })
            .collect();
        assert_eq!(frames.len(), 15);
        assert_eq!(frames[0].timestamp, Duration::from_millis(1500));
        // frame 15 was delta-coded against frames 10..14
        assert_eq!(frames[0].pixel(0, 0), Some([15, 0, 0, 255]));
    }

    #[test]
    fn test_frame_at_picks_visible_frame() {
        let decoder = MediaDecoder::open(&encode(30, 10.0)).unwrap();
        let frame = decoder.frame_at(Duration::from_millis(1250)).unwrap().unwrap();
        assert_eq!(frame.timestamp, Duration::from_millis(1200));
    }

    #[test]
    fn test_byte_range_is_not_decodable() {
        let blob = encode(30, 10.0);
        let tail = MediaBlob::from_bytes(blob.bytes().slice(blob.len() / 2..));
        assert!(MediaDecoder::open(&tail).is_err());
    }
}
