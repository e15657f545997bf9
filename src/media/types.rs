//! Raw media samples flowing from devices through the recorder

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One RGBA video frame
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Presentation time relative to the start of the track
    pub timestamp: Duration,
    /// Tightly packed RGBA, `width * height * 4` bytes
    pub data: Vec<u8>,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, timestamp: Duration, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            timestamp,
            data,
        }
    }

    /// A frame filled with a single colour
    pub fn solid(width: u32, height: u32, timestamp: Duration, rgba: [u8; 4]) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take(Self::expected_len(width, height))
            .collect();
        Self::new(width, height, timestamp, data)
    }

    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 4
    }

    pub fn is_well_formed(&self) -> bool {
        self.data.len() == Self::expected_len(self.width, self.height)
    }

    /// RGBA value at (x, y), if in bounds
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) * 4) as usize;
        self.data
            .get(idx..idx + 4)
            .map(|p| [p[0], p[1], p[2], p[3]])
    }

    /// Nearest-neighbour resample to the given dimensions
    pub fn resized(&self, width: u32, height: u32) -> VideoFrame {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let mut data = vec![0u8; Self::expected_len(width, height)];
        if self.width == 0 || self.height == 0 {
            return VideoFrame::new(width, height, self.timestamp, data);
        }
        for dy in 0..height {
            let src_y = ((dy as u64 * self.height as u64) / height as u64) as u32;
            for dx in 0..width {
                let src_x = ((dx as u64 * self.width as u64) / width as u64) as u32;
                let src_idx = ((src_y * self.width + src_x) * 4) as usize;
                let dst_idx = ((dy * width + dx) * 4) as usize;
                if let Some(src) = self.data.get(src_idx..src_idx + 4) {
                    data[dst_idx..dst_idx + 4].copy_from_slice(src);
                }
            }
        }
        VideoFrame::new(width, height, self.timestamp, data)
    }
}

/// Interleaved 16-bit PCM
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPacket {
    pub timestamp: Duration,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioPacket {
    pub fn new(timestamp: Duration, sample_rate: u32, channels: u16, samples: Vec<i16>) -> Self {
        Self {
            timestamp,
            sample_rate,
            channels,
            samples,
        }
    }

    pub fn format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    /// Number of sample frames (one sample per channel)
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count() as f64 / self.sample_rate as f64)
    }

    pub fn end(&self) -> Duration {
        self.timestamp + self.duration()
    }

    /// Keep only the sample frames that fall inside `[from, to)`
    pub fn slice(&self, from: Duration, to: Duration) -> Option<AudioPacket> {
        let start = from.max(self.timestamp);
        let end = to.min(self.end());
        if start >= end {
            return None;
        }
        let rate = self.sample_rate as f64;
        let channels = self.channels.max(1) as usize;
        let first = ((start - self.timestamp).as_secs_f64() * rate).round() as usize;
        let last = (((end - self.timestamp).as_secs_f64() * rate).round() as usize)
            .min(self.frame_count());
        if first >= last {
            return None;
        }
        Some(AudioPacket::new(
            self.timestamp + Duration::from_secs_f64(first as f64 / rate),
            self.sample_rate,
            self.channels,
            self.samples[first * channels..last * channels].to_vec(),
        ))
    }
}

/// A sample from either kind of track
#[derive(Debug, Clone, PartialEq)]
pub enum MediaSample {
    Video(VideoFrame),
    Audio(AudioPacket),
}

impl MediaSample {
    pub fn timestamp(&self) -> Duration {
        match self {
            MediaSample::Video(frame) => frame.timestamp,
            MediaSample::Audio(packet) => packet.timestamp,
        }
    }

    pub fn set_timestamp(&mut self, timestamp: Duration) {
        match self {
            MediaSample::Video(frame) => frame.timestamp = timestamp,
            MediaSample::Audio(packet) => packet.timestamp = timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
}

impl VideoFormat {
    pub fn frame_interval(&self) -> Duration {
        if self.frame_rate <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(1.0 / self.frame_rate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Everything the encoder needs up front
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamFormat {
    pub video: VideoFormat,
    pub audio: Option<AudioFormat>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_keeps_corner_pixels() {
        let mut frame = VideoFrame::solid(4, 4, Duration::ZERO, [0, 0, 0, 255]);
        frame.data[0..4].copy_from_slice(&[255, 0, 0, 255]);
        let half = frame.resized(2, 2);
        assert!(half.is_well_formed());
        assert_eq!(half.pixel(0, 0), Some([255, 0, 0, 255]));
        assert_eq!(half.pixel(1, 1), Some([0, 0, 0, 255]));
    }

    #[test]
    fn test_audio_slice_is_sample_accurate() {
        // 1s of mono audio at 1kHz starting at t=2s
        let packet = AudioPacket::new(Duration::from_secs(2), 1000, 1, (0..1000).collect());
        let sliced = packet
            .slice(Duration::from_millis(2250), Duration::from_millis(2500))
            .unwrap();
        assert_eq!(sliced.timestamp, Duration::from_millis(2250));
        assert_eq!(sliced.samples.len(), 250);
        assert_eq!(sliced.samples[0], 250);

        assert!(packet
            .slice(Duration::from_secs(4), Duration::from_secs(5))
            .is_none());
    }
}
