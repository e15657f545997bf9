//! Off-screen drawing surface for the trim render loop

use crate::media::{MediaError, VideoFrame};
use std::time::Duration;

/// RGBA canvas of a fixed size. Frames of another size are scaled to fit.
pub struct Surface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; VideoFrame::expected_len(width, height)],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Replace the canvas with `frame`. Malformed frames leave it unchanged.
    pub fn draw(&mut self, frame: &VideoFrame) {
        if !frame.is_well_formed() {
            tracing::warn!("Skipping malformed frame at {:?}", frame.timestamp);
            return;
        }
        if frame.width == self.width && frame.height == self.height {
            self.pixels.copy_from_slice(&frame.data);
        } else {
            let scaled = frame.resized(self.width, self.height);
            self.pixels.copy_from_slice(&scaled.data);
        }
    }

    /// Current contents as a frame stamped `timestamp`
    pub fn capture(&self, timestamp: Duration) -> VideoFrame {
        VideoFrame::new(self.width, self.height, timestamp, self.pixels.clone())
    }
}

/// Encode an RGBA frame as PNG
pub fn encode_png(frame: &VideoFrame) -> Result<Vec<u8>, MediaError> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, frame.width, frame.height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder
            .write_header()
            .map_err(|e| MediaError::Encoding(format!("PNG header error: {}", e)))?;
        writer
            .write_image_data(&frame.data)
            .map_err(|e| MediaError::Encoding(format!("PNG write error: {}", e)))?;
        writer
            .finish()
            .map_err(|e| MediaError::Encoding(format!("PNG finish error: {}", e)))?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_scales_foreign_sizes() {
        let mut surface = Surface::new(4, 4);
        surface.draw(&VideoFrame::solid(8, 8, Duration::ZERO, [9, 8, 7, 255]));
        let frame = surface.capture(Duration::from_millis(40));
        assert_eq!(frame.timestamp, Duration::from_millis(40));
        assert_eq!(frame.pixel(3, 3), Some([9, 8, 7, 255]));
    }

    #[test]
    fn test_png_round_trips_dimensions() {
        let frame = VideoFrame::solid(6, 3, Duration::ZERO, [1, 2, 3, 255]);
        let bytes = encode_png(&frame).unwrap();
        let reader = png::Decoder::new(std::io::Cursor::new(bytes)).read_info().unwrap();
        assert_eq!(reader.info().width, 6);
        assert_eq!(reader.info().height, 3);
    }
}
