//! Picture-in-picture compositing
//!
//! The secondary (camera) frame is scaled with nearest-neighbour sampling and
//! drawn into the bottom-right corner of the primary frame with rounded corners.

use crate::config::PipConfig;
use crate::media::VideoFrame;

pub struct PipCompositor {
    config: PipConfig,
}

impl PipCompositor {
    pub fn new(config: PipConfig) -> Self {
        Self { config }
    }

    /// Draw `overlay` onto `frame` in place
    pub fn composite(&self, frame: &mut VideoFrame, overlay: &VideoFrame) {
        let frame_width = frame.width;
        let frame_height = frame.height;
        if overlay.width == 0 || overlay.height == 0 || !overlay.is_well_formed() {
            return;
        }

        let scaled_width = (frame_width as f64 * self.config.scale) as u32;
        let scaled_height =
            (scaled_width as f64 * overlay.height as f64 / overlay.width as f64) as u32;
        let margin = self.config.margin;

        if scaled_width == 0
            || scaled_height == 0
            || scaled_width.saturating_add(margin) > frame_width
            || scaled_height.saturating_add(margin) > frame_height
        {
            tracing::debug!(
                "Overlay {}x{} does not fit {}x{}, skipping",
                scaled_width,
                scaled_height,
                frame_width,
                frame_height
            );
            return;
        }

        let dest_x = frame_width - scaled_width - margin;
        let dest_y = frame_height - scaled_height - margin;
        let corner_radius =
            (scaled_width.min(scaled_height) as f64 * self.config.corner_radius_ratio) as i32;

        for dy in 0..scaled_height {
            for dx in 0..scaled_width {
                if !is_inside_rounded_rect(
                    dx as i32,
                    dy as i32,
                    scaled_width as i32,
                    scaled_height as i32,
                    corner_radius,
                ) {
                    continue;
                }

                let src_x = ((dx as f64 * overlay.width as f64 / scaled_width as f64) as u32)
                    .min(overlay.width - 1);
                let src_y = ((dy as f64 * overlay.height as f64 / scaled_height as f64) as u32)
                    .min(overlay.height - 1);

                let src_idx = ((src_y * overlay.width + src_x) * 4) as usize;
                let dest_idx = (((dest_y + dy) * frame_width + dest_x + dx) * 4) as usize;

                if src_idx + 3 >= overlay.data.len() || dest_idx + 3 >= frame.data.len() {
                    continue;
                }

                frame.data[dest_idx..dest_idx + 3]
                    .copy_from_slice(&overlay.data[src_idx..src_idx + 3]);
                frame.data[dest_idx + 3] = 255;
            }
        }
    }
}

fn is_inside_rounded_rect(x: i32, y: i32, width: i32, height: i32, radius: i32) -> bool {
    let corner = |dx: i32, dy: i32| dx * dx + dy * dy <= radius * radius;
    if x < radius && y < radius {
        return corner(radius - x, radius - y);
    }
    if x >= width - radius && y < radius {
        return corner(x - (width - radius - 1), radius - y);
    }
    if x < radius && y >= height - radius {
        return corner(radius - x, y - (height - radius - 1));
    }
    if x >= width - radius && y >= height - radius {
        return corner(x - (width - radius - 1), y - (height - radius - 1));
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_overlay_lands_bottom_right() {
        let compositor = PipCompositor::new(PipConfig {
            scale: 0.25,
            margin: 4,
            corner_radius_ratio: 0.0,
        });
        let mut screen = VideoFrame::solid(64, 48, Duration::ZERO, [0, 0, 0, 255]);
        let camera = VideoFrame::solid(16, 16, Duration::ZERO, [0, 255, 0, 255]);

        compositor.composite(&mut screen, &camera);

        // 16x16 overlay placed at (44, 28)
        assert_eq!(screen.pixel(50, 35), Some([0, 255, 0, 255]));
        assert_eq!(screen.pixel(0, 0), Some([0, 0, 0, 255]));
        assert_eq!(screen.pixel(63, 47), Some([0, 0, 0, 255]));
    }

    #[test]
    fn test_huge_margin_skips_overlay() {
        let compositor = PipCompositor::new(PipConfig {
            scale: 0.25,
            margin: u32::MAX,
            corner_radius_ratio: 0.0,
        });
        let mut screen = VideoFrame::solid(64, 48, Duration::ZERO, [0, 0, 0, 255]);
        let before = screen.clone();
        compositor.composite(&mut screen, &VideoFrame::solid(16, 16, Duration::ZERO, [0, 255, 0, 255]));
        assert_eq!(screen, before);
    }

    #[test]
    fn test_rounded_corner_excludes_extreme_pixel() {
        assert!(!is_inside_rounded_rect(0, 0, 20, 20, 5));
        assert!(is_inside_rounded_rect(10, 10, 20, 20, 5));
    }
}
