//! Trim engine
//!
//! Runs the decode, draw and re-encode loop on the blocking pool. The source
//! blob is only ever read; every exit path drops the decoder, the surface and
//! any partial output.

use super::surface::{self, Surface};
use super::types::{Thumbnail, TrimRange};
use crate::config::TrimConfig;
use crate::media::{MediaBlob, MediaDecoder, MediaEncoder, MediaError, MediaSample};
use crate::utils::{AppError, AppResult};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Pending encoder output is cut into a chunk once it grows past this
const CHUNK_BYTES: usize = 1 << 20;

pub struct TrimEngine {
    config: TrimConfig,
}

impl TrimEngine {
    pub fn new(config: TrimConfig) -> Self {
        Self { config }
    }

    /// Source duration in seconds
    pub async fn get_duration(&self, blob: &MediaBlob) -> AppResult<f64> {
        let blob = blob.clone();
        run_blocking(move || {
            let decoder = MediaDecoder::open(&blob).map_err(AppError::TrimFailed)?;
            Ok(decoder.duration().as_secs_f64())
        })
        .await
    }

    /// New blob covering `[start, end)` seconds of `blob`
    pub async fn trim(&self, blob: &MediaBlob, start: f64, end: f64) -> AppResult<MediaBlob> {
        self.trim_with_cancel(blob, start, end, Arc::new(AtomicBool::new(false)))
            .await
    }

    /// Like [`trim`](Self::trim), checking `cancel` before every decoded
    /// sample. A cancelled trim returns [`AppError::Cancelled`] and nothing else.
    pub async fn trim_with_cancel(
        &self,
        blob: &MediaBlob,
        start: f64,
        end: f64,
        cancel: Arc<AtomicBool>,
    ) -> AppResult<MediaBlob> {
        TrimRange::check_bounds(start, end)?;

        let blob = blob.clone();
        let keyframe_interval = self.config.keyframe_interval;
        run_blocking(move || {
            let decoder = MediaDecoder::open(&blob).map_err(AppError::TrimFailed)?;
            let range = TrimRange::new(start, end, decoder.duration().as_secs_f64())?;
            render(decoder, range, keyframe_interval, &cancel)
        })
        .await
    }

    /// PNG of the frame visible at `at_seconds`, no wider than the configured maximum
    pub async fn create_thumbnail(&self, blob: &MediaBlob, at_seconds: f64) -> AppResult<Thumbnail> {
        if !at_seconds.is_finite() || at_seconds < 0.0 {
            return Err(AppError::InvalidRange {
                start: at_seconds,
                end: at_seconds,
                duration: f64::NAN,
            });
        }

        let blob = blob.clone();
        let max_width = self.config.thumbnail_max_width.max(1);
        run_blocking(move || {
            let decoder = MediaDecoder::open(&blob).map_err(AppError::TrimFailed)?;
            let duration = decoder.duration().as_secs_f64();
            if at_seconds > duration {
                return Err(AppError::InvalidRange {
                    start: at_seconds,
                    end: at_seconds,
                    duration,
                });
            }

            let frame = decoder
                .frame_at(Duration::from_secs_f64(at_seconds))
                .map_err(AppError::TrimFailed)?
                .ok_or_else(|| {
                    AppError::TrimFailed(MediaError::Corrupt {
                        offset: 0,
                        reason: "container has no video frames".to_string(),
                    })
                })?;

            let frame = if frame.width > max_width {
                let height = ((frame.height as u64 * max_width as u64) / frame.width as u64).max(1);
                frame.resized(max_width, height as u32)
            } else {
                frame
            };
            let png = surface::encode_png(&frame).map_err(AppError::TrimFailed)?;

            tracing::debug!(
                "Thumbnail at {:.3}s: {}x{}, {} bytes",
                frame.timestamp.as_secs_f64(),
                frame.width,
                frame.height,
                png.len()
            );
            Ok(Thumbnail {
                width: frame.width,
                height: frame.height,
                at_seconds: frame.timestamp.as_secs_f64(),
                png,
            })
        })
        .await
    }
}

async fn run_blocking<T, F>(job: F) -> AppResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> AppResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(job).await.map_err(|e| {
        AppError::TrimFailed(MediaError::Encoding(format!("trim task failed: {}", e)))
    })?
}

fn render(
    decoder: MediaDecoder,
    range: TrimRange,
    keyframe_interval: u32,
    cancel: &AtomicBool,
) -> AppResult<MediaBlob> {
    let format = *decoder.format();
    let start = range.start();
    let end = range.end();

    tracing::info!(
        "Trimming {:.3}s..{:.3}s of a {:.3}s clip ({}x{} @ {}fps)",
        range.start_seconds,
        range.end_seconds,
        range.source_duration_seconds,
        format.video.width,
        format.video.height,
        format.video.frame_rate
    );

    let mut surface = Surface::new(format.video.width, format.video.height);
    let mut encoder = MediaEncoder::new(format, keyframe_interval);
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut frames = 0u64;

    for sample in decoder.seek(start) {
        if cancel.load(Ordering::Relaxed) {
            tracing::info!("Trim cancelled after {} frames", frames);
            return Err(AppError::Cancelled);
        }

        match sample.map_err(AppError::TrimFailed)? {
            MediaSample::Video(frame) => {
                // exclusive end: the frame shown at `end` is not part of the clip
                if frame.timestamp >= end {
                    break;
                }
                surface.draw(&frame);
                let timestamp = frame.timestamp.saturating_sub(start);
                encoder
                    .write_video(timestamp, &surface.capture(timestamp))
                    .map_err(AppError::TrimFailed)?;
                frames += 1;
            }
            MediaSample::Audio(packet) => {
                if let Some(mut slice) = packet.slice(start, end) {
                    slice.timestamp = slice.timestamp.saturating_sub(start);
                    encoder
                        .write_audio(slice.timestamp, &slice)
                        .map_err(AppError::TrimFailed)?;
                }
            }
        }

        if encoder.pending_len() >= CHUNK_BYTES {
            chunks.extend(encoder.take_chunk());
        }
    }

    chunks.extend(encoder.finish());
    let blob = MediaBlob::from_chunks(chunks);
    tracing::info!("Trim finished: {} frames, {} bytes", frames, blob.len());
    Ok(blob)
}
