// Shared fakes for the integration tests: capture providers that hand out
// synthetic tracks, a scripted refresh client and a clip builder.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use screenclip_lib::auth::{RefreshClient, RefreshError, RefreshResponse};
use screenclip_lib::capture::{
    CaptureError, CaptureKind, CaptureProvider, CaptureProviders, CaptureRequest, DeviceTrack,
    PermissionState, Resolution, TrackInfo, TrackSource,
};
use screenclip_lib::config::RecorderConfig;
use screenclip_lib::media::{
    AudioFormat, AudioPacket, MediaBlob, MediaEncoder, MediaSample, StreamFormat, VideoFormat,
    VideoFrame,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

pub const SCREEN_COLOR: [u8; 4] = [200, 10, 10, 255];
pub const CAMERA_COLOR: [u8; 4] = [10, 10, 200, 255];

enum Payload {
    Video {
        width: u32,
        height: u32,
        color: [u8; 4],
    },
    Audio {
        sample_rate: u32,
        channels: u16,
    },
}

/// A synthetic device track producing one sample per interval
pub struct FakeTrack {
    info: TrackInfo,
    payload: Payload,
    interval: Duration,
    next_at: Option<Instant>,
    produced: u64,
    end_after: Option<u64>,
    stopped: bool,
    stops: Arc<AtomicUsize>,
}

#[async_trait]
impl DeviceTrack for FakeTrack {
    fn info(&self) -> &TrackInfo {
        &self.info
    }

    async fn next_sample(&mut self) -> Option<MediaSample> {
        if self.stopped || self.end_after.is_some_and(|limit| self.produced >= limit) {
            return None;
        }
        // the deadline survives a dropped future, so losing a race never delays a track
        let due = *self
            .next_at
            .get_or_insert_with(|| Instant::now() + self.interval);
        tokio::time::sleep_until(due).await;
        self.next_at = Some(due + self.interval);
        let timestamp = self.interval * self.produced as u32;
        self.produced += 1;
        Some(match self.payload {
            Payload::Video {
                width,
                height,
                color,
            } => MediaSample::Video(VideoFrame::solid(width, height, timestamp, color)),
            Payload::Audio {
                sample_rate,
                channels,
            } => {
                let frames = (sample_rate as u64 * self.interval.as_millis() as u64 / 1000) as usize;
                MediaSample::Audio(AudioPacket::new(
                    timestamp,
                    sample_rate,
                    channels,
                    vec![100; frames * channels as usize],
                ))
            }
        })
    }

    fn stop(&mut self) {
        self.stopped = true;
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Grant,
    Deny,
    /// The user dismisses the prompt
    Cancel,
}

/// Scriptable capture provider. Counts requests and track stops.
pub struct FakeProvider {
    kind: CaptureKind,
    permission: PermissionState,
    behavior: Behavior,
    grants_system_audio: bool,
    end_after: Option<u64>,
    gate: Option<Arc<Notify>>,
    pub requests: AtomicUsize,
    pub stops: Arc<AtomicUsize>,
    pub tracks_created: AtomicUsize,
}

impl FakeProvider {
    pub fn new(kind: CaptureKind) -> Self {
        Self {
            kind,
            permission: PermissionState::Granted,
            behavior: Behavior::Grant,
            grants_system_audio: true,
            end_after: None,
            gate: None,
            requests: AtomicUsize::new(0),
            stops: Arc::new(AtomicUsize::new(0)),
            tracks_created: AtomicUsize::new(0),
        }
    }

    pub fn permission(mut self, permission: PermissionState) -> Self {
        self.permission = permission;
        self
    }

    pub fn behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// The platform withholds the system audio loopback
    pub fn without_system_audio(mut self) -> Self {
        self.grants_system_audio = false;
        self
    }

    /// Tracks end on their own after `samples` samples
    pub fn ending_after(mut self, samples: u64) -> Self {
        self.end_after = Some(samples);
        self
    }

    /// Requests block until `gate` is notified
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn track(&self, source: TrackSource, payload: Payload, interval: Duration) -> Box<dyn DeviceTrack> {
        let n = self.tracks_created.fetch_add(1, Ordering::SeqCst);
        let (resolution, frame_rate, sample_rate, channels) = match payload {
            Payload::Video { width, height, .. } => (
                Some(Resolution { width, height }),
                Some(1.0 / interval.as_secs_f64()),
                None,
                None,
            ),
            Payload::Audio {
                sample_rate,
                channels,
            } => (None, None, Some(sample_rate), Some(channels)),
        };
        Box::new(FakeTrack {
            info: TrackInfo {
                id: format!("{:?}-{}", source, n),
                label: format!("Fake {:?}", source),
                source,
                resolution,
                frame_rate,
                sample_rate,
                channels,
            },
            payload,
            interval,
            next_at: None,
            produced: 0,
            end_after: self.end_after,
            stopped: false,
            stops: self.stops.clone(),
        })
    }
}

#[async_trait]
impl CaptureProvider for FakeProvider {
    fn kind(&self) -> CaptureKind {
        self.kind
    }

    fn is_available(&self) -> bool {
        true
    }

    fn permission(&self) -> PermissionState {
        self.permission
    }

    async fn request(&self, request: &CaptureRequest) -> Result<Vec<Box<dyn DeviceTrack>>, CaptureError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match self.behavior {
            Behavior::Deny => return Err(CaptureError::PermissionDenied(self.kind)),
            Behavior::Cancel => return Err(CaptureError::Cancelled),
            Behavior::Grant => {}
        }

        let audio = Payload::Audio {
            sample_rate: 8000,
            channels: 1,
        };
        let tracks = match self.kind {
            CaptureKind::ScreenCapture => {
                let mut tracks = vec![self.track(
                    TrackSource::Screen,
                    Payload::Video {
                        width: 160,
                        height: 90,
                        color: SCREEN_COLOR,
                    },
                    Duration::from_millis(100),
                )];
                if request.system_audio && self.grants_system_audio {
                    tracks.push(self.track(TrackSource::SystemAudio, audio, Duration::from_millis(50)));
                }
                tracks
            }
            CaptureKind::CameraCapture => vec![self.track(
                TrackSource::Camera,
                Payload::Video {
                    width: 32,
                    height: 24,
                    color: CAMERA_COLOR,
                },
                Duration::from_millis(100),
            )],
            CaptureKind::MicrophoneCapture => {
                vec![self.track(TrackSource::Microphone, audio, Duration::from_millis(50))]
            }
        };
        Ok(tracks)
    }
}

pub fn providers(list: &[Arc<FakeProvider>]) -> CaptureProviders {
    list.iter()
        .fold(CaptureProviders::new(), |acc, p| acc.with(p.clone()))
}

pub fn recorder_config() -> RecorderConfig {
    RecorderConfig {
        chunk_interval_ms: 200,
        keyframe_interval: 10,
        ..RecorderConfig::default()
    }
}

/// Refresh endpoint double: counts calls, optionally slow or failing
pub struct FakeRefreshClient {
    pub calls: AtomicUsize,
    delay: Duration,
    fail: bool,
    rotate: bool,
    seen: Mutex<Vec<String>>,
}

impl FakeRefreshClient {
    pub fn new(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay,
            fail: false,
            rotate: false,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn rotating(mut self) -> Self {
        self.rotate = true;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Refresh tokens presented so far
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl RefreshClient for FakeRefreshClient {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, RefreshError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen.lock().push(refresh_token.to_string());
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(RefreshError::Rejected("network unreachable".to_string()));
        }
        Ok(RefreshResponse {
            access_token: format!("new-{}", n),
            expires_in: 3600,
            token_type: "Bearer".to_string(),
            scope: "upload".to_string(),
            id_token: None,
            refresh_token: self.rotate.then(|| format!("refresh-{}", n)),
        })
    }
}

/// A `seconds`-long clip at `fps` whose frame `i` has red channel `i % 256`,
/// with 100ms mono audio packets when `with_audio` is set.
pub fn clip(seconds: u32, fps: f64, with_audio: bool) -> MediaBlob {
    let format = StreamFormat {
        video: VideoFormat {
            width: 32,
            height: 18,
            frame_rate: fps,
        },
        audio: with_audio.then_some(AudioFormat {
            sample_rate: 8000,
            channels: 1,
        }),
    };
    let mut encoder = MediaEncoder::new(format, 30);
    let mut chunks = Vec::new();

    let frames = (seconds as f64 * fps).round() as u64;
    let packets = if with_audio { seconds as u64 * 10 } else { 0 };
    let mut next_packet = 0u64;
    let mut write_audio_until = |encoder: &mut MediaEncoder, until: Duration| {
        while next_packet < packets && Duration::from_millis(next_packet * 100) <= until {
            let ts = Duration::from_millis(next_packet * 100);
            let packet = AudioPacket::new(ts, 8000, 1, vec![next_packet as i16; 800]);
            encoder.write_audio(ts, &packet).expect("write audio");
            next_packet += 1;
        }
    };

    for i in 0..frames {
        let ts = Duration::from_micros((i as f64 * 1_000_000.0 / fps).round() as u64);
        write_audio_until(&mut encoder, ts);
        let frame = VideoFrame::solid(32, 18, ts, [(i % 256) as u8, 0, 0, 255]);
        encoder.write_video(ts, &frame).expect("write frame");
        if i % 10 == 0 {
            chunks.extend(encoder.take_chunk());
        }
    }
    write_audio_until(&mut encoder, Duration::MAX);
    chunks.extend(encoder.finish());
    MediaBlob::from_chunks(chunks)
}
