//! Capture pipeline
//!
//! Acquires device tracks for a [`CaptureOptions`] and composes them into one
//! recordable [`CompositeStream`]: exactly one video track (screen, camera, or
//! screen with camera picture-in-picture) and at most one mixed audio track.
//!
//! Every track is owned by a guard from the moment a provider hands it over,
//! so an error, a cancelled future or a dropped stream still stops it, and
//! stops it only once.

use super::compositor::PipCompositor;
use super::mixer::AudioMixer;
use super::options::CaptureOptions;
use super::traits::{CaptureError, CaptureKind, CaptureProviders, DeviceTrack, TrackInfo, TrackSource};
use crate::config::{AudioLossPolicy, RecorderConfig};
use crate::media::{AudioFormat, AudioPacket, MediaSample, StreamFormat, VideoFormat, VideoFrame};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;
const DEFAULT_FRAME_RATE: f64 = 30.0;
const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Non-fatal problems surfaced while acquiring or recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum CaptureWarning {
    /// System audio was requested but the platform withheld it
    SystemAudioDenied,
    MicrophoneUnavailable { reason: String },
    /// An audio input ended mid-session and recording continued without it
    AudioTrackLost { source: TrackSource },
}

/// What the composite stream produced next
#[derive(Debug)]
pub enum StreamEvent {
    Sample(MediaSample),
    Warning(CaptureWarning),
    /// A track ended without being stopped: the device is gone
    TrackEnded(TrackInfo),
}

pub struct CapturePipeline {
    providers: CaptureProviders,
    config: RecorderConfig,
}

impl CapturePipeline {
    pub fn new(providers: CaptureProviders, config: RecorderConfig) -> Self {
        Self { providers, config }
    }

    pub fn providers(&self) -> &CaptureProviders {
        &self.providers
    }

    /// Fail fast if a capability the mode needs is missing or denied
    pub fn check_capabilities(&self, options: &CaptureOptions) -> Result<(), CaptureError> {
        self.providers.check(&options.mode.required_capabilities())
    }

    /// Request every track the options call for and compose them.
    ///
    /// Video denial aborts; audio denial only produces a warning.
    pub async fn acquire(&self, options: &CaptureOptions) -> Result<CompositeStream, CaptureError> {
        tracing::info!("Acquiring capture stream: {:?}", options);
        let mut tracks = TrackGuard::default();
        let mut warnings = Vec::new();

        if options.mode.uses_screen() {
            let granted = self.request(CaptureKind::ScreenCapture, options).await?;
            tracks.extend(granted);
            if options.system_audio && !tracks.has(TrackSource::SystemAudio) {
                tracing::warn!("System audio was requested but not granted; continuing without it");
                warnings.push(CaptureWarning::SystemAudioDenied);
            }
        }

        if options.mode.uses_camera() {
            let granted = self.request(CaptureKind::CameraCapture, options).await?;
            tracks.extend(granted);
        }

        if options.microphone {
            match self.request(CaptureKind::MicrophoneCapture, options).await {
                Ok(granted) => tracks.extend(granted),
                Err(e) => {
                    tracing::warn!("Microphone unavailable, continuing without it: {}", e);
                    warnings.push(CaptureWarning::MicrophoneUnavailable {
                        reason: e.to_string(),
                    });
                }
            }
        }

        CompositeStream::assemble(tracks, options, &self.config, warnings)
    }

    /// Stop every constituent track of a stream
    pub fn release(&self, mut stream: CompositeStream) {
        stream.release();
    }

    async fn request(
        &self,
        kind: CaptureKind,
        options: &CaptureOptions,
    ) -> Result<Vec<Box<dyn DeviceTrack>>, CaptureError> {
        let provider = self
            .providers
            .get(kind)
            .ok_or(CaptureError::Unavailable(kind))?;
        let tracks = provider.request(&options.request_for(kind)).await?;
        tracing::debug!("{} provider granted {} track(s)", kind, tracks.len());
        Ok(tracks)
    }
}

/// Stops whatever it still holds when dropped
#[derive(Default)]
struct TrackGuard {
    tracks: Vec<Box<dyn DeviceTrack>>,
}

impl TrackGuard {
    fn extend(&mut self, tracks: Vec<Box<dyn DeviceTrack>>) {
        self.tracks.extend(tracks);
    }

    fn has(&self, source: TrackSource) -> bool {
        self.tracks.iter().any(|t| t.info().source == source)
    }

    fn take(&mut self, source: TrackSource) -> Option<Box<dyn DeviceTrack>> {
        let idx = self.tracks.iter().position(|t| t.info().source == source)?;
        Some(self.tracks.remove(idx))
    }
}

impl Drop for TrackGuard {
    fn drop(&mut self) {
        for track in &mut self.tracks {
            tracing::debug!("Stopping unused track {}", track.info().id);
            track.stop();
        }
    }
}

/// The one recordable stream built from the acquired device tracks
pub struct CompositeStream {
    id: Uuid,
    format: StreamFormat,
    primary: Box<dyn DeviceTrack>,
    overlay: Option<Box<dyn DeviceTrack>>,
    system_audio: Option<Box<dyn DeviceTrack>>,
    microphone: Option<Box<dyn DeviceTrack>>,
    compositor: PipCompositor,
    latest_overlay: Option<VideoFrame>,
    mixer: AudioMixer,
    pending_audio: VecDeque<AudioPacket>,
    audio_loss_policy: AudioLossPolicy,
    warnings: Vec<CaptureWarning>,
    released: bool,
}

impl CompositeStream {
    fn assemble(
        mut tracks: TrackGuard,
        options: &CaptureOptions,
        config: &RecorderConfig,
        warnings: Vec<CaptureWarning>,
    ) -> Result<Self, CaptureError> {
        let primary_source = if options.mode.uses_screen() {
            TrackSource::Screen
        } else {
            TrackSource::Camera
        };
        let primary = tracks.take(primary_source).ok_or_else(|| {
            CaptureError::Device(format!("provider returned no {:?} video track", primary_source))
        })?;
        let overlay = if options.mode.uses_screen() && options.mode.uses_camera() {
            Some(tracks.take(TrackSource::Camera).ok_or_else(|| {
                CaptureError::Device("provider returned no camera video track".to_string())
            })?)
        } else {
            None
        };
        let system_audio = if options.system_audio {
            tracks.take(TrackSource::SystemAudio)
        } else {
            None
        };
        let microphone = if options.microphone {
            tracks.take(TrackSource::Microphone)
        } else {
            None
        };
        // anything left in the guard (extra or unrequested tracks) is stopped here
        drop(tracks);

        let info = primary.info();
        let resolution = info.resolution.or(options.resolution);
        let video = VideoFormat {
            width: resolution.map(|r| r.width).unwrap_or(DEFAULT_WIDTH),
            height: resolution.map(|r| r.height).unwrap_or(DEFAULT_HEIGHT),
            frame_rate: info
                .frame_rate
                .or(options.frame_rate)
                .unwrap_or(DEFAULT_FRAME_RATE),
        };

        let audio_sources: Vec<TrackSource> = [&system_audio, &microphone]
            .into_iter()
            .flatten()
            .map(|t| t.info().source)
            .collect();
        let audio = [&system_audio, &microphone]
            .into_iter()
            .flatten()
            .next()
            .map(|t| AudioFormat {
                sample_rate: t.info().sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE),
                channels: t.info().channels.unwrap_or(1),
            });

        let stream = Self {
            id: Uuid::new_v4(),
            format: StreamFormat { video, audio },
            primary,
            overlay,
            system_audio,
            microphone,
            compositor: PipCompositor::new(config.pip.clone()),
            latest_overlay: None,
            mixer: AudioMixer::new(&audio_sources),
            pending_audio: VecDeque::new(),
            audio_loss_policy: config.audio_loss_policy,
            warnings,
            released: false,
        };

        tracing::info!(
            "Composite stream {} ready: {}x{} @ {}fps, overlay={}, audio inputs={}",
            stream.id,
            video.width,
            video.height,
            video.frame_rate,
            stream.overlay.is_some(),
            audio_sources.len()
        );
        Ok(stream)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn format(&self) -> &StreamFormat {
        &self.format
    }

    pub fn warnings(&self) -> &[CaptureWarning] {
        &self.warnings
    }

    /// Always one, whatever was composited into it
    pub fn video_track_count(&self) -> usize {
        1
    }

    pub fn audio_track_count(&self) -> usize {
        usize::from(self.format.audio.is_some())
    }

    /// Every device track feeding this stream
    pub fn constituent_tracks(&self) -> Vec<TrackInfo> {
        std::iter::once(&self.primary)
            .chain(self.overlay.iter())
            .chain(self.system_audio.iter())
            .chain(self.microphone.iter())
            .map(|t| t.info().clone())
            .collect()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Wait for the next composed sample or track event
    pub async fn next_event(&mut self) -> StreamEvent {
        loop {
            if let Some(packet) = self.pending_audio.pop_front() {
                return StreamEvent::Sample(MediaSample::Audio(packet));
            }

            let primary_source = self.primary.info().source;
            let (source, sample) = tokio::select! {
                sample = self.primary.next_sample() => (primary_source, sample),
                sample = next_from(&mut self.overlay) => (TrackSource::Camera, sample),
                sample = next_from(&mut self.system_audio) => (TrackSource::SystemAudio, sample),
                sample = next_from(&mut self.microphone) => (TrackSource::Microphone, sample),
            };

            match (source, sample) {
                (_, None) => {
                    if let Some(event) = self.track_ended(source) {
                        return event;
                    }
                }
                (TrackSource::Screen | TrackSource::Camera, Some(MediaSample::Video(mut frame))) => {
                    if self.overlay.is_some() && source == TrackSource::Camera {
                        self.latest_overlay = Some(frame);
                        continue;
                    }
                    if let Some(overlay) = &self.latest_overlay {
                        self.compositor.composite(&mut frame, overlay);
                    }
                    return StreamEvent::Sample(MediaSample::Video(frame));
                }
                (TrackSource::SystemAudio | TrackSource::Microphone, Some(MediaSample::Audio(packet))) => {
                    let ready = self.mixer.push(source, packet);
                    self.pending_audio.extend(ready);
                }
                (source, Some(_)) => {
                    tracing::debug!("Ignoring mismatched sample kind from {:?}", source);
                }
            }
        }
    }

    fn track_ended(&mut self, source: TrackSource) -> Option<StreamEvent> {
        let slot = match source {
            TrackSource::SystemAudio => &mut self.system_audio,
            TrackSource::Microphone => &mut self.microphone,
            TrackSource::Camera if self.overlay.is_some() => &mut self.overlay,
            _ => return Some(StreamEvent::TrackEnded(self.primary.info().clone())),
        };
        let info = slot.as_ref()?.info().clone();

        if !source.is_video() && self.audio_loss_policy == AudioLossPolicy::ContinueVideoOnly {
            if let Some(mut track) = slot.take() {
                track.stop();
            }
            tracing::warn!("{:?} track {} ended; continuing without it", source, info.id);
            let flushed = self.mixer.remove_source(source);
            self.pending_audio.extend(flushed);
            let warning = CaptureWarning::AudioTrackLost { source };
            self.warnings.push(warning.clone());
            return Some(StreamEvent::Warning(warning));
        }

        tracing::error!("{:?} track {} ended unexpectedly", source, info.id);
        Some(StreamEvent::TrackEnded(info))
    }

    /// Queued mixer output, for the final flush after the last sample
    pub fn drain_audio(&mut self) -> Vec<AudioPacket> {
        let mut drained: Vec<AudioPacket> = self.pending_audio.drain(..).collect();
        drained.extend(self.mixer.flush());
        drained
    }

    /// Stop every constituent track. Runs once; later calls do nothing.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        self.primary.stop();
        let mut stopped = 1;
        for slot in [&mut self.overlay, &mut self.system_audio, &mut self.microphone] {
            if let Some(track) = slot.as_mut() {
                track.stop();
                stopped += 1;
            }
        }
        tracing::info!("Released composite stream {} ({} tracks stopped)", self.id, stopped);
    }
}

impl Drop for CompositeStream {
    fn drop(&mut self) {
        if !self.released {
            tracing::debug!("Composite stream {} dropped before release", self.id);
            self.release();
        }
    }
}

async fn next_from(slot: &mut Option<Box<dyn DeviceTrack>>) -> Option<MediaSample> {
    match slot {
        Some(track) => track.next_sample().await,
        None => std::future::pending().await,
    }
}
