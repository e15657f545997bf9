//! Media recorder task
//!
//! Pulls composed samples from a [`CompositeStream`], encodes them, and emits
//! a chunk every timeslice. Chunks land in a shared buffer as they are
//! produced, so they survive even if the task dies before its final flush.

use super::state::SessionEvent;
use crate::capture::{CompositeStream, StreamEvent, TrackInfo};
use crate::config::RecorderConfig;
use crate::media::{MediaEncoder, MediaSample};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecorderControl {
    Recording,
    Paused,
    Stopped,
}

/// Why the recording loop ended
#[derive(Debug)]
enum ExitReason {
    Stopped,
    TrackEnded(TrackInfo),
}

struct RecorderExit {
    stream: CompositeStream,
    reason: ExitReason,
}

/// What `stop()` hands back
#[derive(Default)]
pub struct RecorderOutput {
    /// Every chunk emitted, in order
    pub chunks: Vec<Bytes>,
    /// The stream, if the task returned it. `None` means it was dropped (and
    /// therefore released) inside the task.
    pub stream: Option<CompositeStream>,
    pub failure: Option<String>,
    pub lost_track: Option<TrackInfo>,
}

pub struct MediaRecorder {
    control: watch::Sender<RecorderControl>,
    chunks: Arc<Mutex<Vec<Bytes>>>,
    task: JoinHandle<RecorderExit>,
}

impl MediaRecorder {
    /// Spawn the recording loop. `lost_tx` fires if a device track ends on its own.
    pub fn start(
        stream: CompositeStream,
        config: &RecorderConfig,
        events: broadcast::Sender<SessionEvent>,
        lost_tx: oneshot::Sender<TrackInfo>,
    ) -> Self {
        let (control, control_rx) = watch::channel(RecorderControl::Recording);
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let task = tokio::spawn(record(
            stream,
            config.clone(),
            control_rx,
            chunks.clone(),
            events,
            lost_tx,
        ));
        Self {
            control,
            chunks,
            task,
        }
    }

    pub fn pause(&self) {
        let _ = self.control.send(RecorderControl::Paused);
    }

    pub fn resume(&self) {
        let _ = self.control.send(RecorderControl::Recording);
    }

    /// Stop the loop and collect the chunks
    pub async fn stop(self) -> RecorderOutput {
        let _ = self.control.send(RecorderControl::Stopped);
        let joined = self.task.await;
        let chunks = std::mem::take(&mut *self.chunks.lock());
        match joined {
            Ok(exit) => {
                let lost_track = match exit.reason {
                    ExitReason::TrackEnded(info) => Some(info),
                    ExitReason::Stopped => None,
                };
                RecorderOutput {
                    chunks,
                    stream: Some(exit.stream),
                    failure: None,
                    lost_track,
                }
            }
            Err(e) => {
                tracing::error!("Recorder task failed before flushing: {}", e);
                RecorderOutput {
                    chunks,
                    stream: None,
                    failure: Some(format!("recorder task failed: {}", e)),
                    lost_track: None,
                }
            }
        }
    }
}

/// Maps device timestamps onto the recording timeline: starts at zero and
/// closes the gap left by each pause.
struct Timeline {
    offset: Option<Duration>,
    last_input: Duration,
    resumed: bool,
    frame_interval: Duration,
}

impl Timeline {
    fn new(frame_interval: Duration) -> Self {
        Self {
            offset: None,
            last_input: Duration::ZERO,
            resumed: false,
            frame_interval,
        }
    }

    fn resume(&mut self) {
        self.resumed = true;
    }

    fn map(&mut self, timestamp: Duration) -> Duration {
        let offset = self.offset.get_or_insert(timestamp);
        if self.resumed {
            self.resumed = false;
            let gap = timestamp
                .saturating_sub(self.last_input)
                .saturating_sub(self.frame_interval);
            *offset += gap;
        }
        self.last_input = self.last_input.max(timestamp);
        timestamp.saturating_sub(*offset)
    }
}

async fn record(
    mut stream: CompositeStream,
    config: RecorderConfig,
    mut control: watch::Receiver<RecorderControl>,
    chunks: Arc<Mutex<Vec<Bytes>>>,
    events: broadcast::Sender<SessionEvent>,
    lost_tx: oneshot::Sender<TrackInfo>,
) -> RecorderExit {
    let format = *stream.format();
    let mut encoder = MediaEncoder::new(format, config.keyframe_interval);
    let mut timeline = Timeline::new(format.video.frame_interval());
    let mut paused = false;

    let mut ticker = tokio::time::interval(config.chunk_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    tracing::info!("Recorder started for stream {}", stream.id());

    let emit = |chunk: Bytes, chunks: &Mutex<Vec<Bytes>>| {
        let size = chunk.len();
        chunks.lock().push(chunk);
        let _ = events.send(SessionEvent::ChunkRecorded { size });
    };

    let reason = loop {
        tokio::select! {
            biased;
            changed = control.changed() => {
                let state = if changed.is_ok() { *control.borrow_and_update() } else { RecorderControl::Stopped };
                match state {
                    RecorderControl::Stopped => break ExitReason::Stopped,
                    RecorderControl::Paused => {
                        tracing::debug!("Recorder paused");
                        paused = true;
                    }
                    RecorderControl::Recording => {
                        if paused {
                            tracing::debug!("Recorder resumed");
                            paused = false;
                            timeline.resume();
                            encoder.request_keyframe();
                        }
                    }
                }
            }
            _ = ticker.tick() => {
                if let Some(chunk) = encoder.take_chunk() {
                    emit(chunk, &chunks);
                }
            }
            event = stream.next_event() => match event {
                StreamEvent::Sample(sample) => {
                    if paused {
                        continue;
                    }
                    let timestamp = timeline.map(sample.timestamp());
                    let written = match &sample {
                        MediaSample::Video(frame) => encoder.write_video(timestamp, frame),
                        MediaSample::Audio(packet) => encoder.write_audio(timestamp, packet),
                    };
                    if let Err(e) = written {
                        tracing::warn!("Dropping sample at {:?}: {}", timestamp, e);
                    }
                }
                StreamEvent::Warning(warning) => {
                    let _ = events.send(SessionEvent::Warning { warning });
                }
                StreamEvent::TrackEnded(info) => break ExitReason::TrackEnded(info),
            },
        }
    };

    if !paused {
        for packet in stream.drain_audio() {
            let timestamp = timeline.map(packet.timestamp);
            if let Err(e) = encoder.write_audio(timestamp, &packet) {
                tracing::warn!("Dropping trailing audio: {}", e);
            }
        }
    }
    if let Some(chunk) = encoder.finish() {
        emit(chunk, &chunks);
    }

    tracing::info!(
        "Recorder finished: {} video frames, {} audio packets",
        encoder.video_frames(),
        encoder.audio_packets()
    );

    if let ExitReason::TrackEnded(info) = &reason {
        let _ = lost_tx.send(info.clone());
    }

    RecorderExit { stream, reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeline_closes_pause_gap() {
        let interval = Duration::from_millis(100);
        let mut timeline = Timeline::new(interval);
        assert_eq!(timeline.map(Duration::from_millis(5000)), Duration::ZERO);
        assert_eq!(timeline.map(Duration::from_millis(5100)), Duration::from_millis(100));

        // paused from 5100 to 9000
        timeline.resume();
        assert_eq!(timeline.map(Duration::from_millis(9000)), Duration::from_millis(200));
        assert_eq!(timeline.map(Duration::from_millis(9100)), Duration::from_millis(300));
    }
}
