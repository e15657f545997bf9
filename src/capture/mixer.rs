//! Audio mixer for combining system audio and microphone
//!
//! Buffers packets per source and, once every active source has a packet
//! queued, mixes one packet from each with saturating addition. A source that
//! stalls cannot hold the others back forever: past `MAX_BUFFERED` queued
//! packets the oldest one is emitted unmixed.

use super::traits::TrackSource;
use crate::media::{AudioFormat, AudioPacket};
use std::collections::{HashMap, VecDeque};

const MAX_BUFFERED: usize = 32;

pub struct AudioMixer {
    format: Option<AudioFormat>,
    buffers: HashMap<TrackSource, VecDeque<AudioPacket>>,
}

impl AudioMixer {
    pub fn new(sources: &[TrackSource]) -> Self {
        let buffers = sources.iter().map(|s| (*s, VecDeque::new())).collect();
        Self {
            format: None,
            buffers,
        }
    }

    pub fn source_count(&self) -> usize {
        self.buffers.len()
    }

    /// Queue a packet; returns whatever became ready
    pub fn push(&mut self, source: TrackSource, packet: AudioPacket) -> Vec<AudioPacket> {
        let format = *self.format.get_or_insert(packet.format());
        if packet.format() != format {
            tracing::warn!(
                "Dropping {:?} packet: format {:?} does not match mix format {:?}",
                source,
                packet.format(),
                format
            );
            return Vec::new();
        }

        let Some(buffer) = self.buffers.get_mut(&source) else {
            tracing::debug!("Ignoring packet from unmixed source {:?}", source);
            return Vec::new();
        };
        buffer.push_back(packet);

        let mut ready = Vec::new();
        while let Some(mixed) = self.mix_next() {
            ready.push(mixed);
        }
        if let Some(buffer) = self.buffers.get_mut(&source) {
            while buffer.len() > MAX_BUFFERED {
                if let Some(stale) = buffer.pop_front() {
                    ready.push(stale);
                }
            }
        }
        ready
    }

    /// Stop mixing a source; anything it still had queued is returned
    pub fn remove_source(&mut self, source: TrackSource) -> Vec<AudioPacket> {
        let leftover: Vec<AudioPacket> = self
            .buffers
            .remove(&source)
            .map(|b| b.into_iter().collect())
            .unwrap_or_default();
        let mut ready = leftover;
        while let Some(mixed) = self.mix_next() {
            ready.push(mixed);
        }
        ready
    }

    /// Drain everything, mixing where possible
    pub fn flush(&mut self) -> Vec<AudioPacket> {
        let mut ready = Vec::new();
        loop {
            let packets: Vec<AudioPacket> = self
                .buffers
                .values_mut()
                .filter_map(|b| b.pop_front())
                .collect();
            if packets.is_empty() {
                break;
            }
            ready.push(mix_packets(packets));
        }
        ready
    }

    fn mix_next(&mut self) -> Option<AudioPacket> {
        if self.buffers.is_empty() || self.buffers.values().any(|b| b.is_empty()) {
            return None;
        }
        let packets: Vec<AudioPacket> = self
            .buffers
            .values_mut()
            .filter_map(|b| b.pop_front())
            .collect();
        Some(mix_packets(packets))
    }
}

fn mix_packets(mut packets: Vec<AudioPacket>) -> AudioPacket {
    if packets.len() == 1 {
        return packets.remove(0);
    }
    packets.sort_by_key(|p| p.timestamp);
    let len = packets.iter().map(|p| p.samples.len()).max().unwrap_or(0);
    let mut samples = vec![0i16; len];
    for packet in &packets {
        for (dst, src) in samples.iter_mut().zip(&packet.samples) {
            *dst = dst.saturating_add(*src);
        }
    }
    let first = &packets[0];
    AudioPacket::new(first.timestamp, first.sample_rate, first.channels, samples)
}
