// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{
    collections::{HashMap, HashSet},
    error::Error,
    fmt,
    path::Path,
    time::Duration,
};

use parking_lot::Mutex;
use tracing::{info, span, Level};

use super::{
    ChannelStatus, ChannelTarget, DecodeError, LoadedSample, Loops, MAX_NATIVE_VOLUME,
};

/// Sample rate of the silent samples the mock decoder produces.
const MOCK_SAMPLE_RATE: u32 = 44100;

/// The recorded state of a single mock channel.
#[derive(Clone, Debug)]
pub struct ChannelRecord {
    /// The native volume last applied to the channel.
    pub volume: u8,
    pub status: ChannelStatus,
    /// Loop mode of the last play on this channel.
    pub loops: Option<Loops>,
    /// Maximum play length of the last play on this channel.
    pub max_length: Option<Duration>,
    /// Duration of the last fade issued to this channel.
    pub last_fade: Option<Duration>,
    /// The sample last started on this channel.
    pub sample: Option<LoadedSample>,
}

impl ChannelRecord {
    fn new() -> ChannelRecord {
        ChannelRecord {
            volume: MAX_NATIVE_VOLUME,
            status: ChannelStatus::Idle,
            loops: None,
            max_length: None,
            last_fade: None,
            sample: None,
        }
    }
}

#[derive(Default)]
struct State {
    channels: Vec<ChannelRecord>,
    /// Identifiers that decode successfully regardless of the filesystem.
    known: HashSet<String>,
    decode_counts: HashMap<String, usize>,
    releases: usize,
    halts: usize,
}

/// A mock device. Doesn't actually play anything, but records what it was asked to do.
/// It also acts as a decoder: identifiers registered with `add_sample`, or that name an
/// existing file, decode to a short silent sample.
pub struct Backend {
    name: String,
    state: Mutex<State>,
}

impl Backend {
    /// Gets the given mock device with a pool of `channel_count` channels.
    pub fn get(name: &str, channel_count: usize) -> Backend {
        Backend {
            name: name.to_string(),
            state: Mutex::new(State {
                channels: vec![ChannelRecord::new(); channel_count],
                ..Default::default()
            }),
        }
    }

    /// Registers an identifier that will decode successfully.
    pub fn add_sample(&self, identifier: &str) {
        self.state.lock().known.insert(identifier.to_string());
    }

    /// Returns the number of times the identifier has been decoded.
    pub fn decode_count(&self, identifier: &str) -> usize {
        self.state
            .lock()
            .decode_counts
            .get(identifier)
            .copied()
            .unwrap_or(0)
    }

    /// Returns the total number of decodes across all identifiers.
    pub fn total_decodes(&self) -> usize {
        self.state.lock().decode_counts.values().sum()
    }

    /// Returns the number of samples released back to the decoder.
    pub fn releases(&self) -> usize {
        self.state.lock().releases
    }

    /// Returns the number of halt requests received.
    pub fn halts(&self) -> usize {
        self.state.lock().halts
    }

    /// Returns a snapshot of a channel's recorded state.
    pub fn channel(&self, channel: usize) -> ChannelRecord {
        self.state.lock().channels[channel].clone()
    }

    /// Simulates a sample reaching its natural end.
    pub fn finish(&self, channel: usize) {
        let mut state = self.state.lock();
        state.channels[channel].status = ChannelStatus::Idle;
        state.channels[channel].sample = None;
    }

    fn for_each<F>(&self, target: ChannelTarget, mut f: F)
    where
        F: FnMut(&mut ChannelRecord),
    {
        let mut state = self.state.lock();
        match target {
            ChannelTarget::All => state.channels.iter_mut().for_each(f),
            ChannelTarget::One(index) => {
                if let Some(channel) = state.channels.get_mut(index) {
                    f(channel)
                }
            }
        }
    }
}

impl super::Decoder for Backend {
    fn decode(&self, identifier: &str) -> Result<LoadedSample, DecodeError> {
        let mut state = self.state.lock();
        *state
            .decode_counts
            .entry(identifier.to_string())
            .or_insert(0) += 1;

        if state.known.contains(identifier) || Path::new(identifier).is_file() {
            Ok(LoadedSample::new(
                vec![0.0; MOCK_SAMPLE_RATE as usize / 10],
                1,
                MOCK_SAMPLE_RATE,
            ))
        } else {
            Err(DecodeError::NotFound(identifier.to_string()))
        }
    }

    fn release(&self, _sample: LoadedSample) {
        self.state.lock().releases += 1;
    }
}

impl super::Backend for Backend {
    fn channel_count(&self) -> usize {
        self.state.lock().channels.len()
    }

    fn set_channel_volume(&self, channel: ChannelTarget, volume: u8) {
        self.for_each(channel, |record| record.volume = volume);
    }

    fn play(
        &self,
        channel: usize,
        sample: &LoadedSample,
        loops: Loops,
        max_length: Option<Duration>,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let span = span!(Level::INFO, "play sample (mock)");
        let _enter = span.enter();

        let mut state = self.state.lock();
        let record = state
            .channels
            .get_mut(channel)
            .ok_or_else(|| format!("no channel {} on device {}", channel, self.name))?;
        record.status = ChannelStatus::Playing;
        record.loops = Some(loops);
        record.max_length = max_length;
        record.sample = Some(sample.clone());

        info!(device = self.name, channel, "Playing sample.");
        Ok(())
    }

    fn halt_channel(&self, channel: ChannelTarget) {
        self.state.lock().halts += 1;
        self.for_each(channel, |record| {
            record.status = ChannelStatus::Idle;
            record.sample = None;
        });
    }

    fn fade_out_channel(&self, channel: ChannelTarget, duration: Duration) {
        self.for_each(channel, |record| {
            if record.status != ChannelStatus::Idle {
                record.last_fade = Some(duration);
            }
        });
    }

    fn pause_channel(&self, channel: ChannelTarget) {
        self.for_each(channel, |record| {
            if record.status == ChannelStatus::Playing {
                record.status = ChannelStatus::Paused;
            }
        });
    }

    fn resume_channel(&self, channel: ChannelTarget) {
        self.for_each(channel, |record| {
            if record.status == ChannelStatus::Paused {
                record.status = ChannelStatus::Playing;
            }
        });
    }

    fn channel_status(&self, channel: usize) -> ChannelStatus {
        self.state
            .lock()
            .channels
            .get(channel)
            .map(|record| record.status)
            .unwrap_or(ChannelStatus::Idle)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}
