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
// Core channel mixing logic that can be used by both CPAL and test implementations
use std::time::Duration;

use super::{ChannelStatus, ChannelTarget, LoadedSample, Loops, MAX_NATIVE_VOLUME};

/// A sample currently assigned to a channel.
struct Playing {
    /// The sample being played. Holding the handle keeps the data alive even if the
    /// cache evicts it.
    sample: LoadedSample,
    /// Current position in frames.
    position: usize,
    loops: Loops,
    /// Frames left before a maximum play length cuts the sample off.
    frames_remaining: Option<u64>,
    /// Active fade-out, if any.
    fade: Option<Fade>,
    paused: bool,
}

/// A linear ramp to silence.
struct Fade {
    total_frames: u64,
    remaining_frames: u64,
}

impl Fade {
    fn gain(&self) -> f32 {
        self.remaining_frames as f32 / self.total_frames as f32
    }
}

/// A single mixing channel.
struct Channel {
    /// Linear gain derived from the native volume.
    gain: f32,
    playing: Option<Playing>,
}

impl Channel {
    fn status(&self) -> ChannelStatus {
        match &self.playing {
            None => ChannelStatus::Idle,
            Some(playing) if playing.paused => ChannelStatus::Paused,
            Some(_) => ChannelStatus::Playing,
        }
    }
}

/// Mixes a fixed pool of channels into interleaved output frames.
pub struct ChannelMixer {
    channels: Vec<Channel>,
    /// Number of output channels
    num_channels: u16,
    /// Sample rate
    sample_rate: u32,
}

impl ChannelMixer {
    /// Creates a new mixer with `pool_size` mixing channels, all idle at full volume.
    pub fn new(pool_size: usize, num_channels: u16, sample_rate: u32) -> ChannelMixer {
        ChannelMixer {
            channels: (0..pool_size)
                .map(|_| Channel {
                    gain: 1.0,
                    playing: None,
                })
                .collect(),
            num_channels: num_channels.max(1),
            sample_rate,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.channels.len()
    }

    /// Gets the number of output channels
    pub fn num_channels(&self) -> u16 {
        self.num_channels
    }

    /// Gets the sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Runs `f` against every channel addressed by `target`. Out of range indices are ignored.
    fn for_each<F>(&mut self, target: ChannelTarget, mut f: F)
    where
        F: FnMut(&mut Channel),
    {
        match target {
            ChannelTarget::All => self.channels.iter_mut().for_each(f),
            ChannelTarget::One(index) => {
                if let Some(channel) = self.channels.get_mut(index) {
                    f(channel)
                }
            }
        }
    }

    fn duration_to_frames(&self, duration: Duration) -> u64 {
        (duration.as_secs_f64() * self.sample_rate as f64).round() as u64
    }

    pub fn set_volume(&mut self, target: ChannelTarget, volume: u8) {
        let gain = volume.min(MAX_NATIVE_VOLUME) as f32 / MAX_NATIVE_VOLUME as f32;
        self.for_each(target, |channel| channel.gain = gain);
    }

    /// Starts a sample on a channel, replacing anything already assigned to it. Returns
    /// false if the channel does not exist.
    pub fn play(
        &mut self,
        index: usize,
        sample: LoadedSample,
        loops: Loops,
        max_length: Option<Duration>,
    ) -> bool {
        // A zero length plays to the natural end.
        let frames_remaining = max_length
            .filter(|length| !length.is_zero())
            .map(|length| self.duration_to_frames(length));
        match self.channels.get_mut(index) {
            Some(channel) => {
                channel.playing = Some(Playing {
                    sample,
                    position: 0,
                    loops,
                    frames_remaining,
                    fade: None,
                    paused: false,
                });
                true
            }
            None => false,
        }
    }

    pub fn halt(&mut self, target: ChannelTarget) {
        self.for_each(target, |channel| channel.playing = None);
    }

    /// Fades out every addressed channel that has something assigned and is not already
    /// fading. A zero duration halts.
    pub fn fade_out(&mut self, target: ChannelTarget, duration: Duration) {
        let total_frames = self.duration_to_frames(duration);
        self.for_each(target, |channel| {
            if total_frames == 0 {
                channel.playing = None;
                return;
            }
            // Channels that are already fading keep their fade.
            if let Some(playing) = channel.playing.as_mut() {
                if playing.fade.is_none() {
                    playing.fade = Some(Fade {
                        total_frames,
                        remaining_frames: total_frames,
                    });
                }
            }
        });
    }

    pub fn pause(&mut self, target: ChannelTarget) {
        self.set_paused(target, true);
    }

    pub fn resume(&mut self, target: ChannelTarget) {
        self.set_paused(target, false);
    }

    fn set_paused(&mut self, target: ChannelTarget, paused: bool) {
        self.for_each(target, |channel| {
            if let Some(playing) = channel.playing.as_mut() {
                playing.paused = paused;
            }
        });
    }

    pub fn status(&self, index: usize) -> ChannelStatus {
        self.channels
            .get(index)
            .map(Channel::status)
            .unwrap_or(ChannelStatus::Idle)
    }

    /// Mixes `frames` frames of every active channel into `output`, which is overwritten.
    /// `output` must hold at least `frames * num_channels` samples.
    pub fn process_into_output(&mut self, output: &mut [f32], frames: usize) {
        let num_channels = self.num_channels as usize;
        let output = &mut output[..frames * num_channels];
        output.fill(0.0);

        for channel in self.channels.iter_mut() {
            let gain = channel.gain;
            let Some(playing) = channel.playing.as_mut() else {
                continue;
            };
            if playing.paused {
                continue;
            }

            let finished = Self::mix_channel(playing, gain, output, num_channels);
            if finished {
                channel.playing = None;
            }
        }

        for sample in output.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }

    /// Mixes one channel into the output. Returns true once the channel has finished.
    fn mix_channel(
        playing: &mut Playing,
        gain: f32,
        output: &mut [f32],
        num_channels: usize,
    ) -> bool {
        let source_channels = playing.sample.channel_count() as usize;
        let total_frames = playing.sample.frames();
        if total_frames == 0 {
            return true;
        }

        for frame in output.chunks_exact_mut(num_channels) {
            if playing.frames_remaining == Some(0) {
                return true;
            }
            if playing.position >= total_frames {
                match playing.loops {
                    Loops::Forever => playing.position = 0,
                    Loops::Once => return true,
                }
            }

            let fade_gain = match playing.fade.as_mut() {
                Some(fade) => {
                    if fade.remaining_frames == 0 {
                        return true;
                    }
                    let fade_gain = fade.gain();
                    fade.remaining_frames -= 1;
                    fade_gain
                }
                None => 1.0,
            };

            let data = playing.sample.data();
            let base = playing.position * source_channels;
            for (channel, out) in frame.iter_mut().enumerate() {
                *out += data[base + channel % source_channels] * gain * fade_gain;
            }

            playing.position += 1;
            if let Some(remaining) = playing.frames_remaining.as_mut() {
                *remaining -= 1;
            }
        }

        // Catch samples that ended exactly on the block boundary.
        playing.frames_remaining == Some(0)
            || (playing.loops == Loops::Once && playing.position >= total_frames)
            || playing
                .fade
                .as_ref()
                .is_some_and(|fade| fade.remaining_frames == 0)
    }
}
