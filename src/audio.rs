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
use std::{error::Error, fmt, sync::Arc, time::Duration};

use crate::config;

pub mod cpal;
pub mod decode;
pub mod mixer;
pub mod mock;
pub mod sample;
pub mod thread_priority;

pub use decode::{DecodeError, SymphoniaDecoder};
pub use sample::LoadedSample;

/// The top of the backend's native volume range. Native volumes run from 0 (silent)
/// to this value (unattenuated).
pub const MAX_NATIVE_VOLUME: u8 = 128;

/// Converts a volume scalar into the backend's native range. The scalar is clamped
/// to [0.0, 1.0] first and the result is truncated.
pub fn to_native_volume(volume: f32) -> u8 {
    (clamp_volume(volume) * MAX_NATIVE_VOLUME as f32) as u8
}

/// Clamps a volume scalar to [0.0, 1.0]. NaN is treated as silence.
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        return 0.0;
    }
    volume.clamp(0.0, 1.0)
}

/// Addresses either one mixing channel or every channel at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelTarget {
    /// The broadcast sentinel (-1 on the wire).
    All,
    /// A single channel index.
    One(usize),
}

impl ChannelTarget {
    /// Converts a wire channel number into a target. -1 is the broadcast sentinel and
    /// other negative values are rejected. Range checks against the pool happen later.
    pub fn from_wire(channel: i64) -> Option<ChannelTarget> {
        if channel == -1 {
            return Some(ChannelTarget::All);
        }
        usize::try_from(channel).ok().map(ChannelTarget::One)
    }
}

impl fmt::Display for ChannelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelTarget::All => write!(f, "all"),
            ChannelTarget::One(index) => write!(f, "{}", index),
        }
    }
}

/// How many times a sample plays on its channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loops {
    /// Play once and stop at the end of the sample.
    Once,
    /// Repeat until halted.
    Forever,
}

/// The observable playback state of a single channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Idle,
    Playing,
    Paused,
}

/// Decodes resources into playable samples.
pub trait Decoder: Send + Sync {
    /// Loads and decodes the resource named by `identifier`. This may block on file or
    /// network I/O.
    fn decode(&self, identifier: &str) -> Result<LoadedSample, DecodeError>;

    /// Releases a sample previously returned by `decode`. Channels that are still
    /// playing the sample hold their own reference and are unaffected.
    fn release(&self, sample: LoadedSample);
}

/// Renders samples on a fixed pool of numbered mixing channels.
pub trait Backend: fmt::Display + Send + Sync {
    /// The number of mixing channels in the pool.
    fn channel_count(&self) -> usize;

    /// Sets a channel's volume in the native range. Applies immediately to anything
    /// sounding on the channel.
    fn set_channel_volume(&self, channel: ChannelTarget, volume: u8);

    /// Starts `sample` on `channel`, replacing whatever was playing there. The backend
    /// keeps its own reference to the sample data.
    fn play(
        &self,
        channel: usize,
        sample: &LoadedSample,
        loops: Loops,
        max_length: Option<Duration>,
    ) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Stops playback immediately.
    fn halt_channel(&self, channel: ChannelTarget);

    /// Ramps playback linearly down to silence over `duration`, then halts.
    fn fade_out_channel(&self, channel: ChannelTarget, duration: Duration);

    fn pause_channel(&self, channel: ChannelTarget);

    fn resume_channel(&self, channel: ChannelTarget);

    /// Returns the current state of a channel.
    fn channel_status(&self, channel: usize) -> ChannelStatus;
}

/// Gets the playback backend and decoder described by the audio configuration.
pub fn get_backend(
    config: &config::Audio,
) -> Result<(Arc<dyn Backend>, Arc<dyn Decoder>), Box<dyn Error>> {
    let device = config.device();
    if device.starts_with("mock") {
        let mock = Arc::new(mock::Backend::get(device, config.mixing_channels()));
        let backend: Arc<dyn Backend> = mock.clone();
        let decoder: Arc<dyn Decoder> = mock;
        return Ok((backend, decoder));
    }

    let backend: Arc<dyn Backend> = Arc::new(cpal::Device::get(config)?);
    let decoder: Arc<dyn Decoder> = Arc::new(SymphoniaDecoder::new(
        config.sample_rate(),
        config.output_channels(),
    ));
    Ok((backend, decoder))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_native_volume() {
        assert_eq!(MAX_NATIVE_VOLUME, to_native_volume(1.0));
        assert_eq!(MAX_NATIVE_VOLUME, to_native_volume(3.5));
        assert_eq!(0, to_native_volume(0.0));
        assert_eq!(0, to_native_volume(-0.25));
        assert_eq!(0, to_native_volume(f32::NAN));
        assert_eq!(64, to_native_volume(0.5));
        // 0.4 * 128 = 51.2
        assert_eq!(51, to_native_volume(0.4));
    }

    #[test]
    fn test_channel_target_from_wire() {
        assert_eq!(Some(ChannelTarget::All), ChannelTarget::from_wire(-1));
        assert_eq!(Some(ChannelTarget::One(0)), ChannelTarget::from_wire(0));
        assert_eq!(Some(ChannelTarget::One(15)), ChannelTarget::from_wire(15));
        assert_eq!(None, ChannelTarget::from_wire(-2));
    }
}
