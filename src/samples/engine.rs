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

//! Playback engine that coordinates sample resolution, volume composition and the backend.
//!
//! The volume sent to the backend for a play is the product of the per-play sample
//! volume, the channel's stored volume and the master volume, each clamped to [0, 1].
//! Channel volumes persist across plays; sample volumes apply to a single play only.

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::cache::SampleCache;
use crate::audio::{
    self, Backend, ChannelStatus, ChannelTarget, DecodeError, Decoder, Loops,
};

/// Volume assumed for a channel that has never been given one.
pub const DEFAULT_CHANNEL_VOLUME: f32 = 1.0;

/// Errors reported by playback operations. None of them are fatal.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("could not load sample '{identifier}': {source}")]
    NotFound {
        identifier: String,
        #[source]
        source: DecodeError,
    },

    #[error("channel {0} is out of range")]
    InvalidChannel(usize),

    #[error("backend error: {0}")]
    Backend(#[source] Box<dyn Error + Send + Sync>),
}

/// A request to play a sample.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayRequest {
    /// The resource identifier, before the URI prefix is applied.
    pub identifier: String,
    pub channel: usize,
    pub loops: Loops,
    /// Per-play volume scalar; clamped before use.
    pub volume: f32,
    /// Halt every channel before starting.
    pub exclusive: bool,
    /// Background music hint. Accepted but does not change playback.
    pub bgm: bool,
    /// Cut playback off after this long. None plays to the natural end.
    pub max_length: Option<Duration>,
    /// Evict the identifier from the cache so it is decoded again.
    pub force_reload: bool,
}

impl PlayRequest {
    /// Creates a request to play the identifier once on channel 0 at full volume.
    pub fn new(identifier: &str) -> PlayRequest {
        PlayRequest {
            identifier: identifier.to_string(),
            channel: 0,
            loops: Loops::Once,
            volume: 1.0,
            exclusive: false,
            bgm: false,
            max_length: None,
            force_reload: false,
        }
    }
}

/// The playback engine owns the sample cache and the channel and master volume state.
pub struct PlaybackEngine {
    /// The backend that renders the channel pool.
    backend: Arc<dyn Backend>,
    /// Cache of decoded samples.
    cache: SampleCache,
    /// Stored volume per channel. None until the channel is first played or given a volume.
    channel_volumes: Vec<Option<f32>>,
    master_volume: f32,
    /// Prepended to every identifier before it reaches the cache.
    uri_prefix: Option<String>,
}

impl PlaybackEngine {
    /// Creates a new playback engine over the backend's channel pool.
    pub fn new(
        backend: Arc<dyn Backend>,
        decoder: Arc<dyn Decoder>,
        uri_prefix: Option<String>,
    ) -> PlaybackEngine {
        let channel_count = backend.channel_count();
        PlaybackEngine {
            backend,
            cache: SampleCache::new(decoder),
            channel_volumes: vec![None; channel_count],
            master_volume: 1.0,
            uri_prefix: uri_prefix.filter(|prefix| !prefix.is_empty()),
        }
    }

    /// Returns the number of channels in the pool.
    pub fn channel_count(&self) -> usize {
        self.channel_volumes.len()
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    /// Returns the stored volume of a channel, or None if it has never been set.
    pub fn channel_volume(&self, channel: usize) -> Option<f32> {
        self.channel_volumes.get(channel).copied().flatten()
    }

    /// Returns the channel's stored volume composed with the master volume.
    pub fn effective_channel_volume(&self, channel: usize) -> f32 {
        let channel_volume = self
            .channel_volume(channel)
            .unwrap_or(DEFAULT_CHANNEL_VOLUME);
        audio::clamp_volume(channel_volume * self.master_volume)
    }

    pub fn channel_status(&self, channel: usize) -> ChannelStatus {
        self.backend.channel_status(channel)
    }

    pub fn cache(&self) -> &SampleCache {
        &self.cache
    }

    /// Applies the URI prefix to an identifier.
    fn prefixed(&self, identifier: &str) -> String {
        match &self.uri_prefix {
            Some(prefix) => format!("{}{}", prefix, identifier),
            None => identifier.to_string(),
        }
    }

    fn check_channel(&self, channel: usize) -> Result<usize, PlaybackError> {
        if channel < self.channel_count() {
            Ok(channel)
        } else {
            Err(PlaybackError::InvalidChannel(channel))
        }
    }

    fn check_target(&self, target: ChannelTarget) -> Result<ChannelTarget, PlaybackError> {
        match target {
            ChannelTarget::All => Ok(target),
            ChannelTarget::One(channel) => self.check_channel(channel).map(ChannelTarget::One),
        }
    }

    /// Plays a sample on a channel.
    ///
    /// If the sample can't be resolved nothing is played and no channel state changes,
    /// although an exclusive request has already halted every channel by then.
    pub fn play(&mut self, request: &PlayRequest) -> Result<(), PlaybackError> {
        let channel = self.check_channel(request.channel)?;

        let sample_volume = audio::clamp_volume(request.volume);
        let channel_volume = self.channel_volumes[channel].unwrap_or(DEFAULT_CHANNEL_VOLUME);
        let effective_volume =
            audio::clamp_volume(sample_volume * channel_volume * self.master_volume);

        let identifier = self.prefixed(&request.identifier);

        if request.force_reload && self.cache.evict(&identifier) {
            debug!(identifier, "Removed sample from cache for reload");
        }

        if request.exclusive {
            self.backend.halt_channel(ChannelTarget::All);
        }

        let unit = self
            .cache
            .resolve(&identifier)
            .map_err(|source| PlaybackError::NotFound {
                identifier: identifier.clone(),
                source,
            })?;

        self.channel_volumes[channel] = Some(channel_volume);
        self.backend.set_channel_volume(
            ChannelTarget::One(channel),
            audio::to_native_volume(effective_volume),
        );
        self.backend
            .play(channel, unit.sample(), request.loops, request.max_length)
            .map_err(PlaybackError::Backend)?;

        debug!(
            identifier,
            channel,
            looping = request.loops == Loops::Forever,
            volume_percent = (effective_volume * 100.0) as u32,
            exclusive = request.exclusive,
            bgm = request.bgm,
            "Sample playing"
        );
        Ok(())
    }

    /// Halts every channel. BGM is not tracked separately, so the flag only affects logging.
    pub fn stop_all(&mut self, include_bgm: bool) {
        debug!(include_bgm, "Stopping all sounds");
        self.backend.halt_channel(ChannelTarget::All);
    }

    /// Fades the addressed channels to silence. Stored channel volumes are kept, so the
    /// next play on a faded channel uses its pre-fade level.
    pub fn fade_out(
        &mut self,
        target: ChannelTarget,
        duration: Duration,
    ) -> Result<(), PlaybackError> {
        let target = self.check_target(target)?;
        debug!(channel = %target, duration_ms = duration.as_millis(), "Fading out");
        self.backend.fade_out_channel(target, duration);
        Ok(())
    }

    /// Decodes a sample into the cache without playing it.
    pub fn precache(&mut self, identifier: &str) -> Result<(), PlaybackError> {
        let identifier = self.prefixed(identifier);
        debug!(identifier, "Precaching sample");
        self.cache
            .resolve(&identifier)
            .map(|_| ())
            .map_err(|source| PlaybackError::NotFound { identifier, source })
    }

    /// Stores a channel volume and applies it, composed with the master volume, to
    /// whatever is sounding on the channel right away.
    pub fn set_channel_volume(
        &mut self,
        target: ChannelTarget,
        volume: f32,
    ) -> Result<(), PlaybackError> {
        let target = self.check_target(target)?;
        let volume = audio::clamp_volume(volume);
        let native = audio::to_native_volume(volume * self.master_volume);

        match target {
            ChannelTarget::All => self.channel_volumes.fill(Some(volume)),
            ChannelTarget::One(channel) => self.channel_volumes[channel] = Some(volume),
        }
        self.backend.set_channel_volume(target, native);

        debug!(channel = %target, volume_percent = (volume * 100.0) as u32, "Channel volume set");
        Ok(())
    }

    pub fn pause(&mut self, target: ChannelTarget) -> Result<(), PlaybackError> {
        let target = self.check_target(target)?;
        self.backend.pause_channel(target);
        debug!(channel = %target, "Paused");
        Ok(())
    }

    pub fn resume(&mut self, target: ChannelTarget) -> Result<(), PlaybackError> {
        let target = self.check_target(target)?;
        self.backend.resume_channel(target);
        debug!(channel = %target, "Resumed");
        Ok(())
    }

    /// Stores the master volume and re-applies every channel that has a stored volume.
    /// Channels that were never touched keep the backend's default.
    pub fn set_master_volume(&mut self, volume: f32) {
        self.master_volume = audio::clamp_volume(volume);

        for (channel, channel_volume) in self.channel_volumes.iter().enumerate() {
            if let Some(channel_volume) = channel_volume {
                self.backend.set_channel_volume(
                    ChannelTarget::One(channel),
                    audio::to_native_volume(channel_volume * self.master_volume),
                );
            }
        }

        debug!(
            volume_percent = (self.master_volume * 100.0) as u32,
            "Master volume set"
        );
    }

    /// Halts every channel and only then releases the cached samples.
    pub fn shutdown(&mut self) {
        info!(cached = self.cache.len(), "Shutting down playback");
        self.backend.halt_channel(ChannelTarget::All);
        self.cache.clear();
    }

    /// Precaches each identifier, logging failures. Returns the number that loaded.
    pub fn preload<'a, I>(&mut self, identifiers: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut loaded = 0;
        for identifier in identifiers {
            match self.precache(identifier) {
                Ok(()) => loaded += 1,
                Err(e) => warn!(err = %e, "Failed to precache sample"),
            }
        }
        loaded
    }
}

impl fmt::Debug for PlaybackEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackEngine")
            .field("backend", &self.backend.to_string())
            .field("cache", &self.cache)
            .field("master_volume", &self.master_volume)
            .field("uri_prefix", &self.uri_prefix)
            .finish()
    }
}
