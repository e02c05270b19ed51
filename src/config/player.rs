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
use std::path::Path;

use config::{Config, File};
use serde::Deserialize;

use super::audio::Audio;
use super::controller::Controller;
use super::error::ConfigError;

/// The configuration for the sound effect player.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Player {
    /// The audio output configuration.
    #[serde(default)]
    audio: Audio,
    /// Prepended to every sample identifier before lookup.
    uri_prefix: Option<String>,
    /// Samples to load into the cache at startup.
    #[serde(default)]
    preload: Vec<String>,
    /// Where commands come from.
    #[serde(default)]
    controller: Controller,
}

impl Player {
    pub fn new(audio: Audio, controller: Controller) -> Player {
        Player {
            audio,
            uri_prefix: None,
            preload: Vec::new(),
            controller,
        }
    }

    /// Parse a player configuration from a YAML file.
    pub fn deserialize(path: &Path) -> Result<Player, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        Ok(Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Player>()?)
    }

    pub fn audio(&self) -> &Audio {
        &self.audio
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Returns the URI prefix. An empty prefix counts as none.
    pub fn uri_prefix(&self) -> Option<&str> {
        self.uri_prefix.as_deref().filter(|prefix| !prefix.is_empty())
    }

    pub fn set_uri_prefix(&mut self, uri_prefix: &str) {
        self.uri_prefix = Some(uri_prefix.to_string());
    }

    /// Returns the samples to precache at startup.
    pub fn preload(&self) -> &[String] {
        &self.preload
    }

    /// Adds samples to precache at startup, after the ones from the file.
    pub fn extend_preload<I>(&mut self, identifiers: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.preload.extend(identifiers);
    }
}
