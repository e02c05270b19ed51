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
use serde::Deserialize;

const DEFAULT_DEVICE: &str = "default";
const DEFAULT_SAMPLE_RATE: u32 = 44100;
const DEFAULT_OUTPUT_CHANNELS: u16 = 2;
const DEFAULT_MIXING_CHANNELS: usize = 16;
const DEFAULT_BUFFER_SIZE: usize = 512;

/// A YAML representation of the audio configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Audio {
    /// The audio device. "default" picks the host's default output.
    device: Option<String>,

    /// Output sample rate in Hz (default: 44100)
    sample_rate: Option<u32>,

    /// Number of speaker channels (default: 2)
    output_channels: Option<u16>,

    /// Number of mixing channels in the pool (default: 16)
    mixing_channels: Option<usize>,

    /// Frames per mixed block (default: 512)
    buffer_size: Option<usize>,
}

impl Audio {
    /// New will create a new Audio configuration.
    pub fn new(device: &str) -> Audio {
        Audio {
            device: Some(device.to_string()),
            ..Default::default()
        }
    }

    /// Returns the device from the configuration.
    pub fn device(&self) -> &str {
        self.device.as_deref().unwrap_or(DEFAULT_DEVICE)
    }

    /// Returns the output sample rate (default: 44100)
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    pub fn output_channels(&self) -> u16 {
        self.output_channels.unwrap_or(DEFAULT_OUTPUT_CHANNELS).max(1)
    }

    /// Returns the size of the mixing channel pool. Always at least one.
    pub fn mixing_channels(&self) -> usize {
        self.mixing_channels.unwrap_or(DEFAULT_MIXING_CHANNELS).max(1)
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE).max(1)
    }
}

#[cfg(test)]
mod tests {
    use config::{Config, File, FileFormat};

    use super::*;

    #[test]
    fn test_defaults() {
        let audio = Audio::default();
        assert_eq!("default", audio.device());
        assert_eq!(44100, audio.sample_rate());
        assert_eq!(2, audio.output_channels());
        assert_eq!(16, audio.mixing_channels());
        assert_eq!(512, audio.buffer_size());
    }

    #[test]
    fn test_deserialize() {
        let yaml = r#"
            device: mock-device
            sample_rate: 48000
            mixing_channels: 8
            output_channels: 0
        "#;
        let audio: Audio = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!("mock-device", audio.device());
        assert_eq!(48000, audio.sample_rate());
        assert_eq!(8, audio.mixing_channels());
        assert_eq!(1, audio.output_channels());
        assert_eq!(512, audio.buffer_size());
    }
}
