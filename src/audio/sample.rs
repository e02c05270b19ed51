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
use std::{fmt, sync::Arc, time::Duration};

/// A decoded sample held in memory.
/// The sample data is stored in an Arc so that channels can keep playing it after the
/// cache has let go of it.
#[derive(Clone)]
pub struct LoadedSample {
    /// The sample data as interleaved f32 samples.
    data: Arc<Vec<f32>>,
    /// Number of channels in the sample.
    channel_count: u16,
    /// Sample rate of the audio data.
    sample_rate: u32,
}

impl LoadedSample {
    /// Creates a new loaded sample from interleaved data.
    pub fn new(data: Vec<f32>, channel_count: u16, sample_rate: u32) -> LoadedSample {
        LoadedSample {
            data: Arc::new(data),
            channel_count: channel_count.max(1),
            sample_rate,
        }
    }

    /// Returns the interleaved sample data.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Returns the number of channels.
    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Returns the number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.data.len() / self.channel_count as usize
    }

    /// Returns the natural length of the sample.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    /// Returns true if both handles refer to the same decoded data.
    pub fn same_data(&self, other: &LoadedSample) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Returns the number of live handles to the decoded data.
    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.data)
    }
}

impl fmt::Debug for LoadedSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedSample")
            .field("channels", &self.channel_count)
            .field("sample_rate", &self.sample_rate)
            .field("frames", &self.frames())
            .finish()
    }
}
