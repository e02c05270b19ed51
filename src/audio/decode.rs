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

//! Decoding of sound resources into memory.
//!
//! Resources are either local paths or HTTP(S) URLs. Everything symphonia can probe is
//! supported. Decoded audio is converted to the output sample rate and channel count so
//! the mixer never has to convert while rendering.

use std::fs::File;
use std::io::{self, Cursor};
use std::path::Path;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};

use super::sample::LoadedSample;

/// How long a single HTTP fetch may take before it is abandoned.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Error types for decoding a resource.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("audio file error: {0}")]
    Audio(#[from] SymphoniaError),

    #[error("no audio track found in {0}")]
    NoAudioTrack(String),

    #[error("no audio decoded from {0}")]
    Empty(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Decodes local files and HTTP(S) resources with symphonia.
pub struct SymphoniaDecoder {
    /// Sample rate every decoded sample is converted to.
    target_sample_rate: u32,
    /// Channel count every decoded sample is converted to.
    target_channels: u16,
    /// Built on first use so that purely local setups never initialise TLS.
    client: OnceLock<reqwest::blocking::Client>,
}

impl SymphoniaDecoder {
    /// Creates a new decoder that produces audio in the given output format.
    pub fn new(target_sample_rate: u32, target_channels: u16) -> SymphoniaDecoder {
        SymphoniaDecoder {
            target_sample_rate,
            target_channels: target_channels.max(1),
            client: OnceLock::new(),
        }
    }

    fn http_client(&self) -> Result<&reqwest::blocking::Client, DecodeError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()?;
        Ok(self.client.get_or_init(|| client))
    }

    /// Opens the resource as a seekable media source.
    fn open(&self, identifier: &str) -> Result<Box<dyn MediaSource>, DecodeError> {
        if is_remote(identifier) {
            debug!(identifier, "Fetching remote resource");
            let response = self.http_client()?.get(identifier).send()?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(DecodeError::NotFound(identifier.to_string()));
            }
            let bytes = response.error_for_status()?.bytes()?;
            return Ok(Box::new(Cursor::new(bytes.to_vec())));
        }

        match File::open(identifier) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(DecodeError::NotFound(identifier.to_string()))
            }
            Err(e) => Err(io::Error::new(e.kind(), format!("{}: {}", identifier, e)).into()),
        }
    }

    /// Decodes every packet of the first audio track into interleaved samples.
    /// Returns the samples along with their channel count and sample rate.
    fn decode_all(
        &self,
        identifier: &str,
        source: Box<dyn MediaSource>,
    ) -> Result<(Vec<f32>, u16, u32), DecodeError> {
        let mss = MediaSourceStream::new(source, Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = extension(identifier) {
            hint.with_extension(extension);
        }

        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let mut format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecodeError::NoAudioTrack(identifier.to_string()))?;
        let track_id = track.id;
        let mut channel_count = track
            .codec_params
            .channels
            .map(|channels| channels.count() as u16)
            .unwrap_or(1);
        let mut sample_rate = track
            .codec_params
            .sample_rate
            .unwrap_or(self.target_sample_rate);

        let mut decoder =
            symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

        let mut samples = Vec::new();
        loop {
            let packet = match format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    break
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(e.into()),
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                // Corrupt packets are skipped rather than failing the whole resource.
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!(identifier, error = e, "Skipping undecodable packet");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let spec = *decoded.spec();
            channel_count = spec.channels.count() as u16;
            sample_rate = spec.rate;

            let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            buffer.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buffer.samples());
        }

        if samples.is_empty() {
            return Err(DecodeError::Empty(identifier.to_string()));
        }
        Ok((samples, channel_count.max(1), sample_rate))
    }
}

impl super::Decoder for SymphoniaDecoder {
    fn decode(&self, identifier: &str) -> Result<LoadedSample, DecodeError> {
        let start = Instant::now();
        let source = self.open(identifier)?;
        let (samples, channel_count, sample_rate) = self.decode_all(identifier, source)?;

        let samples = remix_channels(&samples, channel_count, self.target_channels);
        let samples = if sample_rate != self.target_sample_rate {
            debug!(
                source_rate = sample_rate,
                target_rate = self.target_sample_rate,
                "Transcoding sample"
            );
            transcode_samples(
                &samples,
                self.target_channels,
                sample_rate,
                self.target_sample_rate,
            )
        } else {
            samples
        };

        let loaded = LoadedSample::new(samples, self.target_channels, self.target_sample_rate);
        info!(
            identifier,
            source_channels = channel_count,
            source_rate = sample_rate,
            duration_ms = loaded.duration().as_millis(),
            memory_kb = loaded.memory_size() / 1024,
            elapsed_ms = start.elapsed().as_millis(),
            "Sample decoded"
        );
        Ok(loaded)
    }

    fn release(&self, sample: LoadedSample) {
        debug!(
            memory_kb = sample.memory_size() / 1024,
            still_playing = sample.reference_count() > 1,
            "Releasing sample"
        );
    }
}

/// Returns true if the identifier should be fetched over HTTP.
fn is_remote(identifier: &str) -> bool {
    let lower = identifier.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Extracts a file extension to hint the format probe, ignoring any URL query or fragment.
fn extension(identifier: &str) -> Option<&str> {
    let path = identifier
        .split(['?', '#'])
        .next()
        .unwrap_or(identifier);
    Path::new(path).extension().and_then(|ext| ext.to_str())
}

/// Converts interleaved samples from one channel count to another.
/// Mono is spread to every output channel, collapsing to mono averages all channels, and
/// otherwise source channels are wrapped onto output channels by index.
fn remix_channels(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    if from == to {
        return samples.to_vec();
    }
    let from = from as usize;
    let to = to as usize;
    let frames = samples.len() / from;

    let mut output = Vec::with_capacity(frames * to);
    for frame in samples.chunks_exact(from) {
        if to == 1 {
            output.push(frame.iter().sum::<f32>() / from as f32);
            continue;
        }
        for channel in 0..to {
            output.push(frame[channel % from]);
        }
    }
    output
}

/// Transcodes samples from one sample rate to another using linear interpolation.
/// Linear interpolation is sufficient for short one-shot effects.
fn transcode_samples(
    samples: &[f32],
    channel_count: u16,
    source_rate: u32,
    target_rate: u32,
) -> Vec<f32> {
    let ratio = target_rate as f64 / source_rate as f64;
    let channels = channel_count as usize;
    let source_frames = samples.len() / channels;
    let target_frames = (source_frames as f64 * ratio).ceil() as usize;

    let mut output = Vec::with_capacity(target_frames * channels);
    for target_frame in 0..target_frames {
        let source_pos = target_frame as f64 / ratio;
        let source_frame = source_pos.floor() as usize;
        let frac = source_pos.fract() as f32;

        for channel in 0..channels {
            let s0 = samples
                .get(source_frame * channels + channel)
                .copied()
                .unwrap_or(0.0);
            let s1 = samples
                .get((source_frame + 1) * channels + channel)
                .copied()
                .unwrap_or(s0);
            output.push(s0 + (s1 - s0) * frac);
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::audio::Decoder;

    fn write_wav(dir: &Path, name: &str, channels: u16, sample_rate: u32, frames: usize) -> PathBuf {
        let path = dir.join(name);
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..frames {
            let value = ((i % 100) as i16 - 50) * 200;
            for _ in 0..channels {
                writer.write_sample(value).unwrap();
            }
        }
        writer.finalize().unwrap();
        path
    }

    #[test]
    fn test_decode_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), "beep.wav", 2, 44100, 4410);

        let decoder = SymphoniaDecoder::new(44100, 2);
        let sample = decoder.decode(path.to_str().unwrap()).unwrap();

        assert_eq!(2, sample.channel_count());
        assert_eq!(44100, sample.sample_rate());
        assert_eq!(4410, sample.frames());
    }

    #[test]
    fn test_decode_converts_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), "mono.wav", 1, 22050, 2205);

        let decoder = SymphoniaDecoder::new(44100, 2);
        let sample = decoder.decode(path.to_str().unwrap()).unwrap();

        assert_eq!(2, sample.channel_count());
        assert_eq!(44100, sample.sample_rate());
        assert_eq!(4410, sample.frames());
        // Mono is duplicated to both output channels.
        assert_eq!(sample.data()[0], sample.data()[1]);
    }

    #[test]
    fn test_decode_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.ogg");

        let decoder = SymphoniaDecoder::new(44100, 2);
        let result = decoder.decode(path.to_str().unwrap());
        assert!(matches!(result, Err(DecodeError::NotFound(_))));
    }

    #[test]
    fn test_decode_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.wav");
        std::fs::write(&path, b"this is not audio at all").unwrap();

        let decoder = SymphoniaDecoder::new(44100, 2);
        assert!(decoder.decode(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_extension() {
        assert_eq!(Some("ogg"), extension("sounds/a.ogg"));
        assert_eq!(Some("mp3"), extension("http://host/b.mp3?token=abc"));
        assert_eq!(None, extension("http://host/stream"));
    }

    #[test]
    fn test_is_remote() {
        assert!(is_remote("http://host/a.ogg"));
        assert!(is_remote("HTTPS://host/a.ogg"));
        assert!(!is_remote("/var/sounds/a.ogg"));
    }

    #[test]
    fn test_remix_channels() {
        assert_eq!(vec![0.5, 0.5, -0.5, -0.5], remix_channels(&[0.5, -0.5], 1, 2));
        assert_eq!(vec![0.0, 0.5], remix_channels(&[1.0, -1.0, 0.25, 0.75], 2, 1));
        assert_eq!(
            vec![0.1, 0.2, 0.1, 0.2],
            remix_channels(&[0.1, 0.2], 2, 4)
        );
    }

    #[test]
    fn test_transcode_samples() {
        let source_rate = 44100;
        let target_rate = 48000;
        let source_samples: Vec<f32> = (0..4410)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / source_rate as f32).sin())
            .collect();

        let result = transcode_samples(&source_samples, 1, source_rate, target_rate);

        let expected_len = (4410.0_f64 * 48000.0 / 44100.0).ceil() as usize;
        assert_eq!(result.len(), expected_len);
    }

    #[test]
    fn test_transcode_stereo() {
        let source_samples = vec![1.0f32, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0];

        let result = transcode_samples(&source_samples, 2, 44100, 48000);

        assert!(result.len() >= 8);
        assert!((result[0] - 1.0).abs() < 0.1);
        assert!((result[1] - (-1.0)).abs() < 0.1);
    }
}
