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
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{error, info, span, Level};

use super::mixer::ChannelMixer;
use super::{thread_priority, ChannelStatus, ChannelTarget, LoadedSample, Loops};
use crate::config;

/// Number of mixed blocks queued between the producer thread and the output callback.
const BLOCK_QUEUE_DEPTH: usize = 4;

/// A small wrapper around a cpal::Device that owns the channel mixer feeding it.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// Number of output channels the stream was opened with.
    output_channels: u16,
    /// The channel mixer shared with the producer thread.
    mixer: Arc<Mutex<ChannelMixer>>,
    /// Cleared to stop the output and producer threads.
    running: Arc<AtomicBool>,
    /// Handle to the output thread (keeps the stream alive).
    output_thread: Option<thread::JoinHandle<()>>,
    /// Handle to the producer thread (mixes blocks).
    producer_thread: Option<thread::JoinHandle<()>>,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.output_channels,
            self.host_id.name()
        )
    }
}

/// Output callback: drains mixed blocks into the CPAL buffer, converting to the stream's
/// sample type. Consumed blocks are handed back to the producer for reuse and any
/// shortfall is filled with silence.
fn create_callback<T>(
    blocks_rx: Receiver<Vec<f32>>,
    recycle_tx: Sender<Vec<f32>>,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut current: Vec<f32> = Vec::new();
    let mut position = 0;

    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        let mut written = 0;
        while written < data.len() {
            if position >= current.len() {
                match blocks_rx.try_recv() {
                    Ok(block) => {
                        let used = std::mem::replace(&mut current, block);
                        if !used.is_empty() {
                            let _ = recycle_tx.try_send(used);
                        }
                        position = 0;
                    }
                    Err(_) => break,
                }
            }

            let count = (current.len() - position).min(data.len() - written);
            for (dst, &src) in data[written..written + count]
                .iter_mut()
                .zip(current[position..position + count].iter())
            {
                *dst = T::from_sample(src);
            }
            written += count;
            position += count;
        }

        for dst in data[written..].iter_mut() {
            *dst = T::from_sample(0.0f32);
        }
    }
}

impl Device {
    /// Finds the named device. "default" selects the default host's default output.
    fn find(name: &str) -> Result<(cpal::HostId, cpal::Device), Box<dyn Error>> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout()?;
        let _shh_stderr = shh::stderr()?;

        if name == "default" {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or("no default output device found")?;
            return Ok((host.id(), device));
        }

        for host_id in cpal::available_hosts() {
            let host_devices = match cpal::host_from_id(host_id)?.output_devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                if device.name().is_ok_and(|n| n.trim() == name) {
                    return Ok((host_id, device));
                }
            }
        }

        Err(format!("no device found with name {}", name).into())
    }

    /// Gets the given cpal device and starts its output stream.
    pub fn get(config: &config::Audio) -> Result<Device, Box<dyn Error>> {
        let (host_id, device) = Device::find(config.device())?;
        let name = device.name()?;

        let max_channels = device
            .supported_output_configs()?
            .map(|c| c.channels())
            .max()
            .unwrap_or(0);
        let output_channels = config.output_channels();
        if max_channels < output_channels {
            return Err(format!(
                "{} output channels requested, audio device {} only has {}",
                output_channels, name, max_channels
            )
            .into());
        }

        let sample_format = device.default_output_config()?.sample_format();
        let mixer = Arc::new(Mutex::new(ChannelMixer::new(
            config.mixing_channels(),
            output_channels,
            config.sample_rate(),
        )));

        let mut device_wrapper = Device {
            name,
            host_id,
            output_channels,
            mixer,
            running: Arc::new(AtomicBool::new(true)),
            output_thread: None,
            producer_thread: None,
        };
        device_wrapper.start(device, sample_format, config.buffer_size())?;

        info!(device = %device_wrapper, "Audio output started");
        Ok(device_wrapper)
    }

    /// Starts the producer thread that mixes blocks and the output thread that owns the
    /// CPAL stream. Fails if the stream cannot be opened.
    fn start(
        &mut self,
        device: cpal::Device,
        sample_format: cpal::SampleFormat,
        block_frames: usize,
    ) -> Result<(), Box<dyn Error>> {
        let (blocks_tx, blocks_rx) = crossbeam_channel::bounded::<Vec<f32>>(BLOCK_QUEUE_DEPTH);
        let (recycle_tx, recycle_rx) =
            crossbeam_channel::bounded::<Vec<f32>>(BLOCK_QUEUE_DEPTH + 1);
        let (started_tx, started_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);

        let (num_channels, sample_rate) = {
            let mixer = self.mixer.lock();
            (mixer.num_channels(), mixer.sample_rate())
        };
        let block_samples = block_frames.max(1) * num_channels as usize;

        let mixer = self.mixer.clone();
        let producer_thread = thread::spawn(move || {
            let span = span!(Level::INFO, "mixing thread");
            let _enter = span.enter();
            thread_priority::configure_mixing_thread_priority();

            loop {
                let mut block = recycle_rx
                    .try_recv()
                    .unwrap_or_else(|_| vec![0.0f32; block_samples]);
                block.resize(block_samples, 0.0);
                mixer
                    .lock()
                    .process_into_output(&mut block, block_frames.max(1));

                // The receiver hangs up when the stream is torn down.
                if blocks_tx.send(block).is_err() {
                    return;
                }
            }
        });

        let running = self.running.clone();
        let output_thread = thread::spawn(move || {
            let config = cpal::StreamConfig {
                channels: num_channels,
                sample_rate: cpal::SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };
            let error_callback = |err: cpal::StreamError| error!("CPAL output stream error: {}", err);

            let stream_result = match sample_format {
                cpal::SampleFormat::F32 => device.build_output_stream(
                    &config,
                    create_callback::<f32>(blocks_rx, recycle_tx),
                    error_callback,
                    None,
                ),
                cpal::SampleFormat::I16 => device.build_output_stream(
                    &config,
                    create_callback::<i16>(blocks_rx, recycle_tx),
                    error_callback,
                    None,
                ),
                cpal::SampleFormat::I32 => device.build_output_stream(
                    &config,
                    create_callback::<i32>(blocks_rx, recycle_tx),
                    error_callback,
                    None,
                ),
                cpal::SampleFormat::U16 => device.build_output_stream(
                    &config,
                    create_callback::<u16>(blocks_rx, recycle_tx),
                    error_callback,
                    None,
                ),
                other => {
                    let _ = started_tx.send(Err(format!("unsupported sample format {}", other)));
                    return;
                }
            };

            let stream = match stream_result {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = started_tx.send(Err(format!("failed to create CPAL stream: {}", e)));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = started_tx.send(Err(format!("failed to start CPAL stream: {}", e)));
                return;
            }
            let _ = started_tx.send(Ok(()));

            // Keep the stream alive until the device is dropped.
            while running.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(100));
            }
        });

        self.output_thread = Some(output_thread);
        self.producer_thread = Some(producer_thread);

        match started_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err("output thread exited before starting the stream".into()),
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        // Dropping the stream hangs up the block queue, which stops the producer.
        if let Some(thread) = self.output_thread.take() {
            let _ = thread.join();
        }
        if let Some(thread) = self.producer_thread.take() {
            let _ = thread.join();
        }
    }
}

impl super::Backend for Device {
    fn channel_count(&self) -> usize {
        self.mixer.lock().pool_size()
    }

    fn set_channel_volume(&self, channel: ChannelTarget, volume: u8) {
        self.mixer.lock().set_volume(channel, volume);
    }

    fn play(
        &self,
        channel: usize,
        sample: &LoadedSample,
        loops: Loops,
        max_length: Option<Duration>,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        if self
            .mixer
            .lock()
            .play(channel, sample.clone(), loops, max_length)
        {
            Ok(())
        } else {
            Err(format!("no channel {} on device {}", channel, self.name).into())
        }
    }

    fn halt_channel(&self, channel: ChannelTarget) {
        self.mixer.lock().halt(channel);
    }

    fn fade_out_channel(&self, channel: ChannelTarget, duration: Duration) {
        self.mixer.lock().fade_out(channel, duration);
    }

    fn pause_channel(&self, channel: ChannelTarget) {
        self.mixer.lock().pause(channel);
    }

    fn resume_channel(&self, channel: ChannelTarget) {
        self.mixer.lock().resume(channel);
    }

    fn channel_status(&self, channel: usize) -> ChannelStatus {
        self.mixer.lock().status(channel)
    }
}
