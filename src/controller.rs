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
use std::error::Error;
use std::io;
use std::sync::Arc;

use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, span, warn, Level};

use crate::command::{Command, CommandError};
use crate::config;
use crate::samples::{PlaybackEngine, PlaybackError};

pub mod stdin;
pub mod udp;

/// Number of undelivered events a driver may queue before it has to wait.
const EVENT_QUEUE_DEPTH: usize = 16;

/// Events delivered to the dispatch loop.
#[derive(Debug, PartialEq)]
pub enum Event {
    /// A raw command payload received from the transport.
    Message(Vec<u8>),

    /// Stops the dispatch loop. Every channel is halted and the sample cache is cleared.
    Shutdown,
}

/// A transport that receives command payloads and forwards them to the controller.
pub trait Driver: Send + Sync + 'static {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>>;
}

/// Errors from handling a single command. Neither kind stops the dispatch loop.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),
}

/// Creates a controller driver from the config.
pub fn driver(config: &config::Controller) -> Result<Arc<dyn Driver>, Box<dyn Error>> {
    match config {
        config::Controller::Stdin => Ok(Arc::new(stdin::Driver::new())),
        config::Controller::Udp(udp) => Ok(Arc::new(udp::Driver::new(udp.addr()?))),
    }
}

/// Feeds commands from a driver to the playback engine.
pub struct Controller {
    handle: JoinHandle<()>,
    events_tx: Sender<Event>,
}

impl Controller {
    /// Creates a new controller that owns the engine. Commands are processed one at a time
    /// on a single blocking thread, in the order the driver delivers them.
    pub fn new(engine: PlaybackEngine, driver: Arc<dyn Driver>) -> Controller {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let driver_handle = driver.monitor_events(events_tx.clone());
        let mut dispatch_handle =
            tokio::task::spawn_blocking(move || Controller::dispatch_events(engine, events_rx));

        let shutdown_tx = events_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                result = driver_handle => {
                    match result {
                        Ok(Ok(())) => info!("Driver finished."),
                        Ok(Err(e)) => error!(err = %e, "Driver failed"),
                        Err(e) => error!(err = %e, "Error waiting for driver to stop"),
                    }
                    // The dispatch loop may already be gone.
                    let _ = shutdown_tx.send(Event::Shutdown).await;
                    if let Err(e) = dispatch_handle.await {
                        error!(err = %e, "Error waiting for dispatch loop to stop");
                    }
                }
                result = &mut dispatch_handle => {
                    if let Err(e) = result {
                        error!(err = %e, "Error waiting for dispatch loop to stop");
                    }
                }
            }
        });

        Controller { handle, events_tx }
    }

    /// Join will block until the controller finishes.
    pub async fn join(&mut self) -> Result<(), JoinError> {
        (&mut self.handle).await
    }

    /// Asks the dispatch loop to stop after the commands already queued.
    pub async fn shutdown(&self) {
        if self.events_tx.send(Event::Shutdown).await.is_err() {
            debug!("Dispatch loop already stopped");
        }
    }

    fn dispatch_events(mut engine: PlaybackEngine, mut events_rx: Receiver<Event>) {
        let span = span!(Level::INFO, "dispatch");
        let _enter = span.enter();

        info!(channels = engine.channel_count(), "Controller started.");

        while let Some(event) = events_rx.blocking_recv() {
            match event {
                Event::Message(payload) => {
                    if let Err(e) = handle_message(&mut engine, &payload) {
                        error!(
                            err = %e,
                            payload = %String::from_utf8_lossy(&payload),
                            "Failed to process command"
                        );
                    }
                }
                Event::Shutdown => break,
            }
        }

        info!("Controller closing.");
        engine.shutdown();
    }
}

/// Parses a payload and applies the command to the engine.
pub fn handle_message(engine: &mut PlaybackEngine, payload: &[u8]) -> Result<(), DispatchError> {
    let command = Command::from_slice(payload)?;
    debug!(?command, "Received command");
    apply(engine, command)?;
    Ok(())
}

/// Applies a parsed command to the engine.
pub fn apply(engine: &mut PlaybackEngine, command: Command) -> Result<(), PlaybackError> {
    match command {
        Command::Play(request) => engine.play(&request),
        Command::StopAll { include_bgm } => {
            engine.stop_all(include_bgm);
            Ok(())
        }
        Command::FadeOut { channel, duration } => engine.fade_out(channel, duration),
        Command::Precache { identifier } => engine.precache(&identifier),
        Command::SetChannelVolume { channel, volume } => {
            engine.set_channel_volume(channel, volume)
        }
        Command::Pause { channel } => engine.pause(channel),
        Command::Resume { channel } => engine.resume(channel),
        Command::SetMasterVolume { volume } => {
            if !(0.0..=1.0).contains(&volume) {
                warn!(volume, "Master volume out of range, clamping");
            }
            engine.set_master_volume(volume);
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use std::{io, sync::Arc};

    use parking_lot::Mutex;
    use tokio::{
        sync::mpsc::{self, Receiver, Sender},
        task::JoinHandle,
    };

    use crate::{
        audio::{mock, ChannelStatus, MAX_NATIVE_VOLUME},
        samples::PlaybackEngine,
        test::eventually,
    };

    use super::{handle_message, Controller, DispatchError, Driver, Event};

    /// A driver that forwards payloads pushed by the test.
    struct TestDriver {
        payloads: Mutex<Option<Receiver<Vec<u8>>>>,
    }

    impl TestDriver {
        fn new() -> (Arc<TestDriver>, Sender<Vec<u8>>) {
            let (tx, rx) = mpsc::channel(16);
            (
                Arc::new(TestDriver {
                    payloads: Mutex::new(Some(rx)),
                }),
                tx,
            )
        }
    }

    impl Driver for TestDriver {
        fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
            let payloads = self.payloads.lock().take();
            tokio::spawn(async move {
                let Some(mut payloads) = payloads else {
                    return Ok(());
                };
                while let Some(payload) = payloads.recv().await {
                    events_tx
                        .send(Event::Message(payload))
                        .await
                        .map_err(io::Error::other)?;
                }
                Ok(())
            })
        }
    }

    fn engine_with_mock() -> (PlaybackEngine, Arc<mock::Backend>) {
        let backend = Arc::new(mock::Backend::get("mock-controller", 16));
        backend.add_sample("a.ogg");
        backend.add_sample("b.ogg");
        (
            PlaybackEngine::new(backend.clone(), backend.clone(), None),
            backend,
        )
    }

    #[test]
    fn test_handle_message() {
        let (mut engine, backend) = engine_with_mock();

        handle_message(
            &mut engine,
            br#"{"command": "soundSetVolume", "message": {"channel": 3, "volume": 0.5}}"#,
        )
        .unwrap();
        handle_message(
            &mut engine,
            br#"{"command": "play", "message": {"file": "a.ogg", "channel": 3, "volume": 0.8}}"#,
        )
        .unwrap();
        assert_eq!(51, backend.channel(3).volume);
        assert_eq!(ChannelStatus::Playing, backend.channel(3).status);

        handle_message(
            &mut engine,
            br#"{"command": "setMasterVolume", "message": {"volume": 0}}"#,
        )
        .unwrap();
        assert_eq!(0, backend.channel(3).volume);

        handle_message(&mut engine, br#"{"command": "stopall"}"#).unwrap();
        assert_eq!(ChannelStatus::Idle, backend.channel(3).status);
    }

    #[test]
    fn test_handle_message_errors() {
        let (mut engine, backend) = engine_with_mock();

        assert!(matches!(
            handle_message(&mut engine, b"{"),
            Err(DispatchError::Command(_))
        ));
        assert!(matches!(
            handle_message(&mut engine, br#"{"command": "rewind"}"#),
            Err(DispatchError::Command(_))
        ));
        assert!(matches!(
            handle_message(
                &mut engine,
                br#"{"command": "play", "message": {"file": "missing.ogg"}}"#
            ),
            Err(DispatchError::Playback(_))
        ));
        assert!(matches!(
            handle_message(
                &mut engine,
                br#"{"command": "soundPause", "message": {"channel": 40}}"#
            ),
            Err(DispatchError::Playback(_))
        ));

        assert!(engine.cache().is_empty());
        assert_eq!(1, backend.total_decodes());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_controller() {
        let (engine, backend) = engine_with_mock();
        let (driver, payloads) = TestDriver::new();
        let mut controller = Controller::new(engine, driver);

        payloads
            .send(br#"{"command": "play", "message": {"file": "a.ogg", "channel": 2}}"#.to_vec())
            .await
            .unwrap();
        {
            let backend = backend.clone();
            eventually(
                move || backend.channel(2).status == ChannelStatus::Playing,
                "Channel 2 never started playing",
            );
        }
        assert_eq!(MAX_NATIVE_VOLUME, backend.channel(2).volume);

        // A bad command doesn't stop the loop.
        payloads.send(b"garbage".to_vec()).await.unwrap();
        payloads
            .send(br#"{"command": "soundPause", "message": {"channel": 2}}"#.to_vec())
            .await
            .unwrap();
        {
            let backend = backend.clone();
            eventually(
                move || backend.channel(2).status == ChannelStatus::Paused,
                "Channel 2 never paused",
            );
        }

        // Closing the transport shuts the controller down.
        drop(payloads);
        controller.join().await.unwrap();
        assert_eq!(ChannelStatus::Idle, backend.channel(2).status);
        assert_eq!(1, backend.releases());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_controller_shutdown() {
        let (engine, backend) = engine_with_mock();
        let (driver, payloads) = TestDriver::new();
        let mut controller = Controller::new(engine, driver);

        payloads
            .send(br#"{"command": "precache", "message": {"file": "b.ogg"}}"#.to_vec())
            .await
            .unwrap();
        {
            let backend = backend.clone();
            eventually(
                move || backend.decode_count("b.ogg") == 1,
                "b.ogg was never precached",
            );
        }

        controller.shutdown().await;
        controller.join().await.unwrap();
        assert_eq!(1, backend.releases());

        // The driver is still running, but nothing is listening any more.
        assert!(payloads
            .send(br#"{"command": "stopall"}"#.to_vec())
            .await
            .is_ok());
    }
}
