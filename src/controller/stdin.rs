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
use std::{io, thread};

use tokio::{
    sync::{mpsc::Sender, oneshot},
    task::JoinHandle,
};
use tracing::{info, span, Level};

use super::Event;

/// A driver that reads one JSON command per line from standard input.
pub struct Driver {}

impl Driver {
    pub fn new() -> Driver {
        Driver {}
    }

    /// Reads a single line and forwards it. Returns false at end of input.
    fn monitor_io<R>(events_tx: &Sender<Event>, mut reader: R) -> Result<bool, io::Error>
    where
        R: io::BufRead,
    {
        let mut input: String = String::default();
        if reader.read_line(&mut input)? == 0 {
            return Ok(false);
        }

        let input = input.trim();
        if !input.is_empty() {
            events_tx
                .blocking_send(Event::Message(input.as_bytes().to_vec()))
                .map_err(io::Error::other)?;
        }
        Ok(true)
    }
}

impl Default for Driver {
    fn default() -> Self {
        Driver::new()
    }
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
        // Reads from stdin block, so they get their own thread rather than one from the
        // runtime's blocking pool, which would hold up runtime shutdown.
        let (done_tx, done_rx) = oneshot::channel();
        thread::spawn(move || {
            let span = span!(Level::INFO, "stdin driver");
            let _enter = span.enter();

            info!("Stdin driver started.");

            let result = loop {
                match Self::monitor_io(&events_tx, io::stdin().lock()) {
                    Ok(true) => continue,
                    Ok(false) => break Ok(()),
                    Err(e) => break Err(e),
                }
            };
            info!("Stdin closed.");
            let _ = done_tx.send(result);
        });

        tokio::spawn(async move {
            done_rx
                .await
                .unwrap_or_else(|_| Err(io::Error::other("stdin driver exited unexpectedly")))
        })
    }
}
