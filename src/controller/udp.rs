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
use std::{io, net::SocketAddr};

use tokio::{net::UdpSocket, sync::mpsc::Sender, task::JoinHandle};
use tracing::{debug, error, info, span, Instrument, Level};

use super::Event;

/// Largest payload a single UDP datagram can carry.
const MAX_DATAGRAM_SIZE: usize = 65_507;

/// A driver that takes one JSON command per UDP datagram.
pub struct Driver {
    /// The socket address to listen on.
    addr: SocketAddr,
}

impl Driver {
    pub fn new(addr: SocketAddr) -> Driver {
        Driver { addr }
    }

    /// Forwards every datagram received on the socket until the controller stops listening.
    pub(super) async fn receive(socket: UdpSocket, events_tx: Sender<Event>) -> io::Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        // Receive errors are logged and skipped so a bad datagram can't stop the driver.
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((size, sender_addr)) => {
                    debug!(sender = %sender_addr, size, "Received datagram");
                    if events_tx
                        .send(Event::Message(buf[..size].to_vec()))
                        .await
                        .is_err()
                    {
                        info!("Controller stopped listening.");
                        return Ok(());
                    }
                }
                Err(e) => error!(err = e.to_string(), "Error receiving UDP."),
            }
        }
    }
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
        let addr = self.addr;

        tokio::spawn(
            async move {
                let socket = UdpSocket::bind(addr).await?;
                info!(addr = %socket.local_addr()?, "UDP driver started.");
                Self::receive(socket, events_tx).await
            }
            .instrument(span!(Level::INFO, "UDP driver")),
        )
    }
}

#[cfg(test)]
mod test {
    use std::{error::Error, time::Duration};

    use tokio::{net::UdpSocket, sync::mpsc, time::timeout};

    use crate::controller::Event;

    use super::Driver;

    #[tokio::test]
    async fn test_udp_datagrams() -> Result<(), Box<dyn Error>> {
        let server = UdpSocket::bind("127.0.0.1:0").await?;
        let server_addr = server.local_addr()?;
        let (events_tx, mut events_rx) = mpsc::channel(4);
        let handle = tokio::spawn(Driver::receive(server, events_tx));

        let client = UdpSocket::bind("127.0.0.1:0").await?;
        client
            .send_to(br#"{"command": "stopall"}"#, server_addr)
            .await?;
        client
            .send_to(br#"{"command": "soundResume", "message": {"channel": -1}}"#, server_addr)
            .await?;

        assert_eq!(
            Some(Event::Message(br#"{"command": "stopall"}"#.to_vec())),
            timeout(Duration::from_secs(3), events_rx.recv()).await?
        );
        assert_eq!(
            Some(Event::Message(
                br#"{"command": "soundResume", "message": {"channel": -1}}"#.to_vec()
            )),
            timeout(Duration::from_secs(3), events_rx.recv()).await?
        );

        // Once the receiver is gone the next datagram ends the driver.
        drop(events_rx);
        client
            .send_to(br#"{"command": "stopall"}"#, server_addr)
            .await?;
        assert!(timeout(Duration::from_secs(3), handle).await??.is_ok());
        Ok(())
    }
}
