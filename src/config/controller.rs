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
use std::net::{AddrParseError, IpAddr, Ipv4Addr, SocketAddr};

use serde::Deserialize;

const DEFAULT_UDP_PORT: u16 = 5005;

/// Allows users to specify where commands come from.
#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Controller {
    /// One JSON command per line on standard input.
    #[default]
    Stdin,
    /// One JSON command per datagram.
    Udp(UdpController),
}

/// The configuration for the UDP command listener.
#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct UdpController {
    /// The address to bind to (default: all interfaces).
    host: Option<String>,
    /// The port to listen on (default: 5005).
    port: Option<u16>,
}

impl UdpController {
    pub fn new(port: u16) -> UdpController {
        UdpController {
            host: None,
            port: Some(port),
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_UDP_PORT)
    }

    /// Returns the socket address to listen on.
    pub fn addr(&self) -> Result<SocketAddr, AddrParseError> {
        let ip = match &self.host {
            Some(host) => host.parse::<IpAddr>()?,
            None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };
        Ok(SocketAddr::new(ip, self.port()))
    }
}

#[cfg(test)]
mod tests {
    use config::{Config, File, FileFormat};

    use super::*;

    fn parse(yaml: &str) -> Controller {
        Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_stdin() {
        assert_eq!(Controller::Stdin, parse("kind: stdin"));
    }

    #[test]
    fn test_udp() {
        let Controller::Udp(udp) = parse("kind: udp\nhost: 127.0.0.1\nport: 6000") else {
            panic!("expected udp controller");
        };
        assert_eq!("127.0.0.1:6000".parse::<SocketAddr>().unwrap(), udp.addr().unwrap());

        let Controller::Udp(udp) = parse("kind: udp") else {
            panic!("expected udp controller");
        };
        assert_eq!(DEFAULT_UDP_PORT, udp.port());
        assert_eq!("0.0.0.0:5005".parse::<SocketAddr>().unwrap(), udp.addr().unwrap());
    }

    #[test]
    fn test_udp_bad_host() {
        let udp = UdpController {
            host: Some("not an address".to_string()),
            port: None,
        };
        assert!(udp.addr().is_err());
    }
}
