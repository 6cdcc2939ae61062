//! UDP broadcast discovery.
//!
//! A single socket both listens for `discover` probes and answers with
//! `discover_response`, and is reused to broadcast this endpoint's own
//! probes. Everything is JSON, one datagram per message.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;

use crate::error::Result;

const MAX_DATAGRAM: usize = 4096;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DiscoveryMessage {
    Discover {
        target_device_id: String,
        sender_device_id: String,
    },
    DiscoverResponse {
        device_id: String,
        hostname: String,
        ip: IpAddr,
    },
}

/// A bound UDP discovery socket, used both to answer probes from other
/// peers and to broadcast this endpoint's own probes.
pub struct Discovery {
    socket: UdpSocket,
    port: u16,
    device_id: String,
    hostname: String,
}

impl Discovery {
    /// Bind a discovery socket on `port`, with `SO_BROADCAST` and
    /// `SO_REUSEADDR` set.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be created or bound.
    pub async fn bind(port: u16, device_id: String, hostname: String) -> Result<Self> {
        let socket = socket2::Socket::new(
            socket2::Domain::IPV4,
            socket2::Type::DGRAM,
            Some(socket2::Protocol::UDP),
        )?;
        socket.set_broadcast(true)?;
        socket.set_reuse_address(true)?;
        socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
        socket.set_nonblocking(true)?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)?;

        Ok(Self {
            socket,
            port,
            device_id,
            hostname,
        })
    }

    /// Serve incoming `discover` probes forever, replying whenever
    /// `target_device_id` is empty or matches this device. Intended to
    /// run as a background task for the lifetime of the process.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket fails unrecoverably.
    pub async fn serve(&self) -> Result<()> {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let (len, sender) = self.socket.recv_from(&mut buf).await?;
            let Ok(msg) = serde_json::from_slice::<DiscoveryMessage>(&buf[..len]) else {
                continue;
            };
            if let DiscoveryMessage::Discover {
                target_device_id, ..
            } = msg
            {
                if target_device_id.is_empty() || target_device_id == self.device_id {
                    self.respond(sender).await;
                }
            }
        }
    }

    async fn respond(&self, target: SocketAddr) {
        let response = DiscoveryMessage::DiscoverResponse {
            device_id: self.device_id.clone(),
            hostname: self.hostname.clone(),
            ip: local_ip(),
        };
        if let Ok(bytes) = serde_json::to_vec(&response) {
            let _ = self.socket.send_to(&bytes, target).await;
        }
    }

    /// Broadcast a `discover` probe for `target_device_id` and wait up to
    /// `timeout` for a matching `discover_response`. Returns the
    /// responder's IP, or `None` if no match arrived in time.
    ///
    /// # Errors
    ///
    /// Returns an error if the broadcast send fails.
    pub async fn find(&self, target_device_id: &str, timeout: Duration) -> Result<Option<IpAddr>> {
        let probe = DiscoveryMessage::Discover {
            target_device_id: target_device_id.to_string(),
            sender_device_id: self.device_id.clone(),
        };
        let bytes = serde_json::to_vec(&probe).map_err(crate::error::Error::Serialization)?;
        let broadcast_addr = SocketAddrV4::new(Ipv4Addr::BROADCAST, self.port);
        self.socket.send_to(&bytes, broadcast_addr).await?;

        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let Ok(result) = tokio::time::timeout(remaining, self.socket.recv_from(&mut buf)).await
            else {
                return Ok(None);
            };
            let (len, _) = result?;
            let Ok(DiscoveryMessage::DiscoverResponse { device_id, ip, .. }) =
                serde_json::from_slice::<DiscoveryMessage>(&buf[..len])
            else {
                continue;
            };
            if device_id == target_device_id {
                return Ok(Some(ip));
            }
        }
    }
}

/// Determine this host's LAN IP by connecting a UDP socket to a public
/// address and reading back the bound local address, falling back to
/// loopback if that fails.
#[must_use]
pub fn local_ip() -> IpAddr {
    std::net::UdpSocket::bind("0.0.0.0:0")
        .and_then(|sock| {
            sock.connect("8.8.8.8:80")?;
            sock.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
