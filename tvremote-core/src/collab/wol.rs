//! Wake-on-LAN magic packets.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;

use tokio::net::UdpSocket;
use tracing::info;

use crate::error::RemoteError;

/// 6 × `0xFF` followed by the MAC repeated 16 times.
pub const MAGIC_PACKET_LEN: usize = 6 + 6 * 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for MacAddress {
    type Err = RemoteError;

    /// Accepts `AA:BB:CC:DD:EE:FF` and `AA-BB-CC-DD-EE-FF`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RemoteError::InvalidConfiguration(format!("invalid MAC address {s:?}"));
        let separator = if s.contains('-') { '-' } else { ':' };
        let mut octets = [0u8; 6];
        let mut parts = s.trim().split(separator);
        for octet in &mut octets {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

pub fn magic_packet(mac: &MacAddress) -> [u8; MAGIC_PACKET_LEN] {
    let mut packet = [0xFFu8; MAGIC_PACKET_LEN];
    for chunk in packet[6..].chunks_exact_mut(6) {
        chunk.copy_from_slice(&mac.0);
    }
    packet
}

#[derive(Debug, Clone)]
pub struct WakeConfig {
    pub target: SocketAddr,
    pub bind: SocketAddr,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            target: SocketAddr::from((Ipv4Addr::BROADCAST, 9)),
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WakeOnLan {
    config: WakeConfig,
}

impl WakeOnLan {
    pub fn new(config: WakeConfig) -> Self {
        Self { config }
    }

    /// Broadcast one magic packet. Only transmission errors are reported;
    /// whether the device wakes is not observable here.
    pub async fn send(&self, mac: &MacAddress) -> Result<(), RemoteError> {
        let socket = UdpSocket::bind(self.config.bind).await?;
        socket.set_broadcast(true)?;
        let packet = magic_packet(mac);
        let sent = socket.send_to(&packet, self.config.target).await?;
        if sent != packet.len() {
            return Err(RemoteError::TransportFailure(format!(
                "short write: {sent} of {} bytes",
                packet.len()
            )));
        }
        info!(%mac, target = %self.config.target, "sent wake-on-lan packet");
        Ok(())
    }
}
