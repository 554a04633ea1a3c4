//! # tvremote-core
//!
//! Client engine for smart TVs controlled over a WebSocket remote-control
//! channel.
//!
//! This crate contains:
//! - **Packet**: `Packet`, `ControlRequest`, `ChannelEvent` JSON envelopes
//! - **Command**: `RemoteKey`, `RemoteCommand` and `CommandEncoder`
//! - **Discovery**: `DiscoveryEngine` SSDP search over `tokio_util::udp::UdpFramed`
//! - **State**: `ConnectionState` / `AuthorizationState` machines and the command ledger
//! - **Manager**: `ConnectionManager`, the pairing handshake and command dispatch
//! - **Network**: the `Connector` seam and the WebSocket/TLS transport
//! - **Collab**: device info, app status/launch, Wake-on-LAN
//! - **Error**: `RemoteError`, a `thiserror`-based taxonomy

pub mod collab;
pub mod command;
pub mod config;
pub mod device;
pub mod discovery;
pub mod error;
pub mod manager;
pub mod network;
pub mod packet;
pub mod state;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use collab::{AppClient, AppStatus, DeviceInfoFetcher, MacAddress, WakeConfig, WakeOnLan};
pub use command::{CommandEncoder, KeyAction, RemoteCommand, RemoteKey};
pub use config::{AuthToken, DEFAULT_PLAIN_PORT, DEFAULT_SECURE_PORT, SessionConfig};
pub use device::{Device, DeviceMetadata};
pub use discovery::{DiscoveryConfig, DiscoveryEngine, DiscoveryObserver, ObserverId};
pub use error::{ErrorKind, RemoteError};
pub use manager::{ConnectionManager, EventReceiver, RemoteEvent};
pub use network::{CertificateValidator, Connector, PinnedCertificate, WebSocketConnector};
pub use packet::{ChannelEvent, ControlRequest, DeviceEvent, Packet};
pub use state::{AuthorizationState, ConnectionState};
