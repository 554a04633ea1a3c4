//! Collaborators outside the control channel: the device's REST API and
//! Wake-on-LAN.

mod apps;
mod info;
mod wol;

pub use apps::{AppClient, AppStatus};
pub use info::DeviceInfoFetcher;
pub use wol::{MAGIC_PACKET_LEN, MacAddress, WakeConfig, WakeOnLan, magic_packet};

use std::net::SocketAddr;
use std::time::Duration;

use crate::config::DEFAULT_PLAIN_PORT;
use crate::device::Device;
use crate::error::RemoteError;

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// `http://<addr>:<port>/api/v2/`
pub(crate) fn api_base(device: &Device, port: u16) -> String {
    format!("http://{}/api/v2/", SocketAddr::new(device.address, port))
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, RemoteError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Port of the unencrypted REST API.
pub(crate) const REST_PORT: u16 = DEFAULT_PLAIN_PORT;
