//! Device identity as produced by discovery or the info fetcher.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Optional hardware/firmware details reported by the device's REST API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    pub model_name: Option<String>,
    pub model: Option<String>,
    pub mac_address: Option<String>,
    pub os: Option<String>,
    pub firmware_version: Option<String>,
    pub resolution: Option<String>,
    pub power_state: Option<String>,
    /// `true` when the device accepts `SendInputString`.
    pub supports_text_input: Option<bool>,
}

/// A TV reachable on the local network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Stable identifier assigned by the device (usually `uuid:...`).
    pub id: String,
    pub name: String,
    pub address: IpAddr,
    #[serde(default)]
    pub metadata: Option<DeviceMetadata>,
}

impl Device {
    pub fn new(id: impl Into<String>, name: impl Into<String>, address: IpAddr) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address,
            metadata: None,
        }
    }

    /// A device known only by address; id and name default to the address.
    pub fn from_address(address: IpAddr) -> Self {
        let text = address.to_string();
        Self::new(text.clone(), text, address)
    }

    pub fn with_metadata(mut self, metadata: DeviceMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.address, self.id)
    }
}
