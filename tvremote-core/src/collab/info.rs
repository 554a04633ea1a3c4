//! Device details from `GET /api/v2/`.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use super::{DEFAULT_HTTP_TIMEOUT, REST_PORT, api_base, http_client};
use crate::device::{Device, DeviceMetadata};
use crate::error::RemoteError;

#[derive(Debug, Deserialize)]
struct InfoResponse {
    id: Option<String>,
    name: Option<String>,
    device: Option<InfoDevice>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InfoDevice {
    id: Option<String>,
    name: Option<String>,
    model_name: Option<String>,
    model: Option<String>,
    wifi_mac: Option<String>,
    #[serde(rename = "OS")]
    os: Option<String>,
    firmware_version: Option<String>,
    resolution: Option<String>,
    #[serde(rename = "PowerState")]
    power_state: Option<String>,
    /// `"true"` / `"false"` as a string.
    #[serde(rename = "ImeSyncedSupport")]
    ime_synced_support: Option<String>,
}

/// Ids are reported as `uuid:<id>`; discovery uses the bare id.
fn bare_id(id: &str) -> &str {
    id.strip_prefix("uuid:").unwrap_or(id)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Merge an info document into `device`.
pub(crate) fn enrich(device: &Device, body: &str) -> Result<Device, RemoteError> {
    let info: InfoResponse = serde_json::from_str(body)
        .map_err(|e| RemoteError::FetchFailure(format!("unreadable device info: {e}")))?;
    let details = info.device.unwrap_or_default();

    let mut enriched = device.clone();
    if let Some(id) = non_empty(details.id.or(info.id)) {
        enriched.id = bare_id(&id).to_string();
    }
    if let Some(name) = non_empty(details.name.or(info.name)) {
        enriched.name = name;
    }
    enriched.metadata = Some(DeviceMetadata {
        model_name: non_empty(details.model_name),
        model: non_empty(details.model),
        mac_address: non_empty(details.wifi_mac),
        os: non_empty(details.os),
        firmware_version: non_empty(details.firmware_version),
        resolution: non_empty(details.resolution),
        power_state: non_empty(details.power_state),
        supports_text_input: details
            .ime_synced_support
            .map(|v| v.eq_ignore_ascii_case("true")),
    });
    Ok(enriched)
}

/// Fetches identity and hardware details over the plain REST port.
#[derive(Debug, Clone)]
pub struct DeviceInfoFetcher {
    client: reqwest::Client,
    port: u16,
}

impl DeviceInfoFetcher {
    pub fn new() -> Result<Self, RemoteError> {
        Self::with_timeout(DEFAULT_HTTP_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, RemoteError> {
        Ok(Self {
            client: http_client(timeout)?,
            port: REST_PORT,
        })
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Return `device` with id, name and metadata filled from the device.
    pub async fn fetch(&self, device: &Device) -> Result<Device, RemoteError> {
        let url = api_base(device, self.port);
        debug!(%url, "fetching device info");
        let body = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        enrich(device, &body)
    }
}
