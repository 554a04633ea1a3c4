//! Installed-application status and launch via `/api/v2/applications/<id>`.

use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info};

use super::{DEFAULT_HTTP_TIMEOUT, REST_PORT, api_base, http_client};
use crate::device::Device;
use crate::error::RemoteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppStatus {
    NotInstalled,
    Stopped,
    /// Running in the background.
    Running,
    /// Running and on screen.
    Visible,
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInstalled => write!(f, "not installed"),
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
            Self::Visible => write!(f, "visible"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AppDocument {
    #[serde(default)]
    running: bool,
    #[serde(default)]
    visible: bool,
}

pub(crate) fn parse_status(body: &str) -> Result<AppStatus, RemoteError> {
    let doc: AppDocument = serde_json::from_str(body)
        .map_err(|e| RemoteError::FetchFailure(format!("unreadable app status: {e}")))?;
    Ok(match (doc.running, doc.visible) {
        (_, true) => AppStatus::Visible,
        (true, false) => AppStatus::Running,
        (false, false) => AppStatus::Stopped,
    })
}

/// App ids are store ids such as `111299001912` or `org.tizen.browser`.
fn check_app_id(app_id: &str) -> Result<(), RemoteError> {
    let ok = !app_id.is_empty()
        && app_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if ok {
        Ok(())
    } else {
        Err(RemoteError::InvalidConfiguration(format!(
            "invalid app id {app_id:?}"
        )))
    }
}

#[derive(Debug, Clone)]
pub struct AppClient {
    client: reqwest::Client,
    port: u16,
}

impl AppClient {
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

    fn url(&self, device: &Device, app_id: &str) -> Result<String, RemoteError> {
        check_app_id(app_id)?;
        Ok(format!("{}applications/{app_id}", api_base(device, self.port)))
    }

    pub async fn status(&self, device: &Device, app_id: &str) -> Result<AppStatus, RemoteError> {
        let url = self.url(device, app_id)?;
        debug!(%url, "querying app status");
        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(AppStatus::NotInstalled);
        }
        let body = response.error_for_status()?.text().await?;
        parse_status(&body)
    }

    pub async fn launch(&self, device: &Device, app_id: &str) -> Result<(), RemoteError> {
        let url = self.url(device, app_id)?;
        info!(app = app_id, "launching app");
        self.client.post(&url).send().await?.error_for_status()?;
        Ok(())
    }

    pub async fn close(&self, device: &Device, app_id: &str) -> Result<(), RemoteError> {
        let url = self.url(device, app_id)?;
        info!(app = app_id, "closing app");
        self.client.delete(&url).send().await?.error_for_status()?;
        Ok(())
    }
}
