//! Session configuration handed to the connection manager.

use std::fmt;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::Url;

use crate::device::Device;
use crate::error::RemoteError;
use crate::network::CertificateValidator;

/// Port of the TLS remote-control endpoint.
pub const DEFAULT_SECURE_PORT: u16 = 8002;
/// Port of the plain remote-control endpoint (no token issued).
pub const DEFAULT_PLAIN_PORT: u16 = 8001;

const CHANNEL_PATH: &str = "/api/v2/channels/samsung.remote.control";

// ── AuthToken ────────────────────────────────────────────────────

/// Opaque credential issued by the device after the user approves a client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AuthToken {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AuthToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── SessionConfig ────────────────────────────────────────────────

/// Everything needed to open and authorize one control channel.
#[derive(Clone)]
pub struct SessionConfig {
    /// Target device.
    pub device: Device,
    /// Shown on the device's pairing prompt.
    pub app_name: String,
    /// Token from an earlier pairing, if the caller kept one.
    pub token: Option<AuthToken>,
    pub port: u16,
    /// `wss://` when `true`, `ws://` otherwise.
    pub secure: bool,
    /// Decides whether the device certificate is trusted.
    pub certificate_validator: Option<Arc<dyn CertificateValidator>>,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("device", &self.device)
            .field("app_name", &self.app_name)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("certificate_validator", &self.certificate_validator.is_some())
            .finish()
    }
}

impl SessionConfig {
    pub fn new(device: Device, app_name: impl Into<String>) -> Self {
        Self {
            device,
            app_name: app_name.into(),
            token: None,
            port: DEFAULT_SECURE_PORT,
            secure: true,
            certificate_validator: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<AuthToken>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Use the plain `ws://` endpoint. Switches to the plain port if the
    /// secure default was still selected.
    pub fn insecure(mut self) -> Self {
        self.secure = false;
        if self.port == DEFAULT_SECURE_PORT {
            self.port = DEFAULT_PLAIN_PORT;
        }
        self
    }

    pub fn with_certificate_validator(mut self, validator: Arc<dyn CertificateValidator>) -> Self {
        self.certificate_validator = Some(validator);
        self
    }

    /// Reject settings that can never produce a working session.
    pub fn validate(&self) -> Result<(), RemoteError> {
        let name = self.app_name.trim();
        if name.is_empty() {
            return Err(RemoteError::InvalidConfiguration(
                "app name must not be empty".into(),
            ));
        }
        if name.chars().any(char::is_control) {
            return Err(RemoteError::InvalidConfiguration(
                "app name must not contain control characters".into(),
            ));
        }
        if self.device.address.is_unspecified() || self.device.address.is_multicast() {
            return Err(RemoteError::InvalidConfiguration(format!(
                "{} is not a device address",
                self.device.address
            )));
        }
        if self.port == 0 {
            return Err(RemoteError::InvalidConfiguration("port must not be 0".into()));
        }
        if self.token.as_ref().is_some_and(|t| t.as_str().is_empty()) {
            return Err(RemoteError::InvalidConfiguration("token must not be empty".into()));
        }
        Ok(())
    }

    /// The control endpoint URL for this session, with `token` embedded
    /// when present. The token is opaque, so it is form-encoded.
    pub fn channel_url(&self, token: Option<&AuthToken>) -> Result<String, RemoteError> {
        let scheme = if self.secure { "wss" } else { "ws" };
        let host = match self.device.address {
            std::net::IpAddr::V4(v4) => v4.to_string(),
            std::net::IpAddr::V6(v6) => format!("[{v6}]"),
        };
        let name = STANDARD.encode(self.app_name.trim().as_bytes());
        let base = format!("{scheme}://{host}:{}{CHANNEL_PATH}?name={name}", self.port);
        let mut url = Url::parse(&base)
            .map_err(|e| RemoteError::InvalidConfiguration(format!("bad endpoint {base}: {e}")))?;
        if let Some(token) = token {
            url.query_pairs_mut().append_pair("token", token.as_str());
        }
        Ok(url.into())
    }
}

// ── Tests ────────────────────────────────────────────────────────
