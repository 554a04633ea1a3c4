//! CLI configuration.

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tvremote_core::{AuthToken, Device, DiscoveryConfig, MacAddress, RemoteError, SessionConfig};

/// Top-level configuration for the CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// The TV to control.
    pub device: DeviceConfig,
    /// How this client identifies itself.
    pub client: ClientConfig,
    pub discovery: DiscoverySettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// IP address of the TV. Empty until set or discovered.
    pub address: String,
    /// Control channel port. 0 picks the default for `secure`.
    pub port: u16,
    /// Use the TLS endpoint.
    pub secure: bool,
    /// MAC address for Wake-on-LAN.
    pub mac: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Name shown in the TV's pairing prompt.
    pub app_name: String,
    /// Token issued by the TV. Written back after pairing.
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    pub interval_ms: u64,
    /// 0 searches until interrupted.
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: 0,
            secure: true,
            mac: String::new(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            app_name: "tvremote".into(),
            token: String::new(),
        }
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            timeout_ms: 5000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl RemoteConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Persist a newly issued token, keeping the rest of the file.
    pub fn save_token(path: &Path, token: &AuthToken) -> std::io::Result<()> {
        let mut config = if path.exists() {
            Self::load(path)
        } else {
            Self::default()
        };
        config.client.token = token.as_str().to_string();
        config.save(path)
    }

    pub fn device(&self) -> Result<Device, RemoteError> {
        let address = self.device.address.trim();
        if address.is_empty() {
            return Err(RemoteError::InvalidConfiguration(
                "no device address; set [device].address or pass --address".into(),
            ));
        }
        let ip: IpAddr = address.parse().map_err(|_| {
            RemoteError::InvalidConfiguration(format!("invalid device address {address:?}"))
        })?;
        Ok(Device::from_address(ip))
    }

    pub fn session_config(&self) -> Result<SessionConfig, RemoteError> {
        let mut session = SessionConfig::new(self.device()?, self.client.app_name.clone());
        if !self.device.secure {
            session = session.insecure();
        }
        if self.device.port != 0 {
            session = session.with_port(self.device.port);
        }
        let token = self.client.token.trim();
        if !token.is_empty() {
            session = session.with_token(token);
        }
        session.validate()?;
        Ok(session)
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        let interval = Duration::from_millis(self.discovery.interval_ms.max(1));
        let mut config = DiscoveryConfig::default().with_interval(interval);
        if self.discovery.timeout_ms > 0 {
            config = config.with_timeout(Duration::from_millis(self.discovery.timeout_ms));
        }
        config
    }

    pub fn mac(&self) -> Option<Result<MacAddress, RemoteError>> {
        let mac = self.device.mac.trim();
        (!mac.is_empty()).then(|| mac.parse())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = RemoteConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("app_name"));
        assert!(text.contains("interval_ms"));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let cfg: RemoteConfig = toml::from_str("[device]\naddress = \"192.168.1.40\"\n").unwrap();
        assert_eq!(cfg.device.address, "192.168.1.40");
        assert!(cfg.device.secure);
        assert_eq!(cfg.client.app_name, "tvremote");
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn session_config_from_file_settings() {
        let mut cfg = RemoteConfig::default();
        assert!(cfg.session_config().is_err());

        cfg.device.address = "192.168.1.40".into();
        cfg.client.token = "abc123".into();
        let session = cfg.session_config().unwrap();
        assert_eq!(session.port, 8002);
        assert_eq!(session.token, Some(AuthToken::new("abc123")));

        cfg.device.secure = false;
        cfg.device.port = 9000;
        let session = cfg.session_config().unwrap();
        assert!(!session.secure);
        assert_eq!(session.port, 9000);

        cfg.device.address = "tv.local".into();
        assert!(cfg.session_config().is_err());
    }

    #[test]
    fn discovery_timeout_zero_means_none() {
        let mut cfg = RemoteConfig::default();
        assert_eq!(cfg.discovery_config().timeout, Some(Duration::from_secs(5)));
        cfg.discovery.timeout_ms = 0;
        assert_eq!(cfg.discovery_config().timeout, None);
    }

    #[test]
    fn token_is_written_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tvremote.toml");
        let mut cfg = RemoteConfig::default();
        cfg.device.address = "10.0.0.5".into();
        cfg.save(&path).unwrap();

        RemoteConfig::save_token(&path, &AuthToken::new("abc123")).unwrap();
        let reloaded = RemoteConfig::load(&path);
        assert_eq!(reloaded.client.token, "abc123");
        assert_eq!(reloaded.device.address, "10.0.0.5");
    }

    #[test]
    fn mac_is_optional() {
        let mut cfg = RemoteConfig::default();
        assert!(cfg.mac().is_none());
        cfg.device.mac = "AA-BB-CC-DD-EE-FF".into();
        assert!(cfg.mac().unwrap().is_ok());
    }
}
