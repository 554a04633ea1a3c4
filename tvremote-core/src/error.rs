//! Domain-specific error types for the remote-control engine.
//!
//! All fallible operations return `Result<T, RemoteError>`. The same values
//! are pushed onto the manager's event channel, so every variant is `Clone`
//! and carries its context as text rather than as a boxed source.

use std::fmt;

use thiserror::Error;

/// Coarse classification of a [`RemoteError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidConfiguration,
    AlreadyConnected,
    AlreadySearching,
    TransportFailure,
    DecodeFailure,
    PreconditionViolation,
    Denied,
    DiscoveryTimeout,
    FetchFailure,
    DeviceError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidConfiguration => "invalid-configuration",
            Self::AlreadyConnected => "already-connected",
            Self::AlreadySearching => "already-searching",
            Self::TransportFailure => "transport-failure",
            Self::DecodeFailure => "decode-failure",
            Self::PreconditionViolation => "precondition-violation",
            Self::Denied => "denied",
            Self::DiscoveryTimeout => "discovery-timeout",
            Self::FetchFailure => "fetch-failure",
            Self::DeviceError => "device-error",
        };
        f.write_str(name)
    }
}

/// The canonical error type for the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    // ── Construction ─────────────────────────────────────────────
    /// Bad address, app name, MAC or other caller-supplied setting.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ── State preconditions ──────────────────────────────────────
    /// `connect()` called while a lifecycle is already running.
    #[error("already connected (state: {0})")]
    AlreadyConnected(String),

    /// `start_search()` called while a search session is active.
    #[error("already searching")]
    AlreadySearching,

    /// An operation was attempted in a state that does not allow it.
    #[error("precondition violation: {0}")]
    PreconditionViolation(String),

    // ── Network ──────────────────────────────────────────────────
    /// Open, send or read failed at the network layer (TLS included).
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// An inbound frame or datagram could not be decoded.
    #[error("decode failure: {0}")]
    DecodeFailure(String),

    // ── Device answers ───────────────────────────────────────────
    /// The device refused the pairing request.
    #[error("authorization denied by device")]
    Denied,

    /// The device reported an error event on the channel.
    #[error("device error: {0}")]
    DeviceError(String),

    // ── Collaborators ────────────────────────────────────────────
    /// A targeted discovery session ended without finding its device.
    #[error("discovery timed out looking for {0}")]
    DiscoveryTimeout(String),

    /// An HTTP metadata or app request failed.
    #[error("fetch failure: {0}")]
    FetchFailure(String),
}

impl RemoteError {
    /// The taxonomy bucket for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            Self::AlreadyConnected(_) => ErrorKind::AlreadyConnected,
            Self::AlreadySearching => ErrorKind::AlreadySearching,
            Self::PreconditionViolation(_) => ErrorKind::PreconditionViolation,
            Self::TransportFailure(_) => ErrorKind::TransportFailure,
            Self::DecodeFailure(_) => ErrorKind::DecodeFailure,
            Self::Denied => ErrorKind::Denied,
            Self::DeviceError(_) => ErrorKind::DeviceError,
            Self::DiscoveryTimeout(_) => ErrorKind::DiscoveryTimeout,
            Self::FetchFailure(_) => ErrorKind::FetchFailure,
        }
    }

    pub(crate) fn precondition(what: impl Into<String>) -> Self {
        Self::PreconditionViolation(what.into())
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<std::io::Error> for RemoteError {
    fn from(e: std::io::Error) -> Self {
        RemoteError::TransportFailure(e.to_string())
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(e: serde_json::Error) -> Self {
        RemoteError::DecodeFailure(e.to_string())
    }
}

impl From<base64::DecodeError> for RemoteError {
    fn from(e: base64::DecodeError) -> Self {
        RemoteError::DecodeFailure(format!("base64: {e}"))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RemoteError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        RemoteError::TransportFailure(e.to_string())
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        RemoteError::FetchFailure(e.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for RemoteError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        RemoteError::TransportFailure("transport channel closed".into())
    }
}
