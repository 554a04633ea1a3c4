//! Connection and authorization state machines.
//!
//! `ConnectionState` models the lifecycle of one control channel with
//! validated transitions that return `Result` instead of panicking.
//! `AuthorizationState` records what the device last said about pairing.

use std::fmt;
use std::time::Instant;

use crate::config::AuthToken;
use crate::error::RemoteError;

// ── ConnectionState ──────────────────────────────────────────────

/// The current phase of the control channel.
///
/// ```text
///  Disconnected ──► Connecting ──► Connected ──► Authorizing ──► Ready
///       ▲               │              │              │            │
///       │               ▼              ▼              ▼            ▼
///       └───────────────────────── Closing ◄──────────┴────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No channel. Initial and terminal state.
    #[default]
    Disconnected,

    /// Transport open in flight.
    Connecting,

    /// Transport is up; authorization not yet requested.
    Connected,

    /// Waiting for the device to allow or deny this client.
    Authorizing,

    /// Authorized; commands may be sent.
    Ready {
        /// When the channel became ready.
        since: Instant,
    },

    /// Teardown in progress.
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Authorizing => write!(f, "Authorizing"),
            Self::Ready { .. } => write!(f, "Ready"),
            Self::Closing => write!(f, "Closing"),
        }
    }
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// How long the channel has been ready. `None` in any other state.
    pub fn ready_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Ready { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Connecting`.
    ///
    /// Valid from: `Disconnected`. Anything else is `AlreadyConnected`.
    pub fn begin_connect(&mut self) -> Result<(), RemoteError> {
        match self {
            Self::Disconnected => {
                *self = Self::Connecting;
                Ok(())
            }
            other => Err(RemoteError::AlreadyConnected(other.to_string())),
        }
    }

    /// Transition to `Connected`.
    ///
    /// Valid from: `Connecting`.
    pub fn transport_opened(&mut self) -> Result<(), RemoteError> {
        match self {
            Self::Connecting => {
                *self = Self::Connected;
                Ok(())
            }
            other => Err(RemoteError::precondition(format!(
                "cannot open transport: state is {other}"
            ))),
        }
    }

    /// Transition to `Authorizing`.
    ///
    /// Valid from: `Connected`.
    pub fn begin_authorize(&mut self) -> Result<(), RemoteError> {
        match self {
            Self::Connected => {
                *self = Self::Authorizing;
                Ok(())
            }
            other => Err(RemoteError::precondition(format!(
                "cannot authorize: state is {other}"
            ))),
        }
    }

    /// Transition to `Ready`.
    ///
    /// Valid from: `Authorizing`.
    pub fn complete_authorize(&mut self) -> Result<(), RemoteError> {
        match self {
            Self::Authorizing => {
                *self = Self::Ready {
                    since: Instant::now(),
                };
                Ok(())
            }
            other => Err(RemoteError::precondition(format!(
                "cannot become ready: state is {other}"
            ))),
        }
    }

    /// Transition to `Closing`.
    ///
    /// Valid from: any state except `Disconnected` and `Closing`.
    pub fn begin_close(&mut self) -> Result<(), RemoteError> {
        match self {
            Self::Disconnected | Self::Closing => Err(RemoteError::precondition(format!(
                "cannot close: state is {self}"
            ))),
            _ => {
                *self = Self::Closing;
                Ok(())
            }
        }
    }

    /// Transition to `Disconnected`.
    ///
    /// Valid from: `Closing`.
    pub fn finish_close(&mut self) -> Result<(), RemoteError> {
        match self {
            Self::Closing => {
                *self = Self::Disconnected;
                Ok(())
            }
            other => Err(RemoteError::precondition(format!(
                "cannot finish close: state is {other}"
            ))),
        }
    }

    /// Force-reset to `Disconnected` regardless of current state.
    ///
    /// Use this for transport failures mid-stream.
    pub fn force_disconnect(&mut self) {
        *self = Self::Disconnected;
    }
}

// ── AuthorizationState ───────────────────────────────────────────

/// The device's latest answer about this client.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthorizationState {
    /// No answer yet (also reported when the pairing prompt times out).
    #[default]
    None,
    /// Channel is open and a decision is awaited.
    Pending,
    /// Client approved; the token lets later sessions skip the prompt.
    Allowed(AuthToken),
    /// Client refused.
    Denied,
}

impl AuthorizationState {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed(_))
    }

    pub fn token(&self) -> Option<&AuthToken> {
        match self {
            Self::Allowed(token) => Some(token),
            _ => None,
        }
    }
}

impl fmt::Display for AuthorizationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Pending => write!(f, "pending"),
            Self::Allowed(_) => write!(f, "allowed"),
            Self::Denied => write!(f, "denied"),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_lifecycle() {
        let mut state = ConnectionState::Disconnected;

        state.begin_connect().unwrap();
        assert_eq!(state, ConnectionState::Connecting);

        state.transport_opened().unwrap();
        assert_eq!(state, ConnectionState::Connected);

        state.begin_authorize().unwrap();
        assert_eq!(state, ConnectionState::Authorizing);

        state.complete_authorize().unwrap();
        assert!(state.is_ready());
        assert!(state.ready_duration().is_some());

        state.begin_close().unwrap();
        assert_eq!(state, ConnectionState::Closing);

        state.finish_close().unwrap();
        assert!(state.is_disconnected());
    }

    #[test]
    fn connect_when_not_disconnected_is_already_connected() {
        for mut state in [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Authorizing,
            ConnectionState::Ready {
                since: Instant::now(),
            },
        ] {
            let before = state.clone();
            let err = state.begin_connect().unwrap_err();
            assert!(matches!(err, RemoteError::AlreadyConnected(_)));
            assert_eq!(state, before);
        }
    }

    #[test]
    fn ready_requires_authorizing() {
        let mut state = ConnectionState::Connected;
        assert!(state.complete_authorize().is_err());
        assert_eq!(state, ConnectionState::Connected);
    }

    #[test]
    fn close_from_every_live_state() {
        for mut state in [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Authorizing,
            ConnectionState::Ready {
                since: Instant::now(),
            },
        ] {
            state.begin_close().unwrap();
            state.finish_close().unwrap();
            assert!(state.is_disconnected());
        }
    }

    #[test]
    fn close_from_disconnected_is_rejected() {
        let mut state = ConnectionState::Disconnected;
        assert!(state.begin_close().is_err());
        let mut state = ConnectionState::Closing;
        assert!(state.begin_close().is_err());
    }

    #[test]
    fn force_disconnect_from_any_state() {
        let mut state = ConnectionState::Ready {
            since: Instant::now(),
        };
        state.force_disconnect();
        assert!(state.is_disconnected());
    }

    #[test]
    fn display_format() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "Disconnected");
        assert_eq!(ConnectionState::Authorizing.to_string(), "Authorizing");
        assert_eq!(
            ConnectionState::Ready {
                since: Instant::now()
            }
            .to_string(),
            "Ready"
        );
        assert_eq!(AuthorizationState::Denied.to_string(), "denied");
    }

    #[test]
    fn authorization_token_only_when_allowed() {
        let allowed = AuthorizationState::Allowed(AuthToken::new("abc123"));
        assert_eq!(allowed.token().map(AuthToken::as_str), Some("abc123"));
        assert!(AuthorizationState::Pending.token().is_none());
        assert!(!AuthorizationState::default().is_allowed());
    }
}
