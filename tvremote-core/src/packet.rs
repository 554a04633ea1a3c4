//! JSON envelopes exchanged over the remote-control channel.
//!
//! ```text
//! client → device   {"method": "ms.remote.control", "params": {...}}
//! device → client   {"event":  "ms.channel.connect", "data": {...}}
//! ```
//!
//! Decoding is strict: an envelope without a `method` or `event`
//! discriminator, or a request whose `params` lack a required field, is a
//! [`RemoteError::DecodeFailure`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RemoteError;

// ── Constants ────────────────────────────────────────────────────

/// Method name for every outbound remote-control request.
pub const METHOD_REMOTE_CONTROL: &str = "ms.remote.control";

/// Device accepted the client; `data.token` carries the issued token.
pub const EVENT_CHANNEL_CONNECT: &str = "ms.channel.connect";
/// Device (or its user) refused the client.
pub const EVENT_UNAUTHORIZED: &str = "ms.channel.unauthorized";
/// The pairing prompt expired without an answer.
pub const EVENT_TIMEOUT: &str = "ms.channel.timeOut";
/// Device-side failure report.
pub const EVENT_ERROR: &str = "ms.error";

// ── Outbound ─────────────────────────────────────────────────────

/// The `params` object of a remote-control request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteParams {
    #[serde(rename = "Cmd")]
    pub cmd: String,
    #[serde(rename = "DataOfCmd")]
    pub data_of_cmd: String,
    #[serde(rename = "Option", default, skip_serializing_if = "Option::is_none")]
    pub option: Option<String>,
    #[serde(rename = "TypeOfRemote")]
    pub type_of_remote: String,
}

/// A client → device request envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub method: String,
    pub params: RemoteParams,
}

impl ControlRequest {
    pub fn remote_control(params: RemoteParams) -> Self {
        Self {
            method: METHOD_REMOTE_CONTROL.to_string(),
            params,
        }
    }
}

// ── Inbound ──────────────────────────────────────────────────────

/// A device → client event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEvent {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Typed view of the events the connection manager reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Authorization granted. The token is absent on unencrypted channels.
    Connect { token: Option<String> },
    /// Authorization refused.
    Unauthorized,
    /// Prompt expired; the user has not answered yet.
    Timeout,
    /// Echo of a remote-control request.
    RemoteControl,
    /// Device-reported failure with its message.
    Error(String),
    /// Anything else (client join/leave, IME notifications, ...).
    Other(String),
}

impl ChannelEvent {
    pub fn new(event: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Classify this event.
    pub fn kind(&self) -> DeviceEvent {
        match self.event.as_str() {
            EVENT_CHANNEL_CONNECT => DeviceEvent::Connect {
                token: self.data_str("token"),
            },
            EVENT_UNAUTHORIZED => DeviceEvent::Unauthorized,
            EVENT_TIMEOUT => DeviceEvent::Timeout,
            METHOD_REMOTE_CONTROL => DeviceEvent::RemoteControl,
            EVENT_ERROR => DeviceEvent::Error(
                self.data_str("message")
                    .unwrap_or_else(|| "unspecified device error".to_string()),
            ),
            other => DeviceEvent::Other(other.to_string()),
        }
    }

    fn data_str(&self, key: &str) -> Option<String> {
        self.data
            .as_ref()?
            .get(key)?
            .as_str()
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

// ── Packet ───────────────────────────────────────────────────────

/// Any envelope seen on the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Request(ControlRequest),
    Event(ChannelEvent),
}

impl Packet {
    /// Serialize to the text frame sent over the WebSocket.
    pub fn encode(&self) -> Result<String, RemoteError> {
        let text = match self {
            Packet::Request(req) => serde_json::to_string(req)?,
            Packet::Event(ev) => serde_json::to_string(ev)?,
        };
        Ok(text)
    }

    /// Parse a text frame, dispatching on its discriminator.
    pub fn decode(text: &str) -> Result<Self, RemoteError> {
        let value: Value = serde_json::from_str(text)?;
        let object = value
            .as_object()
            .ok_or_else(|| RemoteError::DecodeFailure("envelope is not a JSON object".into()))?;

        if let Some(method) = object.get("method") {
            if !method.is_string() {
                return Err(RemoteError::DecodeFailure("`method` is not a string".into()));
            }
            let request: ControlRequest = serde_json::from_value(value)?;
            return Ok(Packet::Request(request));
        }
        if let Some(event) = object.get("event") {
            if !event.is_string() {
                return Err(RemoteError::DecodeFailure("`event` is not a string".into()));
            }
            let event: ChannelEvent = serde_json::from_value(value)?;
            return Ok(Packet::Event(event));
        }
        Err(RemoteError::DecodeFailure(
            "envelope has neither `method` nor `event`".into(),
        ))
    }
}

// ── Tests ────────────────────────────────────────────────────────
