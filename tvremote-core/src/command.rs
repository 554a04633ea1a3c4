//! Remote commands and their wire encoding.
//!
//! Key names parse with `FromStr`; an unknown name is an error.

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::error::RemoteError;
use crate::packet::{ControlRequest, METHOD_REMOTE_CONTROL, Packet, RemoteParams};

const TYPE_REMOTE_KEY: &str = "SendRemoteKey";
const TYPE_INPUT_STRING: &str = "SendInputString";
const DATA_BASE64: &str = "base64";

// ── RemoteKey ────────────────────────────────────────────────────

macro_rules! remote_keys {
    ($( $(#[$doc:meta])* $variant:ident => $code:literal, $short:literal; )+) => {
        /// A key on the physical remote, by its device key code.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum RemoteKey {
            $( $(#[$doc])* $variant, )+
        }

        impl RemoteKey {
            /// Every known key, in declaration order.
            pub const ALL: &'static [RemoteKey] = &[$( RemoteKey::$variant, )+];

            /// The `KEY_*` code sent in `DataOfCmd`.
            pub fn code(&self) -> &'static str {
                match self {
                    $( RemoteKey::$variant => $code, )+
                }
            }

            /// Lower-case name accepted on the command line.
            pub fn short_name(&self) -> &'static str {
                match self {
                    $( RemoteKey::$variant => $short, )+
                }
            }
        }
    };
}

remote_keys! {
    // ── Power ────────────────────────────────────────────────────
    /// Toggle power.
    Power => "KEY_POWER", "power";
    /// Power off only.
    PowerOff => "KEY_POWEROFF", "poweroff";

    // ── Navigation ───────────────────────────────────────────────
    Up => "KEY_UP", "up";
    Down => "KEY_DOWN", "down";
    Left => "KEY_LEFT", "left";
    Right => "KEY_RIGHT", "right";
    Enter => "KEY_ENTER", "enter";
    /// Back one screen.
    Return => "KEY_RETURN", "return";
    Exit => "KEY_EXIT", "exit";
    Home => "KEY_HOME", "home";
    Menu => "KEY_MENU", "menu";
    Source => "KEY_SOURCE", "source";
    Guide => "KEY_GUIDE", "guide";
    Tools => "KEY_TOOLS", "tools";
    Info => "KEY_INFO", "info";

    // ── Volume / channel ─────────────────────────────────────────
    VolumeUp => "KEY_VOLUP", "volup";
    VolumeDown => "KEY_VOLDOWN", "voldown";
    Mute => "KEY_MUTE", "mute";
    ChannelUp => "KEY_CHUP", "chup";
    ChannelDown => "KEY_CHDOWN", "chdown";
    ChannelList => "KEY_CH_LIST", "chlist";
    PreviousChannel => "KEY_PRECH", "prech";

    // ── Digits ───────────────────────────────────────────────────
    Num0 => "KEY_0", "0";
    Num1 => "KEY_1", "1";
    Num2 => "KEY_2", "2";
    Num3 => "KEY_3", "3";
    Num4 => "KEY_4", "4";
    Num5 => "KEY_5", "5";
    Num6 => "KEY_6", "6";
    Num7 => "KEY_7", "7";
    Num8 => "KEY_8", "8";
    Num9 => "KEY_9", "9";

    // ── Media ────────────────────────────────────────────────────
    Play => "KEY_PLAY", "play";
    Pause => "KEY_PAUSE", "pause";
    Stop => "KEY_STOP", "stop";
    Rewind => "KEY_REWIND", "rewind";
    FastForward => "KEY_FF", "ff";

    // ── Colour keys ──────────────────────────────────────────────
    Red => "KEY_RED", "red";
    Green => "KEY_GREEN", "green";
    Yellow => "KEY_YELLOW", "yellow";
    Blue => "KEY_CYAN", "blue";
}

impl fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for RemoteKey {
    type Err = RemoteError;

    /// Accepts the wire code (`KEY_ENTER`) or the short name (`enter`),
    /// case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        RemoteKey::ALL
            .iter()
            .copied()
            .find(|k| {
                k.code().eq_ignore_ascii_case(wanted) || k.short_name().eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| RemoteError::InvalidConfiguration(format!("unknown remote key: {s}")))
    }
}

// ── KeyAction ────────────────────────────────────────────────────

/// How the key is actuated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KeyAction {
    /// Press and release.
    #[default]
    Click,
    /// Press and hold until a matching `Release`.
    Press,
    Release,
}

impl KeyAction {
    fn as_cmd(&self) -> &'static str {
        match self {
            KeyAction::Click => "Click",
            KeyAction::Press => "Press",
            KeyAction::Release => "Release",
        }
    }

    fn from_cmd(cmd: &str) -> Option<Self> {
        match cmd {
            "Click" => Some(KeyAction::Click),
            "Press" => Some(KeyAction::Press),
            "Release" => Some(KeyAction::Release),
            _ => None,
        }
    }
}

// ── RemoteCommand ────────────────────────────────────────────────

/// A single instruction for the device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RemoteCommand {
    /// A named key.
    Key { key: RemoteKey, action: KeyAction },
    /// Literal text injected into the focused input field.
    Text(String),
}

impl RemoteCommand {
    /// A click of `key`.
    pub fn key(key: RemoteKey) -> Self {
        RemoteCommand::Key {
            key,
            action: KeyAction::Click,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        RemoteCommand::Text(text.into())
    }

    /// Build the request envelope the device expects for this command.
    pub fn to_request(&self) -> ControlRequest {
        let params = match self {
            RemoteCommand::Key { key, action } => RemoteParams {
                cmd: action.as_cmd().to_string(),
                data_of_cmd: key.code().to_string(),
                option: Some("false".to_string()),
                type_of_remote: TYPE_REMOTE_KEY.to_string(),
            },
            RemoteCommand::Text(text) => RemoteParams {
                cmd: STANDARD.encode(text.as_bytes()),
                data_of_cmd: DATA_BASE64.to_string(),
                option: None,
                type_of_remote: TYPE_INPUT_STRING.to_string(),
            },
        };
        ControlRequest::remote_control(params)
    }

    /// Strict inverse of [`RemoteCommand::to_request`].
    pub fn from_request(request: &ControlRequest) -> Result<Self, RemoteError> {
        if request.method != METHOD_REMOTE_CONTROL {
            return Err(RemoteError::DecodeFailure(format!(
                "unexpected method {}",
                request.method
            )));
        }
        let p = &request.params;
        match p.type_of_remote.as_str() {
            TYPE_REMOTE_KEY => {
                let action = KeyAction::from_cmd(&p.cmd).ok_or_else(|| {
                    RemoteError::DecodeFailure(format!("unknown key action {}", p.cmd))
                })?;
                let key = p.data_of_cmd.parse::<RemoteKey>().map_err(|_| {
                    RemoteError::DecodeFailure(format!("unknown key {}", p.data_of_cmd))
                })?;
                Ok(RemoteCommand::Key { key, action })
            }
            TYPE_INPUT_STRING => {
                if p.data_of_cmd != DATA_BASE64 {
                    return Err(RemoteError::DecodeFailure(format!(
                        "unsupported text encoding {}",
                        p.data_of_cmd
                    )));
                }
                let bytes = STANDARD.decode(p.cmd.as_bytes())?;
                let text = String::from_utf8(bytes)
                    .map_err(|e| RemoteError::DecodeFailure(format!("text payload: {e}")))?;
                Ok(RemoteCommand::Text(text))
            }
            other => Err(RemoteError::DecodeFailure(format!(
                "unknown TypeOfRemote {other}"
            ))),
        }
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteCommand::Key {
                key,
                action: KeyAction::Click,
            } => write!(f, "{key}"),
            RemoteCommand::Key { key, action } => write!(f, "{key} ({})", action.as_cmd()),
            RemoteCommand::Text(text) => write!(f, "text({} chars)", text.chars().count()),
        }
    }
}

// ── CommandEncoder ───────────────────────────────────────────────

/// Turns commands into text frames and back.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandEncoder;

impl CommandEncoder {
    pub fn encode(&self, command: &RemoteCommand) -> Result<String, RemoteError> {
        Packet::Request(command.to_request()).encode()
    }

    pub fn decode(&self, frame: &str) -> Result<RemoteCommand, RemoteError> {
        match Packet::decode(frame)? {
            Packet::Request(req) => RemoteCommand::from_request(&req),
            Packet::Event(ev) => Err(RemoteError::DecodeFailure(format!(
                "expected a request, got event {}",
                ev.event
            ))),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
