use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Sender name used for server-generated notices.
pub const SYSTEM_SENDER: &str = "System";

/// Application events decoded from a client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Claim a display name for this connection.
    SetName { name: String },
    /// Typing indicator toggle.
    Typing { typing: bool },
    /// Heartbeat.
    Ping,
    /// Chat line to relay to everyone else.
    Text { text: String },
}

/// Control frames are distinguished by their `type` field; chat lines carry none.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ControlFrame {
    SetName { name: String },
    Typing { typing: bool },
    Ping,
}

#[derive(Debug, Deserialize)]
struct TextFrame {
    text: String,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("payload is not a json object")]
    NotAnObject,
    #[error("unsupported control frame: {0}")]
    InvalidControl(String),
    #[error("frame has neither a type nor a text field")]
    Unrecognized,
    #[error("display name is empty")]
    EmptyName,
}

impl DecodeError {
    pub fn metric_label(&self) -> &'static str {
        match self {
            DecodeError::InvalidJson(_) => "invalid_json",
            DecodeError::NotAnObject => "not_an_object",
            DecodeError::InvalidControl(_) => "invalid_control",
            DecodeError::Unrecognized => "unrecognized",
            DecodeError::EmptyName => "empty_name",
        }
    }
}

/// Decode one text frame into an [`InboundEvent`].
pub fn decode(raw: &str) -> Result<InboundEvent, DecodeError> {
    let value: Value = serde_json::from_str(raw)?;
    decode_value(value)
}

pub fn decode_value(value: Value) -> Result<InboundEvent, DecodeError> {
    let (has_type, has_text) = match value.as_object() {
        Some(object) => (object.contains_key("type"), object.contains_key("text")),
        None => return Err(DecodeError::NotAnObject),
    };

    if has_type {
        let frame = serde_json::from_value::<ControlFrame>(value)
            .map_err(|err| DecodeError::InvalidControl(err.to_string()))?;
        return match frame {
            ControlFrame::SetName { name } => {
                let trimmed = name.trim();
                if trimmed.is_empty() {
                    return Err(DecodeError::EmptyName);
                }
                Ok(InboundEvent::SetName {
                    name: trimmed.to_string(),
                })
            }
            ControlFrame::Typing { typing } => Ok(InboundEvent::Typing { typing }),
            ControlFrame::Ping => Ok(InboundEvent::Ping),
        };
    }

    if has_text {
        let frame: TextFrame = serde_json::from_value(value)?;
        return Ok(InboundEvent::Text { text: frame.text });
    }

    Err(DecodeError::Unrecognized)
}

/// Events pushed to clients.
///
/// System notices and chat lines share the `{sender, text}` shape and carry no
/// `type` field; everything else is tagged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundEvent {
    Control(ControlEvent),
    Line(ChatLine),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControlEvent {
    Typing { sender: String, typing: bool },
    ActiveUsers { users: Vec<PresenceEntry> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLine {
    pub sender: String,
    pub text: String,
}

/// One row of the aggregated presence view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub name: String,
    pub online: bool,
}

impl OutboundEvent {
    pub fn system(text: impl Into<String>) -> Self {
        OutboundEvent::Line(ChatLine {
            sender: SYSTEM_SENDER.to_string(),
            text: text.into(),
        })
    }

    pub fn chat(sender: impl Into<String>, text: impl Into<String>) -> Self {
        OutboundEvent::Line(ChatLine {
            sender: sender.into(),
            text: text.into(),
        })
    }

    pub fn typing(sender: impl Into<String>, typing: bool) -> Self {
        OutboundEvent::Control(ControlEvent::Typing {
            sender: sender.into(),
            typing,
        })
    }

    pub fn active_users(users: Vec<PresenceEntry>) -> Self {
        OutboundEvent::Control(ControlEvent::ActiveUsers { users })
    }

    pub fn is_system(&self) -> bool {
        matches!(self, OutboundEvent::Line(line) if line.sender == SYSTEM_SENDER)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::Control(ControlEvent::Typing { .. }) => "typing",
            OutboundEvent::Control(ControlEvent::ActiveUsers { .. }) => "active_users",
            OutboundEvent::Line(_) if self.is_system() => "system",
            OutboundEvent::Line(_) => "chat",
        }
    }
}
