use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::client::Identity;
use super::rooms;

/// Every envelope kind the hub understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeType {
    Chat,
    TaskUpdate,
    UserStatus,
    Notification,
    Typing,
    Presence,
}

impl EnvelopeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeType::Chat => "chat",
            EnvelopeType::TaskUpdate => "task_update",
            EnvelopeType::UserStatus => "user_status",
            EnvelopeType::Notification => "notification",
            EnvelopeType::Typing => "typing",
            EnvelopeType::Presence => "presence",
        }
    }
}

impl fmt::Display for EnvelopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvelopeType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(EnvelopeType::Chat),
            "task_update" => Ok(EnvelopeType::TaskUpdate),
            "user_status" => Ok(EnvelopeType::UserStatus),
            "notification" => Ok(EnvelopeType::Notification),
            "typing" => Ok(EnvelopeType::Typing),
            "presence" => Ok(EnvelopeType::Presence),
            _ => Err(()),
        }
    }
}

/// Message unit fanned out by the hub.
///
/// `user_id` and `timestamp` are always assigned by the server; nothing
/// read from a socket ever populates them directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    /// Target room; `None` reaches every connected client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn new(kind: EnvelopeType, user_id: impl Into<String>) -> Self {
        Self {
            kind,
            room: None,
            user_id: user_id.into(),
            data: Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Serializes to the JSON text written on the wire.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// What a client is allowed to send.
///
/// Has no `user_id` or `timestamp` fields; serde ignores those keys when a
/// client includes them.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    /// Known type that only the server may originate
    ServerOnly(EnvelopeType),
    UnknownType(String),
}

impl DiscardReason {
    pub fn label(&self) -> &'static str {
        match self {
            DiscardReason::ServerOnly(_) => "server_only",
            DiscardReason::UnknownType(_) => "unknown_type",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Route(EnvelopeType),
    Discard(DiscardReason),
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn dispatch(&self) -> Dispatch {
        let Ok(kind) = self.kind.parse::<EnvelopeType>() else {
            return Dispatch::Discard(DiscardReason::UnknownType(self.kind.clone()));
        };

        match kind {
            EnvelopeType::Chat | EnvelopeType::TaskUpdate | EnvelopeType::Typing => {
                Dispatch::Route(kind)
            }
            EnvelopeType::UserStatus | EnvelopeType::Notification | EnvelopeType::Presence => {
                Dispatch::Discard(DiscardReason::ServerOnly(kind))
            }
        }
    }

    /// Stamps sender and receipt time and resolves the target room.
    ///
    /// An absent or empty room falls back to the sender's team room. Returns
    /// `None` when there is neither, so a teamless client cannot reach
    /// everyone by omitting the room.
    pub fn into_envelope(self, kind: EnvelopeType, sender: &Identity) -> Option<Envelope> {
        let room = self
            .room
            .filter(|r| !r.is_empty())
            .or_else(|| sender.team_id.as_deref().map(rooms::team))?;

        Some(Envelope {
            kind,
            room: Some(room),
            user_id: sender.user_id.clone(),
            data: self.data,
            timestamp: Utc::now(),
        })
    }
}
