//! JSON frames exchanged over the chat socket.
//!
//! Every frame is `{"event": <name>, "data": <payload>}`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Carries the display name the client believes it has; the server
    /// announces the account's username instead.
    #[serde(rename = "join chat")]
    JoinChat(String),
    #[serde(rename = "chat message")]
    ChatMessage(OutgoingMessage),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "users list")]
    UsersList(Vec<String>),
    #[serde(rename = "user joined")]
    UserJoined(String),
    #[serde(rename = "user left")]
    UserLeft(String),
    #[serde(rename = "chat message")]
    ChatMessage(ChatMessage),
    #[serde(rename = "error")]
    Error(ErrorNotice),
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorNotice {
            message: message.into(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::UsersList(_) => "users list",
            ServerEvent::UserJoined(_) => "user joined",
            ServerEvent::UserLeft(_) => "user left",
            ServerEvent::ChatMessage(_) => "chat message",
            ServerEvent::Error(_) => "error",
        }
    }

    /// Serialized once and shared between every recipient's outbox.
    pub fn to_frame(&self) -> Option<Arc<str>> {
        match serde_json::to_string(self) {
            Ok(json) => Some(json.into()),
            Err(err) => {
                tracing::warn!(event = self.name(), error = %err, "failed to serialize event");
                None
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub username: String,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub message: String,
}
