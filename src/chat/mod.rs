//! Real-time chat: presence tracking, join/leave broadcast and message
//! fan-out over an authenticated WebSocket.

mod connection;
mod events;
mod history;
mod hub;
mod outbox;
mod presence;
mod registry;
mod ws;

use std::fmt;

use axum::{http::StatusCode, routing::get, Router};
use thiserror::Error;
use uuid::Uuid;

use crate::AppState;

pub use connection::Phase;
pub use events::{ChatMessage, ClientEvent, ErrorNotice, OutgoingMessage, ServerEvent};
pub use history::{spawn_recorder, StoredChatMessage};
pub use hub::{Hub, HubHandle, HubSettings};
pub use outbox::{Delivery, Dequeued, Frame, Outbox, OutboxReceiver};
pub use registry::ConnectionRegistry;

pub const DEFAULT_ROOM: &str = "global";
const MAX_ROOM_LENGTH: usize = 64;

/// Sent to a connection whose identity cannot be resolved, whether it never
/// joined or its account is gone.
pub const USER_NOT_FOUND: &str = "User not found";

/// WebSocket endpoints.
pub fn ws_router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::global_ws))
        .route("/ws/{room}", get(ws::room_ws))
}

/// REST endpoints under `/api/chat`.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/{room}/users", get(presence::users))
        .route("/{room}/history", get(history::history))
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid room name {0:?}")]
    InvalidRoom(String),
    #[error("chat hub is not running")]
    HubClosed,
    #[error("cannot {event} while {from:?}")]
    InvalidTransition { from: Phase, event: &'static str },
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::InvalidRoom(_) => StatusCode::BAD_REQUEST,
            ChatError::HubClosed => StatusCode::SERVICE_UNAVAILABLE,
            ChatError::InvalidTransition { .. } => StatusCode::CONFLICT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        ConnectionId(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomId(String);

impl RoomId {
    pub fn parse(name: &str) -> Result<RoomId, ChatError> {
        let valid = !name.is_empty()
            && name.len() <= MAX_ROOM_LENGTH
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(ChatError::InvalidRoom(name.to_owned()));
        }
        Ok(RoomId(name.to_owned()))
    }

    pub fn global() -> RoomId {
        RoomId(DEFAULT_ROOM.to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who rides a connection once it has joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
}
