//! Client side of the chat: restores a stored login, keeps a socket open
//! with bounded reconnection, and mirrors presence and messages locally.

mod api;
mod session;
mod store;
mod view;

use thiserror::Error;

pub use api::ApiClient;
pub use session::{ClientSession, ReconnectPolicy, SessionEnd};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore, StoredCredential};
pub use view::{ChatView, Line, PresenceSet};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not logged in")]
    LoginRequired,
    #[error("the server rejected the stored credential")]
    AuthRejected,
    #[error("{message} ({status})")]
    Server {
        status: reqwest::StatusCode,
        message: String,
    },
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
    #[error("gave up after {attempts} connection attempts")]
    Unreachable { attempts: u32 },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
