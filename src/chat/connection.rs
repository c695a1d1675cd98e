//! One task per socket: drives the connection through its phases and
//! forwards what the client asks for to the hub.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use sqlx::SqlitePool;
use tracing::{debug, error, info, instrument, warn};

use crate::{auth::Claims, db};

use super::{
    ChatError, ClientEvent, ConnectionId, Dequeued, HubHandle, Identity, Outbox, OutboxReceiver,
    OutgoingMessage, RoomId, ServerEvent, USER_NOT_FOUND,
};

/// Lifecycle of a chat connection.
///
/// `Connecting` ends at the HTTP upgrade: a valid credential leads to
/// `Authenticated`, anything else to `Rejected`. Joining is only possible
/// once authenticated, and every path ends in `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Authenticated,
    Joined,
    Disconnected,
    Rejected,
}

impl Phase {
    pub fn handshake(self, accepted: bool) -> Result<Phase, ChatError> {
        match self {
            Phase::Connecting if accepted => Ok(Phase::Authenticated),
            Phase::Connecting => Ok(Phase::Rejected),
            from => Err(ChatError::InvalidTransition {
                from,
                event: "complete the handshake",
            }),
        }
    }

    /// Joining again while joined is allowed and changes nothing.
    pub fn join(self) -> Result<Phase, ChatError> {
        match self {
            Phase::Authenticated | Phase::Joined => Ok(Phase::Joined),
            from => Err(ChatError::InvalidTransition { from, event: "join" }),
        }
    }

    pub fn can_send(self) -> bool {
        self == Phase::Joined
    }

    pub fn close(self) -> Phase {
        match self {
            Phase::Rejected => Phase::Rejected,
            _ => Phase::Disconnected,
        }
    }
}

pub(crate) struct ChatSession {
    pub(crate) id: ConnectionId,
    pub(crate) room: RoomId,
    pub(crate) claims: Claims,
    pub(crate) phase: Phase,
    pub(crate) hub: HubHandle,
    pub(crate) db_pool: SqlitePool,
    pub(crate) outbox: Outbox,
}

impl ChatSession {
    #[instrument(skip_all, fields(conn = %self.id, room = %self.room, user_id = %self.claims.sub))]
    pub(crate) async fn run(mut self, socket: WebSocket, mut inbox: OutboxReceiver) {
        let (mut sink, mut stream) = socket.split();

        if let Err(err) = self.hub.attach(self.id, self.room.clone(), self.outbox.clone()).await {
            error!(error = %err, "could not attach connection");
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
        info!("socket connected");

        let mut writer = tokio::spawn(async move {
            loop {
                match inbox.next().await {
                    Dequeued::Frame(frame) => {
                        if sink.send(Message::Text(frame.as_ref().into())).await.is_err() {
                            break;
                        }
                    }
                    Dequeued::Evicted => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    Dequeued::Closed => break,
                }
            }
        });

        let outbox = self.outbox.clone();
        loop {
            tokio::select! {
                _ = &mut writer => break,
                () = outbox.evicted() => {
                    debug!("evicted, closing socket");
                    break;
                }
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()).await,
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => self.handle_text(text).await,
                        Err(_) => self.notify_error("Invalid event"),
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Err(err)) => {
                        debug!(error = %err, "socket error");
                        break;
                    }
                },
            }
        }

        // Dropping both halves closes the socket, even if the writer is
        // blocked on a peer that stopped reading.
        writer.abort();
        if let Err(err) = self.hub.detach(self.id).await {
            warn!(error = %err, "could not detach connection");
        }
        info!(was = ?self.phase, phase = ?self.phase.close(), "socket disconnected");
    }

    async fn handle_text(&mut self, text: &str) {
        let event = match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => event,
            Err(err) => {
                debug!(error = %err, "unparseable client frame");
                self.notify_error("Invalid event");
                return;
            }
        };

        match event {
            ClientEvent::JoinChat(requested) => self.join(requested).await,
            ClientEvent::ChatMessage(OutgoingMessage { message }) => self.send(message).await,
        }
    }

    async fn join(&mut self, requested: String) {
        let identity = match self.resolve_identity().await {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                warn!("join from an account that no longer exists");
                self.notify_error(USER_NOT_FOUND);
                return;
            }
            Err(err) => {
                error!(error = ?err, "join chat failed");
                self.notify_error("Failed to join chat");
                return;
            }
        };
        if requested != identity.username {
            debug!(%requested, username = %identity.username, "announcing the account name instead");
        }

        self.phase = match self.phase.join() {
            Ok(phase) => phase,
            Err(err) => {
                warn!(error = %err, "join refused");
                return;
            }
        };
        if let Err(err) = self.hub.join(self.id, identity).await {
            error!(error = %err, "join chat failed");
            self.notify_error("Failed to join chat");
        }
    }

    async fn send(&mut self, message: String) {
        if !self.phase.can_send() {
            self.notify_error(USER_NOT_FOUND);
            return;
        }
        match self.resolve_identity().await {
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!("message from an account that no longer exists");
                self.notify_error(USER_NOT_FOUND);
                return;
            }
            Err(err) => {
                error!(error = ?err, "chat message failed");
                self.notify_error("Failed to process message");
                return;
            }
        }
        if let Err(err) = self.hub.relay(self.id, message).await {
            error!(error = %err, "chat message failed");
            self.notify_error("Failed to process message");
        }
    }

    /// The account behind the token, as it is now.
    async fn resolve_identity(&self) -> Result<Option<Identity>, sqlx::Error> {
        Ok(db::find_user(&self.db_pool, self.claims.sub)
            .await?
            .map(|user| Identity {
                user_id: user.id,
                username: user.username,
            }))
    }

    fn notify_error(&self, message: &str) {
        if let Some(frame) = ServerEvent::error(message).to_frame() {
            let _ = self.outbox.push(frame);
        }
    }
}
