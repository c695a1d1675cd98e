use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::mpsc, time::timeout};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self,
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue, StatusCode},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::{
    auth::{AuthResponse, PublicUser},
    chat::{ClientEvent, OutgoingMessage, ServerEvent},
};

use super::{ApiClient, ChatView, ClientError, CredentialStore, Line, StoredCredential};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub attempts: u32,
    pub delay: Duration,
    pub timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            attempts: 5,
            delay: Duration::from_secs(1),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Input ran out and the socket was closed cleanly.
    Closed,
    /// The server refused the credential; it has been cleared.
    LoginRequired,
}

pub struct ClientSession<S> {
    api: ApiClient,
    store: S,
    room: String,
    policy: ReconnectPolicy,
    credential: Option<StoredCredential>,
}

impl<S: CredentialStore> ClientSession<S> {
    pub fn new(api: ApiClient, store: S, room: impl Into<String>, policy: ReconnectPolicy) -> Self {
        ClientSession {
            api,
            store,
            room: room.into(),
            policy,
            credential: None,
        }
    }

    pub fn identity(&self) -> Option<&PublicUser> {
        self.credential.as_ref().map(|credential| &credential.user)
    }

    /// Loads the stored login and checks it against the server. A rejected
    /// credential is cleared; any other failure leaves it in place.
    pub async fn restore(&mut self) -> Result<bool, ClientError> {
        let Some(stored) = self.store.load()? else {
            return Ok(false);
        };
        match self.api.profile(&stored.token).await {
            Ok(user) => {
                let credential = StoredCredential { token: stored.token, user };
                self.store.save(&credential)?;
                self.credential = Some(credential);
                Ok(true)
            }
            Err(ClientError::AuthRejected) => {
                info!(user = %stored.user.username, "stored login was rejected");
                self.logout()?;
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn login(&mut self, email: &str, password: &str) -> Result<&PublicUser, ClientError> {
        let response = self.api.login(email, password).await?;
        self.adopt(response)
    }

    pub async fn register(&mut self, username: &str, email: &str, password: &str) -> Result<&PublicUser, ClientError> {
        let response = self.api.register(username, email, password).await?;
        self.adopt(response)
    }

    fn adopt(&mut self, response: AuthResponse) -> Result<&PublicUser, ClientError> {
        let credential = StoredCredential {
            token: response.token,
            user: response.user,
        };
        self.store.save(&credential)?;
        Ok(&self.credential.insert(credential).user)
    }

    pub fn logout(&mut self) -> Result<(), ClientError> {
        self.credential = None;
        self.store.clear()
    }

    /// Opens the room socket, retrying transport failures per the policy.
    /// A 401 on the upgrade logs the session out instead of retrying.
    pub async fn connect(&mut self) -> Result<Socket, ClientError> {
        let token = self
            .credential
            .as_ref()
            .map(|credential| credential.token.clone())
            .ok_or(ClientError::LoginRequired)?;
        let url = self.api.ws_url(&self.room)?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| ClientError::AuthRejected)?;

        for attempt in 1..=self.policy.attempts {
            let mut request = url.as_str().into_client_request()?;
            request.headers_mut().insert(AUTHORIZATION, bearer.clone());

            match timeout(self.policy.timeout, connect_async(request)).await {
                Ok(Ok((socket, _))) => return Ok(socket),
                Ok(Err(tungstenite::Error::Http(response))) if response.status() == StatusCode::UNAUTHORIZED => {
                    self.logout()?;
                    return Err(ClientError::AuthRejected);
                }
                Ok(Err(err)) => warn!(attempt, error = %err, "connect failed"),
                Err(_) => warn!(attempt, "connect timed out"),
            }
            if attempt < self.policy.attempts {
                tokio::time::sleep(self.policy.delay).await;
            }
        }
        Err(ClientError::Unreachable {
            attempts: self.policy.attempts,
        })
    }

    /// Chats until `outgoing` closes. Each line from `outgoing` is sent as a
    /// message and every displayable server event is handed to `render`.
    ///
    /// A dropped socket is reopened after `policy.delay` and the room
    /// rejoined. Drops before the server's `users list` arrives count
    /// against `policy.attempts`; a session that got its snapshot resets
    /// the count.
    pub async fn run<F>(&mut self, outgoing: &mut mpsc::Receiver<String>, mut render: F) -> Result<SessionEnd, ClientError>
    where
        F: FnMut(&Line),
    {
        let me = self
            .identity()
            .map(|user| user.username.clone())
            .ok_or(ClientError::LoginRequired)?;
        let mut view = ChatView::new(me.clone());
        let mut drops = 0;

        loop {
            let mut socket = match self.connect().await {
                Ok(socket) => socket,
                Err(ClientError::AuthRejected) => return Ok(SessionEnd::LoginRequired),
                Err(err) => return Err(err),
            };

            match converse(&mut socket, &me, &mut view, outgoing, &mut render).await? {
                Conversation::Closed => return Ok(SessionEnd::Closed),
                Conversation::Dropped { joined: true } => drops = 1,
                Conversation::Dropped { joined: false } => drops += 1,
            }
            if drops >= self.policy.attempts {
                warn!(drops, "giving up on the chat server");
                return Err(ClientError::Unreachable {
                    attempts: self.policy.attempts,
                });
            }

            render(&Line::Notice("connection lost, reconnecting".into()));
            tokio::time::sleep(self.policy.delay).await;
        }
    }
}

enum Conversation {
    /// `outgoing` ran dry and the socket was closed from our side.
    Closed,
    /// The socket went away. `joined` tells whether the snapshot arrived.
    Dropped { joined: bool },
}

async fn converse<F>(
    socket: &mut Socket,
    me: &str,
    view: &mut ChatView,
    outgoing: &mut mpsc::Receiver<String>,
    render: &mut F,
) -> Result<Conversation, ClientError>
where
    F: FnMut(&Line),
{
    let mut joined = false;
    if let Err(err) = socket.send(frame(&ClientEvent::JoinChat(me.to_owned()))?).await {
        debug!(error = %err, "join failed");
        return Ok(Conversation::Dropped { joined });
    }

    loop {
        tokio::select! {
            line = outgoing.recv() => {
                let Some(line) = line else {
                    let _ = socket.close(None).await;
                    return Ok(Conversation::Closed);
                };
                let message = line.trim();
                if !message.is_empty() {
                    let event = ClientEvent::ChatMessage(OutgoingMessage { message: message.to_owned() });
                    if let Err(err) = socket.send(frame(&event)?).await {
                        debug!(error = %err, "send failed");
                        return Ok(Conversation::Dropped { joined });
                    }
                }
            }
            incoming = socket.next() => match incoming {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerEvent>(text.as_str()) {
                    Ok(event) => {
                        joined |= matches!(event, ServerEvent::UsersList(_));
                        if let Some(line) = view.apply(event) {
                            render(&line);
                        }
                    }
                    Err(err) => debug!(error = %err, "ignoring unknown frame"),
                },
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return Ok(Conversation::Dropped { joined }),
                Some(Ok(_)) => {}
            },
        }
    }
}

fn frame(event: &ClientEvent) -> Result<Message, ClientError> {
    Ok(Message::text(serde_json::to_string(event)?))
}
