//! The hub owns every room's registry and all outboxes. Transport tasks talk
//! to it through [`HubHandle`]; commands are applied one at a time, so
//! registry updates and the broadcasts they trigger never interleave.

use std::collections::HashMap;

use time::OffsetDateTime;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ChatConfig;

use super::{
    ChatError, ChatMessage, ConnectionId, ConnectionRegistry, Delivery, Identity, Outbox, RoomId,
    ServerEvent, StoredChatMessage, USER_NOT_FOUND,
};

const COMMAND_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubSettings {
    /// Announce an identity only on its first connection and its last
    /// disconnection, and list it once in snapshots.
    pub collapse_duplicate_presence: bool,
}

impl Default for HubSettings {
    fn default() -> Self {
        HubSettings {
            collapse_duplicate_presence: true,
        }
    }
}

impl From<ChatConfig> for HubSettings {
    fn from(config: ChatConfig) -> Self {
        HubSettings {
            collapse_duplicate_presence: config.collapse_duplicate_presence,
        }
    }
}

enum Command {
    Attach {
        conn: ConnectionId,
        room: RoomId,
        outbox: Outbox,
    },
    Join {
        conn: ConnectionId,
        identity: Identity,
    },
    Relay {
        conn: ConnectionId,
        text: String,
    },
    Detach {
        conn: ConnectionId,
    },
    Presence {
        room: RoomId,
        reply: oneshot::Sender<Vec<String>>,
    },
    ConnectionCount {
        reply: oneshot::Sender<usize>,
    },
}

#[derive(Default)]
struct Room {
    /// Every authenticated connection in the room, joined or not.
    members: HashMap<ConnectionId, Outbox>,
    registry: ConnectionRegistry,
}

pub struct Hub {
    rooms: HashMap<RoomId, Room>,
    attached: HashMap<ConnectionId, RoomId>,
    settings: HubSettings,
    recorder: Option<mpsc::UnboundedSender<StoredChatMessage>>,
}

impl Hub {
    pub fn new(settings: HubSettings) -> Self {
        Hub {
            rooms: HashMap::new(),
            attached: HashMap::new(),
            settings,
            recorder: None,
        }
    }

    /// Hand every relayed message to a history recorder as well.
    pub fn with_recorder(mut self, recorder: mpsc::UnboundedSender<StoredChatMessage>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn spawn(self) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let task = tokio::spawn(self.run(rx));
        (HubHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            self.apply(command);
        }
        debug!("chat hub stopped");
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Attach { conn, room, outbox } => self.attach(conn, room, outbox),
            Command::Join { conn, identity } => self.join(conn, identity),
            Command::Relay { conn, text } => self.relay(conn, text),
            Command::Detach { conn } => self.detach(conn),
            Command::Presence { room, reply } => {
                let _ = reply.send(self.presence(&room));
            }
            Command::ConnectionCount { reply } => {
                let _ = reply.send(self.connection_count());
            }
        }
    }

    /// An authenticated connection starts receiving the room's broadcasts.
    pub fn attach(&mut self, conn: ConnectionId, room: RoomId, outbox: Outbox) {
        if self.attached.contains_key(&conn) {
            warn!(%conn, "connection attached twice");
            return;
        }
        debug!(%conn, %room, "connection attached");
        let _ = self
            .rooms
            .entry(room.clone())
            .or_default()
            .members
            .insert(conn, outbox);
        let _ = self.attached.insert(conn, room);
    }

    /// Registers the connection, tells the rest of the room, then sends the
    /// joiner a snapshot that already includes itself.
    pub fn join(&mut self, conn: ConnectionId, identity: Identity) {
        let Some(room_id) = self.attached.get(&conn).cloned() else {
            warn!(%conn, "join from a connection that is not attached");
            return;
        };
        let collapse = self.settings.collapse_duplicate_presence;
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return;
        };

        let already_present = room.registry.holds_identity(identity.user_id);
        let username = identity.username.clone();
        if !room.registry.register(conn, identity) {
            debug!(%conn, %room_id, %username, "already joined, resending snapshot");
            let snapshot = room.registry.usernames(collapse);
            self.send_to(conn, &ServerEvent::UsersList(snapshot));
            return;
        }

        info!(%conn, room = %room_id, %username, "user joined");
        if !(collapse && already_present) {
            self.broadcast(&room_id, &ServerEvent::UserJoined(username), Some(conn));
        }

        let Some(snapshot) = self
            .rooms
            .get(&room_id)
            .map(|room| room.registry.usernames(collapse))
        else {
            return;
        };
        self.send_to(conn, &ServerEvent::UsersList(snapshot));
    }

    /// Stamps the message with the sender's identity and the current time
    /// and fans it out to the whole room, sender included.
    pub fn relay(&mut self, conn: ConnectionId, text: String) {
        let identity = self
            .attached
            .get(&conn)
            .and_then(|room_id| self.rooms.get(room_id))
            .and_then(|room| room.registry.identity(conn))
            .cloned();
        let Some(identity) = identity else {
            debug!(%conn, "message from a connection that has not joined");
            self.send_to(conn, &ServerEvent::error(USER_NOT_FOUND));
            return;
        };
        let Some(room_id) = self.attached.get(&conn).cloned() else {
            return;
        };

        let message = ChatMessage {
            username: identity.username.clone(),
            message: text,
            timestamp: OffsetDateTime::now_utc(),
        };

        if let Some(recorder) = &self.recorder {
            let stored = StoredChatMessage {
                id: Uuid::now_v7(),
                room: room_id.to_string(),
                user_id: identity.user_id,
                username: message.username.clone(),
                message: message.message.clone(),
                timestamp: message.timestamp,
            };
            if recorder.send(stored).is_err() {
                warn!("history recorder is gone, message not persisted");
            }
        }

        self.broadcast(&room_id, &ServerEvent::ChatMessage(message), None);
    }

    /// Forgets the connection. If it had joined, the rest of the room learns
    /// that the user left. Unknown connections are ignored.
    pub fn detach(&mut self, conn: ConnectionId) {
        let Some(room_id) = self.attached.remove(&conn) else {
            return;
        };
        let collapse = self.settings.collapse_duplicate_presence;
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return;
        };

        let _ = room.members.remove(&conn);
        let left = room.registry.unregister(conn);
        let still_present = left
            .as_ref()
            .is_some_and(|identity| room.registry.holds_identity(identity.user_id));
        if room.members.is_empty() {
            let _ = self.rooms.remove(&room_id);
        }

        debug!(%conn, room = %room_id, "connection detached");
        if let Some(identity) = left {
            info!(%conn, room = %room_id, username = %identity.username, "user left");
            if !(collapse && still_present) {
                self.broadcast(&room_id, &ServerEvent::UserLeft(identity.username), None);
            }
        }
    }

    pub fn presence(&self, room: &RoomId) -> Vec<String> {
        self.rooms
            .get(room)
            .map(|room| room.registry.usernames(self.settings.collapse_duplicate_presence))
            .unwrap_or_default()
    }

    pub fn connection_count(&self) -> usize {
        self.attached.len()
    }

    fn send_to(&mut self, conn: ConnectionId, event: &ServerEvent) {
        let Some(frame) = event.to_frame() else {
            return;
        };
        let outbox = self
            .attached
            .get(&conn)
            .and_then(|room_id| self.rooms.get(room_id))
            .and_then(|room| room.members.get(&conn));
        let Some(outbox) = outbox else {
            return;
        };
        if outbox.push(frame) == Delivery::Full {
            self.evict(conn);
        }
    }

    fn broadcast(&mut self, room_id: &RoomId, event: &ServerEvent, except: Option<ConnectionId>) {
        let Some(frame) = event.to_frame() else {
            return;
        };
        let Some(room) = self.rooms.get(room_id) else {
            return;
        };

        let mut overflowed = Vec::new();
        for (&conn, outbox) in &room.members {
            if Some(conn) == except {
                continue;
            }
            match outbox.push(frame.clone()) {
                Delivery::Queued => {}
                Delivery::Full => overflowed.push(conn),
                Delivery::Closed => debug!(%conn, "outbox closed, detach pending"),
            }
        }
        debug!(
            event = event.name(),
            room = %room_id,
            recipients = room.members.len().saturating_sub(usize::from(except.is_some())),
            "broadcast"
        );

        for conn in overflowed {
            self.evict(conn);
        }
    }

    /// Drops a consumer that cannot keep up. Its socket is closed and it
    /// leaves the room like any other disconnect.
    fn evict(&mut self, conn: ConnectionId) {
        let outbox = self
            .attached
            .get(&conn)
            .and_then(|room_id| self.rooms.get(room_id))
            .and_then(|room| room.members.get(&conn));
        if let Some(outbox) = outbox {
            warn!(%conn, "outbox full, disconnecting slow consumer");
            outbox.evict();
        }
        self.detach(conn);
    }
}

/// Cheap to clone; one per transport task.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<Command>,
}

impl HubHandle {
    async fn submit(&self, command: Command) -> Result<(), ChatError> {
        self.tx.send(command).await.map_err(|_| ChatError::HubClosed)
    }

    pub async fn attach(&self, conn: ConnectionId, room: RoomId, outbox: Outbox) -> Result<(), ChatError> {
        self.submit(Command::Attach { conn, room, outbox }).await
    }

    pub async fn join(&self, conn: ConnectionId, identity: Identity) -> Result<(), ChatError> {
        self.submit(Command::Join { conn, identity }).await
    }

    pub async fn relay(&self, conn: ConnectionId, text: String) -> Result<(), ChatError> {
        self.submit(Command::Relay { conn, text }).await
    }

    pub async fn detach(&self, conn: ConnectionId) -> Result<(), ChatError> {
        self.submit(Command::Detach { conn }).await
    }

    pub async fn presence(&self, room: RoomId) -> Result<Vec<String>, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Presence { room, reply }).await?;
        rx.await.map_err(|_| ChatError::HubClosed)
    }

    pub async fn connection_count(&self) -> Result<usize, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::ConnectionCount { reply }).await?;
        rx.await.map_err(|_| ChatError::HubClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::OutboxReceiver;

    fn identity(name: &str) -> Identity {
        let mut bytes = [0u8; 16];
        for (slot, byte) in bytes.iter_mut().zip(name.bytes()) {
            *slot = byte;
        }
        Identity {
            user_id: Uuid::from_bytes(bytes),
            username: name.into(),
        }
    }

    fn connect(hub: &mut Hub, room: &RoomId) -> (ConnectionId, OutboxReceiver) {
        let conn = ConnectionId::new();
        let (outbox, rx) = Outbox::channel(32);
        hub.attach(conn, room.clone(), outbox);
        (conn, rx)
    }

    fn drain(rx: &mut OutboxReceiver) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Some(frame) = rx.try_recv() {
            events.push(serde_json::from_str(&frame).unwrap());
        }
        events
    }

    #[test]
    fn alice_and_bob() {
        let mut hub = Hub::new(HubSettings::default());
        let room = RoomId::global();

        let (alice, mut alice_rx) = connect(&mut hub, &room);
        hub.join(alice, identity("alice"));
        assert_eq!(drain(&mut alice_rx), [ServerEvent::UsersList(vec!["alice".into()])]);

        let (bob, mut bob_rx) = connect(&mut hub, &room);
        hub.join(bob, identity("bob"));
        assert_eq!(
            drain(&mut bob_rx),
            [ServerEvent::UsersList(vec!["alice".into(), "bob".into()])]
        );
        assert_eq!(drain(&mut alice_rx), [ServerEvent::UserJoined("bob".into())]);

        hub.relay(alice, "hi".into());
        let to_alice = drain(&mut alice_rx);
        let to_bob = drain(&mut bob_rx);
        assert_eq!(to_alice, to_bob);
        match &to_alice[..] {
            [ServerEvent::ChatMessage(message)] => {
                assert_eq!(message.username, "alice");
                assert_eq!(message.message, "hi");
            }
            other => panic!("unexpected events {other:?}"),
        }

        hub.detach(bob);
        assert_eq!(drain(&mut alice_rx), [ServerEvent::UserLeft("bob".into())]);
        assert_eq!(hub.presence(&room), ["alice"]);
    }

    #[test]
    fn unjoined_connections_see_broadcasts_but_are_not_present() {
        let mut hub = Hub::new(HubSettings::default());
        let room = RoomId::global();
        let (lurker, mut lurker_rx) = connect(&mut hub, &room);
        let (alice, _alice_rx) = connect(&mut hub, &room);

        hub.join(alice, identity("alice"));
        assert_eq!(drain(&mut lurker_rx), [ServerEvent::UserJoined("alice".into())]);
        assert_eq!(hub.presence(&room), ["alice"]);

        hub.detach(lurker);
        assert_eq!(hub.presence(&room), ["alice"]);
    }

    #[test]
    fn relay_before_join_reports_an_error_to_the_sender_only() {
        let mut hub = Hub::new(HubSettings::default());
        let room = RoomId::global();
        let (alice, mut alice_rx) = connect(&mut hub, &room);
        hub.join(alice, identity("alice"));
        drain(&mut alice_rx);

        let (stranger, mut stranger_rx) = connect(&mut hub, &room);
        hub.relay(stranger, "hello?".into());

        assert_eq!(drain(&mut stranger_rx), [ServerEvent::error("User not found")]);
        assert!(drain(&mut alice_rx).is_empty());
    }

    #[test]
    fn detaching_unknown_or_unjoined_connections_is_silent() {
        let mut hub = Hub::new(HubSettings::default());
        let room = RoomId::global();
        let (alice, mut alice_rx) = connect(&mut hub, &room);
        hub.join(alice, identity("alice"));
        drain(&mut alice_rx);

        hub.detach(ConnectionId::new());
        let (lurker, _lurker_rx) = connect(&mut hub, &room);
        hub.detach(lurker);
        hub.detach(lurker);

        assert!(drain(&mut alice_rx).is_empty());
        assert_eq!(hub.connection_count(), 1);
    }

    #[test]
    fn joining_twice_only_resends_the_snapshot() {
        let mut hub = Hub::new(HubSettings::default());
        let room = RoomId::global();
        let (alice, mut alice_rx) = connect(&mut hub, &room);
        let (bob, mut bob_rx) = connect(&mut hub, &room);
        hub.join(alice, identity("alice"));
        hub.join(bob, identity("bob"));
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        hub.join(bob, identity("bob"));
        assert!(drain(&mut alice_rx).is_empty());
        assert_eq!(
            drain(&mut bob_rx),
            [ServerEvent::UsersList(vec!["alice".into(), "bob".into()])]
        );
    }

    #[test]
    fn rooms_are_isolated() {
        let mut hub = Hub::new(HubSettings::default());
        let lobby = RoomId::global();
        let rust = RoomId::parse("rust").unwrap();
        let (alice, mut alice_rx) = connect(&mut hub, &lobby);
        let (bob, mut bob_rx) = connect(&mut hub, &rust);
        hub.join(alice, identity("alice"));
        hub.join(bob, identity("bob"));

        assert_eq!(drain(&mut alice_rx), [ServerEvent::UsersList(vec!["alice".into()])]);
        assert_eq!(drain(&mut bob_rx), [ServerEvent::UsersList(vec!["bob".into()])]);

        hub.relay(bob, "anyone?".into());
        assert!(drain(&mut alice_rx).is_empty());
        assert_eq!(drain(&mut bob_rx).len(), 1);
    }

    #[test]
    fn second_tab_is_collapsed() {
        let mut hub = Hub::new(HubSettings::default());
        let room = RoomId::global();
        let (bob, mut bob_rx) = connect(&mut hub, &room);
        hub.join(bob, identity("bob"));
        drain(&mut bob_rx);

        let (tab1, mut tab1_rx) = connect(&mut hub, &room);
        let (tab2, mut tab2_rx) = connect(&mut hub, &room);
        hub.join(tab1, identity("alice"));
        hub.join(tab2, identity("alice"));

        assert_eq!(drain(&mut bob_rx), [ServerEvent::UserJoined("alice".into())]);
        assert_eq!(
            drain(&mut tab2_rx),
            [ServerEvent::UsersList(vec!["bob".into(), "alice".into()])]
        );
        drain(&mut tab1_rx);

        hub.detach(tab1);
        assert!(drain(&mut bob_rx).is_empty());
        assert_eq!(hub.presence(&room), ["bob", "alice"]);

        hub.detach(tab2);
        assert_eq!(drain(&mut bob_rx), [ServerEvent::UserLeft("alice".into())]);
    }

    #[test]
    fn second_tab_is_duplicated_without_collapse() {
        let mut hub = Hub::new(HubSettings {
            collapse_duplicate_presence: false,
        });
        let room = RoomId::global();
        let (bob, mut bob_rx) = connect(&mut hub, &room);
        hub.join(bob, identity("bob"));
        drain(&mut bob_rx);

        let (tab1, _tab1_rx) = connect(&mut hub, &room);
        let (tab2, _tab2_rx) = connect(&mut hub, &room);
        hub.join(tab1, identity("alice"));
        hub.join(tab2, identity("alice"));
        assert_eq!(hub.presence(&room), ["bob", "alice", "alice"]);

        hub.detach(tab1);
        assert_eq!(
            drain(&mut bob_rx),
            [
                ServerEvent::UserJoined("alice".into()),
                ServerEvent::UserJoined("alice".into()),
                ServerEvent::UserLeft("alice".into()),
            ]
        );
    }

    #[tokio::test]
    async fn slow_consumers_are_evicted() {
        let mut hub = Hub::new(HubSettings::default());
        let room = RoomId::global();
        let (alice, mut alice_rx) = connect(&mut hub, &room);
        let slow = ConnectionId::new();
        let (slow_outbox, mut slow_rx) = Outbox::channel(1);
        hub.attach(slow, room.clone(), slow_outbox.clone());
        hub.join(alice, identity("alice"));
        hub.join(slow, identity("slow"));
        drain(&mut alice_rx);

        // The slow consumer never drains; its single slot holds "users list".
        hub.relay(alice, "one".into());

        // Visible to the socket reader even though nothing was drained.
        assert!(slow_outbox.is_evicted());
        assert!(matches!(slow_rx.next().await, crate::chat::Dequeued::Evicted));
        assert_eq!(hub.presence(&room), ["alice"]);
        let events = drain(&mut alice_rx);
        assert!(matches!(events[0], ServerEvent::ChatMessage(_)));
        assert_eq!(events[1], ServerEvent::UserLeft("slow".into()));
        assert_eq!(hub.connection_count(), 1);
    }

    #[test]
    fn relayed_messages_reach_the_recorder() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut hub = Hub::new(HubSettings::default()).with_recorder(tx);
        let room = RoomId::parse("rust").unwrap();
        let (alice, _alice_rx) = connect(&mut hub, &room);
        hub.join(alice, identity("alice"));
        hub.relay(alice, "persist me".into());

        let stored = rx.try_recv().unwrap();
        assert_eq!(stored.room, "rust");
        assert_eq!(stored.username, "alice");
        assert_eq!(stored.user_id, identity("alice").user_id);
        assert_eq!(stored.message, "persist me");
    }

    #[tokio::test]
    async fn handle_round_trips_through_the_task() {
        let (handle, _task) = Hub::new(HubSettings::default()).spawn();
        let conn = ConnectionId::new();
        let (outbox, mut rx) = Outbox::channel(8);

        handle.attach(conn, RoomId::global(), outbox).await.unwrap();
        handle.join(conn, identity("alice")).await.unwrap();
        assert_eq!(handle.presence(RoomId::global()).await.unwrap(), ["alice"]);
        assert_eq!(handle.connection_count().await.unwrap(), 1);
        assert!(matches!(rx.next().await, crate::chat::Dequeued::Frame(_)));

        handle.detach(conn).await.unwrap();
        assert!(handle.presence(RoomId::global()).await.unwrap().is_empty());
        assert_eq!(handle.connection_count().await.unwrap(), 0);
    }
}
