use uuid::Uuid;

use super::{ConnectionId, Identity};

/// Joined connections of one room, in join order.
///
/// One identity may hold several entries (one per connection); a connection
/// id appears at most once.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: Vec<(ConnectionId, Identity)>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` and leaves the registry untouched if the connection
    /// is already registered.
    pub fn register(&mut self, connection_id: ConnectionId, identity: Identity) -> bool {
        if self.contains(connection_id) {
            return false;
        }
        self.entries.push((connection_id, identity));
        true
    }

    pub fn unregister(&mut self, connection_id: ConnectionId) -> Option<Identity> {
        let index = self.entries.iter().position(|(id, _)| *id == connection_id)?;
        Some(self.entries.remove(index).1)
    }

    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.entries.iter().any(|(id, _)| *id == connection_id)
    }

    pub fn identity(&self, connection_id: ConnectionId) -> Option<&Identity> {
        self.entries
            .iter()
            .find(|(id, _)| *id == connection_id)
            .map(|(_, identity)| identity)
    }

    pub fn holds_identity(&self, user_id: Uuid) -> bool {
        self.entries.iter().any(|(_, identity)| identity.user_id == user_id)
    }

    pub fn list_identities(&self) -> Vec<Identity> {
        self.entries.iter().map(|(_, identity)| identity.clone()).collect()
    }

    /// Presence snapshot in join order. With `collapse`, each username is
    /// listed once at the position of its earliest connection.
    pub fn usernames(&self, collapse: bool) -> Vec<String> {
        let mut names: Vec<String> = Vec::with_capacity(self.entries.len());
        for (_, identity) in &self.entries {
            if collapse && names.contains(&identity.username) {
                continue;
            }
            names.push(identity.username.clone());
        }
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn register_is_idempotent_by_connection() {
        let mut registry = ConnectionRegistry::new();
        let conn = ConnectionId::new();
        assert!(registry.register(conn, identity("alice")));
        assert!(!registry.register(conn, identity("alice")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_absent_is_a_no_op() {
        let mut registry = ConnectionRegistry::new();
        registry.register(ConnectionId::new(), identity("alice"));
        assert_eq!(registry.unregister(ConnectionId::new()), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_returns_the_identity() {
        let mut registry = ConnectionRegistry::new();
        let conn = ConnectionId::new();
        registry.register(conn, identity("alice"));
        assert_eq!(registry.unregister(conn), Some(identity("alice")));
        assert!(registry.is_empty());
        assert!(!registry.contains(conn));
    }

    #[test]
    fn usernames_keep_join_order() {
        let mut registry = ConnectionRegistry::new();
        registry.register(ConnectionId::new(), identity("carol"));
        registry.register(ConnectionId::new(), identity("alice"));
        registry.register(ConnectionId::new(), identity("bob"));
        assert_eq!(registry.usernames(true), ["carol", "alice", "bob"]);
    }

    #[test]
    fn duplicate_identities_collapse_on_request() {
        let mut registry = ConnectionRegistry::new();
        let first_tab = ConnectionId::new();
        registry.register(first_tab, identity("alice"));
        registry.register(ConnectionId::new(), identity("bob"));
        registry.register(ConnectionId::new(), identity("alice"));

        assert_eq!(registry.list_identities().len(), 3);
        assert_eq!(registry.usernames(false), ["alice", "bob", "alice"]);
        assert_eq!(registry.usernames(true), ["alice", "bob"]);

        registry.unregister(first_tab);
        assert!(registry.holds_identity(identity("alice").user_id));
        assert_eq!(registry.usernames(true), ["bob", "alice"]);
    }
}
