//! Session registry for room bindings, user routing and pending registrations.
//!
//! The registry keeps three tables:
//!
//! - `room_of`: connection → room it is bound to (for room broadcasts)
//! - `connection_of`: user → most recent connection (for user messages)
//! - `pending`: connection → token it is waiting on (registration handshake)
//!
//! All three sit behind one mutex. They are small and contention is low, and a
//! single lock makes every mutation atomic with respect to the broadcaster and
//! the dispatcher. The lock is never held across an `.await`; callers get
//! cloned handles back and send outside the critical section.

use std::collections::{BTreeSet, HashMap};

use parking_lot::Mutex;

use crate::connection::{ConnectionHandle, ConnectionId};

/// A resolved registration handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Connection that was waiting on the token
    pub connection_id: ConnectionId,
    /// Room the connection was paired with
    pub room_id: String,
    /// User the connection was paired with
    pub user_id: String,
}

struct RoomBinding {
    room_id: String,
    handle: ConnectionHandle,
}

struct PendingRegistration {
    /// Lower-cased token
    token: String,
    handle: ConnectionHandle,
}

#[derive(Default)]
struct Tables {
    room_of: HashMap<ConnectionId, RoomBinding>,
    connection_of: HashMap<String, ConnectionHandle>,
    pending: HashMap<ConnectionId, PendingRegistration>,
}

/// Process-wide routing tables shared by sessions, dispatcher and
/// broadcaster.
///
/// # Invariants
///
/// - A connection is in `room_of` only after it sent a well-formed message
///   carrying a real room id.
/// - A pending token is consumed at most once.
/// - After [`SessionRegistry::purge`], no table references the connection,
///   except `connection_of` entries that were already overwritten by a newer
///   connection for the same user.
#[derive(Default)]
pub struct SessionRegistry {
    tables: Mutex<Tables>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a connection to a room and make it the user's current connection.
    ///
    /// Overwrites any previous room binding of the connection and any previous
    /// connection of the user.
    pub fn bind(&self, handle: &ConnectionHandle, room_id: &str, user_id: &str) {
        let mut tables = self.tables.lock();

        tables
            .room_of
            .insert(handle.id(), RoomBinding { room_id: room_id.to_string(), handle: handle.clone() });
        tables.connection_of.insert(user_id.to_string(), handle.clone());
    }

    /// Record that a connection waits for `token` to be presented.
    pub fn await_registration(&self, handle: &ConnectionHandle, token: &str) {
        self.tables.lock().pending.insert(
            handle.id(),
            PendingRegistration { token: token.to_lowercase(), handle: handle.clone() },
        );
    }

    /// Consume the pending registration matching `token`, case-insensitively.
    ///
    /// Returns `None` without side effects if nothing matches. A given
    /// registration is returned at most once.
    pub fn take_pending(&self, token: &str) -> Option<ConnectionHandle> {
        let token = token.to_lowercase();
        let mut tables = self.tables.lock();

        let id = tables.pending.iter().find(|(_, p)| p.token == token).map(|(id, _)| *id)?;
        tables.pending.remove(&id).map(|p| p.handle)
    }

    /// Remove every entry that refers to `id`.
    ///
    /// Returns `true` if anything was removed.
    pub fn purge(&self, id: ConnectionId) -> bool {
        let mut tables = self.tables.lock();

        let bound = tables.room_of.remove(&id).is_some();
        let pending = tables.pending.remove(&id).is_some();

        let users_before = tables.connection_of.len();
        tables.connection_of.retain(|_, handle| handle.id() != id);
        let user = tables.connection_of.len() != users_before;

        bound || pending || user
    }

    /// Drop a connection's room binding if it is still bound to `room_id`.
    ///
    /// Used after a failed broadcast send. Returns `true` if removed.
    pub fn unbind_room(&self, id: ConnectionId, room_id: &str) -> bool {
        let mut tables = self.tables.lock();

        if tables.room_of.get(&id).is_some_and(|b| b.room_id == room_id) {
            tables.room_of.remove(&id);
            return true;
        }
        false
    }

    /// Drop a user's entry if it still points at connection `id`.
    ///
    /// Returns `true` if removed.
    pub fn forget_user(&self, user_id: &str, id: ConnectionId) -> bool {
        let mut tables = self.tables.lock();

        if tables.connection_of.get(user_id).is_some_and(|h| h.id() == id) {
            tables.connection_of.remove(user_id);
            return true;
        }
        false
    }

    /// Room a connection is bound to.
    pub fn room_of(&self, id: ConnectionId) -> Option<String> {
        self.tables.lock().room_of.get(&id).map(|b| b.room_id.clone())
    }

    /// Current connection of a user.
    pub fn connection_of(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.tables.lock().connection_of.get(user_id).cloned()
    }

    /// Whether a connection waits on a registration token.
    pub fn is_pending(&self, id: ConnectionId) -> bool {
        self.tables.lock().pending.contains_key(&id)
    }

    /// Whether any table references the connection.
    pub fn references(&self, id: ConnectionId) -> bool {
        let tables = self.tables.lock();

        tables.room_of.contains_key(&id)
            || tables.pending.contains_key(&id)
            || tables.connection_of.values().any(|h| h.id() == id)
    }

    /// Distinct rooms with at least one bound connection, sorted.
    pub fn rooms(&self) -> Vec<String> {
        let tables = self.tables.lock();
        let rooms: BTreeSet<&String> = tables.room_of.values().map(|b| &b.room_id).collect();
        rooms.into_iter().cloned().collect()
    }

    /// All connections bound to a room.
    pub fn connections_in_room(&self, room_id: &str) -> Vec<ConnectionHandle> {
        self.tables
            .lock()
            .room_of
            .values()
            .filter(|b| b.room_id == room_id)
            .map(|b| b.handle.clone())
            .collect()
    }

    /// Every `(user, connection)` pair.
    pub fn users(&self) -> Vec<(String, ConnectionHandle)> {
        self.tables
            .lock()
            .connection_of
            .iter()
            .map(|(user, handle)| (user.clone(), handle.clone()))
            .collect()
    }

    /// Number of connections bound to a room.
    pub fn bound_count(&self) -> usize {
        self.tables.lock().room_of.len()
    }

    /// Number of users with a current connection.
    pub fn user_count(&self) -> usize {
        self.tables.lock().connection_of.len()
    }

    /// Number of registrations awaiting a token.
    pub fn pending_count(&self) -> usize {
        self.tables.lock().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn handle(id: ConnectionId) -> ConnectionHandle {
        ConnectionHandle::new(id, None, tokio::io::sink(), Duration::from_secs(1))
    }

    #[test]
    fn fresh_connection_is_unreferenced() {
        let registry = SessionRegistry::new();
        let conn = handle(1);

        assert!(!registry.references(conn.id()));
        assert_eq!(registry.bound_count(), 0);
        assert_eq!(registry.user_count(), 0);
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn bind_records_room_and_user() {
        let registry = SessionRegistry::new();
        let conn = handle(1);

        registry.bind(&conn, "room1", "userA");

        assert_eq!(registry.room_of(1).as_deref(), Some("room1"));
        assert_eq!(registry.connection_of("userA").map(|h| h.id()), Some(1));
        assert_eq!(registry.rooms(), vec!["room1".to_string()]);
    }

    #[test]
    fn rebind_moves_connection_between_rooms() {
        let registry = SessionRegistry::new();
        let conn = handle(1);

        registry.bind(&conn, "room1", "userA");
        registry.bind(&conn, "room2", "userA");

        assert_eq!(registry.room_of(1).as_deref(), Some("room2"));
        assert!(registry.connections_in_room("room1").is_empty());
        assert_eq!(registry.connections_in_room("room2").len(), 1);
    }

    #[test]
    fn newest_connection_wins_for_user() {
        let registry = SessionRegistry::new();
        let old = handle(1);
        let new = handle(2);

        registry.bind(&old, "room1", "userA");
        registry.bind(&new, "room1", "userA");
        assert_eq!(registry.connection_of("userA").map(|h| h.id()), Some(2));

        // Purging the old connection keeps the user's newer connection
        registry.purge(1);
        assert_eq!(registry.connection_of("userA").map(|h| h.id()), Some(2));
    }

    #[test]
    fn rooms_are_distinct() {
        let registry = SessionRegistry::new();
        registry.bind(&handle(1), "room1", "a");
        registry.bind(&handle(2), "room1", "b");
        registry.bind(&handle(3), "room2", "c");

        assert_eq!(registry.rooms(), vec!["room1".to_string(), "room2".to_string()]);
        assert_eq!(registry.connections_in_room("room1").len(), 2);
    }

    #[test]
    fn pending_token_resolves_case_insensitively_once() {
        let registry = SessionRegistry::new();
        let conn = handle(1);

        registry.await_registration(&conn, "ABC123");
        assert!(registry.is_pending(1));

        let resolved = registry.take_pending("abc123");
        assert_eq!(resolved.map(|h| h.id()), Some(1));
        assert!(!registry.is_pending(1));

        assert!(registry.take_pending("abc123").is_none());
        assert!(registry.take_pending("ABC123").is_none());
    }

    #[test]
    fn unknown_token_has_no_side_effects() {
        let registry = SessionRegistry::new();
        registry.await_registration(&handle(1), "token");

        assert!(registry.take_pending("other").is_none());
        assert_eq!(registry.pending_count(), 1);
    }

    #[test]
    fn purge_clears_all_tables() {
        let registry = SessionRegistry::new();
        let conn = handle(1);

        registry.await_registration(&conn, "tok");
        registry.bind(&conn, "room1", "userA");
        assert!(registry.references(1));

        assert!(registry.purge(1));
        assert!(!registry.references(1));
        assert_eq!(registry.user_count(), 0);

        // Second purge is a no-op
        assert!(!registry.purge(1));
    }

    #[test]
    fn unbind_room_only_touches_matching_binding() {
        let registry = SessionRegistry::new();
        let conn = handle(1);
        registry.bind(&conn, "room2", "userA");

        assert!(!registry.unbind_room(1, "room1"));
        assert_eq!(registry.room_of(1).as_deref(), Some("room2"));

        assert!(registry.unbind_room(1, "room2"));
        assert_eq!(registry.room_of(1), None);
        // User routing survives a room unbind
        assert!(registry.connection_of("userA").is_some());
    }

    #[test]
    fn forget_user_checks_connection() {
        let registry = SessionRegistry::new();
        registry.bind(&handle(2), "room1", "userA");

        assert!(!registry.forget_user("userA", 1));
        assert!(registry.forget_user("userA", 2));
        assert_eq!(registry.user_count(), 0);
    }
}
