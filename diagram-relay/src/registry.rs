//! Room registry: room key → members + per-room document state.
//!
//! A room exists exactly while it has members. Join, leave and room
//! teardown all happen under the registry's write lock, so a join racing
//! the last leave either lands in the old room before it is removed or
//! creates a fresh one afterwards.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::document::DocumentStore;
use crate::protocol::DocKey;
use crate::session::{SessionHandle, SessionId};

/// One collaboration room (an exercise).
struct Room {
    members: HashMap<SessionId, SessionHandle>,
    documents: Arc<DocumentStore>,
}

impl Room {
    fn new() -> Self {
        Self {
            members: HashMap::new(),
            documents: Arc::new(DocumentStore::new()),
        }
    }
}

/// What a `leave` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// No such room, or the session was not a member
    NotMember,
    /// Session removed; room still has `remaining` members
    Left { remaining: usize },
    /// Session was the last member; room and its documents are gone
    RoomClosed,
}

#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Room>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `session` to `room_key`, creating the room on first join.
    ///
    /// Returns `false` if the session was already a member.
    pub async fn join(&self, room_key: &str, session: SessionHandle) -> bool {
        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(room_key.to_owned()).or_insert_with(|| {
            log::info!("Room {room_key} created");
            Room::new()
        });

        let id = session.id();
        if room.members.contains_key(&id) {
            return false;
        }
        room.members.insert(id, session);
        log::info!(
            "Session {id} joined room {room_key} ({} members)",
            room.members.len()
        );
        true
    }

    /// Remove `session_id` from `room_key`, dropping the room when empty.
    pub async fn leave(&self, room_key: &str, session_id: SessionId) -> LeaveOutcome {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(room_key) else {
            return LeaveOutcome::NotMember;
        };
        if room.members.remove(&session_id).is_none() {
            return LeaveOutcome::NotMember;
        }

        let remaining = room.members.len();
        log::info!("Session {session_id} left room {room_key} ({remaining} members)");
        if remaining > 0 {
            return LeaveOutcome::Left { remaining };
        }

        rooms.remove(room_key);
        log::info!("Room {room_key} removed (empty), document state discarded");
        LeaveOutcome::RoomClosed
    }

    /// Snapshot of the room's members; empty if the room does not exist.
    pub async fn members_of(&self, room_key: &str) -> Vec<SessionHandle> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_key)
            .map(|room| room.members.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn is_member(&self, room_key: &str, session_id: SessionId) -> bool {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_key)
            .is_some_and(|room| room.members.contains_key(&session_id))
    }

    /// The room's document store, if the room exists.
    pub async fn documents(&self, room_key: &str) -> Option<Arc<DocumentStore>> {
        let rooms = self.rooms.read().await;
        rooms.get(room_key).map(|room| room.documents.clone())
    }

    /// Canonical text of `doc_key` in `room_key`, or `fallback`.
    pub async fn document_text(&self, room_key: &str, doc_key: &DocKey, fallback: &str) -> String {
        match self.documents(room_key).await {
            Some(documents) => documents.get(doc_key, fallback).await,
            None => fallback.to_owned(),
        }
    }

    /// Replace canonical text. Returns `false` if the room does not exist,
    /// since document state only lives inside registered rooms.
    pub async fn set_document_text(&self, room_key: &str, doc_key: &DocKey, text: impl Into<String>) -> bool {
        match self.documents(room_key).await {
            Some(documents) => {
                documents.set(doc_key, text).await;
                true
            }
            None => false,
        }
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_rooms(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_creates_room() {
        let registry = RoomRegistry::new();
        let (s1, _rx) = SessionHandle::channel(4);

        assert!(registry.join("ex1", s1.clone()).await);
        assert_eq!(registry.room_count().await, 1);
        assert_eq!(registry.members_of("ex1").await, vec![s1]);
    }

    #[tokio::test]
    async fn test_join_is_idempotent() {
        let registry = RoomRegistry::new();
        let (s1, _rx) = SessionHandle::channel(4);

        assert!(registry.join("ex1", s1.clone()).await);
        assert!(!registry.join("ex1", s1.clone()).await);
        assert_eq!(registry.members_of("ex1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_members_of_unknown_room() {
        let registry = RoomRegistry::new();
        assert!(registry.members_of("nope").await.is_empty());
        assert!(registry.documents("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_leave_keeps_room_with_members() {
        let registry = RoomRegistry::new();
        let (s1, _rx1) = SessionHandle::channel(4);
        let (s2, _rx2) = SessionHandle::channel(4);
        registry.join("ex1", s1.clone()).await;
        registry.join("ex1", s2.clone()).await;

        let key = DocKey::new("e1", "p1");
        assert!(registry.set_document_text("ex1", &key, "kept").await);

        assert_eq!(
            registry.leave("ex1", s2.id()).await,
            LeaveOutcome::Left { remaining: 1 }
        );
        assert_eq!(registry.members_of("ex1").await, vec![s1]);
        assert_eq!(registry.document_text("ex1", &key, "gone").await, "kept");
    }

    #[tokio::test]
    async fn test_last_leave_discards_documents() {
        let registry = RoomRegistry::new();
        let (s1, _rx) = SessionHandle::channel(4);
        registry.join("ex1", s1.clone()).await;

        let key = DocKey::new("e1", "p1");
        registry.set_document_text("ex1", &key, "hello world").await;

        assert_eq!(registry.leave("ex1", s1.id()).await, LeaveOutcome::RoomClosed);
        assert_eq!(registry.room_count().await, 0);
        assert!(registry.members_of("ex1").await.is_empty());
        assert_eq!(registry.document_text("ex1", &key, "fallback").await, "fallback");

        // Rejoining starts from a fresh room
        registry.join("ex1", s1).await;
        assert_eq!(registry.document_text("ex1", &key, "fallback").await, "fallback");
    }

    #[tokio::test]
    async fn test_leave_unknown_is_noop() {
        let registry = RoomRegistry::new();
        let (s1, _rx) = SessionHandle::channel(4);
        let (s2, _rx2) = SessionHandle::channel(4);

        assert_eq!(registry.leave("ex1", s1.id()).await, LeaveOutcome::NotMember);

        registry.join("ex1", s1.clone()).await;
        assert_eq!(registry.leave("ex1", s2.id()).await, LeaveOutcome::NotMember);
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_set_document_without_room() {
        let registry = RoomRegistry::new();
        let key = DocKey::new("e1", "p1");
        assert!(!registry.set_document_text("ghost", &key, "x").await);
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let registry = RoomRegistry::new();
        let (s1, _rx1) = SessionHandle::channel(4);
        let (s2, _rx2) = SessionHandle::channel(4);
        registry.join("ex1", s1).await;
        registry.join("ex2", s2).await;

        let key = DocKey::new("e1", "p1");
        registry.set_document_text("ex1", &key, "room one").await;

        assert_eq!(registry.document_text("ex2", &key, "untouched").await, "untouched");
        let mut rooms = registry.active_rooms().await;
        rooms.sort();
        assert_eq!(rooms, vec!["ex1".to_string(), "ex2".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_join_leave_race_never_strands_member() {
        let registry = Arc::new(RoomRegistry::new());

        for _ in 0..200 {
            let (leaver, _rx1) = SessionHandle::channel(1);
            let (joiner, _rx2) = SessionHandle::channel(1);
            registry.join("race", leaver.clone()).await;

            let r1 = registry.clone();
            let r2 = registry.clone();
            let joiner_id = joiner.id();
            let leave = tokio::spawn(async move { r1.leave("race", leaver.id()).await });
            let join = tokio::spawn(async move { r2.join("race", joiner).await });
            leave.await.unwrap();
            join.await.unwrap();

            // Whatever the interleaving, the joiner is in a live room
            assert!(registry.is_member("race", joiner_id).await);
            assert_eq!(registry.members_of("race").await.len(), 1);

            registry.leave("race", joiner_id).await;
            assert_eq!(registry.room_count().await, 0);
        }
    }
}
