//! Rooms known to be 1:1 conversations.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use midgaard_core::RoomId;

/// Shared, additive set of direct rooms.
///
/// Fed from two sources, invite flags and server-pushed snapshots, in
/// whatever order they arrive. Rooms are never removed.
#[derive(Debug, Clone, Default)]
pub struct DirectRooms {
    rooms: Arc<RwLock<HashSet<RoomId>>>,
}

impl DirectRooms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the room was not already marked.
    pub async fn mark_direct(&self, room: &RoomId) -> bool {
        let inserted = self.rooms.write().await.insert(room.clone());
        if inserted {
            debug!(room_id = %room, "Room marked direct");
        }
        inserted
    }

    /// Add every room in a snapshot. Returns how many were new.
    pub async fn merge<I>(&self, rooms: I) -> usize
    where
        I: IntoIterator<Item = RoomId>,
    {
        let mut set = self.rooms.write().await;
        let before = set.len();
        set.extend(rooms);
        let added = set.len() - before;
        drop(set);
        if added > 0 {
            debug!(added, "Merged direct room snapshot");
        }
        added
    }

    pub async fn is_direct(&self, room: &RoomId) -> bool {
        self.rooms.read().await.contains(room)
    }

    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rooms.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mark_is_idempotent() {
        let direct = DirectRooms::new();
        let room = RoomId::new("!dm:example.org");
        assert!(!direct.is_direct(&room).await);
        assert!(direct.mark_direct(&room).await);
        assert!(!direct.mark_direct(&room).await);
        assert!(direct.is_direct(&room).await);
        assert_eq!(direct.len().await, 1);
    }

    #[tokio::test]
    async fn merge_is_additive() {
        let direct = DirectRooms::new();
        direct.mark_direct(&RoomId::new("!a:x")).await;

        let added = direct
            .merge([RoomId::new("!a:x"), RoomId::new("!b:x")])
            .await;
        assert_eq!(added, 1);

        // A later snapshot that omits a room does not unmark it.
        assert_eq!(direct.merge([RoomId::new("!c:x")]).await, 1);
        assert!(direct.is_direct(&RoomId::new("!a:x")).await);
        assert!(direct.is_direct(&RoomId::new("!b:x")).await);
        assert_eq!(direct.len().await, 3);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let direct = DirectRooms::new();
        let other = direct.clone();
        other.mark_direct(&RoomId::new("!a:x")).await;
        assert!(direct.is_direct(&RoomId::new("!a:x")).await);
        assert!(!direct.is_empty().await);
    }
}
