use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory membership map for call rooms: call id to the set of socket
/// client ids currently joined. Constructed once at startup and mutated
/// only by gateway socket handlers; rebuilt from connect/disconnect events,
/// never persisted. Covers a single server process.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<Uuid, HashSet<String>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a client to a room; returns false if it was already a member.
    pub async fn join(&self, call_id: Uuid, client_id: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(call_id)
            .or_default()
            .insert(client_id.to_string())
    }

    /// Removes a client from one room, dropping the room when it empties.
    /// Returns true if the client was a member.
    pub async fn leave(&self, call_id: Uuid, client_id: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(&call_id) else {
            return false;
        };
        let removed = members.remove(client_id);
        if members.is_empty() {
            rooms.remove(&call_id);
        }
        removed
    }

    /// Removes a client from every room it had joined and returns the call
    /// ids it was evicted from, one entry per room.
    pub async fn leave_all(&self, client_id: &str) -> Vec<Uuid> {
        let mut rooms = self.rooms.write().await;
        let mut left = Vec::new();
        rooms.retain(|call_id, members| {
            if members.remove(client_id) {
                left.push(*call_id);
            }
            !members.is_empty()
        });
        left
    }

    /// Snapshot of a room's members.
    pub async fn members(&self, call_id: Uuid) -> Vec<String> {
        let rooms = self.rooms.read().await;
        rooms
            .get(&call_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn is_member(&self, call_id: Uuid, client_id: &str) -> bool {
        let rooms = self.rooms.read().await;
        rooms
            .get(&call_id)
            .map(|members| members.contains(client_id))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_is_idempotent_per_client() {
        let registry = RoomRegistry::new();
        let call = Uuid::new_v4();
        assert!(registry.join(call, "u1:1").await);
        assert!(!registry.join(call, "u1:1").await);
        assert_eq!(registry.members(call).await.len(), 1);
    }

    #[tokio::test]
    async fn leave_all_returns_each_room_once() {
        let registry = RoomRegistry::new();
        let call_a = Uuid::new_v4();
        let call_b = Uuid::new_v4();
        registry.join(call_a, "u1:1").await;
        registry.join(call_b, "u1:1").await;
        registry.join(call_b, "u2:1").await;

        let mut left = registry.leave_all("u1:1").await;
        left.sort();
        let mut expected = vec![call_a, call_b];
        expected.sort();
        assert_eq!(left, expected);

        // Gone everywhere, other members untouched.
        assert!(!registry.is_member(call_b, "u1:1").await);
        assert!(registry.is_member(call_b, "u2:1").await);
        assert!(registry.members(call_a).await.is_empty());
    }

    #[tokio::test]
    async fn empty_rooms_are_dropped() {
        let registry = RoomRegistry::new();
        let call = Uuid::new_v4();
        registry.join(call, "u1:1").await;
        assert!(registry.leave(call, "u1:1").await);
        assert!(!registry.leave(call, "u1:1").await);
        assert!(registry.members(call).await.is_empty());
    }
}
