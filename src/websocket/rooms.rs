//! Bidirectional room index.
//!
//! Holds both directions of the membership relation in one structure so
//! `client ∈ members(room) ⇔ room ∈ rooms_of(client)` is maintained by every
//! mutation. No locking here; the hub owns the only instance.

use std::collections::{HashMap, HashSet};

use super::client::ClientId;

/// Room every registered client belongs to
pub const GLOBAL: &str = "global";

pub fn team(team_id: &str) -> String {
    format!("team:{team_id}")
}

pub fn channel(channel_id: &str) -> String {
    format!("channel:{channel_id}")
}

#[derive(Debug, Default)]
pub struct RoomIndex {
    rooms: HashMap<String, HashSet<ClientId>>,
    memberships: HashMap<ClientId, HashSet<String>>,
}

impl RoomIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the client was not already a member.
    pub fn join(&mut self, client: ClientId, room: &str) -> bool {
        let inserted = self
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(client);
        self.memberships
            .entry(client)
            .or_default()
            .insert(room.to_string());
        inserted
    }

    /// Returns `true` if the client was a member. Empty rooms are dropped.
    pub fn leave(&mut self, client: ClientId, room: &str) -> bool {
        let removed = match self.rooms.get_mut(room) {
            Some(members) => {
                let removed = members.remove(&client);
                if members.is_empty() {
                    self.rooms.remove(room);
                }
                removed
            }
            None => false,
        };

        if let Some(rooms) = self.memberships.get_mut(&client) {
            rooms.remove(room);
            if rooms.is_empty() {
                self.memberships.remove(&client);
            }
        }

        removed
    }

    /// Removes the client from every room, returning the rooms it left.
    pub fn leave_all(&mut self, client: ClientId) -> Vec<String> {
        let Some(rooms) = self.memberships.remove(&client) else {
            return Vec::new();
        };

        for room in &rooms {
            if let Some(members) = self.rooms.get_mut(room) {
                members.remove(&client);
                if members.is_empty() {
                    self.rooms.remove(room);
                }
            }
        }

        rooms.into_iter().collect()
    }

    pub fn members(&self, room: &str) -> impl Iterator<Item = &ClientId> + '_ {
        self.rooms.get(room).into_iter().flatten()
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map(HashSet::len).unwrap_or(0)
    }

    pub fn contains(&self, room: &str, client: ClientId) -> bool {
        self.rooms
            .get(room)
            .map(|members| members.contains(&client))
            .unwrap_or(false)
    }

    pub fn rooms_of(&self, client: ClientId) -> Vec<String> {
        let mut rooms: Vec<String> = self
            .memberships
            .get(&client)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty() && self.memberships.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Both directions of the relation must agree.
    fn assert_symmetric(index: &RoomIndex) {
        for (room, members) in &index.rooms {
            assert!(!members.is_empty(), "empty room {room} left behind");
            for client in members {
                assert!(index.memberships[client].contains(room));
            }
        }
        for (client, rooms) in &index.memberships {
            assert!(!rooms.is_empty());
            for room in rooms {
                assert!(index.rooms[room].contains(client));
            }
        }
    }

    #[test]
    fn test_room_names() {
        assert_eq!(team("T1"), "team:T1");
        assert_eq!(channel("c-42"), "channel:c-42");
    }

    #[test]
    fn test_join_creates_room_lazily() {
        let mut index = RoomIndex::new();
        let a = ClientId::new();

        assert_eq!(index.room_count(), 0);
        assert!(index.join(a, "team:T1"));
        assert!(!index.join(a, "team:T1"));
        assert_eq!(index.member_count("team:T1"), 1);
        assert!(index.contains("team:T1", a));
        assert_symmetric(&index);
    }

    #[test]
    fn test_leave_last_member_deletes_room() {
        let mut index = RoomIndex::new();
        let a = ClientId::new();
        let b = ClientId::new();

        index.join(a, "channel:x");
        index.join(b, "channel:x");
        assert!(index.leave(a, "channel:x"));
        assert_eq!(index.room_count(), 1);
        assert!(index.leave(b, "channel:x"));
        assert_eq!(index.room_count(), 0);
        assert!(index.is_empty());
        assert!(!index.leave(b, "channel:x"));
    }

    #[test]
    fn test_leave_all() {
        let mut index = RoomIndex::new();
        let a = ClientId::new();
        let b = ClientId::new();

        index.join(a, GLOBAL);
        index.join(a, "team:T1");
        index.join(b, GLOBAL);

        let mut left = index.leave_all(a);
        left.sort();
        assert_eq!(left, vec!["global".to_string(), "team:T1".to_string()]);
        assert!(index.rooms_of(a).is_empty());
        assert_eq!(index.member_count(GLOBAL), 1);
        assert_eq!(index.room_count(), 1);
        assert_symmetric(&index);

        assert!(index.leave_all(a).is_empty());
    }

    #[test]
    fn test_members_of_unknown_room() {
        let index = RoomIndex::new();
        assert_eq!(index.members("nope").count(), 0);
    }
}
