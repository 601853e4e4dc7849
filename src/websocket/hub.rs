use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::client::{Client, ClientId, EnqueueError, Frame};
use super::message_types::Envelope;
use super::presence::{presence_envelope, PresenceStatus};
use super::rooms::{self, RoomIndex};
use crate::metrics;

/// Outcome of handing one envelope to a set of clients
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Default)]
struct HubState {
    clients: HashMap<ClientId, Arc<Client>>,
    rooms: RoomIndex,
}

/// Connection registry and room index for every live WebSocket.
///
/// All state sits behind one mutex. Each operation takes it for the
/// registry/index edit (or the member lookup of a broadcast) and releases
/// it before any frame is enqueued, so a stalled client never holds up
/// another operation.
#[derive(Clone, Default)]
pub struct Hub {
    inner: Arc<Mutex<HubState>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a client to the registry, joins it to `global` and its team
    /// room, then announces it as online to the team.
    ///
    /// A reused client id replaces the registry entry and starts from no
    /// rooms; the previous connection is left running.
    pub fn register(&self, client: Arc<Client>) {
        let (connections, room_count) = {
            let mut state = self.state();
            let id = client.id();

            if let Some(previous) = state.clients.insert(id, client.clone()) {
                if !Arc::ptr_eq(&previous, &client) {
                    let dropped = state.rooms.leave_all(id);
                    tracing::warn!(
                        client_id = %id,
                        rooms_dropped = dropped.len(),
                        "client id reused, replacing registry entry"
                    );
                }
            }

            state.rooms.join(id, rooms::GLOBAL);
            if let Some(team_room) = client.identity().team_room() {
                state.rooms.join(id, &team_room);
            }
            client.mark_registered();

            (state.clients.len(), state.rooms.room_count())
        };

        metrics::set_registry_size(connections, room_count);
        tracing::info!(
            client_id = %client.id(),
            user_id = %client.user_id(),
            team_id = client.team_id().unwrap_or(""),
            connections,
            "client registered"
        );

        if let Some(envelope) = presence_envelope(client.identity(), PresenceStatus::Online) {
            self.broadcast(&envelope);
        }
    }

    /// Removes a client from every room and the registry, closes its
    /// outbound queue and announces it as offline.
    ///
    /// Returns `false` without side effects when this exact client is not
    /// registered, so repeated or racing calls are harmless.
    pub fn unregister(&self, client: &Arc<Client>) -> bool {
        let id = client.id();
        let (left, connections, room_count) = {
            let mut state = self.state();
            match state.clients.get(&id) {
                Some(current) if Arc::ptr_eq(current, client) => {}
                _ => return false,
            }
            if !client.begin_unregister() {
                return false;
            }

            state.clients.remove(&id);
            let left = state.rooms.leave_all(id);
            (left, state.clients.len(), state.rooms.room_count())
        };

        client.close_queue();
        metrics::set_registry_size(connections, room_count);
        tracing::info!(
            client_id = %id,
            user_id = %client.user_id(),
            rooms_left = left.len(),
            connections,
            "client unregistered"
        );

        if let Some(envelope) = presence_envelope(client.identity(), PresenceStatus::Offline) {
            self.broadcast(&envelope);
        }
        true
    }

    /// Delivers to the members of `envelope.room` at this instant, or to
    /// every registered client when no room is set.
    pub fn broadcast(&self, envelope: &Envelope) -> DeliveryReport {
        let Some(frame) = encode(envelope) else {
            return DeliveryReport::default();
        };

        let recipients: Vec<Arc<Client>> = {
            let state = self.state();
            match envelope.room.as_deref() {
                Some(room) => state
                    .rooms
                    .members(room)
                    .filter_map(|id| state.clients.get(id).cloned())
                    .collect(),
                None => state.clients.values().cloned().collect(),
            }
        };

        let report = deliver(&recipients, &frame);
        tracing::debug!(
            kind = %envelope.kind,
            room = envelope.room.as_deref().unwrap_or("*"),
            delivered = report.delivered,
            dropped = report.dropped,
            "broadcast"
        );
        report
    }

    /// Delivers to every connection of `user_id`, whatever rooms they are in.
    pub fn send_to_user(&self, user_id: &str, envelope: &Envelope) -> DeliveryReport {
        let Some(frame) = encode(envelope) else {
            return DeliveryReport::default();
        };

        let recipients: Vec<Arc<Client>> = {
            let state = self.state();
            state
                .clients
                .values()
                .filter(|c| c.user_id() == user_id)
                .cloned()
                .collect()
        };

        deliver(&recipients, &frame)
    }

    pub fn send_to_team(&self, team_id: &str, envelope: Envelope) -> DeliveryReport {
        self.broadcast(&envelope.with_room(rooms::team(team_id)))
    }

    /// Adds a registered client to `room`, creating the room if needed.
    /// Returns `false` for unknown clients.
    pub fn join_room(&self, client_id: ClientId, room: &str) -> bool {
        let mut state = self.state();
        if !state.clients.contains_key(&client_id) {
            return false;
        }
        state.rooms.join(client_id, room);
        tracing::debug!(client_id = %client_id, room, "joined room");
        true
    }

    /// Removes a client from `room`, deleting the room once empty.
    ///
    /// `global` and the client's own team room are held until
    /// unregistration and cannot be left.
    pub fn leave_room(&self, client_id: ClientId, room: &str) -> bool {
        let mut state = self.state();
        let Some(client) = state.clients.get(&client_id) else {
            return false;
        };
        if room == rooms::GLOBAL || client.identity().team_room().as_deref() == Some(room) {
            tracing::debug!(client_id = %client_id, room, "refusing to leave default room");
            return false;
        }

        let left = state.rooms.leave(client_id, room);
        if left {
            tracing::debug!(client_id = %client_id, room, "left room");
        }
        left
    }

    /// Joins every live connection of `user_id` to `room`. Returns how many joined.
    pub fn join_user(&self, user_id: &str, room: &str) -> usize {
        self.connections_of(user_id)
            .into_iter()
            .filter(|id| self.join_room(*id, room))
            .count()
    }

    /// Removes every live connection of `user_id` from `room`. Returns how many left.
    pub fn leave_user(&self, user_id: &str, room: &str) -> usize {
        self.connections_of(user_id)
            .into_iter()
            .filter(|id| self.leave_room(*id, room))
            .count()
    }

    pub fn connections_of(&self, user_id: &str) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self
            .state()
            .clients
            .values()
            .filter(|c| c.user_id() == user_id)
            .map(|c| c.id())
            .collect();
        ids.sort();
        ids
    }

    /// Distinct user ids currently connected to the team, sorted.
    pub fn get_online_users(&self, team_id: &str) -> Vec<String> {
        let room = rooms::team(team_id);
        let state = self.state();
        let users: BTreeSet<&str> = state
            .rooms
            .members(&room)
            .filter_map(|id| state.clients.get(id))
            .map(|c| c.user_id())
            .collect();
        users.into_iter().map(str::to_string).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.state().clients.len()
    }

    pub fn room_count(&self) -> usize {
        self.state().rooms.room_count()
    }

    pub fn is_registered(&self, client_id: ClientId) -> bool {
        self.state().clients.contains_key(&client_id)
    }

    pub fn room_members(&self, room: &str) -> Vec<ClientId> {
        let mut members: Vec<ClientId> = self.state().rooms.members(room).copied().collect();
        members.sort();
        members
    }

    pub fn rooms_of(&self, client_id: ClientId) -> Vec<String> {
        self.state().rooms.rooms_of(client_id)
    }
}

fn encode(envelope: &Envelope) -> Option<Frame> {
    match envelope.to_frame() {
        Ok(text) => Some(Frame::from(text)),
        Err(e) => {
            tracing::error!(error = %e, kind = %envelope.kind, "failed to serialize envelope");
            metrics::record_dropped("encoding", 1);
            None
        }
    }
}

fn deliver(recipients: &[Arc<Client>], frame: &Frame) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    for client in recipients {
        match client.try_enqueue(frame.clone()) {
            Ok(()) => report.delivered += 1,
            Err(EnqueueError::Full) => {
                tracing::warn!(
                    client_id = %client.id(),
                    user_id = %client.user_id(),
                    "send queue full, dropping message"
                );
                metrics::record_dropped("queue_full", 1);
                report.dropped += 1;
            }
            Err(EnqueueError::Closed) => {
                tracing::debug!(client_id = %client.id(), "send queue closed, dropping message");
                metrics::record_dropped("queue_closed", 1);
                report.dropped += 1;
            }
        }
    }
    metrics::record_delivered(report.delivered);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::client::{ConnectionState, Identity, Outbound};
    use crate::websocket::message_types::EnvelopeType;
    use serde_json::Value;

    fn connect(hub: &Hub, user: &str, team: Option<&str>) -> (Arc<Client>, Outbound) {
        let (client, outbound) = Client::new(Identity::new(user, team.map(str::to_string)), 16);
        hub.register(client.clone());
        (client, outbound)
    }

    fn drain(outbound: &mut Outbound) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = outbound.try_recv() {
            out.push(serde_json::from_str(&frame).unwrap());
        }
        out
    }

    #[test]
    fn test_register_joins_default_rooms() {
        let hub = Hub::new();
        let (a, _out) = connect(&hub, "u-1", Some("T1"));

        assert_eq!(a.state(), ConnectionState::Registered);
        assert_eq!(hub.rooms_of(a.id()), vec!["global", "team:T1"]);
        assert_eq!(hub.room_members("team:T1"), vec![a.id()]);
    }

    #[test]
    fn test_register_without_team_joins_global_only() {
        let hub = Hub::new();
        let (a, mut out) = connect(&hub, "anonymous", None);

        assert_eq!(hub.rooms_of(a.id()), vec!["global"]);
        assert!(drain(&mut out).is_empty(), "no presence for teamless clients");
    }

    #[test]
    fn test_register_announces_online() {
        let hub = Hub::new();
        let (_a, mut out) = connect(&hub, "u-1", Some("T1"));

        let frames = drain(&mut out);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "presence");
        assert_eq!(frames[0]["room"], "team:T1");
        assert_eq!(frames[0]["data"]["status"], "online");
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let hub = Hub::new();
        let (a, _out_a) = connect(&hub, "u-1", Some("T1"));
        let (_b, mut out_b) = connect(&hub, "u-2", Some("T1"));
        drain(&mut out_b);

        assert!(hub.unregister(&a));
        assert!(!hub.unregister(&a));

        let offline: Vec<_> = drain(&mut out_b)
            .into_iter()
            .filter(|f| f["data"]["status"] == "offline")
            .collect();
        assert_eq!(offline.len(), 1);
        assert_eq!(a.state(), ConnectionState::Closed);
        assert!(!hub.is_registered(a.id()));
    }

    #[test]
    fn test_stale_client_with_reused_id_cannot_unregister_successor() {
        let hub = Hub::new();
        let id = ClientId::new();
        let (old, _old_out) = Client::with_id(id, Identity::new("u-1", None), 4);
        let (new, _new_out) = Client::with_id(id, Identity::new("u-1", None), 4);

        hub.register(old.clone());
        hub.register(new.clone());

        assert!(!hub.unregister(&old));
        assert!(hub.is_registered(id));
        assert!(hub.unregister(&new));
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn test_reused_id_starts_without_previous_rooms() {
        let hub = Hub::new();
        let id = ClientId::new();
        let (old, _old_out) = Client::with_id(id, Identity::new("old-user", Some("T2".into())), 4);
        let (new, _new_out) = Client::with_id(id, Identity::new("new-user", Some("T1".into())), 4);

        hub.register(old.clone());
        assert!(hub.join_room(id, "channel:secret"));
        hub.register(new.clone());

        assert_eq!(hub.rooms_of(id), vec!["global", "team:T1"]);
        assert!(hub.get_online_users("T2").is_empty());
        assert!(hub.room_members("channel:secret").is_empty());
        assert_eq!(hub.get_online_users("T1"), vec!["new-user"]);

        assert!(!hub.unregister(&old));
        assert_eq!(hub.rooms_of(id), vec!["global", "team:T1"]);
    }

    #[test]
    fn test_join_and_leave_room() {
        let hub = Hub::new();
        let (a, _out) = connect(&hub, "u-1", Some("T1"));

        assert!(hub.join_room(a.id(), "channel:c-1"));
        assert_eq!(hub.room_members("channel:c-1"), vec![a.id()]);
        assert!(hub.leave_room(a.id(), "channel:c-1"));
        assert!(hub.room_members("channel:c-1").is_empty());
        assert_eq!(hub.room_count(), 2);
    }

    #[test]
    fn test_join_user_covers_every_connection() {
        let hub = Hub::new();
        let (phone, _o1) = connect(&hub, "u-1", Some("T1"));
        let (desk, _o2) = connect(&hub, "u-1", Some("T1"));
        let (_other, _o3) = connect(&hub, "u-2", Some("T1"));

        assert_eq!(hub.join_user("u-1", "channel:c-1"), 2);
        let mut expected = vec![phone.id(), desk.id()];
        expected.sort();
        assert_eq!(hub.room_members("channel:c-1"), expected);

        assert_eq!(hub.leave_user("u-1", "team:T1"), 0);
        assert_eq!(hub.leave_user("u-1", "channel:c-1"), 2);
        assert!(hub.room_members("channel:c-1").is_empty());
        assert_eq!(hub.join_user("nobody", "channel:c-1"), 0);
    }

    #[test]
    fn test_default_rooms_cannot_be_left() {
        let hub = Hub::new();
        let (a, _out) = connect(&hub, "u-1", Some("T1"));

        assert!(!hub.leave_room(a.id(), "global"));
        assert!(!hub.leave_room(a.id(), "team:T1"));
        assert_eq!(hub.rooms_of(a.id()), vec!["global", "team:T1"]);
    }

    #[test]
    fn test_join_requires_registration() {
        let hub = Hub::new();
        assert!(!hub.join_room(ClientId::new(), "channel:c-1"));
        assert_eq!(hub.room_count(), 0);
    }

    #[test]
    fn test_send_to_user_reaches_every_connection() {
        let hub = Hub::new();
        let (_phone, mut phone_out) = connect(&hub, "u-1", None);
        let (_desk, mut desk_out) = connect(&hub, "u-1", Some("T2"));
        let (_other, mut other_out) = connect(&hub, "u-2", None);
        drain(&mut desk_out);

        let env = Envelope::new(EnvelopeType::Notification, "");
        let report = hub.send_to_user("u-1", &env);

        assert_eq!(report.delivered, 2);
        assert_eq!(drain(&mut phone_out).len(), 1);
        assert_eq!(drain(&mut desk_out).len(), 1);
        assert!(drain(&mut other_out).is_empty());
    }

    #[test]
    fn test_broadcast_without_room_reaches_everyone() {
        let hub = Hub::new();
        let (_a, mut out_a) = connect(&hub, "u-1", None);
        let (_b, mut out_b) = connect(&hub, "u-2", None);

        let report = hub.broadcast(&Envelope::new(EnvelopeType::Notification, "system"));
        assert_eq!(report, DeliveryReport { delivered: 2, dropped: 0 });
        assert_eq!(drain(&mut out_a).len(), 1);
        assert_eq!(drain(&mut out_b).len(), 1);
    }

    #[test]
    fn test_online_users_are_distinct_and_sorted() {
        let hub = Hub::new();
        let (_a, _o1) = connect(&hub, "zed", Some("T1"));
        let (_b, _o2) = connect(&hub, "amy", Some("T1"));
        let (_c, _o3) = connect(&hub, "amy", Some("T1"));
        let (_d, _o4) = connect(&hub, "bob", Some("T2"));

        assert_eq!(hub.get_online_users("T1"), vec!["amy", "zed"]);
        assert_eq!(hub.get_online_users("T2"), vec!["bob"]);
        assert!(hub.get_online_users("T3").is_empty());
    }
}
