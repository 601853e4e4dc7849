//! Presence is derived, never stored: online/offline envelopes are
//! synthesized at register/unregister time and the online set is read
//! straight from team-room membership.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::client::Identity;
use super::message_types::{Envelope, EnvelopeType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Offline => "offline",
        }
    }
}

/// Builds the presence update for `identity`, targeted at its team room.
///
/// Returns `None` for teamless connections; their presence is not announced.
pub fn presence_envelope(identity: &Identity, status: PresenceStatus) -> Option<Envelope> {
    let room = identity.team_room()?;

    Some(
        Envelope::new(EnvelopeType::Presence, identity.user_id.clone())
            .with_room(room)
            .with_data(json!({
                "user_id": identity.user_id,
                "status": status.as_str(),
            })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_online_envelope() {
        let identity = Identity::new("u-1", Some("T1".into()));
        let env = presence_envelope(&identity, PresenceStatus::Online).unwrap();

        assert_eq!(env.kind, EnvelopeType::Presence);
        assert_eq!(env.room.as_deref(), Some("team:T1"));
        assert_eq!(env.user_id, "u-1");
        assert_eq!(env.data["user_id"], "u-1");
        assert_eq!(env.data["status"], "online");
    }

    #[test]
    fn test_offline_envelope() {
        let identity = Identity::new("u-1", Some("T1".into()));
        let env = presence_envelope(&identity, PresenceStatus::Offline).unwrap();
        assert_eq!(env.data["status"], "offline");
    }

    #[test]
    fn test_teamless_presence_not_emitted() {
        assert!(presence_envelope(&Identity::anonymous(), PresenceStatus::Online).is_none());
    }
}
