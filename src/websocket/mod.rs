//! Real-time hub: connection registry, rooms, presence and the
//! per-connection pumps that move frames between sockets and the hub.

pub mod client;
pub mod hub;
pub mod message_types;
pub mod presence;
pub mod pumps;
pub mod rooms;

pub use client::{
    Client, ClientId, ConnectionState, EnqueueError, Frame, Identity, Outbound, ANONYMOUS_USER_ID,
};
pub use hub::{DeliveryReport, Hub};
pub use message_types::{Dispatch, DiscardReason, Envelope, EnvelopeType, InboundFrame};
pub use presence::{presence_envelope, PresenceStatus};
pub use pumps::{serve_connection, PumpConfig, PumpExit};
