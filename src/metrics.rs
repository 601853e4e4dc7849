//! Prometheus metrics for the hub
//!
//! Tracks live connections and rooms, delivery outcomes and discarded
//! inbound frames.

use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static::lazy_static! {
    /// Connections currently registered with the hub
    static ref HUB_CONNECTIONS: IntGauge = register_int_gauge!(
        "realtime_hub_connections",
        "Registered WebSocket connections"
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Rooms with at least one member
    static ref HUB_ROOMS: IntGauge = register_int_gauge!(
        "realtime_hub_rooms",
        "Non-empty rooms in the room index"
    ).expect("Prometheus metrics registration should succeed at startup");

    static ref ENVELOPES_DELIVERED: IntCounter = register_int_counter!(
        "realtime_hub_envelopes_delivered_total",
        "Envelopes enqueued onto a client's outbound queue"
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Deliveries dropped because a client queue was full or closed
    static ref ENVELOPES_DROPPED: IntCounterVec = register_int_counter_vec!(
        "realtime_hub_envelopes_dropped_total",
        "Envelopes dropped before reaching a client queue",
        &["reason"]
    ).expect("Prometheus metrics registration should succeed at startup");

    static ref INBOUND_DISCARDED: IntCounterVec = register_int_counter_vec!(
        "realtime_hub_inbound_discarded_total",
        "Inbound frames logged and skipped",
        &["reason"]
    ).expect("Prometheus metrics registration should succeed at startup");
}

pub(crate) fn set_registry_size(connections: usize, rooms: usize) {
    HUB_CONNECTIONS.set(connections as i64);
    HUB_ROOMS.set(rooms as i64);
}

pub(crate) fn record_delivered(count: usize) {
    ENVELOPES_DELIVERED.inc_by(count as u64);
}

pub(crate) fn record_dropped(reason: &str, count: usize) {
    ENVELOPES_DROPPED
        .with_label_values(&[reason])
        .inc_by(count as u64);
}

pub(crate) fn record_inbound_discarded(reason: &str) {
    INBOUND_DISCARDED.with_label_values(&[reason]).inc();
}

/// Renders every registered metric in the Prometheus text format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
