//! Hook for storing chat envelopes outside the hub.
//!
//! The hub fans envelopes out in memory only. A sink lets the deployment
//! persist chat traffic without making delivery wait on it: the read pump
//! spawns `persist` and moves on.

use async_trait::async_trait;

use crate::error::AppError;
use crate::websocket::message_types::Envelope;

#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Stores one routed chat envelope. Failures are logged by the caller
    /// and never affect delivery.
    async fn persist(&self, envelope: &Envelope) -> Result<(), AppError>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMessageSink;

#[async_trait]
impl MessageSink for NoopMessageSink {
    async fn persist(&self, _envelope: &Envelope) -> Result<(), AppError> {
        Ok(())
    }
}

/// Writes each chat envelope to the trace log at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMessageSink;

#[async_trait]
impl MessageSink for LoggingMessageSink {
    async fn persist(&self, envelope: &Envelope) -> Result<(), AppError> {
        let body = envelope.to_frame()?;
        tracing::debug!(
            room = envelope.room.as_deref().unwrap_or(""),
            user_id = %envelope.user_id,
            bytes = body.len(),
            "chat message received"
        );
        Ok(())
    }
}
