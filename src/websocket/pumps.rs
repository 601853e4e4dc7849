//! Per-connection reader and writer tasks.
//!
//! [`serve_connection`] registers the client, runs both pumps until either
//! one stops, then unregisters. The reader owns the liveness deadline; the
//! writer owns every write to the socket, including heartbeats.

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig as SocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;

use super::client::{Client, Outbound};
use super::hub::Hub;
use super::message_types::{Dispatch, EnvelopeType, InboundFrame};
use crate::config::WebSocketConfig;
use crate::metrics;
use crate::services::MessageSink;

/// Timing and size limits for one connection's pumps
#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// Read deadline, renewed on every pong
    pub pong_wait: Duration,
    /// Heartbeat interval; kept below `pong_wait`
    pub ping_period: Duration,
    pub write_wait: Duration,
    pub max_message_size: usize,
    pub queue_capacity: usize,
}

impl PumpConfig {
    pub fn with_pong_wait(mut self, pong_wait: Duration) -> Self {
        self.pong_wait = pong_wait;
        self.ping_period = pong_wait * 9 / 10;
        self
    }

    pub fn with_write_wait(mut self, write_wait: Duration) -> Self {
        self.write_wait = write_wait;
        self
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Handshake settings so oversized frames fail inside the protocol layer.
    pub fn socket_config(&self) -> SocketConfig {
        SocketConfig::default()
            .max_message_size(Some(self.max_message_size))
            .max_frame_size(Some(self.max_message_size))
    }
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self::from(&WebSocketConfig::default())
    }
}

impl From<&WebSocketConfig> for PumpConfig {
    fn from(config: &WebSocketConfig) -> Self {
        Self {
            pong_wait: config.pong_wait,
            ping_period: config.pong_wait * 9 / 10,
            write_wait: config.write_wait,
            max_message_size: config.max_message_size,
            queue_capacity: config.queue_capacity,
        }
    }
}

/// Why a connection's pumps stopped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PumpExit {
    #[error("peer closed the connection")]
    PeerClosed,

    #[error("read failed: {0}")]
    ReadError(String),

    #[error("no pong before read deadline")]
    ReadDeadline,

    #[error("inbound frame exceeds size limit")]
    MessageTooLarge,

    #[error("outbound queue closed")]
    QueueClosed,

    #[error("write failed: {0}")]
    WriteError(String),

    #[error("write deadline exceeded")]
    WriteDeadline,
}

impl PumpExit {
    /// True for the orderly endings: the peer said goodbye or the hub let go.
    pub fn is_graceful(&self) -> bool {
        matches!(self, PumpExit::PeerClosed | PumpExit::QueueClosed)
    }
}

/// Runs one accepted connection to completion.
///
/// Registers `client`, pumps frames both ways until either side fails or
/// a deadline passes, then unregisters and closes the socket. Returns the
/// reason the connection ended.
pub async fn serve_connection<S>(
    hub: Hub,
    client: Arc<Client>,
    mut outbound: Outbound,
    socket: WebSocketStream<S>,
    config: PumpConfig,
    sink: Arc<dyn MessageSink>,
) -> PumpExit
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    hub.register(client.clone());
    client.mark_active();

    let (mut writer, mut reader) = socket.split();

    let exit = tokio::select! {
        exit = read_pump(&mut reader, &hub, &client, &config, &sink) => exit,
        exit = write_pump(&mut writer, &mut outbound, &config) => exit,
    };

    hub.unregister(&client);
    client.close_queue();
    // Already closed or dead sockets fail here; the outcome is the same.
    let _ = time::timeout(config.write_wait, writer.close()).await;

    if exit.is_graceful() {
        tracing::info!(client_id = %client.id(), user_id = %client.user_id(), reason = %exit, "connection closed");
    } else {
        tracing::warn!(client_id = %client.id(), user_id = %client.user_id(), reason = %exit, "connection dropped");
    }
    exit
}

async fn read_pump<S>(
    reader: &mut SplitStream<WebSocketStream<S>>,
    hub: &Hub,
    client: &Client,
    config: &PumpConfig,
    sink: &Arc<dyn MessageSink>,
) -> PumpExit
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut deadline = Instant::now() + config.pong_wait;

    loop {
        let message = match time::timeout_at(deadline, reader.next()).await {
            Err(_) => return PumpExit::ReadDeadline,
            Ok(None) => return PumpExit::PeerClosed,
            Ok(Some(Err(WsError::Capacity(e)))) => {
                tracing::warn!(client_id = %client.id(), error = %e, "inbound frame too large");
                return PumpExit::MessageTooLarge;
            }
            Ok(Some(Err(WsError::ConnectionClosed))) => return PumpExit::PeerClosed,
            Ok(Some(Err(e))) => return PumpExit::ReadError(e.to_string()),
            Ok(Some(Ok(message))) => message,
        };

        if message.len() > config.max_message_size {
            tracing::warn!(
                client_id = %client.id(),
                size = message.len(),
                limit = config.max_message_size,
                "inbound frame too large"
            );
            return PumpExit::MessageTooLarge;
        }

        match message {
            Message::Text(text) => handle_text(hub, client, text.as_str(), sink),
            Message::Pong(_) => deadline = Instant::now() + config.pong_wait,
            Message::Ping(_) => {
                // Answered by the protocol layer on the next flush.
            }
            Message::Binary(data) => {
                tracing::warn!(client_id = %client.id(), size = data.len(), "binary frame ignored");
                metrics::record_inbound_discarded("binary");
            }
            Message::Close(frame) => {
                tracing::debug!(client_id = %client.id(), ?frame, "close frame received");
                return PumpExit::PeerClosed;
            }
            Message::Frame(_) => {}
        }
    }
}

/// Parses, stamps and routes one inbound text frame. Nothing here ends
/// the connection.
fn handle_text(hub: &Hub, client: &Client, text: &str, sink: &Arc<dyn MessageSink>) {
    let frame = match InboundFrame::parse(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(client_id = %client.id(), error = %e, "malformed inbound frame");
            metrics::record_inbound_discarded("malformed");
            return;
        }
    };

    let kind = match frame.dispatch() {
        Dispatch::Route(kind) => kind,
        Dispatch::Discard(reason) => {
            tracing::warn!(
                client_id = %client.id(),
                kind = %frame.kind,
                reason = reason.label(),
                "inbound frame discarded"
            );
            metrics::record_inbound_discarded(reason.label());
            return;
        }
    };

    let Some(envelope) = frame.into_envelope(kind, client.identity()) else {
        tracing::warn!(client_id = %client.id(), kind = %kind, "no room for teamless sender");
        metrics::record_inbound_discarded("no_room");
        return;
    };

    if kind == EnvelopeType::Chat {
        let sink = sink.clone();
        let envelope = envelope.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.persist(&envelope).await {
                tracing::warn!(error = %e, user_id = %envelope.user_id, "failed to persist chat message");
            }
        });
    }

    hub.broadcast(&envelope);
}

async fn write_pump<S>(
    writer: &mut SplitSink<WebSocketStream<S>, Message>,
    outbound: &mut Outbound,
    config: &PumpConfig,
) -> PumpExit
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut heartbeat = time::interval_at(Instant::now() + config.ping_period, config.ping_period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(first) = frame else {
                    let _ = time::timeout(config.write_wait, writer.send(Message::Close(None))).await;
                    return PumpExit::QueueClosed;
                };

                let batch = coalesce(first.as_ref(), outbound, config.queue_capacity);
                if let Err(exit) = send_with_deadline(writer, Message::text(batch), config.write_wait).await {
                    return exit;
                }
            }
            _ = heartbeat.tick() => {
                if let Err(exit) = send_with_deadline(writer, Message::Ping(Bytes::new()), config.write_wait).await {
                    return exit;
                }
            }
        }
    }
}

/// Joins `first` with whatever is already queued, newline-separated.
fn coalesce(first: &str, outbound: &mut Outbound, limit: usize) -> String {
    let mut batch = String::from(first);
    let mut taken = 1;
    while taken < limit {
        match outbound.try_recv() {
            Ok(next) => {
                batch.push('\n');
                batch.push_str(&next);
                taken += 1;
            }
            Err(_) => break,
        }
    }
    batch
}

async fn send_with_deadline<S>(
    writer: &mut SplitSink<WebSocketStream<S>, Message>,
    message: Message,
    write_wait: Duration,
) -> Result<(), PumpExit>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match time::timeout(write_wait, writer.send(message)).await {
        Err(_) => Err(PumpExit::WriteDeadline),
        Ok(Err(e)) => Err(PumpExit::WriteError(e.to_string())),
        Ok(Ok(())) => Ok(()),
    }
}
