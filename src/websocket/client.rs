use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use uuid::Uuid;

use super::rooms;

/// Serialized envelope waiting in a client's outbound queue
pub type Frame = Arc<str>;

/// User id given to connections that arrive without a usable token
pub const ANONYMOUS_USER_ID: &str = "anonymous";

/// Unique identifier for a single WebSocket connection
///
/// Generated when the socket is accepted. One user may hold several
/// connections at once, each with its own id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Who is on the other end of a connection. Fixed for the connection's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub team_id: Option<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, team_id: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            team_id: team_id.filter(|t| !t.is_empty()),
        }
    }

    pub fn anonymous() -> Self {
        Self::new(ANONYMOUS_USER_ID, None)
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id == ANONYMOUS_USER_ID
    }

    pub fn team_room(&self) -> Option<String> {
        self.team_id.as_deref().map(rooms::team)
    }
}

/// Connection lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Registered = 1,
    Active = 2,
    Unregistering = 3,
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Registered,
            2 => ConnectionState::Active,
            3 => ConnectionState::Unregistering,
            _ => ConnectionState::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// Queue at capacity; the frame was dropped
    Full,
    /// Queue already closed by unregistration
    Closed,
}

/// One accepted connection as seen by the hub.
///
/// The hub only ever touches the sending half of the outbound queue; the
/// receiving half ([`Outbound`]) belongs to the connection's write pump.
pub struct Client {
    id: ClientId,
    identity: Identity,
    sender: Mutex<Option<mpsc::Sender<Frame>>>,
    state: AtomicU8,
}

impl Client {
    pub fn new(identity: Identity, queue_capacity: usize) -> (Arc<Self>, Outbound) {
        Self::with_id(ClientId::new(), identity, queue_capacity)
    }

    pub fn with_id(
        id: ClientId,
        identity: Identity,
        queue_capacity: usize,
    ) -> (Arc<Self>, Outbound) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let client = Arc::new(Self {
            id,
            identity,
            sender: Mutex::new(Some(tx)),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
        });
        (client, Outbound { rx })
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn user_id(&self) -> &str {
        &self.identity.user_id
    }

    pub fn team_id(&self) -> Option<&str> {
        self.identity.team_id.as_deref()
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Hands a frame to the write pump without waiting.
    pub fn try_enqueue(&self, frame: Frame) -> Result<(), EnqueueError> {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return Err(EnqueueError::Closed);
        };

        tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Drops the sending half so the write pump sees the queue end.
    /// Frames already queued are still drained.
    pub fn close_queue(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
    }

    pub(crate) fn mark_registered(&self) -> bool {
        self.advance(ConnectionState::Connecting, ConnectionState::Registered)
    }

    pub(crate) fn mark_active(&self) -> bool {
        self.advance(ConnectionState::Registered, ConnectionState::Active)
    }

    /// Moves a live connection into `Unregistering`. Only the first caller
    /// gets `true`.
    pub(crate) fn begin_unregister(&self) -> bool {
        self.advance(ConnectionState::Registered, ConnectionState::Unregistering)
            || self.advance(ConnectionState::Active, ConnectionState::Unregistering)
    }

    fn advance(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("state", &self.state())
            .finish()
    }
}

/// Receiving half of a client's outbound queue.
#[derive(Debug)]
pub struct Outbound {
    rx: mpsc::Receiver<Frame>,
}

impl Outbound {
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Frame, TryRecvError> {
        self.rx.try_recv()
    }

    /// Number of frames currently waiting.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
