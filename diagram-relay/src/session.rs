//! Session handles: the core's non-owning view of one connected participant.
//!
//! The transport layer owns the socket. The core only holds a cloneable
//! handle that can push text into the connection's outbound queue and report
//! whether the connection is still open.

use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Stable identity of a session, used for equality and sender exclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a single unicast failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("session {0} is closed")]
    Closed(SessionId),
    #[error("session {0} outbound queue is full")]
    Backpressure(SessionId),
}

/// Handle to one participant's outbound queue.
///
/// Cloning is cheap; equality is by [`SessionId`] only.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    outbound: mpsc::Sender<String>,
}

impl SessionHandle {
    /// Wrap an existing outbound sender.
    pub fn new(outbound: mpsc::Sender<String>) -> Self {
        Self {
            id: SessionId::new(),
            outbound,
        }
    }

    /// Create a handle together with the receiving end of its queue.
    ///
    /// The transport drains the receiver into the socket; tests read it
    /// directly.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// A session is open while its outbound receiver is alive.
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    /// Best-effort, non-blocking unicast.
    pub fn send(&self, text: impl Into<String>) -> Result<(), DeliveryError> {
        self.outbound.try_send(text.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed(self.id),
            mpsc::error::TrySendError::Full(_) => DeliveryError::Backpressure(self.id),
        })
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SessionHandle {}
