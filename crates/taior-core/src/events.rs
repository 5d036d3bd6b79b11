//! Core event emission.
//!
//! Events are pushed to subscribers over a broadcast channel; each
//! subscriber has an independent buffer and slow consumers lose the oldest
//! events rather than blocking the core.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default per-subscriber event buffer.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// An observable state change in the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CoreEvent {
    /// A peer completed its handshake and became eligible for circuits.
    PeerConnected {
        /// The peer's substrate id.
        peer_id: String,
    },
    /// A peer was evicted or its connection went away.
    PeerLost {
        /// The peer's substrate id.
        peer_id: String,
    },
    /// A circuit was built and installed as active.
    CircuitBuilt {
        /// The 16-byte circuit id.
        circuit_id: [u8; 16],
        /// Number of hops in the path.
        hops: usize,
    },
    /// An inbound payload terminated at this node.
    PayloadDelivered {
        /// Payload size in bytes.
        bytes: usize,
    },
    /// A cover packet left this node.
    CoverSent {
        /// Inner cover-frame size in bytes.
        bytes: usize,
    },
    /// The core was torn down.
    Disconnected,
}

impl CoreEvent {
    /// Event type name for logs and filtering.
    pub fn name(&self) -> &'static str {
        match self {
            CoreEvent::PeerConnected { .. } => "PeerConnected",
            CoreEvent::PeerLost { .. } => "PeerLost",
            CoreEvent::CircuitBuilt { .. } => "CircuitBuilt",
            CoreEvent::PayloadDelivered { .. } => "PayloadDelivered",
            CoreEvent::CoverSent { .. } => "CoverSent",
            CoreEvent::Disconnected => "Disconnected",
        }
    }
}

/// Broadcast bus fanning events out to subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event to all subscribers. Lack of subscribers is not an
    /// error.
    pub fn emit(&self, event: CoreEvent) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
        let _ = self.sender.send(event);
    }

    /// Subscribe to events from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Total number of events emitted so far.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
