//! # taior-core
//!
//! The anonymous onion-routing core for room-scoped messaging.
//!
//! Every node is simultaneously originator, intermediate hop, and terminal
//! hop. The core builds multi-hop circuits over an injected peer-to-peer
//! substrate, wraps payloads in layered authenticated encryption, injects
//! cover traffic indistinguishable from real packets, and delivers opaque
//! datagrams upward through a delivery callback.
//!
//! ## Architecture
//!
//! ```text
//! Room log / application
//!     |            ^ on_delivery(payload, "anonymous")
//!     v            |
//! Taior (node.rs)            -- facade: send / cover / lifecycle
//!     |
//! Router (router.rs)         -- classify, peel one layer, deliver or forward
//!     |
//! CircuitManager (circuit.rs) + PeerDirectory (directory.rs)
//!     |
//! Substrate trait (substrate.rs) -- opaque frames to directly connected peers
//! ```
//!
//! ## Modules
//!
//! - [`identity`] - Session keypair and `taior://` address token
//! - [`config`] - Core configuration with deployment defaults
//! - [`directory`] - Known peers, handshake state, staleness
//! - [`circuit`] - Circuit construction, selection, refresh, hop policy
//! - [`cover`] - Cover-traffic sizing and pacing
//! - [`router`] - Onion build / peel / forwarding decisions
//! - [`substrate`] - The downward datagram interface
//! - [`events`] - Broadcast bus for observable state changes
//! - [`node`] - The `Taior` facade owning all of the above

pub mod circuit;
pub mod config;
pub mod cover;
pub mod directory;
pub mod events;
pub mod identity;
pub mod node;
pub mod router;
pub mod substrate;

pub use circuit::{HopPolicy, RoutingMode, SendOptions};
pub use config::CoreConfig;
pub use events::{CoreEvent, EventBus};
pub use node::{CircuitInfo, CoreStatus, OutboundPacket, SubstrateHandle, Taior};
pub use substrate::{Substrate, SubstrateError, SubstrateEvent};

/// Error kinds observable to callers of the core.
///
/// Inbound crypto and parsing failures are never surfaced upward; they are
/// local drops. Origination failures are always surfaced - the core never
/// transmits payload bytes that are not wrapped by a valid circuit and
/// authenticated encryption.
#[derive(Debug, thiserror::Error)]
pub enum TaiorError {
    /// `send` called before initialization or after `disconnect`.
    #[error("core is not initialized")]
    NotInitialized,

    /// No usable circuit exists and one could not be built synchronously.
    #[error("no usable circuit")]
    NoCircuit,

    /// A circuit carrying user payload would be shorter than `min_hops`.
    #[error("insufficient anonymity: need {need} hops, have {have} eligible peers")]
    InsufficientAnonymity { need: usize, have: usize },

    /// Onion construction or substrate hand-off failed. The payload was not
    /// transmitted in the clear.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// An inbound frame failed structural validation.
    #[error("malformed frame")]
    MalformedFrame,

    /// An onion layer failed to authenticate.
    #[error("decrypt failed")]
    DecryptFailed,

    /// An in-flight operation was interrupted by `disconnect`.
    #[error("operation cancelled")]
    Cancelled,

    /// A peer failed to complete its handshake in time and was evicted.
    #[error("handshake timed out")]
    HandshakeTimeout,
}

/// Convenience result type for core operations.
pub type Result<T> = std::result::Result<T, TaiorError>;
