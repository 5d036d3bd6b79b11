//! The downward datagram interface.
//!
//! The concrete substrate (loopback, WebRTC, QUIC, ...) is a construction
//! time dependency: anything that can name this node and push opaque frames
//! to a directly connected peer. Inbound traffic flows the other way through
//! [`SubstrateEvent`]s fed into the core's handle.

/// Failure to hand a frame to the substrate.
#[derive(Debug, thiserror::Error)]
#[error("substrate send failed: {0}")]
pub struct SubstrateError(pub String);

/// A bidirectional datagram substrate between directly connected peers.
///
/// Frames are opaque byte arrays of at most 65535 bytes; the substrate is
/// unreliable and unordered.
pub trait Substrate: Send + Sync {
    /// This node's stable peer id on the substrate.
    fn local_peer_id(&self) -> String;

    /// Hand a frame to a directly connected peer.
    fn send_frame(&self, peer_id: &str, frame: Vec<u8>) -> Result<(), SubstrateError>;
}

/// Inbound substrate activity, fed to the core through its handle.
#[derive(Clone, Debug)]
pub enum SubstrateEvent {
    /// A peer connection came up.
    PeerUp {
        /// The peer's stable id.
        peer_id: String,
        /// The peer's substrate address.
        addr: String,
    },
    /// A peer connection went away.
    PeerDown {
        /// The peer's stable id.
        peer_id: String,
    },
    /// A frame arrived from a directly connected peer.
    Frame {
        /// The sending peer's stable id.
        peer_id: String,
        /// The opaque frame bytes.
        frame: Vec<u8>,
    },
}
