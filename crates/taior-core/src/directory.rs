//! Peer directory: discovered participants and their handshake state.
//!
//! Peers are owned by the directory and referenced everywhere else by id;
//! circuits store ids, never pointers. Eviction invalidates circuits by scan
//! in the manager, not by callback.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use taior_crypto::x25519::X25519PublicKey;
use taior_crypto::CryptoError;
use tracing::debug;

/// Handshake progress of a peer connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    /// Connection is up; no handshake frame received yet.
    Pending,
    /// Handshake frame received; static public key known.
    Completed,
    /// Handshake did not complete in time.
    Failed,
}

/// A discovered participant.
pub struct Peer {
    /// Stable peer id on the substrate (opaque, at most 32 bytes).
    pub id: String,
    /// Substrate address.
    pub addr: String,
    /// Raw static public key; empty until the handshake completes.
    pub static_public: Vec<u8>,
    /// Cached parsed key handle. Recomputable at any time.
    imported: Option<X25519PublicKey>,
    /// Last time any frame arrived from this peer.
    pub last_seen: Instant,
    /// Handshake progress.
    pub state: HandshakeState,
    /// When the entry was created; drives handshake timeout.
    pending_since: Instant,
}

/// Maps peer id to peer record.
#[derive(Default)]
pub struct PeerDirectory {
    peers: HashMap<String, Peer>,
}

impl PeerDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
        }
    }

    /// Create a Pending entry for a newly connected peer. Idempotent: an
    /// existing entry only has its address refreshed.
    pub fn insert(&mut self, id: &str, addr: &str) {
        let now = Instant::now();
        if let Some(peer) = self.peers.get_mut(id) {
            if !addr.is_empty() {
                peer.addr = addr.to_string();
            }
            return;
        }
        self.peers.insert(
            id.to_string(),
            Peer {
                id: id.to_string(),
                addr: addr.to_string(),
                static_public: Vec::new(),
                imported: None,
                last_seen: now,
                state: HandshakeState::Pending,
                pending_since: now,
            },
        );
    }

    /// Transition a peer to Completed with its raw static public key.
    ///
    /// Rejects keys of the wrong length and invalidates any cached key
    /// handle so the next layer build re-imports.
    pub fn complete_handshake(
        &mut self,
        id: &str,
        static_public: &[u8],
    ) -> Result<(), CryptoError> {
        let parsed = X25519PublicKey::try_from_slice(static_public)?;
        let peer = match self.peers.get_mut(id) {
            Some(peer) => peer,
            None => {
                self.insert(id, "");
                self.peers.get_mut(id).expect("just inserted")
            }
        };
        peer.static_public = static_public.to_vec();
        peer.imported = Some(parsed);
        peer.state = HandshakeState::Completed;
        peer.last_seen = Instant::now();
        debug!(peer = %id, "handshake completed");
        Ok(())
    }

    /// Update `last_seen` for a peer.
    pub fn touch(&mut self, id: &str) {
        if let Some(peer) = self.peers.get_mut(id) {
            peer.last_seen = Instant::now();
        }
    }

    /// Remove a peer, returning whether it existed.
    pub fn remove(&mut self, id: &str) -> bool {
        self.peers.remove(id).is_some()
    }

    /// Evict peers whose `last_seen` is older than the staleness window.
    /// Returns the evicted ids so the circuit manager can purge.
    pub fn evict_stale(&mut self, now: Instant, window: Duration) -> Vec<String> {
        let stale: Vec<String> = self
            .peers
            .values()
            .filter(|p| now.duration_since(p.last_seen) > window)
            .map(|p| p.id.clone())
            .collect();
        for id in &stale {
            self.peers.remove(id);
            debug!(peer = %id, "evicted stale peer");
        }
        stale
    }

    /// Evict peers stuck in Pending past the handshake timeout.
    /// Returns the evicted ids.
    pub fn evict_handshake_timeouts(&mut self, now: Instant, timeout: Duration) -> Vec<String> {
        let timed_out: Vec<String> = self
            .peers
            .values()
            .filter(|p| {
                p.state == HandshakeState::Pending
                    && now.duration_since(p.pending_since) > timeout
            })
            .map(|p| p.id.clone())
            .collect();
        for id in &timed_out {
            if let Some(peer) = self.peers.get_mut(id) {
                peer.state = HandshakeState::Failed;
            }
            self.peers.remove(id);
            debug!(peer = %id, "evicted peer on handshake timeout");
        }
        timed_out
    }

    /// Peers eligible for circuit selection: Completed, non-zero public key,
    /// seen within the staleness window.
    pub fn candidates(&self, now: Instant, window: Duration) -> Vec<String> {
        self.peers
            .values()
            .filter(|p| {
                p.state == HandshakeState::Completed
                    && p.imported.as_ref().is_some_and(|k| !k.is_zero())
                    && now.duration_since(p.last_seen) <= window
            })
            .map(|p| p.id.clone())
            .collect()
    }

    /// The parsed public key of a peer, re-imported if the cache was
    /// invalidated.
    pub fn public_key_of(&mut self, id: &str) -> Option<X25519PublicKey> {
        let peer = self.peers.get_mut(id)?;
        if peer.imported.is_none() && !peer.static_public.is_empty() {
            peer.imported = X25519PublicKey::try_from_slice(&peer.static_public).ok();
        }
        peer.imported.clone()
    }

    /// Look up a peer record.
    pub fn get(&self, id: &str) -> Option<&Peer> {
        self.peers.get(id)
    }

    /// Number of peers still in Pending state.
    pub fn pending_count(&self) -> usize {
        self.peers
            .values()
            .filter(|p| p.state == HandshakeState::Pending)
            .count()
    }

    /// Number of known peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether the directory is empty.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Drop all peers.
    pub fn clear(&mut self) {
        self.peers.clear();
    }
}
