//! Onion packet construction and the per-hop forwarding decision.
//!
//! An onion packet on the wire is `0xAA || layer`. Peeling the layer at hop
//! `i` yields either the inner AORP frame (terminal hop) or a 32-byte
//! next-hop id followed by the onward packet, which is forwarded verbatim -
//! an intermediate hop never re-encrypts or modifies the onward bytes, so
//! the next hop receives exactly what the previous hop produced.

use taior_crypto::layer;
use taior_crypto::x25519::{X25519PublicKey, X25519StaticSecret};
use taior_crypto::CryptoError;
use taior_wire::{aorp, routing, MAGIC_AORP, MAGIC_COVER};

use crate::{Result, TaiorError};

/// What a peeled onion packet turned out to be.
#[derive(Debug, PartialEq, Eq)]
pub enum PeeledFrame {
    /// Terminal hop: the inner AORP frame names this node.
    Deliver {
        /// The exact payload, padding stripped.
        payload: Vec<u8>,
    },
    /// Intermediate hop: pass `packet` to `next_hop` unchanged.
    Forward {
        /// The peer named by the routed layer.
        next_hop: String,
        /// The onward onion packet, byte-identical to the peeled cleartext
        /// minus the next-hop field.
        packet: Vec<u8>,
    },
    /// A cover frame that reached its terminal hop.
    Cover,
    /// Unroutable cleartext; dropped.
    Drop,
}

/// Wrap `inner_frame` in one onion layer per hop.
///
/// `hops` is the ordered circuit path with resolved static public keys.
/// The innermost layer is for the terminal hop; each routing layer above it
/// carries the id of the hop that follows.
pub fn build_onion(inner_frame: &[u8], hops: &[(String, X25519PublicKey)]) -> Result<Vec<u8>> {
    let (_, exit_pk) = hops.last().ok_or_else(|| {
        TaiorError::SendFailed("cannot wrap over an empty circuit".to_string())
    })?;

    let mut packet = onion_packet(seal(exit_pk, inner_frame)?);
    for i in (0..hops.len() - 1).rev() {
        let body = routing::wrap_next_hop(&hops[i + 1].0, &packet)
            .map_err(|e| TaiorError::SendFailed(e.to_string()))?;
        packet = onion_packet(seal(&hops[i].1, &body)?);
    }
    Ok(packet)
}

/// Peel one layer off an onion packet with our static secret.
///
/// # Errors
///
/// [`TaiorError::MalformedFrame`] when the packet is structurally invalid,
/// [`TaiorError::DecryptFailed`] when the layer fails to authenticate.
/// Callers drop the packet silently in both cases.
pub fn peel(our_secret: &X25519StaticSecret, frame: &[u8]) -> Result<Vec<u8>> {
    match frame.first() {
        Some(&MAGIC_AORP) => {}
        _ => return Err(TaiorError::MalformedFrame),
    }
    layer::open(our_secret, &frame[1..]).map_err(|e| match e {
        CryptoError::DecryptFailed => TaiorError::DecryptFailed,
        _ => TaiorError::MalformedFrame,
    })
}

/// Decide what to do with peeled cleartext at this node.
pub fn interpret(cleartext: &[u8], local_id: &str) -> PeeledFrame {
    // Terminal case: a valid AORP frame naming this node.
    if cleartext.first() == Some(&MAGIC_AORP) {
        if let Ok(frame) = aorp::parse_aorp(cleartext) {
            if frame.destination == aorp::destination_for_id(local_id) {
                return PeeledFrame::Deliver {
                    payload: frame.payload,
                };
            }
        }
    }

    // A cover frame ends its journey here.
    if cleartext.first() == Some(&MAGIC_COVER) {
        return PeeledFrame::Cover;
    }

    // Routed case: 32-byte next-hop id in front of an onward onion packet.
    if let Ok((next_hop, onward)) = routing::strip_next_hop(cleartext) {
        if !next_hop.is_empty() && onward.first() == Some(&MAGIC_AORP) {
            return PeeledFrame::Forward {
                next_hop,
                packet: onward.to_vec(),
            };
        }
    }

    PeeledFrame::Drop
}

fn seal(pk: &X25519PublicKey, body: &[u8]) -> Result<Vec<u8>> {
    layer::seal(pk, body).map_err(|e| TaiorError::SendFailed(e.to_string()))
}

fn onion_packet(layer_bytes: Vec<u8>) -> Vec<u8> {
    let mut packet = Vec::with_capacity(1 + layer_bytes.len());
    packet.push(MAGIC_AORP);
    packet.extend_from_slice(&layer_bytes);
    packet
}
