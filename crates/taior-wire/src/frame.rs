//! Frame classification, handshake frames, cover frames.

use rand::RngCore;

use crate::{Result, WireError, MAGIC_AORP, MAGIC_COVER, MAGIC_HANDSHAKE};

/// The kind of a substrate frame, dispatched on the leading magic byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// `0xAA` — onion packet / AORP data frame.
    Onion,
    /// `0xBB` — handshake frame carrying a raw static public key.
    Handshake,
    /// `0xFF` — cover-traffic frame.
    Cover,
}

/// Classify a frame by its leading byte. `None` for empty frames or any
/// unreserved magic; such frames are dropped.
pub fn classify(frame: &[u8]) -> Option<FrameKind> {
    match frame.first()? {
        &MAGIC_AORP => Some(FrameKind::Onion),
        &MAGIC_HANDSHAKE => Some(FrameKind::Handshake),
        &MAGIC_COVER => Some(FrameKind::Cover),
        _ => None,
    }
}

/// Build a handshake frame: `0xBB` followed by the raw static public key.
pub fn build_handshake(public_key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + public_key.len());
    out.push(MAGIC_HANDSHAKE);
    out.extend_from_slice(public_key);
    out
}

/// Extract the raw public-key bytes from a handshake frame.
///
/// # Errors
///
/// Returns [`WireError::MalformedFrame`] when the magic is wrong or no key
/// bytes follow. Key-length validation belongs to the peer directory.
pub fn parse_handshake(frame: &[u8]) -> Result<&[u8]> {
    match frame.first() {
        Some(&MAGIC_HANDSHAKE) => {}
        _ => return Err(WireError::MalformedFrame("not a handshake frame".into())),
    }
    if frame.len() < 2 {
        return Err(WireError::MalformedFrame("handshake carries no key".into()));
    }
    Ok(&frame[1..])
}

/// Build a cover frame of exactly `total_len` bytes: `0xFF` followed by
/// uniform random fill.
pub fn build_cover_frame(total_len: usize) -> Vec<u8> {
    let mut out = vec![0u8; total_len.max(1)];
    out[0] = MAGIC_COVER;
    rand::thread_rng().fill_bytes(&mut out[1..]);
    out
}
