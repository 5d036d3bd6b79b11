//! Inner AORP frame construction and parsing.
//!
//! The AORP frame is the innermost plaintext of an onion packet: what the
//! terminal hop sees after peeling its layer. Frames are padded with random
//! bytes to the next 512-byte boundary so that sizes only reveal a bucket,
//! never an exact payload length.

use rand::RngCore;

use crate::{
    Result, WireError, AORP_HEADER_SIZE, DEST_SIZE, MAGIC_AORP, MAX_PAYLOAD_SIZE, PAD_BOUNDARY,
};

/// Flag bit 0: a next-hop field follows somewhere on the path.
pub const FLAG_HAS_NEXT_HOP: u8 = 0x01;

/// A parsed AORP frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AorpFrame {
    /// 16-byte destination: the peer id prefix, right-padded with zeros.
    pub destination: [u8; DEST_SIZE],
    /// The exact payload bytes (padding stripped).
    pub payload: Vec<u8>,
    /// Whether the has-next-hop flag was set.
    pub has_next: bool,
}

/// The 16-byte destination field for a peer id: its first 16 bytes,
/// right-padded with zeros.
pub fn destination_for_id(peer_id: &str) -> [u8; DEST_SIZE] {
    let mut dest = [0u8; DEST_SIZE];
    let bytes = peer_id.as_bytes();
    let n = bytes.len().min(DEST_SIZE);
    dest[..n].copy_from_slice(&bytes[..n]);
    dest
}

/// Total frame length for a given payload length: header + payload, rounded
/// up to the padding boundary.
pub fn padded_len(payload_len: usize) -> usize {
    (AORP_HEADER_SIZE + payload_len).div_ceil(PAD_BOUNDARY) * PAD_BOUNDARY
}

/// Build an AORP frame around `payload`, padded to the 512-byte boundary.
///
/// # Errors
///
/// Returns [`WireError::PayloadTooLarge`] when the payload exceeds the
/// 16-bit length field, and [`WireError::DestinationTooLong`] when the
/// destination id exceeds 16 bytes.
pub fn build_aorp(payload: &[u8], destination_id: &[u8], has_next: bool) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(WireError::PayloadTooLarge { len: payload.len() });
    }
    if destination_id.len() > DEST_SIZE {
        return Err(WireError::DestinationTooLong {
            len: destination_id.len(),
        });
    }

    let total = padded_len(payload.len());
    let mut frame = vec![0u8; total];
    frame[0] = MAGIC_AORP;
    frame[1] = if has_next { FLAG_HAS_NEXT_HOP } else { 0 };
    frame[2..2 + destination_id.len()].copy_from_slice(destination_id);
    frame[18..20].copy_from_slice(&(payload.len() as u16).to_be_bytes());
    frame[AORP_HEADER_SIZE..AORP_HEADER_SIZE + payload.len()].copy_from_slice(payload);

    // Random padding so trailing bytes carry no structure.
    rand::thread_rng().fill_bytes(&mut frame[AORP_HEADER_SIZE + payload.len()..]);

    Ok(frame)
}

/// Parse an AORP frame, validating magic and length consistency.
///
/// # Errors
///
/// Returns [`WireError::MalformedFrame`] on any structural violation.
pub fn parse_aorp(data: &[u8]) -> Result<AorpFrame> {
    if data.len() < AORP_HEADER_SIZE {
        return Err(WireError::MalformedFrame(format!(
            "frame too short: {} bytes, need {AORP_HEADER_SIZE}",
            data.len()
        )));
    }
    if data[0] != MAGIC_AORP {
        return Err(WireError::MalformedFrame(format!(
            "bad magic 0x{:02X}",
            data[0]
        )));
    }

    let payload_len = usize::from(u16::from_be_bytes([data[18], data[19]]));
    if payload_len > data.len() - AORP_HEADER_SIZE {
        return Err(WireError::MalformedFrame(format!(
            "payload length {payload_len} exceeds frame body {}",
            data.len() - AORP_HEADER_SIZE
        )));
    }

    let mut destination = [0u8; DEST_SIZE];
    destination.copy_from_slice(&data[2..2 + DEST_SIZE]);

    Ok(AorpFrame {
        destination,
        payload: data[AORP_HEADER_SIZE..AORP_HEADER_SIZE + payload_len].to_vec(),
        has_next: data[1] & FLAG_HAS_NEXT_HOP != 0,
    })
}
