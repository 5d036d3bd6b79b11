//! Next-hop routing fields.
//!
//! Routing layers above the innermost carry a fixed 32-byte next-hop peer id
//! in front of the onward packet. Short ids are right-padded with NULs; the
//! parser trims them back off.

use crate::{Result, WireError, NEXT_HOP_SIZE};

/// Prepend the fixed 32-byte next-hop field to `inner`.
///
/// # Errors
///
/// Returns [`WireError::NextHopTooLong`] when the peer id exceeds 32 bytes.
pub fn wrap_next_hop(next_id: &str, inner: &[u8]) -> Result<Vec<u8>> {
    let id_bytes = next_id.as_bytes();
    if id_bytes.len() > NEXT_HOP_SIZE {
        return Err(WireError::NextHopTooLong {
            len: id_bytes.len(),
        });
    }

    let mut out = vec![0u8; NEXT_HOP_SIZE + inner.len()];
    out[..id_bytes.len()].copy_from_slice(id_bytes);
    out[NEXT_HOP_SIZE..].copy_from_slice(inner);
    Ok(out)
}

/// Split a routed body into its next-hop peer id and the onward bytes.
///
/// # Errors
///
/// Returns [`WireError::MalformedFrame`] when the body is shorter than the
/// next-hop field or the id is not valid UTF-8.
pub fn strip_next_hop(data: &[u8]) -> Result<(String, &[u8])> {
    if data.len() < NEXT_HOP_SIZE {
        return Err(WireError::MalformedFrame(format!(
            "routed body too short: {} bytes, need {NEXT_HOP_SIZE}",
            data.len()
        )));
    }

    let id_field = &data[..NEXT_HOP_SIZE];
    let end = id_field
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |pos| pos + 1);
    let next_id = std::str::from_utf8(&id_field[..end])
        .map_err(|_| WireError::MalformedFrame("next-hop id is not UTF-8".into()))?
        .to_string();

    Ok((next_id, &data[NEXT_HOP_SIZE..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let wrapped = wrap_next_hop("peer-b", b"onward bytes").expect("wrap");
        assert_eq!(wrapped.len(), NEXT_HOP_SIZE + 12);

        let (id, inner) = strip_next_hop(&wrapped).expect("strip");
        assert_eq!(id, "peer-b");
        assert_eq!(inner, b"onward bytes");
    }

    #[test]
    fn test_trailing_nuls_trimmed() {
        let wrapped = wrap_next_hop("x", b"").expect("wrap");
        let (id, inner) = strip_next_hop(&wrapped).expect("strip");
        assert_eq!(id, "x");
        assert!(inner.is_empty());
    }

    #[test]
    fn test_full_width_id() {
        let id = "a".repeat(NEXT_HOP_SIZE);
        let wrapped = wrap_next_hop(&id, b"body").expect("wrap");
        let (parsed, _) = strip_next_hop(&wrapped).expect("strip");
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_id_too_long() {
        let id = "a".repeat(NEXT_HOP_SIZE + 1);
        assert!(matches!(
            wrap_next_hop(&id, b""),
            Err(WireError::NextHopTooLong { .. })
        ));
    }

    #[test]
    fn test_short_body_rejected() {
        assert!(strip_next_hop(&[0u8; 31]).is_err());
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut wrapped = wrap_next_hop("ab", b"x").expect("wrap");
        wrapped[0] = 0xC3;
        wrapped[1] = 0x28; // invalid UTF-8 sequence
        assert!(strip_next_hop(&wrapped).is_err());
    }
}
