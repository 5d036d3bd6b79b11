//! # taior-wire
//!
//! Wire codec for the Taior onion overlay. Pure byte-level construction and
//! parsing; no I/O and no cryptography.
//!
//! ## Frame magics
//!
//! Every substrate frame leads with a one-byte magic:
//!
//! | Magic | Frame |
//! |-------|-------|
//! | `0xAA` | AORP data frame / onion packet |
//! | `0xBB` | Handshake frame (raw static public key) |
//! | `0xFF` | Cover-traffic frame (random fill) |
//!
//! ## Inner AORP frame
//!
//! ```text
//! [0]       magic           = 0xAA
//! [1]       flags           (bit 0 = has-next-hop)
//! [2..17]   destination id  (16 bytes; truncated peer id)
//! [18..19]  payload length  (big-endian u16)
//! [20..]    payload bytes
//! [..]      random padding to the next 512-byte boundary
//! ```
//!
//! The padding boundary (512) and the 16-bit big-endian length are wire-level
//! constants; the bit layout must be reproduced exactly by every node.

pub mod aorp;
pub mod frame;
pub mod routing;

/// AORP data frame / onion packet magic.
pub const MAGIC_AORP: u8 = 0xAA;

/// Handshake frame magic.
pub const MAGIC_HANDSHAKE: u8 = 0xBB;

/// Cover-traffic frame magic.
pub const MAGIC_COVER: u8 = 0xFF;

/// Frames are padded up to multiples of this boundary.
pub const PAD_BOUNDARY: usize = 512;

/// Destination field width in the AORP header.
pub const DEST_SIZE: usize = 16;

/// AORP header size: magic + flags + destination + length.
pub const AORP_HEADER_SIZE: usize = 2 + DEST_SIZE + 2;

/// Maximum payload carried by one AORP frame (16-bit length field).
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Next-hop field width prepended to routed layer bodies.
pub const NEXT_HOP_SIZE: usize = 32;

/// Error types for wire encoding and decoding.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// A frame failed structural validation.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Payload exceeds the 16-bit length field.
    #[error("payload too large: {len} bytes, max {MAX_PAYLOAD_SIZE}")]
    PayloadTooLarge { len: usize },

    /// Destination id exceeds the 16-byte field.
    #[error("destination id too long: {len} bytes, max {DEST_SIZE}")]
    DestinationTooLong { len: usize },

    /// Next-hop id exceeds the 32-byte field.
    #[error("next-hop id too long: {len} bytes, max {NEXT_HOP_SIZE}")]
    NextHopTooLong { len: usize },
}

/// Convenience result type for codec operations.
pub type Result<T> = std::result::Result<T, WireError>;
