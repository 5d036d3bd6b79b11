//! # taior-crypto
//!
//! Cryptographic primitives for the Taior onion overlay.
//!
//! The cryptographic suite is fixed for the whole deployment — no algorithm
//! negotiation happens on the wire:
//!
//! - [`x25519`] — X25519 key agreement (RFC 7748)
//! - [`aead`] — ChaCha20-Poly1305 authenticated encryption (RFC 8439)
//! - [`layer`] — one onion layer: ephemeral–static ECDH + AEAD over the body

pub mod aead;
pub mod layer;
pub mod x25519;

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AEAD decryption failed (authentication tag mismatch).
    #[error("AEAD decryption failed")]
    DecryptFailed,

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// An onion layer could not be parsed.
    #[error("malformed layer: {0}")]
    MalformedLayer(String),
}

/// Convenience result type for cryptographic operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
