//! Session identity: one ephemeral-for-session X25519 keypair and the
//! externally visible address token.
//!
//! The address token is `taior://<hex>` where `<hex>` is the lowercase hex
//! of the first 12 bytes of the BLAKE3 hash of the public key. Nothing is
//! persisted; a restarted node gets a fresh identity.

use taior_crypto::x25519::{X25519PublicKey, X25519StaticSecret};

/// URI scheme of the address token.
pub const ADDRESS_SCHEME: &str = "taior://";

/// Bytes of the public-key hash encoded into the address token.
const ADDRESS_HASH_BYTES: usize = 12;

/// The session identity of one core instance.
pub struct Identity {
    secret: X25519StaticSecret,
    public: X25519PublicKey,
    address: String,
}

impl Identity {
    /// Generate a fresh session identity.
    pub fn generate() -> Self {
        let secret = X25519StaticSecret::random();
        let public = secret.public_key();
        let address = address_for_key(&public);
        Self {
            secret,
            public,
            address,
        }
    }

    /// The static secret key. Dropped (and zeroized) on `disconnect`.
    pub fn secret(&self) -> &X25519StaticSecret {
        &self.secret
    }

    /// The raw static public key, exchanged in handshake frames.
    pub fn public_key(&self) -> &X25519PublicKey {
        &self.public
    }

    /// The externally visible address token.
    pub fn address(&self) -> &str {
        &self.address
    }
}

/// Derive the address token for a public key.
pub fn address_for_key(public: &X25519PublicKey) -> String {
    let digest = blake3::hash(public.as_bytes());
    format!(
        "{ADDRESS_SCHEME}{}",
        hex::encode(&digest.as_bytes()[..ADDRESS_HASH_BYTES])
    )
}
