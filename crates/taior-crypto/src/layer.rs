//! One onion layer: ephemeral–static X25519 + ChaCha20-Poly1305.
//!
//! ## Algorithm
//!
//! ```text
//! Layer.Seal(recipient_pk, body):
//!   1. (eph_pk, shared) = X25519 ephemeral exchange with recipient_pk
//!   2. key   = shared (raw 32 bytes)
//!   3. nonce = 12 random bytes from the CSPRNG
//!   4. ct    = ChaCha20-Poly1305.Encrypt(key, nonce, body)
//!   5. return [len(eph_pk):1][eph_pk:32][nonce:12][ct]
//! ```
//!
//! The receiver imports the ephemeral public key, derives the same shared
//! secret with its static secret, and decrypts. Ephemeral keypairs are
//! single-use; shared secrets and the derived AEAD key are zeroized when the
//! operation completes.

use zeroize::Zeroize;

use crate::aead;
use crate::x25519::{self, X25519PublicKey, X25519StaticSecret, PUBLIC_KEY_SIZE};
use crate::{CryptoError, Result};

/// Bytes a single layer adds on top of its body:
/// pubkey-length prefix + ephemeral public key + nonce + AEAD tag.
pub const LAYER_OVERHEAD: usize = 1 + PUBLIC_KEY_SIZE + aead::NONCE_SIZE + aead::TAG_SIZE;

/// A parsed (but not yet decrypted) onion layer.
pub struct OnionLayer {
    /// The sender's single-use ephemeral public key.
    pub ephemeral_pk: X25519PublicKey,
    /// AEAD nonce for this layer.
    pub nonce: [u8; aead::NONCE_SIZE],
    /// Ciphertext with appended authentication tag.
    pub ciphertext: Vec<u8>,
}

impl OnionLayer {
    /// Serialize to wire bytes: `[pk_len:1][eph_pk][nonce:12][ct]`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let pk = self.ephemeral_pk.to_bytes();
        let mut out = Vec::with_capacity(1 + pk.len() + self.nonce.len() + self.ciphertext.len());
        out.push(pk.len() as u8);
        out.extend_from_slice(&pk);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse wire bytes produced by [`OnionLayer::to_bytes`].
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let pk_len = *data
            .first()
            .ok_or_else(|| CryptoError::MalformedLayer("empty layer".into()))?
            as usize;
        if pk_len != PUBLIC_KEY_SIZE {
            return Err(CryptoError::MalformedLayer(format!(
                "unexpected ephemeral key length {pk_len}"
            )));
        }
        let min_len = 1 + pk_len + aead::NONCE_SIZE + aead::TAG_SIZE;
        if data.len() < min_len {
            return Err(CryptoError::MalformedLayer(format!(
                "layer too short: {} bytes, need at least {min_len}",
                data.len()
            )));
        }

        let ephemeral_pk = X25519PublicKey::try_from_slice(&data[1..1 + pk_len])?;
        let mut nonce = [0u8; aead::NONCE_SIZE];
        nonce.copy_from_slice(&data[1 + pk_len..1 + pk_len + aead::NONCE_SIZE]);
        let ciphertext = data[1 + pk_len + aead::NONCE_SIZE..].to_vec();

        Ok(Self {
            ephemeral_pk,
            nonce,
            ciphertext,
        })
    }
}

/// Wrap `body` in one onion layer addressed to `recipient_pk`.
pub fn seal(recipient_pk: &X25519PublicKey, body: &[u8]) -> Result<Vec<u8>> {
    let (eph_pk, shared) = x25519::ephemeral_key_exchange(recipient_pk);

    let mut key = *shared.as_bytes();
    let nonce = aead::random_nonce();
    let result = aead::encrypt(&key, &nonce, body, &[]);
    key.zeroize();

    let ciphertext = result?;
    Ok(OnionLayer {
        ephemeral_pk: eph_pk,
        nonce,
        ciphertext,
    }
    .to_bytes())
}

/// Peel one onion layer with our static secret, returning the cleartext body.
///
/// Fails with [`CryptoError::DecryptFailed`] when the tag does not verify;
/// callers drop the packet silently in that case.
pub fn open(our_secret: &X25519StaticSecret, data: &[u8]) -> Result<Vec<u8>> {
    let layer = OnionLayer::from_bytes(data)?;
    let shared = our_secret.diffie_hellman(&layer.ephemeral_pk);

    let mut key = *shared.as_bytes();
    let result = aead::decrypt(&key, &layer.nonce, &layer.ciphertext, &[]);
    key.zeroize();

    result
}
