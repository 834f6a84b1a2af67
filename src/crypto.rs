//! Symmetric crypto for clique traffic.
//!
//! Each clique holds one [`Cryptographer`] built from its 256-bit shared key.
//! It provides the two primitives the protocol needs: authenticated
//! encryption of message payloads (AES-256-GCM) and derivation of opaque,
//! fixed-length address tags (truncated HMAC-SHA256). Both render to hex so
//! every frame stays ASCII-safe on the wire.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::ChatError;

type HmacSha256 = Hmac<Sha256>;

/// Shared key length in bytes.
pub const KEY_LEN: usize = 32;

const AES_NONCE_LEN: usize = 12;
const TAG_BYTES: usize = 16;

/// Length of an address tag as rendered on the wire (hex chars).
pub const TAG_HEX_LEN: usize = TAG_BYTES * 2;

/// Stateless crypto primitives bound to one shared key.
pub struct Cryptographer {
    cipher: Aes256Gcm,
    key_material: [u8; KEY_LEN],
}

impl Cryptographer {
    /// Build from existing key material.
    pub fn from_key(key_material: [u8; KEY_LEN]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(&key_material);
        let cipher = Aes256Gcm::new(key);
        Self {
            cipher,
            key_material,
        }
    }

    /// Generate a fresh random key, for a locally created clique.
    pub fn generate() -> Self {
        Self::from_key(rand::random())
    }

    /// Build from hex-encoded key material, as carried inside an Invite.
    pub fn from_key_hex(hex_key: &str) -> Result<Self, ChatError> {
        let bytes = hex::decode(hex_key)
            .map_err(|e| ChatError::MalformedMessage(format!("bad key material: {e}")))?;
        let key_material: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            ChatError::MalformedMessage("key material has wrong length".to_string())
        })?;
        Ok(Self::from_key(key_material))
    }

    /// Hex encoding of the key material, for embedding in an Invite.
    pub fn key_hex(&self) -> String {
        hex::encode(self.key_material)
    }

    /// Derive an opaque address tag from the shared key and a context string.
    ///
    /// Deterministic for identical inputs, fixed [`TAG_HEX_LEN`] output, and
    /// not invertible to either the key or the context.
    pub fn derive_tag(&self, context: &str) -> String {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.key_material)
            .expect("HMAC accepts keys of any length");
        mac.update(context.as_bytes());
        let digest = mac.finalize().into_bytes();
        hex::encode(&digest[..TAG_BYTES])
    }

    /// Encrypt a plaintext string, returning hex(`nonce || ciphertext`).
    pub fn encrypt(&self, plaintext: &str) -> Result<String, ChatError> {
        let nonce_bytes: [u8; AES_NONCE_LEN] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| ChatError::IntegrityFailure)?;

        // Prepend nonce to ciphertext
        let mut result = nonce_bytes.to_vec();
        result.extend_from_slice(&ciphertext);

        Ok(hex::encode(result))
    }

    /// Decrypt hex(`nonce || ciphertext`). Fails closed: any hex, length, or
    /// authentication problem yields [`ChatError::IntegrityFailure`] and no
    /// plaintext.
    pub fn decrypt(&self, hex_ciphertext: &str) -> Result<String, ChatError> {
        let data = hex::decode(hex_ciphertext).map_err(|_| ChatError::IntegrityFailure)?;
        if data.len() < AES_NONCE_LEN {
            return Err(ChatError::IntegrityFailure);
        }

        let (nonce_bytes, ciphertext) = data.split_at(AES_NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| ChatError::IntegrityFailure)?;

        String::from_utf8(plaintext).map_err(|_| ChatError::IntegrityFailure)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed() -> Cryptographer {
        Cryptographer::from_key([7u8; KEY_LEN])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let crypto = fixed();
        let ciphertext = crypto.encrypt("hello, clique").unwrap();
        assert_ne!(ciphertext, "hello, clique");
        let plaintext = crypto.decrypt(&ciphertext).unwrap();
        assert_eq!(plaintext, "hello, clique");
    }

    #[test]
    fn test_ciphertext_is_hex() {
        let crypto = fixed();
        let ciphertext = crypto.encrypt("payload").unwrap();
        assert!(ciphertext.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_decrypt_fails_closed_on_corruption() {
        let crypto = fixed();
        let mut ciphertext = crypto.encrypt("payload").unwrap();
        // Flip the last nibble.
        let last = ciphertext.pop().unwrap();
        ciphertext.push(if last == '0' { '1' } else { '0' });

        match crypto.decrypt(&ciphertext) {
            Err(ChatError::IntegrityFailure) => {}
            other => panic!("Expected IntegrityFailure, got {other:?}"),
        }
    }

    #[test]
    fn test_decrypt_wrong_key_fails() {
        let ciphertext = fixed().encrypt("secret").unwrap();
        let other = Cryptographer::from_key([8u8; KEY_LEN]);
        assert!(other.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn test_decrypt_garbage_inputs() {
        let crypto = fixed();
        assert!(crypto.decrypt("not hex at all").is_err());
        assert!(crypto.decrypt("abcd").is_err()); // shorter than a nonce
        assert!(crypto.decrypt("").is_err());
    }

    #[test]
    fn test_derive_tag_deterministic_and_fixed_length() {
        let crypto = fixed();
        let a = crypto.derive_tag("book-club\n0\nalice");
        let b = crypto.derive_tag("book-club\n0\nalice");
        assert_eq!(a, b);
        assert_eq!(a.len(), TAG_HEX_LEN);
    }

    #[test]
    fn test_derive_tag_varies_with_context_and_key() {
        let crypto = fixed();
        let a = crypto.derive_tag("book-club\n0\nalice");
        let b = crypto.derive_tag("book-club\n1\nalice");
        assert_ne!(a, b);

        let other = Cryptographer::from_key([9u8; KEY_LEN]);
        assert_ne!(a, other.derive_tag("book-club\n0\nalice"));
    }

    #[test]
    fn test_key_hex_roundtrip() {
        let crypto = Cryptographer::generate();
        let restored = Cryptographer::from_key_hex(&crypto.key_hex()).unwrap();
        let ciphertext = crypto.encrypt("shared").unwrap();
        assert_eq!(restored.decrypt(&ciphertext).unwrap(), "shared");
    }

    #[test]
    fn test_bad_key_material_rejected() {
        assert!(Cryptographer::from_key_hex("zz").is_err());
        assert!(Cryptographer::from_key_hex("abcd").is_err());
    }
}
