//! Encryption-at-rest for sensitive header values.
//!
//! The store treats header bytes as opaque: callers never see a decrypted
//! value unless they hold the key. Mirrors the teacher's `secrets.rs`
//! contract of resolving a single named env var once and never printing its
//! value — here the "secret" is a symmetric key rather than an upstream API
//! token.

use anyhow::{Context, Result};
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{AeadCore, ChaCha20Poly1305, Key, Nonce};

pub const ENV_HEADER_KEY: &str = "INSURANCE_HEADER_ENCRYPTION_KEY";

/// A resolved 256-bit header encryption key. `Debug` is redacted; the raw
/// bytes never appear in logs or error messages.
#[derive(Clone)]
pub struct HeaderKey(Key);

impl std::fmt::Debug for HeaderKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("HeaderKey").field(&"<REDACTED>").finish()
    }
}

impl HeaderKey {
    /// Resolve the key from `INSURANCE_HEADER_ENCRYPTION_KEY` (64 hex chars
    /// = 32 bytes). Returns an error naming the env var, never its value.
    pub fn from_env() -> Result<Self> {
        let hex_key = std::env::var(ENV_HEADER_KEY)
            .with_context(|| format!("missing env var {ENV_HEADER_KEY}"))?;
        Self::from_hex(&hex_key)
    }

    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes = hex::decode(hex_key.trim())
            .context("INSURANCE_HEADER_ENCRYPTION_KEY is not valid hex")?;
        if bytes.len() != 32 {
            anyhow::bail!(
                "INSURANCE_HEADER_ENCRYPTION_KEY must decode to 32 bytes, got {}",
                bytes.len()
            );
        }
        Ok(Self(*Key::from_slice(&bytes)))
    }

    #[cfg(any(test, feature = "testkit"))]
    pub fn for_test() -> Self {
        Self(*Key::from_slice(&[7u8; 32]))
    }
}

/// Encrypt a JSON-encoded headers blob. Returns `(ciphertext, nonce)`.
pub fn encrypt_headers(key: &HeaderKey, headers_json: &str) -> Result<(Vec<u8>, Vec<u8>)> {
    let cipher = ChaCha20Poly1305::new(&key.0);
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, headers_json.as_bytes())
        .map_err(|_| anyhow::anyhow!("header encryption failed"))?;
    Ok((ciphertext, nonce.to_vec()))
}

/// Decrypt a headers blob previously produced by [`encrypt_headers`].
pub fn decrypt_headers(key: &HeaderKey, ciphertext: &[u8], nonce: &[u8]) -> Result<String> {
    let cipher = ChaCha20Poly1305::new(&key.0);
    let nonce = Nonce::from_slice(nonce);
    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| anyhow::anyhow!("header decryption failed (wrong key or corrupt row)"))?;
    String::from_utf8(plaintext).context("decrypted headers were not valid utf-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let key = HeaderKey::for_test();
        let json = r#"{"Authorization":["Bearer secret-token"]}"#;
        let (ct, nonce) = encrypt_headers(&key, json).unwrap();
        assert_ne!(ct, json.as_bytes());
        let pt = decrypt_headers(&key, &ct, &nonce).unwrap();
        assert_eq!(pt, json);
    }

    #[test]
    fn wrong_key_fails() {
        let key = HeaderKey::for_test();
        let other = HeaderKey::from_hex(&"9".repeat(64)).unwrap();
        let (ct, nonce) = encrypt_headers(&key, "{}").unwrap();
        assert!(decrypt_headers(&other, &ct, &nonce).is_err());
    }

    #[test]
    fn rejects_bad_key_length() {
        assert!(HeaderKey::from_hex("abcd").is_err());
    }
}
