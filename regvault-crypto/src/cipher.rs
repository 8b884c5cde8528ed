//! ChaCha20-Poly1305 authenticated encryption.

use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Nonce size in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Name recorded alongside every ciphertext produced by this module.
pub const ALGORITHM: &str = "ChaCha20-Poly1305";

/// Ciphertext plus the nonce it was sealed under.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with the Poly1305 tag appended.
    pub ciphertext: Vec<u8>,
}

impl EncryptedData {
    /// Total size of nonce and ciphertext.
    pub fn len(&self) -> usize {
        NONCE_SIZE + self.ciphertext.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }

    /// Encodes as base64 of `nonce || ciphertext`.
    pub fn to_base64(&self) -> String {
        let mut buf = Vec::with_capacity(self.len());
        buf.extend_from_slice(&self.nonce);
        buf.extend_from_slice(&self.ciphertext);
        STANDARD.encode(buf)
    }

    /// Decodes the format produced by [`to_base64`](Self::to_base64).
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::Decryption(format!("invalid base64: {e}")))?;

        if bytes.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Decryption(format!(
                "encrypted payload too short: {} bytes",
                bytes.len()
            )));
        }

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&bytes[..NONCE_SIZE]);
        Ok(Self {
            nonce,
            ciphertext: bytes[NONCE_SIZE..].to_vec(),
        })
    }
}

/// Generates a fresh random nonce. Never reuse one under the same key.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypts `plaintext` under `key` with a fresh random nonce.
pub fn encrypt(key: &DerivedKey, plaintext: &[u8]) -> CryptoResult<EncryptedData> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let nonce = generate_nonce();

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(EncryptedData { nonce, ciphertext })
}

/// Decrypts and authenticates `encrypted` under `key`.
pub fn decrypt(key: &DerivedKey, encrypted: &EncryptedData) -> CryptoResult<Vec<u8>> {
    if encrypted.ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::Decryption(format!(
            "ciphertext shorter than the authentication tag ({} bytes)",
            encrypted.ciphertext.len()
        )));
    }

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(
            Nonce::from_slice(&encrypted.nonce),
            encrypted.ciphertext.as_slice(),
        )
        .map_err(|_| CryptoError::Decryption("wrong key or tampered data".to_string()))
}

/// Encrypts a UTF-8 string.
pub fn encrypt_string(key: &DerivedKey, plaintext: &str) -> CryptoResult<EncryptedData> {
    encrypt(key, plaintext.as_bytes())
}

/// Decrypts to a UTF-8 string.
pub fn decrypt_string(key: &DerivedKey, encrypted: &EncryptedData) -> CryptoResult<String> {
    let bytes = decrypt(key, encrypted)?;
    String::from_utf8(bytes)
        .map_err(|e| CryptoError::Decryption(format!("plaintext is not valid UTF-8: {e}")))
}
