//! AEAD sealing for opaque stage tokens
//!
//! The wire form is `base64(nonce || ciphertext)`, one canonical format.
//! The cipher key is never the configured secret itself; it is derived
//! through a one-way hash with a rotation salt, so changing the salt
//! invalidates every outstanding token at once.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use sha2::{Digest, Sha256};

/// AES-GCM nonce length in bytes, carried at the front of the sealed blob.
pub const NONCE_LEN: usize = 12;

/// Derive the token cipher key from the server secret and a rotation salt.
pub fn derive_token_key(secret: &str, salt: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(secret.as_bytes());
    let digest = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

/// Encrypt a plaintext payload into an opaque token string.
pub fn seal(plaintext: &[u8], key: &[u8; 32]) -> Result<String, &'static str> {
    let key = GenericArray::from_slice(key);
    let cipher = Aes256Gcm::new(key);

    let mut nonce = [0u8; NONCE_LEN];
    getrandom::fill(&mut nonce).map_err(|_| "nonce generation failed")?;

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| "encryption failed")?;

    let mut sealed = nonce.to_vec();
    sealed.extend_from_slice(&ciphertext);
    Ok(general_purpose::STANDARD.encode(sealed))
}

/// Decrypt an opaque token string back into the plaintext payload.
///
/// Any malformed input (bad base64, truncated blob, failed authentication)
/// comes back as an error value; callers treat all of them as "invalid token".
pub fn open(token: &str, key: &[u8; 32]) -> Result<Vec<u8>, &'static str> {
    let sealed = general_purpose::STANDARD
        .decode(token)
        .map_err(|_| "invalid base64")?;

    if sealed.len() <= NONCE_LEN {
        return Err("token too short");
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

    let key = GenericArray::from_slice(key);
    let cipher = Aes256Gcm::new(key);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| "decryption failed")
}
