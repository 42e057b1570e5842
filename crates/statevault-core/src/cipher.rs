// ABOUTME: Passphrase encryption for export bundles: PBKDF2-SHA256 key derivation plus AES-256-GCM.
// ABOUTME: Output blobs are base64(nonce || ciphertext+tag); tampering or a wrong password fails loudly.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use thiserror::Error;

/// Fixed application salt for the export passphrase KDF. The password is a
/// user-supplied export/import passphrase, not a long-term credential, so a
/// per-application salt is sufficient.
const KDF_SALT: &[u8] = b"statevault-export-v1";

const KDF_ITERATIONS: u32 = 100_000;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Errors that can occur during encryption or decryption of export blobs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("encryption failed")]
    Encryption,

    #[error("decryption failed: wrong password or corrupted data")]
    Decryption,

    #[error("malformed ciphertext blob")]
    Malformed,
}

fn derive_key(password: &str) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), KDF_SALT, KDF_ITERATIONS, &mut key);
    key
}

/// Encrypt `plaintext` with a key derived from `password`.
///
/// A fresh 96-bit nonce is generated per call and prepended to the
/// ciphertext, so encrypting the same plaintext twice yields distinct blobs.
pub fn encrypt(plaintext: &str, password: &str) -> Result<String, CipherError> {
    let key = derive_key(password);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| CipherError::Encryption)?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(blob))
}

/// Decrypt a blob produced by [`encrypt`].
///
/// GCM authentication rejects a wrong password or tampered ciphertext with
/// [`CipherError::Decryption`] rather than returning garbage plaintext.
pub fn decrypt(blob: &str, password: &str) -> Result<String, CipherError> {
    let raw = BASE64.decode(blob).map_err(|_| CipherError::Malformed)?;
    if raw.len() < NONCE_LEN + TAG_LEN {
        return Err(CipherError::Malformed);
    }
    let (nonce, ciphertext) = raw.split_at(NONCE_LEN);

    let key = derive_key(password);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CipherError::Decryption)?;

    String::from_utf8(plaintext).map_err(|_| CipherError::Decryption)
}
