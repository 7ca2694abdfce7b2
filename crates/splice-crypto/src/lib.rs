//! Hybrid envelope encryption for join results.
//!
//! A result blob is sealed once per request: the bulk payload travels under a
//! fresh AES-256-GCM key, and only that 32-byte key is RSA-OAEP(SHA-256)
//! wrapped for the requesting client's public key. The certificate is
//! supplied per-request, so a compromised key exposes a single host's blob.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroize;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;
/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// A sealed result: the RSA-wrapped AES key, the GCM ciphertext and the
/// nonce, carried in the store as `(ResponseKey, ResponseData, CipherNonce)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    pub response_key: Vec<u8>,
    pub response_data: Vec<u8>,
    pub cipher_nonce: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("recipient public key is not a usable RSA key: {0}")]
    PublicKey(String),
    #[error("random generator failure: {0}")]
    Rng(String),
    #[error("RSA key wrap failed: {0}")]
    KeyWrap(String),
    #[error("RSA key unwrap failed")]
    KeyUnwrap,
    #[error("AES-GCM {0} failed")]
    Aead(&'static str),
    #[error("sealed envelope is missing the {0} component")]
    MissingComponent(&'static str),
    #[error("cipher nonce has length {0}, want {NONCE_LEN}")]
    NonceLength(usize),
}

/// Seals `plaintext` for the RSA public key in `spki_der` (a DER-encoded
/// SubjectPublicKeyInfo). The ephemeral AES key is wiped before returning.
pub fn seal(plaintext: &[u8], spki_der: &[u8]) -> Result<Envelope, CryptoError> {
    let public = RsaPublicKey::from_public_key_der(spki_der)
        .map_err(|e| CryptoError::PublicKey(e.to_string()))?;

    let mut key = [0u8; KEY_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    OsRng
        .try_fill_bytes(&mut key)
        .and_then(|()| OsRng.try_fill_bytes(&mut nonce))
        .map_err(|e| CryptoError::Rng(e.to_string()))?;

    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::Aead("init"))?;
    let response_data = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Aead("seal"))?;

    let response_key = public
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &key)
        .map_err(|e| CryptoError::KeyWrap(e.to_string()))?;
    key.zeroize();

    Ok(Envelope {
        response_key,
        response_data,
        cipher_nonce: nonce.to_vec(),
    })
}

/// Opens a sealed envelope with the recipient's RSA private key and returns
/// the plaintext. Fails when any component is missing, the key cannot be
/// unwrapped, or GCM authentication fails.
pub fn unseal(envelope: &Envelope, private_key: &RsaPrivateKey) -> Result<Vec<u8>, CryptoError> {
    if envelope.response_key.is_empty() {
        return Err(CryptoError::MissingComponent("key"));
    }
    if envelope.response_data.is_empty() {
        return Err(CryptoError::MissingComponent("data"));
    }
    if envelope.cipher_nonce.is_empty() {
        return Err(CryptoError::MissingComponent("nonce"));
    }
    if envelope.cipher_nonce.len() != NONCE_LEN {
        return Err(CryptoError::NonceLength(envelope.cipher_nonce.len()));
    }

    let mut key = private_key
        .decrypt(Oaep::new::<Sha256>(), &envelope.response_key)
        .map_err(|_| CryptoError::KeyUnwrap)?;

    let result = Aes256Gcm::new_from_slice(&key)
        .map_err(|_| CryptoError::Aead("init"))
        .and_then(|cipher| {
            cipher
                .decrypt(
                    Nonce::from_slice(&envelope.cipher_nonce),
                    envelope.response_data.as_slice(),
                )
                .map_err(|_| CryptoError::Aead("open"))
        });
    key.zeroize();

    result
}
