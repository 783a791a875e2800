//! Encryption at rest for stored credentials.
//!
//! Secrets are sealed with AES-256-GCM. The stored layout is
//! `version (1) | nonce (12) | ciphertext + tag (16)`, and the additional
//! authenticated data binds every value to its tenant and column so a
//! ciphertext cannot be replayed into another row or field.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

const FORMAT_V1: u8 = 0x01;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + NONCE_LEN;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("unsupported ciphertext format")]
    InvalidFormat,
}

/// 256-bit key, wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CryptoKey(Vec<u8>);

impl CryptoKey {
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl std::fmt::Debug for CryptoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CryptoKey([REDACTED])")
    }
}

/// Columns that hold sealed values. Part of the AAD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealedField {
    AccessToken,
    RefreshToken,
    ApiKey,
    DatabasePassword,
    DatabaseUrl,
}

impl SealedField {
    fn label(self) -> &'static str {
        match self {
            SealedField::AccessToken => "access_token",
            SealedField::RefreshToken => "refresh_token",
            SealedField::ApiKey => "api_key",
            SealedField::DatabasePassword => "db_password",
            SealedField::DatabaseUrl => "db_url",
        }
    }
}

fn field_aad(tenant_id: Uuid, field: SealedField) -> Vec<u8> {
    format!("{}|{}", tenant_id, field.label()).into_bytes()
}

/// Encrypt bytes using AES-256-GCM with the supplied AAD.
pub fn encrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let mut sealed = key
        .cipher()
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + sealed.len());
    out.push(FORMAT_V1);
    out.extend_from_slice(&nonce);
    out.append(&mut sealed);
    Ok(out)
}

/// Decrypt bytes produced by [`encrypt_bytes`].
pub fn decrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < HEADER_LEN + TAG_LEN || ciphertext[0] != FORMAT_V1 {
        return Err(CryptoError::InvalidFormat);
    }

    let nonce = Nonce::from_slice(&ciphertext[1..HEADER_LEN]);
    key.cipher()
        .decrypt(
            nonce,
            Payload {
                msg: &ciphertext[HEADER_LEN..],
                aad,
            },
        )
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

/// Seal a UTF-8 secret for storage in `field` of a row owned by `tenant_id`.
pub fn seal(
    key: &CryptoKey,
    tenant_id: Uuid,
    field: SealedField,
    plaintext: &str,
) -> Result<Vec<u8>, CryptoError> {
    encrypt_bytes(key, &field_aad(tenant_id, field), plaintext.as_bytes())
}

/// Reverse of [`seal`].
pub fn open(
    key: &CryptoKey,
    tenant_id: Uuid,
    field: SealedField,
    ciphertext: &[u8],
) -> Result<String, CryptoError> {
    let bytes = decrypt_bytes(key, &field_aad(tenant_id, field), ciphertext)?;
    String::from_utf8(bytes).map_err(|e| CryptoError::DecryptionFailed(format!("invalid UTF-8: {e}")))
}
