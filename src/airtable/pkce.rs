//! PKCE (RFC 7636) verifier and S256 challenge.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const CHALLENGE_METHOD: &str = "S256";

const VERIFIER_ENTROPY_BYTES: usize = 64;
const MIN_VERIFIER_LEN: usize = 43;
const MAX_VERIFIER_LEN: usize = 128;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PkceError {
    #[error("PKCE verifier must be 43-128 characters, got {0}")]
    InvalidVerifierLength(usize),
}

/// 64 random bytes, base64url without padding (86 characters).
pub fn new_verifier() -> Result<String, PkceError> {
    let mut bytes = [0u8; VERIFIER_ENTROPY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    checked_verifier(URL_SAFE_NO_PAD.encode(bytes))
}

fn checked_verifier(verifier: String) -> Result<String, PkceError> {
    if (MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&verifier.len()) {
        Ok(verifier)
    } else {
        Err(PkceError::InvalidVerifierLength(verifier.len()))
    }
}

/// `base64url(SHA256(verifier))` without padding.
pub fn challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
