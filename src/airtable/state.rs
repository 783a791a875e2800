//! Signed, expiring OAuth `state` parameter.
//!
//! Wire format: `base64url(json payload) "." base64url(hmac_sha256(payload segment))`,
//! both segments unpadded. Nothing is stored server side; the token carries the
//! tenant and PKCE verifier and is trusted only after the MAC checks out.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Default lifetime of an authorize URL.
pub const DEFAULT_STATE_TTL: Duration = Duration::minutes(5);

const NONCE_LEN: usize = 16;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("malformed state")]
    MalformedState,
    #[error("invalid state signature")]
    InvalidSignature,
    #[error("state expired")]
    StateExpired,
    #[error("state signing secret is not configured")]
    MissingStateSecret,
}

/// Decoded contents of a verified state token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePayload {
    #[serde(rename = "uid")]
    pub tenant_id: Uuid,
    #[serde(rename = "cv")]
    pub pkce_verifier: String,
    #[serde(rename = "n")]
    pub nonce: String,
    /// Epoch seconds
    pub exp: i64,
}

/// HMAC signer/verifier holding the process-wide secret.
#[derive(Clone)]
pub struct StateCodec {
    secret: Vec<u8>,
}

impl std::fmt::Debug for StateCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StateCodec { .. }")
    }
}

impl StateCodec {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, StateError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(StateError::MissingStateSecret);
        }
        Ok(Self {
            secret: secret.to_vec(),
        })
    }

    pub fn sign(&self, tenant_id: Uuid, pkce_verifier: &str, ttl: Duration) -> String {
        self.sign_at(tenant_id, pkce_verifier, ttl, Utc::now())
    }

    pub fn verify(&self, token: &str) -> Result<StatePayload, StateError> {
        self.verify_at(token, Utc::now())
    }

    pub(crate) fn sign_at(
        &self,
        tenant_id: Uuid,
        pkce_verifier: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> String {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let payload = StatePayload {
            tenant_id,
            pkce_verifier: pkce_verifier.to_string(),
            nonce: URL_SAFE_NO_PAD.encode(nonce),
            exp: (now + ttl).timestamp(),
        };
        // Serializing a struct of strings and integers cannot fail.
        let json = serde_json::to_vec(&payload).unwrap_or_default();
        let encoded = URL_SAFE_NO_PAD.encode(json);
        let signature = URL_SAFE_NO_PAD.encode(self.mac(encoded.as_bytes()));

        format!("{encoded}.{signature}")
    }

    pub(crate) fn verify_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<StatePayload, StateError> {
        let (encoded, signature) = token.split_once('.').ok_or(StateError::MalformedState)?;

        // Authenticate before touching the payload.
        let supplied = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| StateError::InvalidSignature)?;
        let expected = self.mac(encoded.as_bytes());
        if !bool::from(expected.as_slice().ct_eq(supplied.as_slice())) {
            return Err(StateError::InvalidSignature);
        }

        let json = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| StateError::MalformedState)?;
        let payload: StatePayload =
            serde_json::from_slice(&json).map_err(|_| StateError::MalformedState)?;

        if payload.exp <= now.timestamp() {
            return Err(StateError::StateExpired);
        }
        Ok(payload)
    }

    fn mac(&self, data: &[u8]) -> Vec<u8> {
        // HMAC accepts keys of any length.
        let mut mac = match HmacSha256::new_from_slice(&self.secret) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC-SHA256 accepts any key length"),
        };
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> StateCodec {
        StateCodec::new("test-state-secret").unwrap()
    }

    #[test]
    fn round_trip_before_expiry() {
        let codec = codec();
        let tenant = Uuid::new_v4();
        let token = codec.sign(tenant, "verifier-abc", DEFAULT_STATE_TTL);

        let payload = codec.verify(&token).unwrap();
        assert_eq!(payload.tenant_id, tenant);
        assert_eq!(payload.pkce_verifier, "verifier-abc");
        assert_eq!(URL_SAFE_NO_PAD.decode(&payload.nonce).unwrap().len(), NONCE_LEN);
    }

    #[test]
    fn expired_after_ttl() {
        let codec = codec();
        let issued = Utc::now();
        let token = codec.sign_at(Uuid::new_v4(), "v", Duration::minutes(5), issued);

        assert!(codec.verify_at(&token, issued + Duration::minutes(4)).is_ok());
        assert_eq!(
            codec.verify_at(&token, issued + Duration::minutes(5)),
            Err(StateError::StateExpired)
        );
        assert_eq!(
            codec.verify_at(&token, issued + Duration::minutes(6)),
            Err(StateError::StateExpired)
        );
    }

    #[test]
    fn any_single_character_flip_fails_signature() {
        let codec = codec();
        let token = codec.sign(Uuid::new_v4(), "verifier", DEFAULT_STATE_TTL);
        let separator = token.find('.').unwrap();

        for (idx, byte) in token.bytes().enumerate() {
            if idx == separator {
                continue;
            }
            let mut tampered = token.clone().into_bytes();
            tampered[idx] = byte ^ 0x01;
            let tampered = String::from_utf8(tampered).unwrap();

            assert_eq!(
                codec.verify(&tampered),
                Err(StateError::InvalidSignature),
                "flip at {idx} was not rejected"
            );
        }
    }

    #[test]
    fn missing_separator_is_malformed() {
        assert_eq!(
            codec().verify("no-separator-here"),
            Err(StateError::MalformedState)
        );
    }

    #[test]
    fn correctly_signed_garbage_is_malformed() {
        let codec = codec();
        let encoded = URL_SAFE_NO_PAD.encode(b"{\"not\":\"a state\"}");
        let signature = URL_SAFE_NO_PAD.encode(codec.mac(encoded.as_bytes()));

        assert_eq!(
            codec.verify(&format!("{encoded}.{signature}")),
            Err(StateError::MalformedState)
        );
    }

    #[test]
    fn other_secret_is_rejected() {
        let token = codec().sign(Uuid::new_v4(), "v", DEFAULT_STATE_TTL);
        let other = StateCodec::new("another-secret").unwrap();
        assert_eq!(other.verify(&token), Err(StateError::InvalidSignature));
    }

    #[test]
    fn empty_secret_is_a_configuration_error() {
        assert!(matches!(
            StateCodec::new(""),
            Err(StateError::MissingStateSecret)
        ));
    }

    #[test]
    fn nonces_differ_between_tokens() {
        let codec = codec();
        let tenant = Uuid::new_v4();
        let a = codec.verify(&codec.sign(tenant, "v", DEFAULT_STATE_TTL)).unwrap();
        let b = codec.verify(&codec.sign(tenant, "v", DEFAULT_STATE_TTL)).unwrap();
        assert_ne!(a.nonce, b.nonce);
    }
}
