//! Identity check performed before a connection reaches a room worker.
//!
//! Tokens have the form `<participant-id>.<hex HMAC-SHA256(secret, participant-id)>`.
//! The participant id is everything before the last `.`, so ids may contain
//! dots themselves.
//!
//! # Security
//!
//! - Tags are compared in constant time via `ring::hmac::verify`
//! - Rejections carry a generic message; the reason is logged at debug only
//! - Tokens are never logged, only their length

use crate::errors::SignalingError;
use common::secret::{ExposeSecret, SecretString};
use common::ParticipantId;
use ring::hmac;
use tracing::{debug, instrument, trace};

/// Upper bound on accepted token length.
pub const MAX_TOKEN_SIZE_BYTES: usize = 8192;

/// Resolves a bearer token to a participant id, or rejects it.
pub trait IdentityVerifier: Send + Sync + 'static {
    fn verify(&self, token: &str) -> Result<ParticipantId, SignalingError>;
}

/// `IdentityVerifier` backed by a shared HMAC secret.
pub struct HmacIdentityVerifier {
    key: hmac::Key,
}

impl std::fmt::Debug for HmacIdentityVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacIdentityVerifier")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl HmacIdentityVerifier {
    #[must_use]
    pub fn new(secret: &SecretString) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret.expose_secret().as_bytes()),
        }
    }

    /// Mint a token for `participant_id`. Used by tooling and tests.
    #[must_use]
    pub fn issue(&self, participant_id: &ParticipantId) -> String {
        let tag = hmac::sign(&self.key, participant_id.as_str().as_bytes());
        format!("{participant_id}.{}", hex::encode(tag.as_ref()))
    }

    fn reject(reason: &'static str) -> SignalingError {
        debug!(target: "signaling.identity", reason, "Identity token rejected");
        SignalingError::Unauthorized(reason.to_string())
    }
}

impl IdentityVerifier for HmacIdentityVerifier {
    #[instrument(skip_all, name = "signaling.identity.verify")]
    fn verify(&self, token: &str) -> Result<ParticipantId, SignalingError> {
        if token.is_empty() {
            return Err(Self::reject("empty token"));
        }
        if token.len() > MAX_TOKEN_SIZE_BYTES {
            return Err(Self::reject("token too large"));
        }

        let (participant_id, tag_hex) = token
            .rsplit_once('.')
            .ok_or_else(|| Self::reject("malformed token"))?;
        if participant_id.is_empty() {
            return Err(Self::reject("empty participant id"));
        }
        let tag = hex::decode(tag_hex).map_err(|_| Self::reject("malformed tag"))?;

        hmac::verify(&self.key, participant_id.as_bytes(), &tag)
            .map_err(|_| Self::reject("signature mismatch"))?;

        trace!(
            target: "signaling.identity",
            token_len = token.len(),
            "Identity token accepted"
        );
        Ok(ParticipantId::from(participant_id))
    }
}
