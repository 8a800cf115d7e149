//! Webhook signature verification.
//!
//! The signature is `base64(HMAC-SHA256(key, timestamp || body))`, where the
//! key is the base64-decoded shared secret.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use secrecy::ExposeSecret;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::config::SignatureMode;
use crate::error::{ConfigError, PipelineError};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the base64 signature.
pub const SIGNATURE_HEADER: &str = "x-signature";
/// Header carrying the signed timestamp.
pub const TIMESTAMP_HEADER: &str = "x-timestamp";

/// Checks inbound webhook signatures, or skips the check when disabled.
#[derive(Clone)]
pub struct SignatureVerifier {
    key: Option<Vec<u8>>,
}

impl SignatureVerifier {
    /// Build from the configured mode. The secret must be valid base64.
    pub fn new(mode: &SignatureMode) -> Result<Self, ConfigError> {
        let key = match mode {
            SignatureMode::Enabled { secret } => {
                let key = STANDARD
                    .decode(secret.expose_secret().trim())
                    .map_err(|e| ConfigError::InvalidValue {
                        key: "WEBHOOK_SIGNING_SECRET".into(),
                        message: format!("not valid base64: {e}"),
                    })?;
                if key.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        key: "WEBHOOK_SIGNING_SECRET".into(),
                        message: "decodes to an empty key".into(),
                    });
                }
                Some(key)
            }
            SignatureMode::Disabled => {
                warn!("Webhook signature verification is disabled");
                None
            }
        };
        Ok(Self { key })
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    /// Verify `signature` over `timestamp || body`.
    ///
    /// Missing headers fail when verification is enabled.
    pub fn verify(
        &self,
        body: &[u8],
        timestamp: Option<&str>,
        signature: Option<&str>,
    ) -> Result<(), PipelineError> {
        let Some(key) = &self.key else {
            return Ok(());
        };
        let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
            warn!(
                has_timestamp = timestamp.is_some(),
                has_signature = signature.is_some(),
                "Webhook rejected: missing signature headers"
            );
            return Err(PipelineError::Auth("missing signature headers".into()));
        };

        let computed = sign(key, timestamp, body)
            .map_err(|_| PipelineError::Auth("signature key rejected".into()))?;

        if constant_time_eq(&computed, signature.trim()) {
            debug!("Webhook signature verified");
            Ok(())
        } else {
            warn!("Webhook rejected: signature mismatch");
            Err(PipelineError::Auth("invalid signature".into()))
        }
    }
}

/// `base64(HMAC-SHA256(key, timestamp || body))`.
pub fn sign(key: &[u8], timestamp: &str, body: &[u8]) -> Result<String, hmac::digest::InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(key)?;
    mac.update(timestamp.as_bytes());
    mac.update(body);
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Constant-time string comparison.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0, |acc, (x, y)| acc | (x ^ y))
        == 0
}
