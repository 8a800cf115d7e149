//! Shared types for the request-processing pipeline.

use serde::{Deserialize, Serialize};

// ── Inbound message ─────────────────────────────────────────────────

/// Canonical inbound email, produced once per request by the normalizer.
///
/// Addresses are bare (`a@x.com`, never `Alice <a@x.com>`). Fields the wire
/// payload carried beyond these are dropped at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub sender_address: String,
    pub recipient_address: String,
    pub subject: String,
    pub body_text: String,
    /// Content type the payload was declared (or resolved) as.
    pub raw_content_type: String,
}

// ── Pipeline result ─────────────────────────────────────────────────

/// What a successful pipeline run did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedReply {
    /// Address the reply was sent to.
    pub to: String,
    pub subject: String,
    /// Routed profile name.
    pub profile: String,
    /// Whether the answer came from the response cache.
    pub cached: bool,
    /// Units left in the sender's quota window.
    pub quota_remaining: u32,
    /// Delivery attempt that succeeded.
    pub attempts: u32,
}
