//! Inbound message pipeline.
//!
//! Every webhook flows through:
//! 1. `SignatureVerifier::verify()`: shared-secret HMAC check
//! 2. `normalize()`: JSON / multipart / raw MIME → `InboundMessage`
//! 3. `QuotaLimiter::consume()`: per-plan rolling window
//! 4. `TopicRouter::route()`: keyword priority list → profile
//! 5. `ResponseCache::get_or_compute()` around the profile's provider
//! 6. `DeliveryAgent::send()`: retries, then dead-letter

pub mod normalize;
pub mod processor;
pub mod prompt;
pub mod rules;
pub mod types;

pub use processor::{Pipeline, PipelineParts, WebhookRequest};
pub use rules::{Profile, TopicRouter};
pub use types::{InboundMessage, ProcessedReply};
