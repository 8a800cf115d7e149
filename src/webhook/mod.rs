//! Inbound webhook surface: signature verification and HTTP routes.

pub mod routes;
pub mod signature;

pub use routes::{WebhookState, webhook_routes};
pub use signature::SignatureVerifier;
