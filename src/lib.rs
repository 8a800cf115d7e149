//! Reply Relay: answers inbound email webhooks with generated replies.

pub mod cache;
pub mod config;
pub mod delivery;
pub mod error;
pub mod llm;
pub mod mail;
pub mod pipeline;
pub mod quota;
pub mod store;
pub mod webhook;
