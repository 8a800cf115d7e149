//! Dead-letter records for replies that could not be delivered.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::delivery::OutboundEmail;
use crate::error::StoreError;

/// Full intended message plus the last transport error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn new(email: &OutboundEmail, error: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            to: email.to.clone(),
            subject: email.subject.clone(),
            html: email.html.clone(),
            text: email.text.clone(),
            error: error.into(),
            timestamp,
        }
    }
}

/// Append-only sink. Write-only from the pipeline's perspective.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn append(&self, record: &DeadLetterRecord) -> Result<(), StoreError>;
}
