//! Reliable outbound delivery.
//!
//! A reply is handed to a `MailTransport` up to `max_attempts` times. After
//! failed attempt `n` the agent waits `2^n` backoff units on a tokio timer
//! (cancellable with the surrounding task). Once attempts are exhausted the
//! full message is written to the `DeadLetterSink` and the failure is
//! returned to the caller.

pub mod dead_letter;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

pub use dead_letter::{DeadLetterRecord, DeadLetterSink};
pub use transport::{MailTransport, SendGridTransport, SmtpTransport};

use crate::config::RetryPolicy;
use crate::error::{DeliveryError, TransportError};

/// A reply ready to send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Result of a successful send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Attempt (from 1) that succeeded.
    pub attempts: u32,
    /// Status reported by the transport.
    pub status: u16,
}

/// Sends replies with bounded retries and a dead-letter fallback.
pub struct DeliveryAgent {
    transport: Arc<dyn MailTransport>,
    dead_letters: Arc<dyn DeadLetterSink>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
}

impl DeliveryAgent {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        dead_letters: Arc<dyn DeadLetterSink>,
        policy: RetryPolicy,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            dead_letters,
            policy,
            attempt_timeout,
        }
    }

    async fn attempt(&self, email: &OutboundEmail) -> Result<u16, TransportError> {
        let status = tokio::time::timeout(self.attempt_timeout, self.transport.deliver(email))
            .await
            .map_err(|_| TransportError::Timeout {
                transport: self.transport.name().to_string(),
                timeout: self.attempt_timeout,
            })??;
        if status >= 400 {
            return Err(TransportError::Rejected {
                transport: self.transport.name().to_string(),
                status,
            });
        }
        Ok(status)
    }

    /// Send `email`, retrying transport failures.
    pub async fn send(&self, email: &OutboundEmail) -> Result<DeliveryReceipt, DeliveryError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        let last_error = loop {
            attempt += 1;
            match self.attempt(email).await {
                Ok(status) => {
                    info!(to = %email.to, attempt, status, "Reply delivered");
                    return Ok(DeliveryReceipt {
                        attempts: attempt,
                        status,
                    });
                }
                Err(e) if attempt >= max_attempts => break e.to_string(),
                Err(e) => {
                    let delay = self.policy.backoff_for(attempt);
                    warn!(
                        to = %email.to,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Delivery attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        let record = DeadLetterRecord::new(email, &last_error, Utc::now());
        match self.dead_letters.append(&record).await {
            Ok(()) => {
                error!(to = %email.to, attempts = attempt, error = %last_error, "Delivery exhausted, dead-lettered");
                Err(DeliveryError::Exhausted {
                    to: email.to.clone(),
                    attempts: attempt,
                    last_error,
                })
            }
            Err(sink_error) => {
                error!(
                    to = %email.to,
                    attempts = attempt,
                    error = %last_error,
                    sink_error = %sink_error,
                    "Delivery exhausted and dead-letter write failed"
                );
                Err(DeliveryError::DeadLetterFailed {
                    to: email.to.clone(),
                    attempts: attempt,
                    last_error,
                    sink_error: sink_error.to_string(),
                })
            }
        }
    }
}
