//! Error types for Reply Relay.

use std::time::Duration;

use axum::http::StatusCode;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unknown quota plan: {0}")]
    UnknownPlan(String),
}

/// Errors from the shared quota / cache / dead-letter stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store connection error: {0}")]
    Connection(String),

    #[error("Store query failed: {0}")]
    Query(String),

    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Answer-provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Provider {provider} returned an empty answer")]
    EmptyAnswer { provider: String },
}

/// Outbound mail transport errors (a single attempt).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport {transport} rejected message with status {status}")]
    Rejected { transport: String, status: u16 },

    #[error("Transport {transport} request failed: {reason}")]
    RequestFailed { transport: String, reason: String },

    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Transport {transport} timed out after {timeout:?}")]
    Timeout { transport: String, timeout: Duration },
}

/// Payload normalization errors.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("No recognizable fields in payload (content type: {content_type}, tried: {attempted})")]
    Unparseable {
        content_type: String,
        attempted: String,
    },
}

/// Quota limiter errors. A rejection is not an error; see `QuotaDecision`.
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error("Unknown quota plan: {0}")]
    UnknownPlan(String),

    #[error("Quota store unavailable: {0}")]
    Store(#[from] StoreError),
}

/// Terminal delivery failures, reported after all attempts are spent.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Delivery to {to} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        to: String,
        attempts: u32,
        last_error: String,
    },

    #[error(
        "Delivery to {to} failed after {attempts} attempts ({last_error}) and the dead-letter write failed: {sink_error}"
    )]
    DeadLetterFailed {
        to: String,
        attempts: u32,
        last_error: String,
        sink_error: String,
    },

    #[error("Delivery task for {to} aborted: {reason}")]
    Aborted { to: String, reason: String },
}

/// Stage outcome of a pipeline run. Each variant ends the run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Quota exceeded for {sender} on plan {plan}")]
    QuotaExceeded { plan: String, sender: String },

    #[error("Quota store unavailable: {0}")]
    QuotaUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Upstream error: {0}")]
    Upstream(#[from] LlmError),

    #[error("Delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Request exceeded deadline of {0:?}")]
    Timeout(Duration),
}

impl PipelineError {
    /// HTTP status reported to the webhook caller.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Parse(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::QuotaUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Config(_) | Self::Upstream(_) | Self::Delivery(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<NormalizeError> for PipelineError {
    fn from(e: NormalizeError) -> Self {
        match e {
            NormalizeError::UnsupportedMediaType(ct) => Self::UnsupportedMediaType(ct),
            other @ NormalizeError::Unparseable { .. } => Self::Parse(other.to_string()),
        }
    }
}

impl From<QuotaError> for PipelineError {
    fn from(e: QuotaError) -> Self {
        match e {
            QuotaError::UnknownPlan(plan) => Self::Config(format!("unknown quota plan {plan}")),
            QuotaError::Store(e) => Self::QuotaUnavailable(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(
            PipelineError::Auth("bad".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            PipelineError::UnsupportedMediaType("image/png".into()).status_code(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            PipelineError::Parse("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            PipelineError::QuotaExceeded {
                plan: "free".into(),
                sender: "a@x.com".into()
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        let delivery = PipelineError::Delivery(DeliveryError::Exhausted {
            to: "a@x.com".into(),
            attempts: 3,
            last_error: "boom".into(),
        });
        assert_eq!(delivery.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn quota_store_outage_fails_closed() {
        let err: PipelineError =
            QuotaError::Store(StoreError::Connection("refused".into())).into();
        assert!(matches!(err, PipelineError::QuotaUnavailable(_)));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn unknown_plan_is_a_configuration_failure() {
        let err: PipelineError = QuotaError::UnknownPlan("gold".into()).into();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn normalize_errors_map_to_media_and_parse_failures() {
        let unsupported: PipelineError =
            NormalizeError::UnsupportedMediaType("image/png".into()).into();
        assert!(matches!(unsupported, PipelineError::UnsupportedMediaType(_)));

        let unparseable: PipelineError = NormalizeError::Unparseable {
            content_type: "application/json".into(),
            attempted: "json, multipart, rfc822".into(),
        }
        .into();
        match unparseable {
            PipelineError::Parse(msg) => assert!(msg.contains("application/json")),
            other => panic!("expected Parse, got {other:?}"),
        }
    }
}
