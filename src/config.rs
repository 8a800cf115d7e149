//! Configuration types, built from environment variables.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};
use crate::pipeline::Profile;
use crate::quota::{PlanDirectory, PlanLimit, PlanTable};

/// Whether inbound webhook signatures are checked.
///
/// Disabling is an explicit operational mode, never a fallback for a
/// missing secret.
#[derive(Debug, Clone)]
pub enum SignatureMode {
    /// Verify with the base64-encoded shared secret.
    Enabled { secret: SecretString },
    /// Skip verification entirely.
    Disabled,
}

/// Where the shared quota / cache / dead-letter state lives.
#[derive(Debug, Clone)]
pub enum StoreLocation {
    /// Local libSQL file (or `:memory:`).
    Local(String),
    /// Remote libSQL / Turso database shared by all workers.
    Remote { url: String, auth_token: SecretString },
}

/// Outbound transport selection.
#[derive(Debug, Clone)]
pub enum TransportConfig {
    SendGrid {
        api_key: SecretString,
        from_address: String,
    },
    Smtp {
        host: String,
        port: u16,
        username: String,
        password: SecretString,
        from_address: String,
    },
}

/// Per-I/O timeouts and the overall request deadline.
#[derive(Debug, Clone)]
pub struct Timeouts {
    pub store: Duration,
    pub answer: Duration,
    pub transport: Duration,
    pub request: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            store: Duration::from_secs(2),
            answer: Duration::from_secs(20),
            transport: Duration::from_secs(10),
            request: Duration::from_secs(60),
        }
    }
}

/// Bounded retry policy for outbound delivery.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Unit of the `2^attempt` backoff.
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay slept after failed attempt `attempt` (counted from 1).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_unit
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub store: StoreLocation,
    pub signature: SignatureMode,
    pub plans: PlanDirectory,
    pub cache_ttl: Duration,
    pub retry: RetryPolicy,
    pub timeouts: Timeouts,
    pub transport: TransportConfig,
    pub llm: LlmConfig,
    /// Profiles answered by a model other than `llm.model`.
    pub profile_models: Vec<(Profile, String)>,
    /// Maximum accepted webhook body size in bytes.
    pub max_body_bytes: usize,
}

/// Default cache TTL: seven days.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 7 * 24 * 3600;

impl AppConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let listen_addr = env_or("RELAY_LISTEN_ADDR", "0.0.0.0:8080")
            .parse()
            .map_err(|e| invalid("RELAY_LISTEN_ADDR", e))?;

        let store = match std::env::var("LIBSQL_URL") {
            Ok(url) => StoreLocation::Remote {
                url,
                auth_token: SecretString::from(std::env::var("LIBSQL_AUTH_TOKEN").unwrap_or_default()),
            },
            Err(_) => StoreLocation::Local(env_or("RELAY_DB_PATH", "./data/reply-relay.db")),
        };

        let signature = signature_mode(
            std::env::var("WEBHOOK_SIGNING_SECRET").ok(),
            std::env::var("WEBHOOK_SIGNATURE_VERIFICATION").ok(),
        )?;

        let plans = match std::env::var("QUOTA_PLANS") {
            Ok(spec) => parse_plan_table(&spec)?,
            Err(_) => PlanTable::default_plans(),
        };
        let default_plan = env_or("QUOTA_DEFAULT_PLAN", "free");
        let overrides = parse_sender_plans(&std::env::var("QUOTA_SENDER_PLANS").unwrap_or_default())?;
        let plans = PlanDirectory::new(plans, default_plan, overrides)?;

        let cache_ttl = Duration::from_secs(env_parse("CACHE_TTL_SECONDS", DEFAULT_CACHE_TTL_SECS)?);

        let retry = RetryPolicy {
            max_attempts: env_parse("DELIVERY_MAX_ATTEMPTS", 3u32)?.max(1),
            backoff_unit: Duration::from_millis(env_parse("DELIVERY_BACKOFF_UNIT_MS", 1000u64)?),
        };

        let defaults = Timeouts::default();
        let timeouts = Timeouts {
            store: Duration::from_millis(env_parse("STORE_TIMEOUT_MS", defaults.store.as_millis() as u64)?),
            answer: Duration::from_millis(env_parse("ANSWER_TIMEOUT_MS", defaults.answer.as_millis() as u64)?),
            transport: Duration::from_millis(env_parse(
                "TRANSPORT_TIMEOUT_MS",
                defaults.transport.as_millis() as u64,
            )?),
            request: Duration::from_millis(env_parse("REQUEST_DEADLINE_MS", defaults.request.as_millis() as u64)?),
        };

        let from_address = env_or("MAIL_FROM_ADDRESS", "no-reply@localhost");
        let transport = if let Ok(api_key) = std::env::var("SENDGRID_API_KEY") {
            TransportConfig::SendGrid {
                api_key: SecretString::from(api_key),
                from_address,
            }
        } else if let Ok(host) = std::env::var("SMTP_HOST") {
            TransportConfig::Smtp {
                host,
                port: env_parse("SMTP_PORT", 587u16)?,
                username: std::env::var("SMTP_USERNAME").unwrap_or_default(),
                password: SecretString::from(std::env::var("SMTP_PASSWORD").unwrap_or_default()),
                from_address,
            }
        } else {
            return Err(ConfigError::MissingRequired {
                key: "SENDGRID_API_KEY or SMTP_HOST".into(),
                hint: "Configure an outbound transport for replies.".into(),
            });
        };

        let llm = if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            LlmConfig {
                backend: LlmBackend::Anthropic,
                api_key: SecretString::from(key),
                model: env_or("ANSWER_MODEL", "claude-sonnet-4-20250514"),
            }
        } else if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            LlmConfig {
                backend: LlmBackend::OpenAi,
                api_key: SecretString::from(key),
                model: env_or("ANSWER_MODEL", "gpt-4.1"),
            }
        } else {
            return Err(ConfigError::MissingRequired {
                key: "ANTHROPIC_API_KEY or OPENAI_API_KEY".into(),
                hint: "An answer provider is required to generate replies.".into(),
            });
        };

        let profile_models =
            parse_profile_models(&std::env::var("ANSWER_PROFILE_MODELS").unwrap_or_default())?;

        Ok(Self {
            listen_addr,
            store,
            signature,
            plans,
            cache_ttl,
            retry,
            timeouts,
            transport,
            llm,
            profile_models,
            max_body_bytes: env_parse("MAX_BODY_BYTES", 10 * 1024 * 1024usize)?,
        })
    }
}

/// Resolve the signature mode from the secret and the explicit switch.
///
/// A missing secret is only accepted when verification is explicitly
/// `disabled`; a secret plus `disabled` is contradictory and rejected.
pub fn signature_mode(
    secret: Option<String>,
    switch: Option<String>,
) -> Result<SignatureMode, ConfigError> {
    let secret = secret.filter(|s| !s.trim().is_empty());
    let disabled = match switch.as_deref().map(str::trim) {
        None | Some("") | Some("enabled") => false,
        Some("disabled") => true,
        Some(other) => {
            return Err(ConfigError::InvalidValue {
                key: "WEBHOOK_SIGNATURE_VERIFICATION".into(),
                message: format!("expected 'enabled' or 'disabled', got '{other}'"),
            });
        }
    };

    match (secret, disabled) {
        (Some(secret), false) => Ok(SignatureMode::Enabled {
            secret: SecretString::from(secret),
        }),
        (None, true) => Ok(SignatureMode::Disabled),
        (Some(_), true) => Err(ConfigError::InvalidValue {
            key: "WEBHOOK_SIGNATURE_VERIFICATION".into(),
            message: "verification is disabled but WEBHOOK_SIGNING_SECRET is set".into(),
        }),
        (None, false) => Err(ConfigError::MissingRequired {
            key: "WEBHOOK_SIGNING_SECRET".into(),
            hint: "Set WEBHOOK_SIGNATURE_VERIFICATION=disabled to run without verification.".into(),
        }),
    }
}

/// Longest accepted quota window (ten years).
pub const MAX_QUOTA_WINDOW_SECS: u64 = 10 * 365 * 24 * 3600;

/// Parse `name=limit/window_secs` pairs separated by commas.
pub fn parse_plan_table(spec: &str) -> Result<PlanTable, ConfigError> {
    let mut plans = HashMap::new();
    for entry in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let bad = |message: &str| ConfigError::InvalidValue {
            key: "QUOTA_PLANS".into(),
            message: format!("{message}: '{entry}'"),
        };
        let (name, rest) = entry.split_once('=').ok_or_else(|| bad("missing '='"))?;
        let (limit, window) = rest.split_once('/').ok_or_else(|| bad("missing '/'"))?;
        let limit: u32 = limit.trim().parse().map_err(|_| bad("invalid limit"))?;
        let window_secs: u64 = window.trim().parse().map_err(|_| bad("invalid window"))?;
        if window_secs == 0 {
            return Err(bad("window must be positive"));
        }
        if window_secs > MAX_QUOTA_WINDOW_SECS {
            return Err(bad("window exceeds ten years"));
        }
        plans.insert(
            name.trim().to_string(),
            PlanLimit {
                limit,
                window: Duration::from_secs(window_secs),
            },
        );
    }
    if plans.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "QUOTA_PLANS".into(),
            message: "no plans defined".into(),
        });
    }
    Ok(PlanTable::new(plans))
}

/// Parse `address=plan` pairs separated by commas.
pub fn parse_sender_plans(spec: &str) -> Result<HashMap<String, String>, ConfigError> {
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(addr, plan)| (addr.trim().to_lowercase(), plan.trim().to_string()))
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: "QUOTA_SENDER_PLANS".into(),
                    message: format!("missing '=': '{entry}'"),
                })
        })
        .collect()
}

/// Parse `profile=model` pairs separated by commas.
pub fn parse_profile_models(spec: &str) -> Result<Vec<(Profile, String)>, ConfigError> {
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let bad = |message: &str| ConfigError::InvalidValue {
                key: "ANSWER_PROFILE_MODELS".into(),
                message: format!("{message}: '{entry}'"),
            };
            let (name, model) = entry.split_once('=').ok_or_else(|| bad("missing '='"))?;
            let profile = Profile::from_name(name.trim()).ok_or_else(|| bad("unknown profile"))?;
            let model = model.trim();
            if model.is_empty() {
                return Err(bad("empty model"));
            }
            Ok((profile, model.to_string()))
        })
        .collect()
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e| invalid(key, e)),
        Err(_) => Ok(default),
    }
}

fn invalid(key: &str, e: impl std::fmt::Display) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    }
}
