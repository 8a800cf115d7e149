//! Answer generation.
//!
//! Supports:
//! - **Anthropic**: Direct API access via rig-core
//! - **OpenAI**: Direct API access via rig-core
//!
//! The pipeline only sees `AnswerProvider`; `ProviderRegistry` picks one per
//! routed profile.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rig::agent::Agent;
use rig::client::CompletionClient;
use rig::completion::{CompletionModel, Prompt};
use secrecy::ExposeSecret;
use tracing::{debug, info};

use crate::error::LlmError;
use crate::pipeline::rules::Profile;

/// Instructions given to every answer agent.
pub const PREAMBLE: &str = "You answer questions that arrive by email. \
Reply with a helpful, self-contained answer in plain text. \
Do not include a greeting line or a signature.";

/// Upper bound on answer length.
pub const MAX_ANSWER_TOKENS: u64 = 1024;

/// Something that turns a prompt into an answer.
#[async_trait]
pub trait AnswerProvider: Send + Sync {
    /// Model identifier, for logging.
    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

impl LlmBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
        }
    }
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
}

/// `AnswerProvider` backed by a rig agent.
pub struct RigAnswerProvider<M: CompletionModel> {
    agent: Agent<M>,
    provider: &'static str,
    model: String,
}

impl<M: CompletionModel> RigAnswerProvider<M> {
    pub fn new(agent: Agent<M>, provider: &'static str, model: impl Into<String>) -> Self {
        Self {
            agent,
            provider,
            model: model.into(),
        }
    }
}

#[async_trait]
impl<M> AnswerProvider for RigAnswerProvider<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        debug!(provider = self.provider, model = %self.model, "Requesting answer");
        let answer = self
            .agent
            .prompt(prompt)
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: self.provider.to_string(),
                reason: e.to_string(),
            })?;

        let answer = answer.trim().to_string();
        if answer.is_empty() {
            return Err(LlmError::EmptyAnswer {
                provider: self.provider.to_string(),
            });
        }
        Ok(answer)
    }
}

/// Create an answer provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn AnswerProvider>, LlmError> {
    match config.backend {
        LlmBackend::Anthropic => create_anthropic_provider(config),
        LlmBackend::OpenAi => create_openai_provider(config),
    }
}

fn create_anthropic_provider(config: &LlmConfig) -> Result<Arc<dyn AnswerProvider>, LlmError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {}", e),
            }
        })?;

    let agent = client
        .agent(&config.model)
        .preamble(PREAMBLE)
        .max_tokens(MAX_ANSWER_TOKENS)
        .build();
    info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(RigAnswerProvider::new(agent, "anthropic", &config.model)))
}

fn create_openai_provider(config: &LlmConfig) -> Result<Arc<dyn AnswerProvider>, LlmError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {}", e),
            }
        })?;

    let agent = client
        .agent(&config.model)
        .preamble(PREAMBLE)
        .max_tokens(MAX_ANSWER_TOKENS)
        .build();
    info!("Using OpenAI (model: {})", config.model);
    Ok(Arc::new(RigAnswerProvider::new(agent, "openai", &config.model)))
}

/// Maps routed profiles to providers.
///
/// Profiles without a dedicated provider use the default one.
#[derive(Clone)]
pub struct ProviderRegistry {
    default: Arc<dyn AnswerProvider>,
    by_profile: HashMap<Profile, Arc<dyn AnswerProvider>>,
}

impl ProviderRegistry {
    pub fn new(default: Arc<dyn AnswerProvider>) -> Self {
        Self {
            default,
            by_profile: HashMap::new(),
        }
    }

    /// Default provider from `config`, plus one provider per
    /// `(profile, model)` override on the same backend and key.
    pub fn from_config(
        config: &LlmConfig,
        profile_models: &[(Profile, String)],
    ) -> Result<Self, LlmError> {
        let mut registry = Self::new(create_provider(config)?);
        for (profile, model) in profile_models {
            let dedicated = LlmConfig {
                model: model.clone(),
                ..config.clone()
            };
            info!(profile = %profile, model = %model, "Dedicated answer model for profile");
            registry = registry.with_profile(*profile, create_provider(&dedicated)?);
        }
        Ok(registry)
    }

    /// Dedicate `provider` to `profile`.
    pub fn with_profile(mut self, profile: Profile, provider: Arc<dyn AnswerProvider>) -> Self {
        self.by_profile.insert(profile, provider);
        self
    }

    pub fn provider_for(&self, profile: Profile) -> Arc<dyn AnswerProvider> {
        self.by_profile
            .get(&profile)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl AnswerProvider for Named {
        fn model_name(&self) -> &str {
            self.0
        }

        async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
            Ok(format!("{}: {prompt}", self.0))
        }
    }

    #[tokio::test]
    async fn test_create_provider_missing_key_still_constructs() {
        // rig-core clients accept any string as API key at construction time.
        // The actual auth failure happens when making a request.
        let config = LlmConfig {
            backend: LlmBackend::Anthropic,
            api_key: secrecy::SecretString::from("test-key"),
            model: "claude-3-5-sonnet-latest".to_string(),
        };
        let provider = create_provider(&config);
        assert!(provider.is_ok());
        assert_eq!(provider.unwrap().model_name(), "claude-3-5-sonnet-latest");
    }

    #[tokio::test]
    async fn test_create_openai_provider() {
        let config = LlmConfig {
            backend: LlmBackend::OpenAi,
            api_key: secrecy::SecretString::from("sk-test"),
            model: "gpt-4o".to_string(),
        };
        let provider = create_provider(&config);
        assert!(provider.is_ok());
        assert_eq!(provider.unwrap().model_name(), "gpt-4o");
    }

    #[tokio::test]
    async fn registry_from_config_dedicates_profile_models() {
        let config = LlmConfig {
            backend: LlmBackend::Anthropic,
            api_key: secrecy::SecretString::from("test-key"),
            model: "claude-sonnet-4-20250514".to_string(),
        };
        let registry = ProviderRegistry::from_config(
            &config,
            &[(Profile::Titan, "claude-3-5-haiku-latest".to_string())],
        )
        .unwrap();

        assert_eq!(
            registry.provider_for(Profile::Titan).model_name(),
            "claude-3-5-haiku-latest"
        );
        assert_eq!(
            registry.provider_for(Profile::Gemini).model_name(),
            "claude-sonnet-4-20250514"
        );
    }

    #[tokio::test]
    async fn registry_falls_back_to_default() {
        let registry = ProviderRegistry::new(Arc::new(Named("default")))
            .with_profile(Profile::Titan, Arc::new(Named("titan")));

        assert_eq!(registry.provider_for(Profile::Titan).model_name(), "titan");
        assert_eq!(registry.provider_for(Profile::Gemini).model_name(), "default");
        assert_eq!(
            registry
                .provider_for(Profile::Titan)
                .generate("hi")
                .await
                .unwrap(),
            "titan: hi"
        );
    }
}
