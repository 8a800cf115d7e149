//! Pipeline orchestration: one inbound webhook → one delivered reply.
//!
//! Flow:
//! 1. Signature check
//! 2. Normalize the payload into an `InboundMessage`
//! 3. Consume one quota unit for the sender's plan
//! 4. Route to a profile
//! 5. Answer through the response cache
//! 6. Compose and deliver the reply
//!
//! Each stage returns a typed `PipelineError`; later stages never run after
//! a failure. Stages 1-5 are bounded by the request deadline. Delivery runs
//! on its own task with its own retry budget, so neither the deadline nor a
//! dropped request can cut it off before the dead-letter write.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::cache::ResponseCache;
use crate::config::Timeouts;
use crate::delivery::{DeliveryAgent, DeliveryReceipt, OutboundEmail};
use crate::error::{DeliveryError, LlmError, PipelineError};
use crate::llm::{AnswerProvider, ProviderRegistry};
use crate::mail::render_html;
use crate::pipeline::normalize::normalize;
use crate::pipeline::prompt::build_prompt;
use crate::pipeline::rules::{Profile, TopicRouter};
use crate::pipeline::types::{InboundMessage, ProcessedReply};
use crate::quota::{PlanDirectory, QuotaDecision, QuotaLimiter};
use crate::webhook::signature::SignatureVerifier;

/// Subject used when the inbound message had none.
const EMPTY_SUBJECT: &str = "(no subject)";

/// Raw webhook input, borrowed from the HTTP request.
#[derive(Debug, Clone, Copy)]
pub struct WebhookRequest<'a> {
    pub body: &'a [u8],
    pub content_type: Option<&'a str>,
    pub timestamp: Option<&'a str>,
    pub signature: Option<&'a str>,
}

/// Components a pipeline is assembled from.
pub struct PipelineParts {
    pub verifier: SignatureVerifier,
    pub plans: PlanDirectory,
    pub limiter: QuotaLimiter,
    pub router: TopicRouter,
    pub cache: ResponseCache,
    pub providers: ProviderRegistry,
    pub delivery: DeliveryAgent,
    pub timeouts: Timeouts,
}

/// A reply that is answered and ready to hand to delivery.
struct PreparedReply {
    reply: OutboundEmail,
    profile: Profile,
    cached: bool,
    quota_remaining: u32,
}

/// The request-processing pipeline. Shared across requests; holds no
/// per-request state.
pub struct Pipeline {
    verifier: SignatureVerifier,
    plans: PlanDirectory,
    limiter: QuotaLimiter,
    router: TopicRouter,
    cache: ResponseCache,
    providers: ProviderRegistry,
    delivery: Arc<DeliveryAgent>,
    answer_timeout: Duration,
    deadline: Duration,
}

impl Pipeline {
    pub fn new(parts: PipelineParts) -> Self {
        Self {
            verifier: parts.verifier,
            plans: parts.plans,
            limiter: parts.limiter,
            router: parts.router,
            cache: parts.cache,
            providers: parts.providers,
            delivery: Arc::new(parts.delivery),
            answer_timeout: parts.timeouts.answer,
            deadline: parts.timeouts.request,
        }
    }

    /// Run the pipeline, failing with `PipelineError::Timeout` when the
    /// answer is not ready within the request deadline.
    pub async fn handle(&self, request: WebhookRequest<'_>) -> Result<ProcessedReply, PipelineError> {
        let prepared = tokio::time::timeout(self.deadline, self.prepare(request))
            .await
            .map_err(|_| {
                warn!(deadline = ?self.deadline, "Request exceeded deadline");
                PipelineError::Timeout(self.deadline)
            })??;

        let receipt = self.deliver(prepared.reply.clone()).await?;
        info!(
            to = %prepared.reply.to,
            profile = %prepared.profile,
            cached = prepared.cached,
            attempts = receipt.attempts,
            "Reply sent"
        );

        Ok(ProcessedReply {
            to: prepared.reply.to,
            subject: prepared.reply.subject,
            profile: prepared.profile.to_string(),
            cached: prepared.cached,
            quota_remaining: prepared.quota_remaining,
            attempts: receipt.attempts,
        })
    }

    /// Stages 1-5: everything up to a composed reply.
    async fn prepare(&self, request: WebhookRequest<'_>) -> Result<PreparedReply, PipelineError> {
        // Step 1: signature
        self.verifier
            .verify(request.body, request.timestamp, request.signature)?;

        // Step 2: normalize
        let message = normalize(request.body, request.content_type)?;
        info!(
            sender = %message.sender_address,
            recipient = %message.recipient_address,
            content_type = %message.raw_content_type,
            "Processing inbound message"
        );

        // Step 3: quota
        let plan = self.plans.plan_for(&message.sender_address);
        let quota_remaining = match self
            .limiter
            .consume(plan, &message.sender_address, Utc::now())
            .await?
        {
            QuotaDecision::Allowed { remaining } => remaining,
            QuotaDecision::Exceeded { limit } => {
                info!(sender = %message.sender_address, plan, limit, "Quota exceeded");
                return Err(PipelineError::QuotaExceeded {
                    plan: plan.to_string(),
                    sender: message.sender_address,
                });
            }
        };

        // Step 4: route
        let profile = self.router.route(&message.subject, &message.body_text);

        // Step 5: answer (cached per profile)
        let prompt = build_prompt(&message);
        let provider = self.providers.provider_for(profile);
        let (answer, cached) = self
            .cache
            .get_or_compute(profile.as_str(), &prompt, |prompt| {
                generate_with_timeout(provider, prompt, self.answer_timeout)
            })
            .await?;
        debug!(profile = %profile, cached, "Answer ready");

        Ok(PreparedReply {
            reply: compose_reply(&message, &answer),
            profile,
            cached,
            quota_remaining,
        })
    }

    /// Step 6: send on a detached task and wait for its outcome.
    async fn deliver(&self, reply: OutboundEmail) -> Result<DeliveryReceipt, DeliveryError> {
        let agent = Arc::clone(&self.delivery);
        let to = reply.to.clone();
        tokio::spawn(async move { agent.send(&reply).await })
            .await
            .unwrap_or_else(|e| {
                error!(to = %to, error = %e, "Delivery task aborted");
                Err(DeliveryError::Aborted {
                    to,
                    reason: e.to_string(),
                })
            })
    }
}

async fn generate_with_timeout(
    provider: Arc<dyn AnswerProvider>,
    prompt: String,
    timeout: Duration,
) -> Result<String, LlmError> {
    tokio::time::timeout(timeout, provider.generate(&prompt))
        .await
        .map_err(|_| LlmError::Timeout {
            provider: provider.model_name().to_string(),
            timeout,
        })?
}

/// `Re: <subject>`, without stacking a second prefix.
pub fn reply_subject(subject: &str) -> String {
    let subject = subject.trim();
    if subject.is_empty() {
        return format!("Re: {EMPTY_SUBJECT}");
    }
    let already_reply = subject
        .get(..3)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("re:"));
    if already_reply {
        subject.to_string()
    } else {
        format!("Re: {subject}")
    }
}

/// Build the reply to `message` carrying `answer`.
pub fn compose_reply(message: &InboundMessage, answer: &str) -> OutboundEmail {
    OutboundEmail {
        to: message.sender_address.clone(),
        subject: reply_subject(&message.subject),
        html: render_html(answer),
        text: answer.to_string(),
    }
}
