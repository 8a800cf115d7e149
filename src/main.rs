use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use reply_relay::cache::ResponseCache;
use reply_relay::config::{AppConfig, StoreLocation, TransportConfig};
use reply_relay::delivery::{DeliveryAgent, MailTransport, SendGridTransport, SmtpTransport};
use reply_relay::llm::ProviderRegistry;
use reply_relay::pipeline::{Pipeline, PipelineParts, TopicRouter};
use reply_relay::quota::QuotaLimiter;
use reply_relay::store::LibSqlBackend;
use reply_relay::webhook::{SignatureVerifier, webhook_routes};

/// How often expired cache rows are swept.
const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // Initialize tracing
    let (writer, _guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(writer)
        .init();

    let config = AppConfig::from_env().context("Invalid configuration")?;

    eprintln!("📬 Reply Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   Webhook: http://{}/webhook/inbound", config.listen_addr);

    // ── Store ────────────────────────────────────────────────────────────
    let store = Arc::new(match &config.store {
        StoreLocation::Local(path) if path == ":memory:" => LibSqlBackend::new_memory().await?,
        StoreLocation::Local(path) => LibSqlBackend::new_local(Path::new(path))
            .await
            .with_context(|| format!("Failed to open database at {path}"))?,
        StoreLocation::Remote { url, auth_token } => {
            use secrecy::ExposeSecret;
            LibSqlBackend::new_remote(url, auth_token.expose_secret())
                .await
                .with_context(|| format!("Failed to connect to {url}"))?
        }
    });
    match &config.store {
        StoreLocation::Local(path) => eprintln!("   Database: {path}"),
        StoreLocation::Remote { url, .. } => eprintln!("   Database: {url}"),
    }

    // ── Answer provider ──────────────────────────────────────────────────
    let providers = ProviderRegistry::from_config(&config.llm, &config.profile_models)?;
    for (profile, model) in &config.profile_models {
        eprintln!("   Model ({profile}): {model}");
    }

    // ── Outbound transport ───────────────────────────────────────────────
    let transport: Arc<dyn MailTransport> = match &config.transport {
        TransportConfig::SendGrid {
            api_key,
            from_address,
        } => {
            eprintln!("   Transport: SendGrid (from {from_address})");
            Arc::new(SendGridTransport::new(api_key.clone(), from_address.clone()))
        }
        TransportConfig::Smtp {
            host,
            port,
            username,
            password,
            from_address,
        } => {
            eprintln!("   Transport: SMTP {host}:{port} (from {from_address})");
            Arc::new(SmtpTransport::new(
                host.clone(),
                *port,
                username.clone(),
                password.clone(),
                from_address.clone(),
            ))
        }
    };

    // ── Pipeline ─────────────────────────────────────────────────────────
    let timeouts = config.timeouts.clone();
    let pipeline = Pipeline::new(PipelineParts {
        verifier: SignatureVerifier::new(&config.signature)?,
        plans: config.plans.clone(),
        limiter: QuotaLimiter::new(store.clone(), config.plans.table().clone(), timeouts.store),
        router: TopicRouter::default_rules(),
        cache: ResponseCache::new(store.clone(), "answers", config.cache_ttl, timeouts.store),
        providers,
        delivery: DeliveryAgent::new(
            transport,
            store.clone(),
            config.retry.clone(),
            timeouts.transport,
        ),
        timeouts,
    });

    // Periodic sweep of expired cache rows
    let purge_store = Arc::clone(&store);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CACHE_PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = purge_store.purge_expired_cache().await {
                warn!(error = %e, "Cache purge failed");
            }
        }
    });

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = webhook_routes(Arc::new(pipeline), config.max_body_bytes);
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "Webhook server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down");
        })
        .await?;

    Ok(())
}
