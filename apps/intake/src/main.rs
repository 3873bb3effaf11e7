mod canonical;
mod completion;
mod config;
mod db;
mod dedup;
mod errors;
mod intake;
mod ledger;
mod llm_client;
mod models;
mod outbox;
mod pipeline;
mod routes;
mod state;
mod store;
mod summarize;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, StoreBackend};
use crate::db::create_pool;
use crate::dedup::{DedupThresholds, DuplicateDetector};
use crate::intake::validation::ContentPolicy;
use crate::llm_client::LlmClient;
use crate::outbox::{OutboxRelay, RedisPublisher, DEFAULT_CHANNEL};
use crate::pipeline::Pipeline;
use crate::routes::build_router;
use crate::state::AppState;
use crate::store::{MemoryStore, PgStore, Store};
use crate::summarize::{LlmSummaryProvider, Summarizer};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting JD intake v{}", env!("CARGO_PKG_VERSION"));

    let store: Arc<dyn Store> = match config.store_backend {
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for the postgres store")?;
            Arc::new(PgStore::new(create_pool(url).await?))
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store; nothing survives a restart");
            Arc::new(MemoryStore::new())
        }
    };

    // Initialize LLM client
    let llm = LlmClient::new(config.anthropic_api_key.clone())?;
    info!("LLM client initialized (model: {})", llm_client::MODEL);

    let summarizer = Summarizer::new(
        Arc::new(LlmSummaryProvider::new(llm)),
        Duration::from_secs(config.llm_timeout_secs),
    );
    info!("Summarization deadline: {:?}", summarizer.deadline());

    let detector = DuplicateDetector::new(DedupThresholds {
        simhash_max_distance: config.simhash_max_distance,
        trgm_threshold: config.trgm_threshold,
    });

    let pipeline = Pipeline::new(
        Arc::clone(&store),
        detector,
        summarizer,
        ContentPolicy {
            min_core_text_chars: config.min_core_text_chars,
        },
        config.worker_concurrency,
    );

    // Fail whatever a previous process left half-done
    let cutoff = chrono::Utc::now() - chrono::Duration::seconds(config.recovery_stale_secs);
    let recovered = pipeline.recover_interrupted(cutoff).await?;
    if recovered > 0 {
        warn!("Marked {recovered} interrupted ledgers FAILED");
    }

    // Outbox relay runs only when a Redis target is configured
    match &config.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str())?;
            let publisher = RedisPublisher::connect(&client, DEFAULT_CHANNEL).await?;
            let relay = OutboxRelay::new(
                Arc::clone(&store),
                Arc::new(publisher),
                config.outbox_batch_size,
                Duration::from_millis(config.outbox_poll_ms),
            );
            tokio::spawn(relay.run());
            info!("Outbox relay publishing to Redis channel {DEFAULT_CHANNEL}");
        }
        None => warn!("REDIS_URL not set; outbox events accumulate undispatched"),
    }

    let state = AppState {
        pipeline,
        store,
        config: config.clone(),
    };

    let app = build_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()), // TODO: restrict origins once the admin UI host is fixed
    );

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
