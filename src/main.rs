mod api;
mod cache;
mod config;
mod engine;
mod error;
mod internal;
mod market;
mod ml;
mod pipeline;
mod scrape;
mod types;
mod upc;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::latency::DecisionLatency;
use crate::api::routes::{router, ApiState};
use crate::cache::RequestCache;
use crate::config::Config;
use crate::error::Result;
use crate::internal::{source_for, MatchEngine};
use crate::ml::MlAdapter;
use crate::pipeline::Pipeline;
use crate::scrape::{HttpDriver, ScrapeWorker};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Internal data: loaded once, indexed, immutable afterwards ---
    let source = source_for(&cfg.internal_data_path);
    let records = source.load_all().await?;
    let matcher = Arc::new(MatchEngine::new(records, cfg.max_internal_matches));
    info!(records = matcher.record_count(), "internal matching engine ready");

    // --- Model artifact: absence or breakage degrades, never aborts ---
    let ml = Arc::new(MlAdapter::load(&cfg.model_path));

    // --- Scrape session: one driver, one worker, FIFO fetch queue ---
    let driver = HttpDriver::new(Duration::from_millis(cfg.scrape_timeout_ms), cfg.headless);
    let (session, mut worker) = ScrapeWorker::new(Box::new(driver), &cfg);
    worker.start().await?;
    tokio::spawn(async move { worker.run().await });
    info!("scrape session started");

    // --- Request cache and latency instrumentation ---
    let cache = Arc::new(RequestCache::new(Duration::from_secs(cfg.cache_ttl_secs)));
    let latency = Arc::new(DecisionLatency::new());

    let pipeline = Pipeline::new(
        session,
        matcher,
        ml,
        Arc::clone(&cache),
        Arc::clone(&latency),
    );

    // --- HTTP API server ---
    let state = ApiState { pipeline, cache, latency };
    let app = router(state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // Dropping the last session handle lets the worker drain and close the
    // driver.
    Ok(())
}
