//! Quote Courier — Binary Entrypoint
//! Boots the Axum HTTP server, wires the engine ports, and registers the
//! daily push trigger.
//!
//! See `README.md` for quickstart and configuration.

use std::sync::Arc;
use std::time::Duration;

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use quote_courier::almanac::{DayCache, HttpAlmanac};
use quote_courier::api::{create_router, AppState};
use quote_courier::commands::Commands;
use quote_courier::config::CourierConfig;
use quote_courier::dispatch::{FanOutDispatcher, Pacing, PushMode};
use quote_courier::fetcher::ContentFetcher;
use quote_courier::metrics::Metrics;
use quote_courier::onebot::OneBotClient;
use quote_courier::ports::Scheduler;
use quote_courier::probe::ProbeAggregator;
use quote_courier::providers::ProviderRegistry;
use quote_courier::schedule::TokioScheduler;
use quote_courier::store::FileStore;
use quote_courier::usage::UsageClient;

/// Enable compact tracing logs in development only.
/// Activation requires BOTH:
///   - dev environment (debug build OR SHUTTLE_ENV in {local, development, dev})
///   - COURIER_DEV_LOG=1
fn enable_dev_tracing() {
    let dev_flag = std::env::var("COURIER_DEV_LOG")
        .ok()
        .is_some_and(|v| v == "1");

    let is_dev_env = cfg!(debug_assertions)
        || matches!(
            std::env::var("SHUTTLE_ENV")
                .unwrap_or_default()
                .to_ascii_lowercase()
                .as_str(),
            "local" | "development" | "dev"
        );

    if !(dev_flag && is_dev_env) {
        return;
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("quote_courier=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    // Initialize dev tracing early (no-op in production).
    enable_dev_tracing();

    let cfg = CourierConfig::load_default().expect("Failed to load courier config");

    // --- Engine core ---
    let registry = Arc::new(ProviderRegistry::load_from_file(&cfg.providers_path));
    let fetcher = Arc::new(ContentFetcher::new(Duration::from_millis(
        cfg.fetch.timeout_ms,
    )));
    let store = Arc::new(FileStore::new(&cfg.almanac.cache_path));
    let remote = Arc::new(HttpAlmanac::new(
        &cfg.almanac.endpoint,
        Duration::from_millis(cfg.almanac.timeout_ms),
    ));
    let cache = Arc::new(DayCache::new(store, remote));

    // --- Platform adapter (directory + transport in one client) ---
    let bot = Arc::new(OneBotClient::from_env().expect("OneBot endpoint must be configured"));

    let dispatcher = Arc::new(FanOutDispatcher::new(
        bot.clone(),
        bot.clone(),
        registry.clone(),
        fetcher.clone(),
        cache.clone(),
        Pacing::new(cfg.push.manual_pace_ms, cfg.push.scheduled_pace_ms),
    ));

    let prober = Arc::new(ProbeAggregator::from_config(&cfg.probe));
    let usage = UsageClient::from_env().map(Arc::new);

    let commands = Arc::new(
        Commands::new(
            registry,
            fetcher,
            cache,
            dispatcher.clone(),
            bot,
            prober,
            usage,
        )
        .with_probe_notes(cfg.probe.notes.clone()),
    );

    // --- Daily push trigger ---
    let scheduler = TokioScheduler;
    let push = dispatcher.clone();
    scheduler
        .register(
            &cfg.push.cron,
            Box::new(move || {
                let push = push.clone();
                Box::pin(async move {
                    match push.run(PushMode::Scheduled, None).await {
                        Ok(summary) => tracing::info!(
                            success = summary.success_count,
                            failed = summary.fail_count,
                            "scheduled push finished"
                        ),
                        Err(e) => tracing::warn!(error = %e, "scheduled push did not run"),
                    }
                })
            }),
        )
        .expect("Failed to register push schedule");

    let metrics = Metrics::init(cfg.push.scheduled_pace_ms);
    let router = create_router(AppState { commands }).merge(metrics.router());

    Ok(router.into())
}
