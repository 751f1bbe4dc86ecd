use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use bookstore_reco::{
    api::{create_router, AppState},
    config::Config,
    db::{create_pool, create_redis_client, run_migrations, RecommendationCache},
    services::{
        feed::{self, postgres::PgEventFeed},
        DebounceScheduler, FeedListener, Materializer, PgProfileStore, Pipeline, ScoringPolicy,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        debounce_ms = config.debounce_ms,
        top_n = config.top_n,
        max_candidates = config.max_candidates,
        track_orders = config.track_orders,
        "Starting recommendation engine"
    );

    let pool = create_pool(&config.database_url, config.db_max_connections)
        .await
        .context("failed to connect to Postgres")?;
    run_migrations(&pool).await.context("failed to run migrations")?;

    let recommendations = Arc::new(RecommendationCache::new(create_redis_client(
        &config.redis_url,
    )?));
    let profiles = Arc::new(PgProfileStore::new(pool.clone()));

    let materializer = Arc::new(Materializer::new(
        profiles.clone(),
        recommendations.clone(),
        config.ranking(),
    ));
    let scheduler = DebounceScheduler::new(config.debounce(), materializer.clone());
    let pipeline = Pipeline::new(
        ScoringPolicy::new(config.weights()),
        profiles,
        scheduler.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener = FeedListener::new(
        Arc::new(PgEventFeed::new(pool.clone())),
        pipeline,
        config.sources(),
        config.feed_settings(),
    );
    let workers = listener
        .start(shutdown_rx.clone())
        .await
        .context("failed to start the change feed")?;

    let app = create_router(AppState::new(recommendations, materializer));
    let addr = format!("{}:{}", config.host, config.port);
    let tcp = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("Read API listening on http://{}", addr);

    let mut server_shutdown = shutdown_rx;
    let server = tokio::spawn(async move {
        axum::serve(tcp, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");

    let _ = shutdown_tx.send(true);

    feed::drain(workers, &scheduler).await;
    server.await??;
    pool.close().await;

    Ok(())
}
