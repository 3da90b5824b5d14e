//! Entry point: load config, connect the presence backend, start background tasks, serve.

use std::net::SocketAddr;
use std::sync::Arc;

use televise::config::{Config, PresenceBackend};
use televise::db::{self, PgPresenceStore, PgTitleSource};
use televise::repositories::{
    CassandraPresenceStore, MemoryPresenceStore, PresenceStore, RedisPresenceStore,
};
use televise::services::{
    Clock, PresencePoller, PresenceService, Pruner, SnowflakeGenerator, SystemClock, TitleSource,
};
use televise::{create_app, AppState};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type Backend = (Arc<dyn PresenceStore>, Option<Arc<dyn TitleSource>>);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ids = Arc::new(SnowflakeGenerator::for_current_process(clock.clone()));
    info!(process_id = ids.process_id(), "snowflake generator ready");

    let (store, titles) = connect_backend(&config, clock.clone(), ids).await?;
    let presence = PresenceService::new(store, config.active_window);

    let shutdown = CancellationToken::new();
    let (poller, snapshot) =
        PresencePoller::new(presence.clone(), titles, clock, config.poll_interval);
    let poller = poller.spawn(shutdown.clone());
    let pruner = Pruner::new(presence.clone(), config.retention, config.prune_interval)
        .spawn(shutdown.clone());

    let app = create_app(AppState::new(presence, snapshot));

    info!(addr = %config.server_addr, backend = config.backend.as_str(), "listening");
    let listener = tokio::net::TcpListener::bind(config.server_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    shutdown.cancel();
    let (poller, pruner) = tokio::join!(poller, pruner);
    if let Err(e) = poller.and(pruner) {
        warn!(error = %e, "background task ended abnormally");
    }
    Ok(())
}

async fn connect_backend(
    config: &Config,
    clock: Arc<dyn Clock>,
    ids: Arc<SnowflakeGenerator>,
) -> anyhow::Result<Backend> {
    let backend: Backend = match config.backend {
        PresenceBackend::Postgres => {
            let pool = db::create_pool(&config.database_url).await?;
            db::ensure_schema(&pool).await?;
            let titles = Arc::new(PgTitleSource::new(pool.clone())) as Arc<dyn TitleSource>;
            let store = PgPresenceStore::new(pool, ids, config.active_window);
            (Arc::new(store) as Arc<dyn PresenceStore>, Some(titles))
        }
        PresenceBackend::Redis => {
            let store = RedisPresenceStore::connect(&config.redis_url, clock).await?;
            (Arc::new(store) as Arc<dyn PresenceStore>, None)
        }
        PresenceBackend::Cassandra => {
            let store = CassandraPresenceStore::connect(
                &config.cassandra_nodes,
                &config.cassandra_keyspace,
                config.retention,
                clock,
            )
            .await?;
            (Arc::new(store) as Arc<dyn PresenceStore>, None)
        }
        PresenceBackend::Memory => {
            warn!("memory backend: presence is lost on restart");
            (Arc::new(MemoryPresenceStore::new(clock)) as Arc<dyn PresenceStore>, None)
        }
    };
    info!(backend = backend.0.name(), "presence store ready");
    Ok(backend)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
