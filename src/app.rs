//! Application assembly: config, storage, transport, background tasks,
//! and the serve loop with graceful shutdown.

use crate::cli::RunArgs;
use arc_swap::ArcSwap;
use conduit_core::config::{Config, ConfigWatcher};
use conduit_core::cost::PriceStore;
use conduit_provider::transport::RetryTransport;
use conduit_store::detail_store::{self, DetailStore};
use conduit_store::log_writer::{self, LogWriter};
use conduit_store::repo::{ChannelCache, ChannelRepository, SqliteRepo};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct Application {
    config: Arc<ArcSwap<Config>>,
    app_router: axum::Router,
    config_path: String,
    repo: Arc<SqliteRepo>,
    channels: Arc<ChannelCache>,
    transport: Arc<RetryTransport>,
    prices: Arc<PriceStore>,
    log_writer: LogWriter,
    details: Arc<DetailStore>,
}

impl Application {
    /// Build the application from CLI args: load config, open storage,
    /// build the transport, translators, caches, and the router.
    pub fn build(args: &RunArgs) -> anyhow::Result<Self> {
        let mut config = Config::load(&args.config).unwrap_or_else(|e| {
            tracing::warn!(
                "Failed to load config from '{}': {e}, using defaults",
                args.config
            );
            Config::default()
        });

        // CLI overrides
        if let Some(ref host) = args.host {
            config.host = host.clone();
        }
        if let Some(port) = args.port {
            config.port = port;
        }
        if let Some(ref db) = args.db {
            config.db_path = db.clone();
        }

        let repo = Arc::new(SqliteRepo::open(std::path::Path::new(&config.db_path))?);

        let writer_conn = rusqlite_open(&config.db_path)?;
        let log_writer = LogWriter::start(writer_conn);

        let details = Arc::new(DetailStore::new(config.detail.clone(), log_writer.clone()));

        let channels = Arc::new(ChannelCache::new());
        channels.refresh(repo.as_ref() as &dyn ChannelRepository);

        let client = conduit_provider::build_http_client(30)?;
        let transport = Arc::new(RetryTransport::new(client, config.retry.clone()));

        let prices = Arc::new(PriceStore::new(&config.model_prices));
        let translators = Arc::new(conduit_translator::build_registry());

        let config = Arc::new(ArcSwap::from_pointee(config));

        let state = conduit_server::AppState {
            config: config.clone(),
            repo: repo.clone(),
            channels: channels.clone(),
            translators,
            transport: transport.clone(),
            log_writer: log_writer.clone(),
            details: details.clone(),
            prices: prices.clone(),
            start_time: Instant::now(),
        };
        let app_router = conduit_server::build_router(state);

        Ok(Self {
            config,
            app_router,
            config_path: args.config.clone(),
            repo,
            channels,
            transport,
            prices,
            log_writer,
            details,
        })
    }

    /// Serve HTTP, run the background loops, and drain gracefully on
    /// ctrl-c / SIGTERM.
    pub async fn serve(self) -> anyhow::Result<()> {
        let Self {
            config,
            app_router,
            config_path,
            repo,
            channels,
            transport,
            prices,
            log_writer,
            details,
        } = self;

        // Hot-reload: retry transport and price table pick up changes.
        let watcher_transport = transport.clone();
        let watcher_prices = prices.clone();
        let _watcher = ConfigWatcher::start(config_path, config.clone(), move |new_cfg| {
            watcher_transport.update_config(new_cfg.retry.clone());
            watcher_prices.update_prices(&new_cfg.model_prices);
        })
        .inspect_err(|e| tracing::warn!("config watcher unavailable: {e}"))
        .ok();

        let cfg = config.load();

        // Background loops: channel refresh, detail cleanup, pending sweep.
        let refresh_repo = repo.clone();
        let refresh_channels = channels.clone();
        let refresh_secs = cfg.channel_refresh_secs;
        let channel_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(refresh_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                refresh_channels.refresh(refresh_repo.as_ref() as &dyn ChannelRepository);
            }
        });
        let cleanup_task =
            detail_store::spawn_cleanup(details.clone(), cfg.detail.cleanup_interval_secs);
        let sweep_task = log_writer::spawn_pending_cleaner(
            log_writer.clone(),
            cfg.pending_sweep.interval_secs,
            cfg.pending_sweep.orphan_after_secs,
        );

        let addr = format!("{}:{}", cfg.host, cfg.port);
        tracing::info!("Starting HTTP server on {addr}");
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        axum::serve(
            listener,
            app_router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        // Drain: stop loops, flush unpersisted details, stop the writer.
        channel_task.abort();
        cleanup_task.abort();
        sweep_task.abort();
        details.flush_all();
        log_writer.shutdown().await;

        tracing::info!("Server shut down.");
        Ok(())
    }
}

fn rusqlite_open(path: &str) -> anyhow::Result<rusqlite::Connection> {
    let conn = rusqlite::Connection::open(path)?;
    conduit_store::schema::optimize_connection(&conn);
    conduit_store::schema::init_schema(&conn)?;
    Ok(conn)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received, draining...");
}
