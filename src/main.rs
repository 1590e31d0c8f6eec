#![warn(clippy::all)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use agentcore::agent::executor::AgentExecutor;
use agentcore::agent::EchoAgentRoutine;
use agentcore::config::AgentCoreConfig;
use agentcore::events::store::{EventStore, SqliteEventStore};
use agentcore::events::writer::RobustWriter;
use agentcore::gateway::{router, AppState};
use agentcore::observability::init_tracing;
use agentcore::registry::TaskRegistry;
use agentcore::stream::StreamWatcher;

#[derive(Parser, Debug)]
#[command(name = "agentcored", version, about = "Background agent execution and event-streaming core")]
struct Cli {
    /// Path to a TOML config file. Missing file falls back to defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP server.
    Serve {
        #[arg(long)]
        bind_addr: Option<String>,
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Validate configuration and database connectivity without serving.
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = AgentCoreConfig::load(cli.config.as_deref())?;

    init_tracing(&config.log_filter);

    match cli.command {
        Commands::Serve { bind_addr, db_path } => {
            if let Some(bind_addr) = bind_addr {
                config.bind_addr = bind_addr;
            }
            if let Some(db_path) = db_path {
                config.db_path = db_path.to_string_lossy().into_owned();
            }
            serve(config).await
        }
        Commands::Doctor => doctor(config),
    }
}

fn doctor(config: AgentCoreConfig) -> Result<()> {
    let store = open_store(&config)?;
    store
        .max_seq("doctor-probe")
        .context("event store did not respond to a read")?;
    println!("config ok: bind_addr={} db_path={}", config.bind_addr, config.db_path);
    println!("database ok: {}", config.db_path);
    Ok(())
}

fn open_store(config: &AgentCoreConfig) -> Result<SqliteEventStore> {
    if config.db_path == ":memory:" {
        Ok(SqliteEventStore::open_in_memory()?)
    } else {
        Ok(SqliteEventStore::open(&config.db_path_buf())?)
    }
}

async fn serve(config: AgentCoreConfig) -> Result<()> {
    let config = Arc::new(config);
    let store: Arc<dyn EventStore> = Arc::new(open_store(&config)?);
    let writer = Arc::new(RobustWriter::new(
        store.clone(),
        config.writer_retry_schedule_ms.clone(),
        config.writer_fallback_capacity,
    ));
    let registry = Arc::new(TaskRegistry::new());
    let executor = Arc::new(AgentExecutor::new(
        writer.clone(),
        Duration::from_secs(config.heartbeat_interval_s),
    ));
    let watcher = Arc::new(StreamWatcher::new(
        store.clone(),
        registry.clone(),
        Duration::from_millis(config.poll_interval_ms),
    ));

    let state = AppState {
        store: store.clone(),
        writer: writer.clone(),
        registry: registry.clone(),
        executor,
        watcher,
        routine_factory: Arc::new(|| Arc::new(EchoAgentRoutine::new("Hello! How can I help?"))),
        config: config.clone(),
    };

    spawn_background_sweeps(writer.clone(), store.clone(), registry.clone(), config.clone());

    let app = router(
        state,
        config.max_body_bytes,
        Duration::from_secs(config.request_timeout_s),
    );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(bind_addr = %config.bind_addr, "agentcore listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(registry))
        .await
        .context("server exited with an error")?;

    Ok(())
}

/// Background sweeps mirroring the ambient-maintenance idiom used
/// elsewhere in the stack (periodic rate-limiter/idempotency-store
/// sweeps): writer fallback re-drain, registry GC, and event TTL pruning.
fn spawn_background_sweeps(
    writer: Arc<RobustWriter>,
    store: Arc<dyn EventStore>,
    registry: Arc<TaskRegistry>,
    config: Arc<AgentCoreConfig>,
) {
    let redrain_interval = Duration::from_millis(
        config
            .writer_retry_schedule_ms
            .last()
            .copied()
            .unwrap_or(400)
            .max(100),
    );
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(redrain_interval);
        loop {
            interval.tick().await;
            writer.redrain_fallback();
        }
    });

    let gc_max_age = Duration::from_secs(config.registry_gc_max_age_h * 3600);
    let gc_registry = registry.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            let removed = gc_registry.gc(gc_max_age);
            if removed > 0 {
                tracing::debug!(removed, "registry gc swept finished tasks");
            }
        }
    });

    if config.message_events_ttl_s > 0 {
        let ttl = config.message_events_ttl_s;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            loop {
                interval.tick().await;
                match store.prune_expired(ttl) {
                    Ok(pruned) if pruned > 0 => {
                        tracing::debug!(pruned, "event store ttl sweep pruned expired events");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "event ttl sweep failed"),
                }
            }
        });
    }
}

async fn shutdown_signal(registry: Arc<TaskRegistry>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining running tasks");
    registry.shutdown(Duration::from_secs(10)).await;
}
