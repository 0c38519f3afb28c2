use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use arena_combat_server::config::ServerConfig;
use arena_combat_server::game::chat::ChatLog;
use arena_combat_server::game::constants::chat::MAX_MESSAGES;
use arena_combat_server::game::state::World;
use arena_combat_server::metrics::{start_metrics_server, Metrics};
use arena_combat_server::net::game_session::GameSession;
use arena_combat_server::net::tls::TlsConfig;
use arena_combat_server::net::transport::WebTransportServer;
use arena_combat_server::store::memory::MemoryStore;
use arena_combat_server::store::queue::PersistQueue;
use arena_combat_server::store::{ChatStore, PlayerStore};
use arena_combat_server::util::unix_millis;

/// How long shutdown waits for queued writes to reach the store
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Starting Arena Combat Server");

    let config = ServerConfig::load_or_default();
    config.validate().map_err(anyhow::Error::msg)?;

    let metrics = Arc::new(Metrics::new());

    let metrics_clone = metrics.clone();
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = start_metrics_server(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    let (players, chat_store) = open_stores(&config).await?;
    players.ping().await.context("store unreachable")?;

    let mut chat = ChatLog::new();
    match chat_store.recent(MAX_MESSAGES).await {
        Ok(history) => {
            info!("Loaded {} chat messages", history.len());
            chat.seed(history);
        }
        Err(e) => warn!("Could not load chat history: {}", e),
    }

    let (persist, persist_worker) = PersistQueue::spawn(
        players.clone(),
        chat_store.clone(),
        config.persist_queue_capacity,
        metrics.clone(),
    );

    let world = World::new(Instant::now());
    info!(
        "Arena ready: {} obstacles, {} power-ups",
        world.obstacles.len(),
        world.power_ups.len()
    );
    let game_session = GameSession::new(world, chat, persist, metrics.clone())
        .with_max_players(config.max_connections);
    let game_session = Arc::new(RwLock::new(game_session));

    let tls_config = TlsConfig::load(config.tls_cert_path.as_deref(), config.tls_key_path.as_deref()).await?;

    let server = WebTransportServer::new(
        config.clone(),
        tls_config,
        players,
        chat_store,
        game_session.clone(),
        metrics,
    );

    info!("Server listening on {}:{}", config.bind_address, config.port);
    info!("Metrics available at http://{}:{}/metrics", config.bind_address, config.metrics_port);
    info!("Certificate hash: {}", server.cert_hash());

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Shutting down..."),
                Err(e) => error!("Failed to listen for shutdown signal: {}", e),
            }
        }
    }

    let persist = {
        let mut session = game_session.write().await;
        session.disconnect_all(unix_millis());
        session.persist_queue().clone()
    };
    if !persist.settle(SHUTDOWN_FLUSH_TIMEOUT).await {
        warn!("{} persistence jobs still pending at shutdown", persist.pending());
    }
    persist_worker.abort();

    Ok(())
}

#[cfg(feature = "file_store")]
async fn open_stores(config: &ServerConfig) -> anyhow::Result<(Arc<dyn PlayerStore>, Arc<dyn ChatStore>)> {
    use arena_combat_server::store::file::FileStore;

    if let Some(dir) = &config.data_dir {
        let store = Arc::new(
            FileStore::open(dir)
                .await
                .with_context(|| format!("opening store in {}", dir.display()))?,
        );
        info!("Using file store at {}", dir.display());
        let players: Arc<dyn PlayerStore> = store.clone();
        let chat: Arc<dyn ChatStore> = store;
        return Ok((players, chat));
    }
    Ok(memory_stores())
}

#[cfg(not(feature = "file_store"))]
async fn open_stores(config: &ServerConfig) -> anyhow::Result<(Arc<dyn PlayerStore>, Arc<dyn ChatStore>)> {
    if config.data_dir.is_some() {
        warn!("DATA_DIR set but built without file_store, ignoring");
    }
    Ok(memory_stores())
}

fn memory_stores() -> (Arc<dyn PlayerStore>, Arc<dyn ChatStore>) {
    warn!("No DATA_DIR configured, accounts and chat are kept in memory");
    let store = Arc::new(MemoryStore::new());
    let players: Arc<dyn PlayerStore> = store.clone();
    let chat: Arc<dyn ChatStore> = store;
    (players, chat)
}
