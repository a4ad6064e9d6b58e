//! Harbor Server - offline-first sync sidecar for local UIs.

use std::sync::Arc;

use harbor_server::config::Config;
use harbor_server::connectivity::{spawn_probe, Connectivity};
use harbor_server::persistence::Persistence;
use harbor_server::registry::Registry;
use harbor_server::remote::{MemoryRemote, PostgresRemote, RemoteStore};
use harbor_server::{router, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "harbor_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Harbor Server on {}:{}", config.host, config.port);

    let remote: Arc<dyn RemoteStore> = match &config.database_url {
        Some(url) => Arc::new(PostgresRemote::connect_lazy(url, config.max_connections)?),
        None => {
            tracing::warn!("DATABASE_URL not set, using an in-memory remote store");
            Arc::new(MemoryRemote::new())
        }
    };

    let persistence = match &config.data_dir {
        Some(dir) => {
            tracing::info!("Persisting replicas under {}", dir.display());
            Persistence::directory(dir)
        }
        None => {
            tracing::warn!("DATA_DIR not set, replicas are kept in memory only");
            Persistence::memory()
        }
    };

    let connectivity = Connectivity::new(false);
    connectivity.probe(remote.as_ref()).await;

    let registry = Registry::new_shared(remote, connectivity, persistence);
    for entity in config.entities.clone() {
        registry.register(entity);
    }
    tracing::info!(entities = ?registry.names(), "Entities registered");

    // Start-up pass: drain what was queued offline, then refresh caches
    let startup = Arc::clone(&registry);
    tokio::spawn(async move {
        startup.sync_all().await;
        startup.refresh_all().await;
    });
    spawn_probe(Arc::clone(&registry), config.probe_interval);

    let app = router(AppState::new(registry));

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
