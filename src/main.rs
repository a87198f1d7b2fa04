use std::net::SocketAddr;

use anyhow::Context;
use tokio::net::TcpListener;
use tower::make::Shared;
use tracing_subscriber::EnvFilter;

use expedientes::auth::jwt::JwtService;
use expedientes::config::AppConfig;
use expedientes::db;
use expedientes::routes::create_router;
use expedientes::state::AppState;
use expedientes::storage::UploadStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        server_host = %config.server_host,
        server_port = config.server_port,
        uploads_dir = %config.uploads_dir.display(),
        templates_dir = %config.templates_dir.display(),
        max_upload_bytes = config.max_upload_bytes,
        "loaded configuration"
    );

    let jwt = JwtService::from_config(&config)?;
    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let applied = db::run_migrations(&pool)?;
    tracing::info!(applied, "database migrations up to date");

    let uploads = UploadStore::open(&config.uploads_dir, config.max_upload_bytes)
        .with_context(|| format!("cannot open uploads dir {}", config.uploads_dir.display()))?;

    let listen_addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port)
        .parse()
        .context("SERVER_HOST/SERVER_PORT do not form a socket address")?;
    let state = AppState::new(pool, config, uploads, jwt);
    let router = create_router(state);

    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!("listening on {}", listen_addr);

    axum::serve(listener, Shared::new(router)).await?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
