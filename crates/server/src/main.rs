use std::net::SocketAddr;
use std::sync::Arc;

use migration::{Migrator, MigratorTrait};
use rust_oauth_server::app::{build_router, ensure_clients, session_secrets};
use rust_oauth_server::config::load_config_or_panic;
use rust_oauth_server::render::DefaultRenderer;
use rust_oauth_server::storage::Stores;
use sea_orm::Database;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const MEMORY_DATABASE: &str = "memory";

fn initialize_tracing() {
    let default_directives = "rust_oauth_server=info,tower_http=info,sea_orm=warn";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer().with_target(true).with_level(true);

    registry.with(layer).init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    initialize_tracing();

    let config = load_config_or_panic();

    let stores = if config.database_url == MEMORY_DATABASE {
        tracing::warn!("using in-memory storage, all tokens are lost on restart");
        Stores::in_memory()
    } else {
        let db = Database::connect(&config.database_url).await?;
        Migrator::up(&db, None).await?;
        Stores::database(Arc::new(db))
    };

    ensure_clients(&stores, &config.oauth.clients).await?;

    let secrets = session_secrets(&config.oauth)?;
    let router = build_router(&config.oauth, stores, secrets, Arc::new(DefaultRenderer))?;

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(
        addr = %config.listen_addr,
        issuer = %config.oauth.master_public_url,
        "OAuth server listening"
    );
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
