use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use diesel_migrations::{EmbeddedMigrations, embed_migrations};
use escrow_orderservice::{
    api,
    app_state::AppState,
    bootstrap,
    config::{self, StorageBackend},
    db,
    domain::ports::RepositoryRef,
    infrastructure::{InMemoryStore, PgStore},
    routes,
    services::{EscrowServices, outbox},
};

/// Migrations embedded into the binary which helps with streamlining image building process
const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    bootstrap::init_tracing();
    bootstrap::init_env();

    let config = config::load()?;

    let repo: RepositoryRef = match config.storage.backend {
        StorageBackend::Postgres => {
            tracing::info!("Running migrations...");
            let migrations_count =
                db::run_migrations_blocking(MIGRATIONS, &config.storage.database_url).await?;
            tracing::info!("Run {} new migrations successfully", migrations_count);

            let pool = db::create_pool(&config.storage.database_url, config.storage.max_connections).await?;
            Arc::new(PgStore::new(pool))
        }
        StorageBackend::Memory => {
            tracing::warn!("STORAGE_BACKEND=memory, nothing will survive a restart");
            Arc::new(InMemoryStore::new())
        }
    };

    let http_client = api::http_client()?;
    let gateway = api::payment_gateway(&config, http_client.clone());
    let (outbox, receiver) = outbox::Outbox::channel();
    let dispatcher = outbox::spawn_dispatcher(receiver, api::notification_sink(&config, http_client));

    let services = EscrowServices::new(repo, gateway, outbox, config.escrow.clone());
    let app = routes::app(AppState::new(services));

    tracing::info!("Bootstrapping...");
    bootstrap::serve("OrderService", app, &config.server).await?;

    // Senders went away with the app, so the queue drains and the task ends.
    match tokio::time::timeout(DRAIN_TIMEOUT, dispatcher).await {
        Ok(Err(err)) => tracing::error!("Notification dispatcher crashed: {}", err),
        Err(_) => tracing::warn!("Gave up draining notifications after {:?}", DRAIN_TIMEOUT),
        Ok(Ok(())) => {}
    }
    Ok(())
}
