use std::sync::Arc;

use flatbot_core::{
    config::{Config, StorageConfig},
    store::{ListingStore, MemoryListingStore},
};
use flatbot_postgres::PgListingStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    flatbot_core::logging::init("flatbot")?;

    let cfg = Arc::new(Config::load()?);

    let store: Arc<dyn ListingStore> = match &cfg.storage {
        StorageConfig::Postgres(db) => Arc::new(PgListingStore::connect(db).await?),
        StorageConfig::Memory => {
            tracing::warn!("STORAGE=memory: listings are lost on restart");
            Arc::new(MemoryListingStore::new())
        }
    };

    flatbot_telegram::router::run_polling(cfg, store).await
}
