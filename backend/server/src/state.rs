use std::sync::Arc;

use tracing::info;

use super::{
    config::Config,
    database::{SqliteStore, Store},
    error::ServerError,
};

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Arc<Self>, ServerError> {
        let store = SqliteStore::new(&config.database_path, config.qa_limit);

        if config.init_schema {
            info!("Ensuring schema...");
            store.init_schema().await?;
        }

        Ok(Self::with_store(config, Arc::new(store)))
    }

    pub fn with_store(config: Config, store: Arc<dyn Store>) -> Arc<Self> {
        Arc::new(Self { config, store })
    }
}
