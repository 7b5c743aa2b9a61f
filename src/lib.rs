use std::sync::Arc;

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod routes;
pub mod services;

use config::Config;
use error::AppError;
use services::{dataset_registry::DatasetRegistry, llm_agent::LlmAgent, table_store::TableStore};

/// Shared state handed to every handler.
pub struct AppState {
    pub config: Config,
    pub store: Arc<TableStore>,
    pub registry: Arc<DatasetRegistry>,
    pub llm: Option<LlmAgent>,
}

impl AppState {
    /// Opens the table store and record registry described by `config`.
    pub fn new(config: Config) -> Result<Self, AppError> {
        let store = Arc::new(TableStore::open(&config.storage)?);
        let registry = Arc::new(DatasetRegistry::open(&config.database_path)?);
        let llm = LlmAgent::from_config(&config.llm)?;
        tracing::info!(
            "Dataset registry holds {} records; question answering {}",
            registry.count()?,
            if llm.is_some() { "enabled" } else { "disabled" }
        );

        Ok(Self {
            config,
            store,
            registry,
            llm,
        })
    }
}
