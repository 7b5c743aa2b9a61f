pub mod cleanup;
pub mod context;
pub mod csv_ingest;
pub mod dataset_registry;
pub mod file_processor;
pub mod ids;
pub mod llm_agent;
pub mod stats;
pub mod table;
pub mod table_store;
