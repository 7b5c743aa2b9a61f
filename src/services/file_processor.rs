use crate::error::AppError;
use crate::models::UploadResponse;
use crate::services::csv_ingest::parse_csv;
use crate::services::dataset_registry::{DatasetRecord, DatasetRegistry};
use crate::services::ids::generate_dataset_id;
use crate::services::stats::describe;
use crate::services::table_store::TableStore;
use bytes::Bytes;
use chrono::Utc;
use tracing::{error, info, warn};

const MAX_ID_ATTEMPTS: usize = 8;

pub fn is_csv_filename(filename: &str) -> bool {
    filename.to_ascii_lowercase().ends_with(".csv")
}

/// Parses an uploaded file, persists the table and registers its owner.
///
/// The table is saved before the record is inserted; if the insert fails the
/// table is removed again so no blob is left without a record.
pub fn process_upload(
    store: &TableStore,
    registry: &DatasetRegistry,
    user_id: &str,
    filename: &str,
    data: Bytes,
) -> Result<UploadResponse, AppError> {
    let start = std::time::Instant::now();
    if !is_csv_filename(filename) {
        return Err(AppError::InvalidInput("Only CSV files are supported.".to_string()));
    }
    info!("Processing upload {} ({}KB) for user {}", filename, data.len() / 1024, user_id);

    let table = parse_csv(&data)?;
    let dataset_id = allocate_dataset_id(store, registry)?;

    store.save(&dataset_id, &table)?;
    let record = DatasetRecord {
        id: dataset_id.clone(),
        user_id: user_id.to_string(),
        filename: filename.to_string(),
        created_at: Utc::now(),
    };
    if let Err(e) = registry.insert(&record) {
        error!("Failed to register dataset {}: {}", dataset_id, e);
        if let Err(cleanup) = store.delete(&dataset_id) {
            warn!("Failed to remove unregistered dataset {}: {}", dataset_id, cleanup);
        }
        return Err(e);
    }

    info!("Stored dataset {} from {} in {:?}", dataset_id, filename, start.elapsed());
    Ok(UploadResponse {
        dataset_id,
        filename: filename.to_string(),
        info: describe(&table),
    })
}

fn allocate_dataset_id(store: &TableStore, registry: &DatasetRegistry) -> Result<String, AppError> {
    for _ in 0..MAX_ID_ATTEMPTS {
        let id = generate_dataset_id();
        if !registry.contains(&id)? && !store.exists(&id) {
            return Ok(id);
        }
        warn!("Dataset id collision on {}, retrying", id);
    }
    Err(AppError::Internal("Could not allocate a unique dataset id".to_string()))
}
