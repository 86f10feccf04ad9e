//! Dataset ingestion.
//!
//! Ingesting under an existing name replaces the rows and bumps the
//! version; tasks planned against the previous version are refused by
//! the orchestrator instead of silently running over different rows.

use chrono::Utc;
use engine_core::store::DatasetStore;
use model::records::dataset::Dataset;
use model::records::row::FieldValue;
use tracing::info;

use crate::Engine;
use crate::error::EngineError;

pub(crate) async fn register_dataset(
    engine: &Engine,
    name: &str,
    schema: model::core::column::Schema,
    rows: Vec<Vec<FieldValue>>,
) -> Result<Dataset, EngineError> {
    match engine.store.find_dataset_by_name(name).await? {
        Some(mut dataset) => {
            engine.store.delete_rows(dataset.id).await?;
            let size = engine.store.insert_rows(dataset.id, rows).await?;
            dataset.version += 1;
            dataset.schema = schema;
            dataset.size = size;
            dataset.updated_at = Utc::now();
            engine.store.update_dataset(&dataset).await?;
            info!(
                dataset_id = %dataset.id,
                name,
                version = dataset.version,
                rows = size,
                "dataset replaced"
            );
            Ok(dataset)
        }
        None => {
            let mut dataset = Dataset::new(name, schema, 0);
            engine.store.insert_dataset(&dataset).await?;
            let size = engine.store.insert_rows(dataset.id, rows).await?;
            dataset.size = size;
            engine.store.update_dataset(&dataset).await?;
            info!(dataset_id = %dataset.id, name, rows = size, "dataset ingested");
            Ok(dataset)
        }
    }
}
