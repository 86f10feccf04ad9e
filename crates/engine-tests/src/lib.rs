#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use engine_core::settings::EngineSettings;
use engine_core::store::sled_store::SledStore;
use engine_runtime::Engine;
use model::core::column::{ColumnDef, ColumnType, Schema};
use model::core::value::Value;
use model::records::dataset::Dataset;
use model::records::row::FieldValue;
use tracing::info;

pub mod integration;
pub mod utils;

/// Settings tuned for tests: fast resource sampling, quick polling.
pub fn test_settings(chunk_size: u64) -> EngineSettings {
    EngineSettings {
        chunk_size,
        monitor_interval: Duration::from_millis(1),
        poll_interval: Duration::from_millis(10),
        ..EngineSettings::default()
    }
}

pub fn open_engine(dir: &Path, settings: EngineSettings) -> Engine {
    let store = SledStore::open(dir).expect("open sled store");
    Engine::new(Arc::new(store), settings)
}

/// For tests that drive the dispatcher directly instead of going
/// through `#[traced_test]`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Deterministic benchmark rows:
/// - `age`: i modulo 90, never null
/// - `score`: i * 0.5, null on every seventh row
/// - `city`: cycles eu, us, apac, null
pub async fn seed_people(engine: &Engine, rows: u64) -> Dataset {
    let schema = Schema::new(vec![
        ColumnDef::new("age", ColumnType::Number),
        ColumnDef::new("score", ColumnType::Number),
        ColumnDef::new("city", ColumnType::String),
    ]);
    let payload: Vec<Vec<FieldValue>> = (0..rows).map(people_row).collect();
    let dataset = engine
        .register_dataset("people", schema, payload)
        .await
        .expect("seed dataset");
    info!(dataset_id = %dataset.id, rows, "seeded test dataset");
    dataset
}

fn people_row(i: u64) -> Vec<FieldValue> {
    let score = if i % 7 == 0 {
        Value::Null
    } else {
        Value::Float(i as f64 * 0.5)
    };
    let city = match i % 4 {
        0 => Value::String("eu".into()),
        1 => Value::String("us".into()),
        2 => Value::String("apac".into()),
        _ => Value::Null,
    };
    vec![
        FieldValue::new("age", Value::Int((i % 90) as i64)),
        FieldValue::new("score", score),
        FieldValue::new("city", city),
    ]
}
