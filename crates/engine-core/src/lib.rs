pub mod error;
pub mod monitor;
pub mod settings;
pub mod store;

pub use error::StoreError;
pub use settings::EngineSettings;
