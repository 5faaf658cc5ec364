//! Configuration Module
//!
//! Configuration loading for the pipeline service.

mod settings;

pub use settings::{
    ConfigError, PipelineConfig, ServerSettings, SourceSettings, StorageSettings,
    StreamingSettings, TransportSettings, parse_seed_symbols,
};
