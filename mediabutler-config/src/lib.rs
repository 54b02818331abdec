//! Configuration generation and loading for MediaButler.
//!
//! Configuration is read once at startup and handed to the core as a value;
//! nothing in the pipeline re-reads it at runtime.

pub mod loader;
pub mod models;

pub use loader::{load_config, load_config_str};
pub use models::{
    ButlerConfig, ClassificationConfig, DiscoveryConfig, PathsConfig,
    ResourceConfig, RetryConfig,
};
