//! Core configuration and logging

/// Application configuration
pub mod config;

/// Logging macros
pub mod logging;

// Re-export commonly used items
pub use config::{Config, LoggingConfig, MemoryConfig, MetricsConfig, ShrinkPolicy, TeamConfig, load_config, load_config_or_default};
