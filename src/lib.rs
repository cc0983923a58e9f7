//! globmem - dynamically resizable distributed shared memory
//!
//! A team of units shares one logical array. Each unit grows and shrinks its
//! own partition locally, and collective commits agree on a new global layout
//! that global references resolve against. The allocator itself lives in
//! `globmem-core`; this crate adds logging setup, configuration loading and
//! the reference scenarios behind the `globmem` binary.
#![warn(missing_docs)]

pub mod scenarios;

// Re-export the core crate for convenience
pub use globmem_core::{comms, constants, core, memory, system, types};
pub use globmem_core::{
    CommitReport, Epoch, Error, GlobDynamicMem, GlobalRef, LocalTeam, Result, ShrinkPolicy, UnitId,
};

use globmem_core::core::config::{load_config, Config, LoggingConfig};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Output goes to
/// stderr so reports on stdout stay machine readable.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = match config.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.pretty().try_init(),
    };
    installed.map_err(|e| Error::config(format!("Failed to install log subscriber: {}", e)))?;

    tracing::info!("Initializing {} v{}", NAME, VERSION);
    Ok(())
}

/// Load configuration from `path`, or from `globmem.toml` and the
/// environment when no path is given
pub fn load_run_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => {
            let mut config = load_config(path)?;
            config.apply_env_overrides()?;
            config.validate()?;
            Ok(config)
        }
        None => Config::load(),
    }
}
