//! Configuration for the volumetric fog pipeline.
//!
//! Settings persist to disk as `config.ron`. CLI flags parsed with clap
//! override whatever was loaded, and unknown or missing fields fall back to
//! defaults so older files keep loading.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{Config, DebugConfig, DemoConfig, FogConfig, VolumetricsConfig, default_config_dir};
pub use error::ConfigError;
