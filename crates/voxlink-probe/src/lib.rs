//! Library half of the `voxlink-probe` binary: configuration and the round
//! trip it drives.

pub mod config;
pub mod probe;

pub use config::{load_config, Config, ConfigError};
pub use probe::{run, ProbeError, ProbeReport};
