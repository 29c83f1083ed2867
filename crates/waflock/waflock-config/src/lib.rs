mod config;

pub use config::{ConfigError, LockConfig};
