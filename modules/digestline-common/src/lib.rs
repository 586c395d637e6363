pub mod config;
pub mod error;
pub mod types;

pub use config::{load_config, Config, FileConfig};
pub use error::{ConfigError, RunError};
pub use types::*;
