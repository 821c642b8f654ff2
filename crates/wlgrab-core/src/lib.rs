pub mod config;
pub mod errors;
pub mod types;

pub use config::SourceConfig;
pub use errors::{CaptureError, ConfigError, DescriptorError};
pub use types::*;
