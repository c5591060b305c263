pub mod config;
pub mod logging;
pub mod paths;

pub use config::{Config, ConfigError, LogLevel, LoggingConfig, SessionConfig, ValidationError};
pub use logging::{init_logging, LoggingError, LoggingGuard};
pub use paths::{AppDirs, DirsError};

pub const APP_NAME: &str = "plugprobe";
pub const APP_AUTHOR: &str = "Plugprobe";
pub const APP_QUALIFIER: &str = "io";
