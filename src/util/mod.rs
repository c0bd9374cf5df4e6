//! Utility modules for reprocheck

pub mod logging;

pub use logging::{init_from_env, init_logging, LoggingConfig};
