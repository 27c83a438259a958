//! # symscope utilities
//!
//! Logging setup shared by the symscope binaries, built on `tracing`.

pub mod logging;

pub use logging::{init_logging, init_logging_to_dir, init_logging_with_level, LogFormat, LogLevel, LoggingError};
pub use tracing::{debug, error, info, trace, warn};
