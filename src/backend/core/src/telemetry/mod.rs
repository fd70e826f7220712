//! Telemetry: structured logging for the authorization core.
//!
//! # Example
//!
//! ```rust,no_run
//! use warden_core::telemetry::{LoggingConfig, init_logging};
//!
//! init_logging(&LoggingConfig::default()).expect("Failed to initialize logging");
//! ```

pub mod logging;

pub use logging::{init_logging, LogFormat, LoggingConfig};
