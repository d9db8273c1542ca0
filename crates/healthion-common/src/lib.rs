//! Healthion Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling, logging and hashing helpers for the Healthion
//! ingestion workspace.
//!
//! - **Error Handling**: [`HealthionError`] and the [`Result`] alias
//! - **Logging**: [`logging::LogConfig`] and [`logging::init_logging`]
//! - **Checksums**: SHA-256 helpers used to build idempotency keys
//!
//! # Example
//!
//! ```no_run
//! use healthion_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

pub use error::{HealthionError, Result};
