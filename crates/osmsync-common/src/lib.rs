//! osmsync common library
//!
//! Shared utilities used across the osmsync workspace members:
//!
//! - **Logging**: subscriber bootstrap driven by `OSMSYNC_LOG_*` variables
//! - **Checksums**: content hashing for idempotency keys
//!
//! # Example
//!
//! ```no_run
//! use osmsync_common::logging::{init_logging, LogConfig};
//!
//! let config = LogConfig::from_env().unwrap_or_default();
//! init_logging(&config).ok();
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod logging;

pub use checksum::{compute_md5, json_md5};
