//! # Spoolbridge Common Library
//!
//! Shared code for the spoolbridge workspace:
//! - Error type and result alias
//! - Configuration loading and data folder resolution
//! - Tracing subscriber setup
//! - Atomic file writes for JSON state

pub mod config;
pub mod error;
pub mod fs;
pub mod logging;

pub use error::{Error, Result};
