//! MailFleet Common - Shared types and utilities
//!
//! This crate provides common types, configuration, logging setup and
//! errors shared across all MailFleet components.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
