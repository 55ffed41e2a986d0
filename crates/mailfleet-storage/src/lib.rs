//! MailFleet Storage - Campaign and execution storage
//!
//! Models for campaigns and their execution records, plus repository
//! traits with in-memory implementations.

pub mod models;
pub mod repository;

pub use models::*;
pub use repository::*;
