//! Configuration module for the RunHub control plane.
//!
//! This module provides configuration loading from environment variables
//! using the `envy` crate for type-safe environment variable parsing.

mod app;
mod database;

pub use app::{AppConfig, StoreKind};
pub use database::DatabaseConfig;
