//! Database connectivity for the Postgres run store.

pub mod pool;

pub use pool::{create_pool, health_check, DbPool};
