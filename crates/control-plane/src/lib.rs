//! RunHub Control Plane Library
//!
//! Tracks run lifecycles and dispatches runs to execution frameworks:
//!
//! - **Run creation**: build runs from functions and tasks through the
//!   runtime registered for the function's kind
//! - **Dispatch**: project runs into runnables and execute them on a bounded
//!   worker pool
//! - **Lifecycle**: apply substrate reports, stop requests and deadlines to
//!   each run's state machine in order
//! - **Persistence**: in-memory or Postgres run stores
//!
//! ## Example
//!
//! ```ignore
//! use runhub_control_plane::{bootstrap, config::AppConfig};
//! use runhub_core::RunOverrides;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let services = bootstrap::bootstrap(&AppConfig::default()).await?;
//!     let run = services
//!         .dispatcher
//!         .create_run_for_task("nightly", &RunOverrides::default())
//!         .await?;
//!     services.dispatcher.submit(run).await?;
//!     Ok(())
//! }
//! ```

pub mod bootstrap;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod manifest;
pub mod metrics;
pub mod result_ext;
pub mod services;
pub mod store;
pub mod worker;

pub use error::{AppError, AppResult};
pub use result_ext::ResultExt;
pub use services::{Dispatcher, DispatcherConfig};
