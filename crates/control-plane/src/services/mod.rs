//! Service layer for the RunHub control plane.

pub mod dispatcher;

pub use dispatcher::{Dispatcher, DispatcherConfig};
