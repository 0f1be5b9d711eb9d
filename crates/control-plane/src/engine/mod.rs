//! Run lifecycle engine.
//!
//! - **Machine**: validates and persists transitions of one run
//! - **Lanes**: orders events per run by reserved sequence numbers
//! - **Lifecycle**: routes events, counts outcomes, forwards cancellations

pub mod lanes;
pub mod lifecycle;
pub mod machine;

pub use lanes::{Delivery, Lane, LaneHub, Step, Ticket};
pub use lifecycle::RunLifecycle;
pub use machine::RunStateMachine;
