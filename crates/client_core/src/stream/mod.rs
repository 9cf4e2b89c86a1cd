//! Incremental, cursor-paginated image stream.
//!
//! [`StreamMachine`] is the pure state machine; [`StreamController`] runs it on
//! a tokio task and publishes read-only [`StreamSnapshot`]s.

mod controller;
mod machine;
mod queue;

pub use controller::StreamController;
pub use machine::{Items, StreamCommand, StreamEvent, StreamMachine, StreamPhase, StreamSnapshot};
pub use queue::{FetchQueue, FetchRange};
