//! Execution contexts: the task a thread job runs in, its message channels,
//! and the supervisor that reports back to the registry.

mod context;
mod envelope;
pub(crate) mod runner;

pub use context::ExecutionContext;
pub use envelope::{Envelope, Message, MessageKind};
pub use runner::{ExecutionObserver, ExitReason};
