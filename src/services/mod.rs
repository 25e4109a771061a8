//! Work functions and how jobs find them.

pub mod demo;
mod function;
mod registry;

pub use function::{JobFunction, JobOutput, MessageHandler, job_fn};
pub use registry::{ServiceRegistry, ServiceResolver};
