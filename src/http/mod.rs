//! HTTP surface for the job registry.

pub mod routes;

pub use routes::{AppState, job_routes};
