//! Job orchestrator: in-process thread and cron-scheduled jobs over a
//! bounded worker pool.

pub mod config;
pub mod error;
pub mod execution;
pub mod http;
pub mod jobs;
pub mod schedule;
pub mod services;
