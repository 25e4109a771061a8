//! Configuration types.

use std::net::SocketAddr;

use crate::error::ConfigError;

const MAX_WORKERS_VAR: &str = "JOB_ORCHESTRATOR_MAX_WORKERS";
const BIND_VAR: &str = "JOB_ORCHESTRATOR_BIND";

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Number of execution slots in the worker pool.
    pub max_workers: usize,
    /// Address the HTTP server listens on.
    pub bind_addr: SocketAddr,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl OrchestratorConfig {
    /// Load from the process environment, falling back to defaults for
    /// unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to read variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_workers = match lookup(MAX_WORKERS_VAR) {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(0) => return Err(invalid(MAX_WORKERS_VAR, "must be at least 1")),
                Ok(n) => n,
                Err(e) => return Err(invalid(MAX_WORKERS_VAR, &e.to_string())),
            },
            None => defaults.max_workers,
        };

        let bind_addr = match lookup(BIND_VAR) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e: std::net::AddrParseError| invalid(BIND_VAR, &e.to_string()))?,
            None => defaults.bind_addr,
        };

        Ok(Self {
            max_workers,
            bind_addr,
        })
    }
}

/// One slot per available processing unit.
fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
