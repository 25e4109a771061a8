//! Service registry: resolves `module` + `function` names to work functions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::JobError;
use crate::services::function::JobFunction;

/// Resolves a work reference to a callable.
#[async_trait]
pub trait ServiceResolver: Send + Sync {
    async fn resolve(&self, module: &str, function: &str) -> Result<Arc<dyn JobFunction>, JobError>;
}

type Functions = HashMap<String, Arc<dyn JobFunction>>;

/// In-memory table of services, each a set of named functions.
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Functions>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `function` under `module`, replacing any previous entry.
    pub async fn register(
        &self,
        module: impl Into<String>,
        function: impl Into<String>,
        job: Arc<dyn JobFunction>,
    ) {
        let (module, function) = (module.into(), function.into());
        self.services
            .write()
            .await
            .entry(module.clone())
            .or_default()
            .insert(function.clone(), job);
        tracing::debug!(module = %module, function = %function, "Registered job function");
    }

    /// Register a function (sync version for startup).
    pub fn register_sync(
        &self,
        module: impl Into<String>,
        function: impl Into<String>,
        job: Arc<dyn JobFunction>,
    ) {
        let (module, function) = (module.into(), function.into());
        if let Ok(mut services) = self.services.try_write() {
            services
                .entry(module.clone())
                .or_default()
                .insert(function.clone(), job);
            tracing::debug!(module = %module, function = %function, "Registered job function");
        }
    }

    /// Remove a whole service. Jobs already admitted keep their function.
    pub async fn unregister(&self, module: &str) -> bool {
        self.services.write().await.remove(module).is_some()
    }

    pub async fn has(&self, module: &str) -> bool {
        self.services.read().await.contains_key(module)
    }

    /// Registered service names, sorted.
    pub async fn modules(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Function names of one service, sorted.
    pub async fn functions(&self, module: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .read()
            .await
            .get(module)
            .map(|f| f.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

#[async_trait]
impl ServiceResolver for ServiceRegistry {
    async fn resolve(&self, module: &str, function: &str) -> Result<Arc<dyn JobFunction>, JobError> {
        let services = self.services.read().await;
        let functions = services
            .get(module)
            .ok_or_else(|| JobError::service_not_found(module))?;
        functions
            .get(function)
            .cloned()
            .ok_or_else(|| JobError::function_not_found(module, function))
    }
}
