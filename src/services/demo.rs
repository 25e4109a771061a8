//! Built-in `demo` service, registered by the binary so the HTTP API can be
//! exercised without embedding the library.

use std::time::Duration;

use anyhow::bail;
use serde_json::{Value, json};

use crate::execution::ExecutionContext;
use crate::services::{JobOutput, ServiceRegistry, job_fn};

pub const MODULE: &str = "demo";

/// Register `echo`, `sleep`, `fail` and `report` under [`MODULE`].
pub fn register(registry: &ServiceRegistry) {
    registry.register_sync(MODULE, "echo", job_fn(echo));
    registry.register_sync(MODULE, "sleep", job_fn(sleep));
    registry.register_sync(MODULE, "fail", job_fn(fail));
    registry.register_sync(MODULE, "report", job_fn(report));
}

async fn echo(payload: Value, _ctx: ExecutionContext) -> anyhow::Result<JobOutput> {
    Ok(JobOutput::Json(payload))
}

/// Sleep for `payload.ms` milliseconds in `payload.steps` steps, reporting
/// progress after each.
async fn sleep(payload: Value, ctx: ExecutionContext) -> anyhow::Result<JobOutput> {
    let ms = payload.get("ms").and_then(Value::as_u64).unwrap_or(1000);
    let steps = payload
        .get("steps")
        .and_then(Value::as_u64)
        .unwrap_or(1)
        .max(1);
    for step in 1..=steps {
        tokio::time::sleep(Duration::from_millis(ms / steps)).await;
        ctx.emit(json!({"step": step, "of": steps}));
    }
    Ok(JobOutput::Message(format!("Slept for {ms}ms")))
}

async fn fail(payload: Value, _ctx: ExecutionContext) -> anyhow::Result<JobOutput> {
    let message = payload
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("demo failure");
    bail!("{message}")
}

/// Render `payload.rows` (an array of arrays) as a CSV attachment.
async fn report(payload: Value, _ctx: ExecutionContext) -> anyhow::Result<JobOutput> {
    let Some(rows) = payload.get("rows").and_then(Value::as_array) else {
        bail!("payload.rows must be an array");
    };
    let mut csv = String::new();
    for row in rows {
        let cells: Vec<String> = row
            .as_array()
            .map(|cells| {
                cells
                    .iter()
                    .map(|c| match c {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        csv.push_str(&cells.join(","));
        csv.push('\n');
    }
    Ok(JobOutput::File {
        name: "report.csv".to_string(),
        content_type: "text/csv".to_string(),
        bytes: csv.into_bytes(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ServiceResolver;

    #[tokio::test]
    async fn registers_all_functions() {
        let registry = ServiceRegistry::new();
        register(&registry);
        assert_eq!(
            registry.functions(MODULE).await,
            vec!["echo", "fail", "report", "sleep"]
        );
        assert!(registry.resolve(MODULE, "report").await.is_ok());
    }
}
