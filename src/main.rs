use std::sync::Arc;

use job_orchestrator::config::OrchestratorConfig;
use job_orchestrator::error::Result;
use job_orchestrator::http::job_routes;
use job_orchestrator::jobs::JobRegistry;
use job_orchestrator::services::{ServiceRegistry, demo};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = OrchestratorConfig::from_env()?;

    let services = ServiceRegistry::new();
    demo::register(&services);

    let registry = JobRegistry::from_config(&config, Arc::new(services));
    let app = job_routes(registry.clone());

    eprintln!("Job orchestrator v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Workers: {}", config.max_workers);
    eprintln!("   Jobs API: http://{}/api/jobs", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, workers = config.max_workers, "Job API server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown requested");
        })
        .await?;

    let cancelled = registry.shutdown().await;
    tracing::info!(cancelled, "Job orchestrator stopped");
    Ok(())
}
