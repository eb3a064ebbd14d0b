pub mod api;
pub mod config;
pub mod sandbox;
pub mod supervisor;

pub use config::Config;
pub use sandbox::SandboxManager;
pub use supervisor::Supervisor;

use anyhow::{Context, Result};
use sandbox::docker::DockerRuntime;
use sandbox::env::CliEnvironmentResolver;
use std::sync::Arc;

pub async fn run(config: Config) -> Result<()> {
    tracing::info!("Starting sandboxd...");

    let resolver = CliEnvironmentResolver::default();
    let runtime = DockerRuntime::connect(&resolver)
        .await
        .context("Failed to connect to docker")?;
    tracing::info!("Docker client initialized");

    // Box services live on loopback; never route them through an outbound proxy
    let http = reqwest::Client::builder()
        .no_proxy()
        .build()
        .context("Failed to build HTTP client")?;

    let manager = Arc::new(SandboxManager::new(
        Arc::new(runtime),
        http.clone(),
        &config.sandbox,
        tracing::info_span!("sandbox_manager", scope = %config.sandbox.scope),
    ));

    let span = tracing::info_span!("server");
    Supervisor::new(config, manager, http, span).run().await
}
