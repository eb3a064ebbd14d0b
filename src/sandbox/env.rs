//! Docker endpoint discovery from the docker CLI context.
//!
//! The docker client libraries only read `DOCKER_HOST`; the CLI additionally knows about
//! named contexts (Docker Desktop, colima, remote engines). When no host is configured
//! explicitly, the current context is inspected to find the engine endpoint.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tokio::process::Command;

/// Engine endpoint taken from a docker CLI context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerEndpoint {
    pub host: String,
    /// Directory holding `ca.pem` for the context, when it has one
    pub cert_path: Option<String>,
    pub tls_verify: bool,
}

/// Endpoint configured through `DOCKER_HOST`, `DOCKER_TLS_VERIFY` and `DOCKER_CERT_PATH`.
///
/// Returns `None` when `DOCKER_HOST` is unset or empty. As with the docker CLI, any non-empty
/// `DOCKER_TLS_VERIFY` turns verification on.
pub fn endpoint_from_env<F>(env: F) -> Option<DockerEndpoint>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| env(key).filter(|v| !v.is_empty());

    Some(DockerEndpoint {
        host: non_empty("DOCKER_HOST")?,
        cert_path: non_empty("DOCKER_CERT_PATH"),
        tls_verify: non_empty("DOCKER_TLS_VERIFY").is_some(),
    })
}

/// Resolves where the container runtime is reachable
#[async_trait]
pub trait EnvironmentResolver: Send + Sync {
    /// Returns `None` when there is nothing beyond the local defaults
    async fn resolve(&self) -> Result<Option<DockerEndpoint>>;
}

/// Resolver that shells out to the `docker` binary
#[derive(Debug, Clone)]
pub struct CliEnvironmentResolver {
    program: String,
}

impl Default for CliEnvironmentResolver {
    fn default() -> Self {
        Self {
            program: "docker".to_string(),
        }
    }
}

impl CliEnvironmentResolver {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to run {} {}", self.program, args.join(" ")))?;

        if !output.status.success() {
            bail!(
                "{} {} exited with {}: {}",
                self.program,
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl EnvironmentResolver for CliEnvironmentResolver {
    async fn resolve(&self) -> Result<Option<DockerEndpoint>> {
        let current = self
            .run(&["context", "show"])
            .await
            .context("Failed to get current docker context")?;

        let inspected = self
            .run(&["context", "inspect", &current])
            .await
            .context("Failed to inspect docker context")?;

        let endpoint = parse_context_inspect(&inspected)
            .with_context(|| format!("Failed to parse docker context {:?}", current))?;

        Ok(endpoint.map(|mut e| {
            // Only keep the cert directory when it actually holds a CA
            if let Some(dir) = &e.cert_path {
                if !Path::new(dir).join("ca.pem").exists() {
                    e.cert_path = None;
                }
            }
            e
        }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DockerContext {
    #[serde(default)]
    endpoints: ContextEndpoints,
    #[serde(default)]
    storage: ContextStorage,
}

#[derive(Debug, Default, Deserialize)]
struct ContextEndpoints {
    #[serde(default)]
    docker: DockerContextEndpoint,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DockerContextEndpoint {
    #[serde(default)]
    host: String,
    #[serde(default)]
    skip_tls_verify: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContextStorage {
    #[serde(rename = "TLSPath", default)]
    tls_path: String,
}

/// Parse the JSON array printed by `docker context inspect`
pub fn parse_context_inspect(json: &str) -> Result<Option<DockerEndpoint>> {
    let contexts: Vec<DockerContext> = serde_json::from_str(json.trim())?;
    let context = contexts
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no context data returned"))?;

    if context.endpoints.docker.host.is_empty() {
        return Ok(None);
    }

    Ok(Some(DockerEndpoint {
        host: context.endpoints.docker.host,
        cert_path: (!context.storage.tls_path.is_empty()).then_some(context.storage.tls_path),
        tls_verify: !context.endpoints.docker.skip_tls_verify,
    }))
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    /// Resolver returning a fixed answer
    pub struct StaticResolver(pub Option<DockerEndpoint>);

    #[async_trait]
    impl EnvironmentResolver for StaticResolver {
        async fn resolve(&self) -> Result<Option<DockerEndpoint>> {
            Ok(self.0.clone())
        }
    }
}
