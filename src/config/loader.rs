use super::Config;
use anyhow::{Context, Result};
use config::{File, FileFormat};
use std::path::Path;

pub const ENV_HOST: &str = "SANDBOXAID_HOST";
pub const ENV_PORT: &str = "SANDBOXAID_PORT";
pub const ENV_SCOPE: &str = "SANDBOXAID_SCOPE";
pub const ENV_DELETE_ON_SHUTDOWN: &str = "SANDBOXAID_DELETE_ON_SHUTDOWN";
pub const ENV_DEFAULT_IMAGE: &str = "SANDBOXAID_DEFAULT_IMAGE";
pub const ENV_LOG_LEVEL: &str = "SANDBOXAID_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "SANDBOXAID_LOG_FORMAT";

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Same as [`load_config`] with environment lookups going through `env`
pub fn load_config_with_env<F>(path: Option<&Path>, env: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        builder = builder.add_source(File::from(path).format(FileFormat::Yaml).required(true));
    }

    let port = env(ENV_PORT)
        .map(|p| {
            p.trim()
                .parse::<u16>()
                .with_context(|| format!("Invalid {}: {:?}", ENV_PORT, p))
        })
        .transpose()?;

    // Anything other than "true" leaves cleanup disabled
    let delete_on_shutdown =
        env(ENV_DELETE_ON_SHUTDOWN).map(|v| v.trim().eq_ignore_ascii_case("true"));

    builder = builder
        .set_override_option("server.host", env(ENV_HOST))?
        .set_override_option("server.port", port.map(i64::from))?
        .set_override_option("sandbox.scope", env(ENV_SCOPE))?
        .set_override_option("sandbox.default_image", env(ENV_DEFAULT_IMAGE))?
        .set_override_option("sandbox.delete_on_shutdown", delete_on_shutdown)?
        .set_override_option("logging.level", env(ENV_LOG_LEVEL))?
        .set_override_option("logging.format", env(ENV_LOG_FORMAT))?;

    let config: Config = builder
        .build()
        .context("Failed to load configuration")?
        .try_deserialize()
        .context("Failed to parse configuration")?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &Config) -> Result<()> {
    if config.sandbox.scope.trim().is_empty() {
        anyhow::bail!("Sandbox scope must not be empty");
    }

    if config.sandbox.default_image.trim().is_empty() {
        anyhow::bail!("Default sandbox image must not be empty");
    }

    let health = &config.sandbox.health_check;
    if health.interval_ms == 0 {
        anyhow::bail!("Health check interval must be positive");
    }
    if health.interval_ms > health.timeout_ms {
        anyhow::bail!(
            "Health check interval ({}ms) exceeds its timeout ({}ms)",
            health.interval_ms,
            health.timeout_ms
        );
    }

    let valid_formats = ["pretty", "compact", "json"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        anyhow::bail!("Invalid log format: {}", config.logging.format);
    }

    Ok(())
}
