use anyhow::Result;
use clap::{Parser, Subcommand};
use sandboxd::Config;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sandboxd")]
#[command(about = "Ephemeral container sandboxes behind a scoped HTTP API", long_about = None)]
struct Cli {
    /// Optional YAML config file; SANDBOXAID_* variables override it
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen host, overriding config and environment
    #[arg(long)]
    host: Option<String>,

    /// Listen port, overriding config and environment (0 picks a free port)
    #[arg(long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the sandbox server
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    init_logging(&config.logging.level, &config.logging.format)?;

    match &cli.config {
        Some(path) => tracing::info!("Config loaded from: {}", path.display()),
        None => tracing::info!("Config loaded from defaults and environment"),
    }

    match cli.command {
        Some(Commands::Serve) | None => sandboxd::run(config).await?,
    }

    Ok(())
}

/// Logs go to stderr; stdout is reserved for the startup address line.
fn init_logging(level: &str, format: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer.json())
                .try_init()?;
        }
        "compact" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer.compact())
                .try_init()?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer.pretty())
                .try_init()?;
        }
    }

    Ok(())
}
