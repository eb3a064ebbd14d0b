//! Process lifecycle: listener startup, signal handling, graceful drain and the optional
//! cleanup sweep on the way out.

use crate::api::{ApiServer, AppState, ServerInfo};
use crate::config::Config;
use crate::sandbox::{cleanup_sandboxes, SandboxManager};
use anyhow::{Context, Result};
use std::future::Future;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn, Instrument, Span};

/// How long in-flight requests get to finish after a termination signal
pub const GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Bound on listing sandboxes during the cleanup sweep
pub const CLEANUP_LIST_TIMEOUT: Duration = Duration::from_secs(60);

/// Receiving half of a one-shot, many-listener shutdown notification
#[derive(Debug, Clone)]
pub struct ShutdownSignal(watch::Receiver<bool>);

impl ShutdownSignal {
    /// Resolves once the trigger fires; never resolves if it is dropped unfired
    pub async fn cancelled(mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

/// Sending half of [`ShutdownSignal`]
#[derive(Debug)]
pub struct ShutdownTrigger(watch::Sender<bool>);

impl ShutdownTrigger {
    pub fn fire(&self) {
        self.0.send_replace(true);
    }
}

pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger(tx), ShutdownSignal(rx))
}

/// Bind the listener. When any free port was requested, the bound address is written to
/// stdout as one JSON line before anything is served.
pub async fn bind(config: &Config) -> Result<TcpListener> {
    let listener = TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("Failed to listen on address {}", config.bind_addr()))?;
    let addr = listener.local_addr().context("Failed to read bound address")?;

    if config.server.port == 0 {
        announce(&mut std::io::stdout().lock(), addr).context("Failed to output server info")?;
    }

    info!("Listening on address {}, starting HTTP server", addr);
    Ok(listener)
}

/// Write the `{host, port}` startup line
pub fn announce<W: Write>(out: &mut W, addr: SocketAddr) -> Result<()> {
    let info = ServerInfo {
        host: addr.ip().to_string(),
        port: addr.port(),
    };
    serde_json::to_writer(&mut *out, &info)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

/// Wait for SIGINT or SIGTERM, returning the signal name
pub async fn wait_for_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.context("Failed to listen for SIGINT")?;
                Ok("SIGINT")
            }
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for ctrl-c")?;
        Ok("ctrl-c")
    }
}

/// Runs the HTTP front door and tears it down on request
pub struct Supervisor {
    config: Config,
    manager: Arc<SandboxManager>,
    http: reqwest::Client,
    grace_period: Duration,
    span: Span,
}

impl Supervisor {
    pub fn new(
        config: Config,
        manager: Arc<SandboxManager>,
        http: reqwest::Client,
        span: Span,
    ) -> Self {
        Self {
            config,
            manager,
            http,
            grace_period: GRACE_PERIOD,
            span,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Bind, serve, and shut down on SIGINT/SIGTERM
    pub async fn run(self) -> Result<()> {
        let span = self.span.clone();
        let grace_period = self.grace_period;
        let listener = bind(&self.config).instrument(span.clone()).await?;

        let stop = async {
            match wait_for_signal().await {
                Ok(signal) => info!("{}", shutdown_notice(signal, grace_period)),
                Err(e) => error!("Signal handling failed, shutting down: {:#}", e),
            }
        }
        .instrument(span);

        self.run_until(listener, stop).await
    }

    /// Serve on `listener` until `stop` resolves, then drain and optionally clean up
    pub async fn run_until<F>(self, listener: TcpListener, stop: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let span = self.span.clone();
        async move {
            let (drain_trigger, drain) = shutdown_channel();
            let (force_trigger, force) = shutdown_channel();

            let state = AppState::new(
                self.manager.clone(),
                self.http.clone(),
                self.config.sandbox.default_image.clone(),
                force,
                self.span.clone(),
            );
            let app = ApiServer::new(state).build_routes();

            let mut serving = tokio::spawn(
                async move {
                    axum::serve(listener, app)
                        .with_graceful_shutdown(drain.cancelled())
                        .await
                }
                .in_current_span(),
            );

            let served = tokio::select! {
                _ = stop => {
                    drain_trigger.fire();
                    match tokio::time::timeout(self.grace_period, &mut serving).await {
                        Ok(joined) => flatten(joined),
                        Err(_) => {
                            warn!(
                                "Grace period of {:?} expired, forcing shutdown",
                                self.grace_period
                            );
                            force_trigger.fire();
                            serving.abort();
                            Ok(())
                        }
                    }
                }
                joined = &mut serving => {
                    let result = flatten(joined);
                    if let Err(e) = &result {
                        error!("Failed to serve HTTP: {:#}", e);
                    }
                    result
                }
            };

            if served.is_ok() {
                info!("Graceful shutdown complete");
            }

            if self.config.sandbox.delete_on_shutdown {
                let report = cleanup_sandboxes(&self.manager, CLEANUP_LIST_TIMEOUT).await;
                if !report.is_complete() {
                    warn!(
                        "Cleanup incomplete: deleted {}/{} sandboxes",
                        report.deleted.len(),
                        report.found
                    );
                }
            }

            served
        }
        .instrument(span)
        .await
    }
}

fn shutdown_notice(signal: &str, grace_period: Duration) -> String {
    format!(
        "Received {} signal, shutting down with {:?} grace period...",
        signal, grace_period
    )
}

fn flatten(
    joined: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<()> {
    joined
        .context("HTTP server task failed")?
        .context("HTTP server error")
}
