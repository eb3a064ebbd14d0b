use crate::sandbox::error::SandboxError;
use crate::sandbox::types::box_base_url;
use std::future::Future;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

/// Readiness probe for the box service of a freshly started sandbox
#[derive(Debug, Clone)]
pub struct HealthCheck {
    http: reqwest::Client,
    interval: Duration,
    timeout: Duration,
}

impl HealthCheck {
    pub fn new(http: reqwest::Client, interval: Duration, timeout: Duration) -> Self {
        Self {
            http,
            interval,
            timeout,
        }
    }

    /// Poll `GET /healthz` on `port` until it answers 200.
    ///
    /// The first probe happens one interval after the call. Fails with
    /// [`SandboxError::HealthCheckTimeout`] once the window is exhausted, or with
    /// [`SandboxError::Cancelled`] as soon as `cancel` resolves.
    pub async fn wait_until_healthy<C>(&self, port: u16, cancel: C) -> Result<(), SandboxError>
    where
        C: Future<Output = ()>,
    {
        tokio::pin!(cancel);
        tokio::select! {
            result = self.poll(port) => result,
            _ = &mut cancel => Err(SandboxError::Cancelled),
        }
    }

    async fn poll(&self, port: u16) -> Result<(), SandboxError> {
        let start = Instant::now();
        let mut ticker = interval_at(start + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let elapsed = start.elapsed();
            if elapsed > self.timeout {
                return Err(SandboxError::HealthCheckTimeout {
                    timeout: self.timeout,
                });
            }

            match self.probe(port, self.timeout - elapsed).await {
                Ok(()) => {
                    debug!(port, elapsed_ms = elapsed.as_millis() as u64, "Box is healthy");
                    return Ok(());
                }
                Err(reason) => trace!(port, "Box not ready yet: {}", reason),
            }
        }
    }

    async fn probe(&self, port: u16, budget: Duration) -> Result<(), String> {
        let response = self
            .http
            .get(format!("{}/healthz", box_base_url(port)))
            .timeout(budget)
            .send()
            .await
            .map_err(|e| format!("do request: {}", e))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(format!("healthcheck failed: {}", response.status().as_u16()));
        }
        Ok(())
    }
}
