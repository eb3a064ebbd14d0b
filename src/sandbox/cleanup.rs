use crate::sandbox::{SandboxError, SandboxManager, SandboxSpacedName};
use std::time::Duration;
use tracing::{error, info};

/// Outcome of a cleanup sweep
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Sandboxes found in scope
    pub found: usize,
    /// Sandboxes deleted before the sweep stopped
    pub deleted: Vec<SandboxSpacedName>,
    /// The failure that stopped the sweep, if any
    pub error: Option<SandboxError>,
}

impl CleanupReport {
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.deleted.len() == self.found
    }
}

/// Delete every sandbox in the manager's scope, one at a time.
///
/// Listing is bounded by `list_timeout`. The first failed deletion ends the sweep; nothing
/// is retried.
pub async fn cleanup_sandboxes(manager: &SandboxManager, list_timeout: Duration) -> CleanupReport {
    info!("Cleanup: ensuring all sandboxes are deleted");
    let mut report = CleanupReport::default();

    let refs = match tokio::time::timeout(list_timeout, manager.list_all_sandboxes()).await {
        Ok(Ok(refs)) => refs,
        Ok(Err(e)) => {
            error!("Cleanup: failed to list sandboxes: {}", e);
            report.error = Some(e);
            return report;
        }
        Err(_) => {
            error!("Cleanup: listing sandboxes timed out after {:?}", list_timeout);
            report.error = Some(SandboxError::Timeout {
                stage: "list",
                timeout: list_timeout,
            });
            return report;
        }
    };

    report.found = refs.len();
    if refs.is_empty() {
        info!("Cleanup: no sandboxes to delete");
        return report;
    }

    for (i, sandbox) in refs.into_iter().enumerate() {
        info!("Cleanup: deleting {}/{}: sandbox {}", i + 1, report.found, sandbox);
        if let Err(e) = manager.delete_sandbox(&sandbox.space, &sandbox.name).await {
            error!(
                "Cleanup: failed to delete sandbox {:?} in space {:?}: {}",
                sandbox.name, sandbox.space, e
            );
            report.error = Some(e);
            return report;
        }
        report.deleted.push(sandbox);
    }

    info!("Cleanup: done deleting sandboxes (total = {})", report.deleted.len());
    report
}
