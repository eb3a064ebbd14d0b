use crate::sandbox::runtime::RuntimeError;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by the sandbox lifecycle manager
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("space cannot be empty")]
    EmptySpace,

    /// The backing container does not exist (or belongs to another scope)
    #[error("sandbox not found: {resource}")]
    NotFound { resource: String },

    /// A runtime call failed; `stage` names the lifecycle step
    #[error("{stage}: {resource}: {source}")]
    Runtime {
        stage: &'static str,
        resource: String,
        #[source]
        source: RuntimeError,
    },

    /// The container exists but cannot be read back as a sandbox
    #[error("container {resource:?}: {reason}")]
    InvalidContainer { resource: String, reason: String },

    #[error("waiting for box healthcheck: timed out after {timeout:?}")]
    HealthCheckTimeout { timeout: Duration },

    #[error("{stage}: timed out after {timeout:?}")]
    Timeout {
        stage: &'static str,
        timeout: Duration,
    },

    #[error("operation cancelled")]
    Cancelled,
}

impl SandboxError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Wrap a runtime error with its stage, keeping not-found distinct
    pub(crate) fn from_runtime(stage: &'static str, resource: &str, source: RuntimeError) -> Self {
        if source.is_not_found() {
            Self::NotFound {
                resource: resource.to_string(),
            }
        } else {
            Self::Runtime {
                stage,
                resource: resource.to_string(),
                source,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_runtime_keeps_not_found() {
        let err = SandboxError::from_runtime(
            "stop",
            "default.abc",
            RuntimeError::NotFound("default.abc".into()),
        );
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "sandbox not found: default.abc");
    }

    #[test]
    fn test_runtime_error_names_stage() {
        let err = SandboxError::from_runtime(
            "remove",
            "default.abc",
            RuntimeError::Api("device busy".into()),
        );
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "remove: default.abc: device busy");
    }
}
