//! Error types for the bare-metal CSI operator
//!
//! Provides structured error types for the platform classifier, the node
//! lifecycle reconciler, the scheduler patch coordinator and the resource
//! store adapters.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Reconcile pass exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    #[error("Resource {kind}/{name} changed since it was read")]
    StaleResourceVersion { kind: String, name: String },

    // =========================================================================
    // Ownership Errors
    // =========================================================================
    #[error("Conflict on {target}: field holds {current:?}, refusing to replace it with {desired:?}")]
    Conflict {
        target: String,
        current: String,
        desired: String,
    },

    // =========================================================================
    // Node Lifecycle Errors
    // =========================================================================
    #[error("Node agent pods are still running on node {node}, removal of {identity} postponed")]
    NodeAgentRunning { node: String, identity: String },

    #[error("Node identity {identity} has no Hostname address")]
    MissingHostname { identity: String },

    #[error("Security verification failed: {0}")]
    SecurityVerification(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("Kernel version parse error: {0}")]
    KernelVersionParse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Partial Failures
    // =========================================================================
    #[error("{0}")]
    Aggregate(AggregateError),
}

/// A set of independent failures collected during a fan-out step.
#[derive(Debug, Default)]
pub struct AggregateError(pub Vec<Error>);

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", messages.join("; "))
    }
}

impl AggregateError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the error side of `result`, if any
    pub fn capture<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.push(e);
                None
            }
        }
    }

    /// Add an error, flattening nested aggregates
    pub fn push(&mut self, error: Error) {
        match error {
            Error::Aggregate(inner) => self.0.extend(inner.0),
            other => self.0.push(other),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn errors(&self) -> &[Error] {
        &self.0
    }

    /// `Ok(())` when nothing failed; a single error is returned unwrapped
    pub fn into_result(mut self) -> Result<()> {
        match self.0.len() {
            0 => Ok(()),
            1 => Err(self.0.remove(0)),
            _ => Err(Error::Aggregate(self)),
        }
    }
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_)
            | Error::ResourceNotFound { .. }
            | Error::ResourceExists { .. }
            | Error::StaleResourceVersion { .. } => ErrorAction::RequeueWithBackoff,

            // Workload still draining - wait for the pods to go away
            Error::NodeAgentRunning { .. } | Error::MissingHostname { .. } => {
                ErrorAction::RequeueAfter(Duration::from_secs(30))
            }

            Error::DeadlineExceeded(_) => ErrorAction::RequeueAfter(Duration::from_secs(10)),

            // Operator action required
            Error::Configuration(_) | Error::Conflict { .. } | Error::SecurityVerification(_) => {
                ErrorAction::NoRequeue
            }

            Error::Aggregate(inner) => {
                if inner.0.iter().any(Error::is_retryable) {
                    ErrorAction::RequeueWithBackoff
                } else {
                    ErrorAction::NoRequeue
                }
            }

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Kube(_)
                | Error::StaleResourceVersion { .. }
                | Error::NodeAgentRunning { .. }
                | Error::DeadlineExceeded(_)
        )
    }

    /// Check if the error reports a missing object
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ResourceNotFound { .. } => true,
            Error::Kube(kube::Error::Api(response)) => response.code == 404,
            _ => false,
        }
    }

    /// Check if the error reports an ownership conflict
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::Aggregate(inner) => inner.0.iter().any(Error::is_conflict),
            _ => false,
        }
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;

/// Treat a missing object as success
pub fn ignore_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}
