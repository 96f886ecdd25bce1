//! Orchestrator error types

use crate::classify::ErrorCategory;
use thiserror::Error;

/// Remediation shown to the operator when the cloud control plane refuses a call.
pub const PERMISSION_REMEDIATION: &str = "Grant the operating identity elevated project-level access \
     (for example `roles/owner` or `roles/editor` on the target project) and re-run the deploy";

/// Orchestrator errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Command timed out after {timeout_secs}s: {command}")]
    ExecutionTimeout { command: String, timeout_secs: u64 },

    #[error("Failed to run {command}: {message}")]
    ProcessError { command: String, message: String },

    #[error("Permission denied: {diagnostic}\nRemediation: {}", PERMISSION_REMEDIATION)]
    PermissionDenied { diagnostic: String },

    #[error("Capability still not enabled after {attempts} attempt(s): {diagnostic}")]
    CapabilityPropagating { attempts: u32, diagnostic: String },

    #[error("Apply failed: {diagnostic}")]
    Unclassified { diagnostic: String },

    #[error("Context switch to project {project} failed: {diagnostic}")]
    ContextSwitchFailed { project: String, diagnostic: String },

    #[error("Output not found: {0}")]
    OutputNotFound(String),

    #[error("Invalid phase transition: {0}")]
    InvalidTransition(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Build the caller-visible error for a terminal, non-successful category.
    ///
    /// The diagnostic is carried verbatim so the operator sees the tool's own text.
    pub fn from_category(category: ErrorCategory, attempts: u32, diagnostic: &str) -> Self {
        let diagnostic = diagnostic.trim().to_string();
        match category {
            ErrorCategory::PermissionDenied => CloudError::PermissionDenied { diagnostic },
            ErrorCategory::CapabilityPropagating => {
                CloudError::CapabilityPropagating {
                    attempts,
                    diagnostic,
                }
            }
            ErrorCategory::Unclassified
            | ErrorCategory::AsyncOperationAccepted
            | ErrorCategory::AsyncOperationInProgress => CloudError::Unclassified { diagnostic },
        }
    }

    /// Category of a classified apply failure, if this error is one
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            CloudError::PermissionDenied { .. } => Some(ErrorCategory::PermissionDenied),
            CloudError::CapabilityPropagating { .. } => Some(ErrorCategory::CapabilityPropagating),
            CloudError::Unclassified { .. } => Some(ErrorCategory::Unclassified),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
