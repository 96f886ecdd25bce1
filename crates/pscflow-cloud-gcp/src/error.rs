//! Google Cloud provider error types

use pscflow_cloud::{CloudError, ErrorCategory};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GcpError {
    #[error("{0} not found. Please install it and make sure it is on PATH")]
    ToolNotFound(String),

    #[error("Unknown resource folder: {0} (expected producer, consumer, create-vm or create-sql)")]
    UnknownFolder(String),

    #[error("Resource folder not found: {}", .0.display())]
    FolderMissing(PathBuf),

    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Invalid service attachment URI format: {0}")]
    InvalidServiceAttachmentUri(String),

    #[error("gcloud command failed: {0}")]
    CommandFailed(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    CloudError(#[from] CloudError),
}

impl GcpError {
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        GcpError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Category of a classified apply failure, if this error is one
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            GcpError::CloudError(e) => e.category(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GcpError>;
