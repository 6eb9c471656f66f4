//! Error types for node operations.
//!
//! `NodeError` carries the CSI error class of a failed node operation and is
//! converted into a `tonic::Status` at the gRPC boundary. `MountError` is
//! what the mount capability layer reports; handlers wrap it into
//! `NodeError::Internal` together with the volume and path involved.

use thiserror::Error;
use tonic::{Code, Status};

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    FailedPrecondition(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("{0}")]
    Internal(String),
}

impl NodeError {
    /// gRPC status code for this error class.
    pub fn code(&self) -> Code {
        match self {
            NodeError::InvalidArgument(_) => Code::InvalidArgument,
            NodeError::NotFound(_) => Code::NotFound,
            NodeError::FailedPrecondition(_) => Code::FailedPrecondition,
            NodeError::AlreadyExists(_) => Code::AlreadyExists,
            NodeError::Internal(_) => Code::Internal,
        }
    }

    /// Label used for the operation status in metrics.
    pub fn label(&self) -> &'static str {
        match self {
            NodeError::InvalidArgument(_) => "invalid_argument",
            NodeError::NotFound(_) => "not_found",
            NodeError::FailedPrecondition(_) => "failed_precondition",
            NodeError::AlreadyExists(_) => "already_exists",
            NodeError::Internal(_) => "internal",
        }
    }
}

impl From<NodeError> for Status {
    fn from(err: NodeError) -> Self {
        Status::new(err.code(), err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum MountError {
    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("failed to parse mount table: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NodeError>;

pub type MountResult<T> = std::result::Result<T, MountError>;
