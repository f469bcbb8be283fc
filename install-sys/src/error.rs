// SPDX-License-Identifier: GPL-3.0-only

use install_contracts::{BackendError, BackendErrorKind};
use thiserror::Error;

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("required tool '{0}' is not installed")]
    ToolMissing(String),

    #[error("could not parse {0}")]
    Parse(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;

impl From<SysError> for BackendError {
    fn from(err: SysError) -> Self {
        match err {
            SysError::Io(io) => io.into(),
            SysError::CommandFailed { .. } => {
                BackendError::new(BackendErrorKind::CommandFailed, err.to_string())
            }
            SysError::ToolMissing(_) => {
                BackendError::new(BackendErrorKind::Unsupported, err.to_string())
            }
            SysError::Parse(_) => BackendError::new(BackendErrorKind::Internal, err.to_string()),
            SysError::PermissionDenied(_) => {
                BackendError::new(BackendErrorKind::PermissionDenied, err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_to_backend_kinds() {
        let err: BackendError = SysError::ToolMissing("parted".to_string()).into();
        assert_eq!(err.kind, BackendErrorKind::Unsupported);
        assert!(err.message.contains("parted"));

        let err: BackendError = SysError::CommandFailed {
            command: "mkfs.ext4 -F /dev/sda2".to_string(),
            stderr: "device busy".to_string(),
        }
        .into();
        assert_eq!(err.kind, BackendErrorKind::CommandFailed);
        assert_eq!(err.message, "mkfs.ext4 -F /dev/sda2 failed: device busy");
    }
}
