//! # Store Error Types

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a [`DataStore`](crate::DataStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading the backing file failed.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing the backing file failed.
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    /// The file involved in the failure.
    pub fn path(&self) -> &std::path::Path {
        match self {
            StoreError::Read { path, .. } | StoreError::Write { path, .. } => path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_path() {
        let err = StoreError::Write {
            path: PathBuf::from("/tmp/drone_data.csv"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("drone_data.csv"));
        assert_eq!(err.path(), std::path::Path::new("/tmp/drone_data.csv"));
    }
}
