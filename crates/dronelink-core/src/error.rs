//! # Error Types
//!
//! Domain-specific error types for dronelink-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  dronelink-core errors (this file)                                     │
//! │  ├── RecordParseError  - One log line failed the schema                │
//! │  └── ValidationError   - Operator input out of range                   │
//! │                                                                         │
//! │  dronelink-store errors                                                │
//! │  └── StoreError        - Sink read/write failures                      │
//! │                                                                         │
//! │  dronelink-sync errors                                                 │
//! │  └── ConnectError / StartError / PublishError / SyncError              │
//! │                                                                         │
//! │  A RecordParseError is never fatal: the line is dropped and counted.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Record Parse Error
// =============================================================================

/// A single telemetry line that does not match the record schema.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordParseError {
    /// The line does not have exactly eight comma-separated fields.
    #[error("expected 8 fields, found {found}")]
    WrongFieldCount { found: usize },

    /// A numeric column could not be parsed.
    #[error("field '{field}' is not a number: '{value}'")]
    InvalidNumber { field: &'static str, value: String },

    /// An identity column parsed to NaN or infinity.
    #[error("field '{field}' must be finite")]
    NonFinite { field: &'static str },

    /// The `fix_ok` column is neither 0/1 nor true/false.
    #[error("field 'fix_ok' is not a flag: '{0}'")]
    InvalidFlag(String),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Operator input validation failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Value outside its allowed range.
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RecordParseError::InvalidNumber {
            field: "lat",
            value: "abc".into(),
        };
        assert!(err.to_string().contains("lat"));
        assert!(err.to_string().contains("abc"));

        let err = ValidationError::OutOfRange {
            field: "velocity_mps",
            min: 0.1,
            max: 100.0,
            value: 0.0,
        };
        assert!(err.to_string().contains("velocity_mps"));
    }
}
