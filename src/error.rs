use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Multiple processes match '{pattern}':\n{matches}Use --pid to specify exactly one.")]
    MultipleProcesses { pattern: String, matches: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("No target thread(s) matched '{0}'")]
    NoTargetThreads(String),

    #[error("Neither thread CPU time nor allocated bytes are supported by the target")]
    ResourceCountersUnsupported,

    #[error("Invalid thread list '{0}'")]
    InvalidSelector(String),

    #[error("Invalid expression '{expr}': {reason}")]
    InvalidExpression { expr: String, reason: String },

    #[error("Out of range: {0}")]
    OutOfRange(String),

    #[error("Pattern '{pattern}' needs at least {min} non-wildcard characters")]
    PatternTooShort { pattern: String, min: usize },

    #[error("No recording in memory. Record a sample or load a recording file first.")]
    NoRecording,

    #[error("The recording is already written to {}", .0.display())]
    AlreadyPersisted(PathBuf),

    #[error("The recording has already been loaded from {}", .0.display())]
    AlreadyLoaded(PathBuf),

    #[error("Recording file does not exist: {}", .0.display())]
    RecordFileNotFound(PathBuf),

    #[error("Invalid recording file: {0}")]
    InvalidRecordFile(String),

    #[error("Recording file version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: i32, supported: i32 },

    #[error("Collection did not finish within {0:?}")]
    CollectTimeout(Duration),

    #[error("Sampler error: {0}")]
    Sampler(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const INVALID_ARGUMENTS: i32 = 2;
    pub const PROCESS_NOT_FOUND: i32 = 3;
    pub const PERMISSION_DENIED: i32 = 4;
    pub const INVALID_RECORDING: i32 = 5;
    pub const DATABASE_ERROR: i32 = 6;
}

impl Error {
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ProcessNotFound(_) | Error::MultipleProcesses { .. } => {
                exit_code::PROCESS_NOT_FOUND
            }
            Error::PermissionDenied(_) => exit_code::PERMISSION_DENIED,
            Error::Database(_) => exit_code::DATABASE_ERROR,
            Error::RecordFileNotFound(_)
            | Error::InvalidRecordFile(_)
            | Error::UnsupportedVersion { .. } => exit_code::INVALID_RECORDING,
            Error::InvalidArgument(_) => exit_code::INVALID_ARGUMENTS,
            e if e.is_validation() => exit_code::INVALID_ARGUMENTS,
            _ => exit_code::GENERAL_ERROR,
        }
    }

    /// Validation failures only abort the query or start that raised them.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidSelector(_)
                | Error::InvalidExpression { .. }
                | Error::OutOfRange(_)
                | Error::PatternTooShort { .. }
                | Error::NoTargetThreads(_)
                | Error::ResourceCountersUnsupported
        )
    }

    pub(crate) fn invalid_expr(expr: &str, reason: impl Into<String>) -> Self {
        Error::InvalidExpression {
            expr: expr.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            Error::ProcessNotFound("1".into()).exit_code(),
            exit_code::PROCESS_NOT_FOUND
        );
        assert_eq!(
            Error::InvalidRecordFile("x".into()).exit_code(),
            exit_code::INVALID_RECORDING
        );
        assert_eq!(Error::NoRecording.exit_code(), exit_code::GENERAL_ERROR);
        assert_eq!(
            Error::OutOfRange("order 0".into()).exit_code(),
            exit_code::INVALID_ARGUMENTS
        );
        assert_eq!(
            Error::ResourceCountersUnsupported.exit_code(),
            exit_code::INVALID_ARGUMENTS
        );
    }

    #[test]
    fn test_validation_classification() {
        assert!(Error::invalid_expr("abc", "bad").is_validation());
        assert!(Error::ResourceCountersUnsupported.is_validation());
        assert!(!Error::Sampler("x".into()).is_validation());
    }
}
