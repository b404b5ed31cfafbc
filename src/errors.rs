use std::fmt;

use thiserror::Error;

/// Stable error codes surfaced to operators in logs and exit statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ConfigError,
    IoError,
    ParsingError,
    SchemaMismatch,
    StorageFailure,
    ResourceLimitExceeded,
    SandboxViolation,
    UserAbort,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigError => "CONFIG_ERROR",
            ErrorCode::IoError => "IO_ERROR",
            ErrorCode::ParsingError => "PARSING_ERROR",
            ErrorCode::SchemaMismatch => "SCHEMA_MISMATCH",
            ErrorCode::StorageFailure => "STORAGE_FAILURE",
            ErrorCode::ResourceLimitExceeded => "RESOURCE_LIMIT_EXCEEDED",
            ErrorCode::SandboxViolation => "SANDBOX_VIOLATION",
            ErrorCode::UserAbort => "USER_ABORT",
        }
    }

    /// Process exit code: 2 user error, 3 validation, 4 IO, 5 internal.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorCode::ConfigError | ErrorCode::SandboxViolation => 2,
            ErrorCode::SchemaMismatch => 3,
            ErrorCode::IoError | ErrorCode::StorageFailure => 4,
            ErrorCode::ParsingError
            | ErrorCode::ResourceLimitExceeded
            | ErrorCode::UserAbort => 5,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error carrying a structured code for the CLI and job status records.
#[derive(Debug, Error)]
#[error("[{code}] {message}")]
pub struct PipelineError {
    pub code: ErrorCode,
    pub message: String,
}

impl PipelineError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::IoError, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StorageFailure, message)
    }

    pub fn resource_limit(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ResourceLimitExceeded, message)
    }

    pub fn sandbox(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SandboxViolation, message)
    }

    pub fn user_abort(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UserAbort, message)
    }
}

/// Exit code for an arbitrary error chain, probing for a `PipelineError` root.
pub fn exit_code_for(error: &anyhow::Error) -> i32 {
    for cause in error.chain() {
        if let Some(pipeline) = cause.downcast_ref::<PipelineError>() {
            return pipeline.code.exit_code();
        }
        if cause.downcast_ref::<std::io::Error>().is_some() {
            return ErrorCode::IoError.exit_code();
        }
    }
    5
}
