//! Error types for the binding layer

use sqlbind_ffi_common::CodecError;
use thiserror::Error;

use crate::types::{codes, ResultCode};

/// Result type for binding operations
pub type Result<T> = std::result::Result<T, BindError>;

/// Errors that can occur while calling into the native library
#[derive(Debug, Error)]
pub enum BindError {
    /// The call plumbing failed (library, symbol table or marshalling)
    #[error("native infrastructure failure: {0}")]
    Infrastructure(#[from] InfrastructureError),

    /// The engine returned a non-success result code
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A handle was used in a state that does not allow the operation
    #[error("invalid handle state: {0}")]
    State(#[from] StateError),

    /// Configuration could not be parsed
    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

impl From<CodecError> for BindError {
    fn from(err: CodecError) -> Self {
        BindError::Infrastructure(InfrastructureError::Marshal(err))
    }
}

impl BindError {
    /// The engine error, if this is one.
    pub fn as_engine(&self) -> Option<&EngineError> {
        match self {
            BindError::Engine(e) => Some(e),
            _ => None,
        }
    }

    /// The state error, if this is one.
    pub fn as_state(&self) -> Option<&StateError> {
        match self {
            BindError::State(e) => Some(e),
            _ => None,
        }
    }
}

/// Failures of the binding machinery itself.
///
/// These indicate a loading, declaration or marshalling defect rather than
/// anything the engine reported.
#[derive(Debug, Error)]
pub enum InfrastructureError {
    /// The native library artifact could not be loaded
    #[error("failed to load native library '{library}': {reason}")]
    LibraryLoad { library: String, reason: String },

    /// A required export is missing from the library
    #[error("symbol '{symbol}' not found in '{library}'")]
    MissingSymbol {
        symbol: &'static str,
        library: String,
    },

    /// A process-wide binding is already installed
    #[error("native binding already installed from '{installed}'")]
    AlreadyInstalled { installed: String },

    /// A native call returned null where its contract forbids it
    #[error("'{operation}' returned a null pointer")]
    NullReturn { operation: &'static str },

    /// An argument or result could not be converted
    #[error("marshalling failed: {0}")]
    Marshal(#[from] CodecError),
}

/// A non-success result code together with the engine's diagnostic text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("engine error {code}: {message}")]
pub struct EngineError {
    /// Result code as returned by the native call
    pub code: i32,
    /// Diagnostic text from the engine
    pub message: String,
}

impl EngineError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Primary result code (extended code bits stripped)
    pub fn primary_code(&self) -> i32 {
        self.code & 0xff
    }

    pub fn result_code(&self) -> ResultCode {
        ResultCode::classify(self.code)
    }

    pub fn is_busy(&self) -> bool {
        self.primary_code() == codes::BUSY
    }

    pub fn is_interrupted(&self) -> bool {
        self.primary_code() == codes::INTERRUPT
    }
}

/// Precondition violations detected before any native call is issued
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// Open called on a connection that is already open
    #[error("connection to '{path}' is already open")]
    AlreadyOpen { path: String },

    /// Operation requires an open connection
    #[error("connection has not been opened")]
    NotOpen,

    /// Operation on a closed connection
    #[error("connection is closed")]
    Closed,

    /// Operation on a finalized statement
    #[error("statement has already been finalized")]
    Finalized,

    /// Column value read without a current row
    #[error("statement has no current row")]
    NoCurrentRow,

    /// Column index outside the result set
    #[error("column index {index} out of range (statement has {count} columns)")]
    ColumnOutOfRange { index: i32, count: i32 },

    /// Source text compiled to no statement (empty or comment only)
    #[error("source text contains no SQL statement")]
    NoStatement,
}

/// Failure reported by a managed callback.
///
/// Returned by user functions; the trampoline turns it into the native error
/// result for the current call instead of letting it cross the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CallbackError {
    message: String,
}

impl CallbackError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for CallbackError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for CallbackError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_classification() {
        let busy = EngineError::new(codes::BUSY, "database is locked");
        assert!(busy.is_busy());
        assert!(!busy.is_interrupted());
        assert_eq!(busy.result_code(), ResultCode::Busy);

        // SQLITE_BUSY_SNAPSHOT = SQLITE_BUSY | (2 << 8)
        let extended = EngineError::new(codes::BUSY | (2 << 8), "snapshot");
        assert_eq!(extended.primary_code(), codes::BUSY);
        assert!(extended.is_busy());
    }

    #[test]
    fn test_codec_error_is_infrastructure() {
        let err: BindError = CodecError::InteriorNul { position: 1 }.into();
        assert!(matches!(
            err,
            BindError::Infrastructure(InfrastructureError::Marshal(_))
        ));
    }

    #[test]
    fn test_display_messages() {
        let err = BindError::from(EngineError::new(1, "no such table: t"));
        assert_eq!(err.to_string(), "engine error 1: no such table: t");

        let err = BindError::from(StateError::Finalized);
        assert_eq!(
            err.to_string(),
            "invalid handle state: statement has already been finalized"
        );
    }
}
