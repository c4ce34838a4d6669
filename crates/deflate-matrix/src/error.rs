//! Error types for the test matrix.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for matrix operations.
pub type MatrixResult<T> = Result<T, MatrixError>;

/// Exit code the memory checker is configured to report on any defect.
pub const MEMCHECK_EXIT_CODE: i32 = 100;

/// Exit code used when the invocation itself is malformed.
pub const USAGE_EXIT_CODE: u8 = 2;

/// Errors that abort a matrix run.
///
/// Nothing is retried: every variant is fatal to the whole run and carries
/// enough context to reproduce the failing cell by hand.
#[derive(Debug, Error)]
pub enum MatrixError {
    /// The orchestrator was invoked with arguments.
    #[error("{usage}")]
    Usage { usage: String },

    /// The test corpus could not be acquired.
    #[error("Failed to provision test data: {message}")]
    Provision { message: String },

    /// The external build system exited non-zero.
    #[error("Build failed with exit code {exit_code} ({cell})\n  command: {command}")]
    BuildFailure {
        exit_code: i32,
        cell: String,
        command: String,
    },

    /// A bare or wrapped test invocation exited non-zero.
    #[error("Tests failed with exit code {exit_code} ({cell})\n  command: {command}")]
    TestFailure {
        exit_code: i32,
        cell: String,
        command: String,
    },

    /// The memory checker reported a defect.
    #[error("Memory checker reported errors ({cell})\n  command: {command}")]
    MemoryError { cell: String, command: String },

    /// The freestanding artifact references something outside itself.
    #[error(
        "Freestanding library {} has external dependencies: symbols [{}], libraries [{}]",
        artifact.display(),
        symbols.join(", "),
        libraries.join(", ")
    )]
    FreestandingViolation {
        artifact: PathBuf,
        symbols: Vec<String>,
        libraries: Vec<String>,
    },

    /// A compress/decompress round trip did not reproduce the corpus.
    #[error("Round trip mismatch with GZIP={compressor} GUNZIP={decompressor}: {detail}")]
    InteropFailure {
        compressor: String,
        decompressor: String,
        detail: String,
    },

    /// An external program could not be started.
    #[error("Failed to spawn '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MatrixError {
    /// Creates a new provision error.
    pub fn provision(message: impl Into<String>) -> Self {
        Self::Provision {
            message: message.into(),
        }
    }

    /// Creates a new interop failure.
    pub fn interop(
        compressor: impl Into<String>,
        decompressor: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::InteropFailure {
            compressor: compressor.into(),
            decompressor: decompressor.into(),
            detail: detail.into(),
        }
    }

    /// Stable identifier for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            MatrixError::Usage { .. } => "MATRIX_001",
            MatrixError::Provision { .. } => "MATRIX_002",
            MatrixError::BuildFailure { .. } => "MATRIX_003",
            MatrixError::TestFailure { .. } => "MATRIX_004",
            MatrixError::MemoryError { .. } => "MATRIX_005",
            MatrixError::FreestandingViolation { .. } => "MATRIX_006",
            MatrixError::InteropFailure { .. } => "MATRIX_007",
            MatrixError::SpawnFailed { .. } => "MATRIX_008",
            MatrixError::Io(_) => "MATRIX_009",
        }
    }

    /// The process exit code this error maps to.
    ///
    /// Subordinate tool failures propagate the tool's own code verbatim.
    pub fn exit_code(&self) -> u8 {
        let code = match self {
            MatrixError::Usage { .. } => return USAGE_EXIT_CODE,
            MatrixError::BuildFailure { exit_code, .. }
            | MatrixError::TestFailure { exit_code, .. } => *exit_code,
            MatrixError::MemoryError { .. } => MEMCHECK_EXIT_CODE,
            MatrixError::SpawnFailed { .. } => 127,
            MatrixError::Provision { .. }
            | MatrixError::FreestandingViolation { .. }
            | MatrixError::InteropFailure { .. }
            | MatrixError::Io(_) => 1,
        };
        match u8::try_from(code) {
            Ok(0) | Err(_) => 1,
            Ok(code) => code,
        }
    }
}
