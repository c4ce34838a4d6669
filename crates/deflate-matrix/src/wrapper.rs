//! Diagnostic wrappers for test invocations.

use std::fmt;

use crate::config::{MatrixConfig, MEMCHECK_ARGS, SANITIZER_CFLAGS};
use crate::error::{MatrixError, MatrixResult, MEMCHECK_EXIT_CODE};
use crate::exec::Completed;

/// How failures are detected in one sub-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WrapperMode {
    /// No instrumentation.
    Bare,
    /// Tests run under the memory checker.
    MemoryCheck,
    /// Tests run bare against an undefined-behavior-instrumented build.
    Sanitized,
}

impl WrapperMode {
    /// All modes, in the order a full matrix exercises them.
    pub const ALL: [WrapperMode; 3] = [
        WrapperMode::Bare,
        WrapperMode::MemoryCheck,
        WrapperMode::Sanitized,
    ];

    /// Returns the string identifier for this mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            WrapperMode::Bare => "bare",
            WrapperMode::MemoryCheck => "memory-check",
            WrapperMode::Sanitized => "sanitized",
        }
    }
}

impl fmt::Display for WrapperMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved wrapper: the command prefix for test executables plus any
/// compile flags the build needs for the mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperSpec {
    /// Which mode produced this spec.
    pub mode: WrapperMode,
    /// Command prefix; empty means none.
    pub prefix: Vec<String>,
    /// Extra compile flags for the build.
    pub cflags: Vec<String>,
    /// Exit code that identifies a defect found by the wrapper itself.
    pub error_exit_code: Option<i32>,
}

impl WrapperSpec {
    /// No prefix, no extra flags.
    pub fn bare() -> Self {
        Self {
            mode: WrapperMode::Bare,
            prefix: Vec::new(),
            cflags: Vec::new(),
            error_exit_code: None,
        }
    }

    /// Resolves `mode` against the run configuration.
    ///
    /// Bare mode uses the user's `WRAPPER` prefix, if any.
    pub fn select(mode: WrapperMode, config: &MatrixConfig) -> Self {
        match mode {
            WrapperMode::Bare => Self {
                prefix: config.wrapper.clone(),
                ..Self::bare()
            },
            WrapperMode::MemoryCheck => Self {
                mode,
                prefix: [
                    config.valgrind.clone(),
                    "--quiet".to_string(),
                    format!("--error-exitcode={}", MEMCHECK_EXIT_CODE),
                ]
                .into_iter()
                .chain(MEMCHECK_ARGS.iter().map(|s| s.to_string()))
                .collect(),
                cflags: Vec::new(),
                error_exit_code: Some(MEMCHECK_EXIT_CODE),
            },
            WrapperMode::Sanitized => Self {
                mode,
                prefix: Vec::new(),
                cflags: SANITIZER_CFLAGS.iter().map(|s| s.to_string()).collect(),
                error_exit_code: None,
            },
        }
    }

    /// The prefix as one string, the form the test suites read from `WRAPPER`.
    pub fn prefix_string(&self) -> String {
        self.prefix.join(" ")
    }

    /// Whether `code` is the wrapper's own defect signal.
    pub fn is_wrapper_error(&self, code: i32) -> bool {
        self.error_exit_code == Some(code)
    }

    /// Turns a finished test invocation into a verdict.
    pub fn check(&self, done: &Completed, cell: &str, command: &str) -> MatrixResult<()> {
        if done.succeeded() {
            return Ok(());
        }
        if self.is_wrapper_error(done.code) {
            return Err(MatrixError::MemoryError {
                cell: cell.to_string(),
                command: command.to_string(),
            });
        }
        Err(MatrixError::TestFailure {
            exit_code: done.code,
            cell: cell.to_string(),
            command: command.to_string(),
        })
    }
}
