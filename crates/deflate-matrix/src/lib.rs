//! libdeflate Test Matrix
//!
//! This crate orchestrates the libdeflate build and test matrix: it builds
//! the library under many configurations and runs its test programs against
//! each build, one configuration at a time, stopping at the first failure.
//!
//! # Phases
//!
//! 1. **Native** - every discovered compiler × flag variant (`""`,
//!    `-march=native`, `-m32`), each build re-tested once per CPU feature
//!    disable set, then a memory-check pass and a sanitized pass
//! 2. **Freestanding** - a `FREESTANDING=1` build must have no undefined
//!    symbols and no dynamic dependencies; the native matrix then runs
//!    against it
//! 3. **Interop** - the local `gzip`/`gunzip` are crossed with the system
//!    reference binaries and every pair must round-trip the test corpus
//!
//! # Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | All phases passed |
//! | 2 | Arguments were given |
//! | 100 | The memory checker found a defect |
//! | other | The first failing tool's own exit code |
//!
//! # Example
//!
//! ```ignore
//! use deflate_matrix::{Driver, Logger, MatrixConfig, ProcessExecutor};
//!
//! let config = MatrixConfig::from_env();
//! let executor = ProcessExecutor::new();
//! let log = Logger::stdout();
//! Driver::new(&config, &executor, &log).run()?;
//! ```
//!
//! # Crate Structure
//!
//! - [`driver`] - Phase sequencing and argument handling
//! - [`native`] - Native build matrix
//! - [`freestanding`] - Freestanding build validation
//! - [`interop`] - gzip/gunzip interoperability
//! - [`builder`] - Build system invocation
//! - [`features`] - CPU feature disable matrix
//! - [`wrapper`] - Memory-check and sanitizer wrappers
//! - [`compilers`] - Compiler discovery
//! - [`corpus`] - Test corpus provisioning and cleanup
//! - [`exec`] - External program invocation
//! - [`config`] - Configuration from the environment
//! - [`log`] - Running log
//! - [`error`] - Error types

pub mod builder;
pub mod compilers;
pub mod config;
pub mod context;
pub mod corpus;
pub mod driver;
pub mod error;
pub mod exec;
pub mod features;
pub mod freestanding;
pub mod interop;
pub mod log;
pub mod native;
pub mod wrapper;

pub use builder::{BuildConfiguration, BuildInvoker, FlagVariant, Phase, RunResult};
pub use compilers::{CompilerCandidate, CompilerDiscovery, InstallPattern};
pub use config::MatrixConfig;
pub use context::RunContext;
pub use corpus::{install_interrupt_cleanup, TestCorpus};
pub use driver::{exit_status, parse_args, Driver};
pub use error::{MatrixError, MatrixResult, MEMCHECK_EXIT_CODE};
pub use exec::{Completed, Executor, Invocation, OutputMode, ProcessExecutor};
pub use features::{ArchFamily, FeatureDisableSet};
pub use freestanding::FreestandingValidator;
pub use interop::{BinaryPair, InteropRunner};
pub use log::Logger;
pub use native::NativeMatrixRunner;
pub use wrapper::{WrapperMode, WrapperSpec};
