//! deflate-matrix End-to-End Test Infrastructure
//!
//! The matrix only ever talks to the outside world through an `Executor`.
//! These tests swap in a [`harness::ScriptedExecutor`] that records every
//! invocation and answers from a script, so whole runs can be checked
//! without a compiler, `make`, or the library sources.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p deflate-matrix-tests
//! ```
//!
//! Tests that need real host tools (`gzip`, `gunzip`) skip themselves when
//! the tools are missing.

pub mod harness;
