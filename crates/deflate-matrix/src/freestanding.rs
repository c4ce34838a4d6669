//! Freestanding build validation.
//!
//! A freestanding library must not reference anything outside itself: no
//! undefined symbols in its symbol table and no dynamic library
//! dependencies. Once that holds, the whole native matrix runs against the
//! freestanding build.

use std::path::Path;

use crate::builder::{
    BuildConfiguration, FlagVariant, Phase, RunResult, FREESTANDING_VAR, TARGET_ALL,
    TEST_SUPPORT_VAR,
};
use crate::compilers::CompilerDiscovery;
use crate::context::RunContext;
use crate::corpus::TestCorpus;
use crate::error::{MatrixError, MatrixResult};
use crate::exec::{Invocation, OutputMode};
use crate::native::NativeMatrixRunner;

/// `ldd`'s verdict for an artifact with no dynamic dependencies.
const STATICALLY_LINKED: &str = "statically linked";

/// Validates the freestanding build and runs the matrix against it.
pub struct FreestandingValidator<'c, 'a> {
    ctx: &'c RunContext<'a>,
}

impl<'c, 'a> FreestandingValidator<'c, 'a> {
    /// Creates a validator.
    pub fn new(ctx: &'c RunContext<'a>) -> Self {
        Self { ctx }
    }

    /// Builds, inspects, then runs the native matrix in freestanding mode.
    pub fn validate(
        &self,
        corpus: &TestCorpus,
        compilers: &CompilerDiscovery,
    ) -> MatrixResult<Vec<RunResult>> {
        let log = self.ctx.log;
        let config = BuildConfiguration::new(
            self.ctx.config.default_cc.clone(),
            self.ctx.config.base_cflags(),
            vec![
                (FREESTANDING_VAR.to_string(), "1".to_string()),
                (TEST_SUPPORT_VAR.to_string(), "1".to_string()),
            ],
        );
        log.log(format!("Building freestanding library: {}", config.describe()));
        self.ctx
            .builder()
            .build(&config, &[TARGET_ALL], Phase::Freestanding)?;

        self.inspect(&self.ctx.config.shared_library())?;

        NativeMatrixRunner::new(self.ctx)
            .phase(Phase::Freestanding)
            .var(FREESTANDING_VAR, "1")
            .run(
                corpus,
                &self.ctx.wrapper_modes(),
                compilers,
                &FlagVariant::ALL,
            )
    }

    /// Checks `artifact` for undefined symbols and dynamic dependencies.
    pub fn inspect(&self, artifact: &Path) -> MatrixResult<()> {
        let log = self.ctx.log;

        log.log(format!("Checking {} for undefined symbols", artifact.display()));
        let nm = Invocation::new(&self.ctx.config.nm)
            .arg(artifact)
            .current_dir(&self.ctx.config.source_dir)
            .output(OutputMode::Capture);
        let command = nm.display();
        let done = self.ctx.executor.execute(&nm)?;
        if !done.succeeded() {
            return Err(MatrixError::TestFailure {
                exit_code: done.code,
                cell: format!("symbol query of {}", artifact.display()),
                command,
            });
        }
        let symbols = undefined_symbols(&String::from_utf8_lossy(&done.stdout));

        log.log(format!(
            "Checking {} for dynamic dependencies",
            artifact.display()
        ));
        let ldd = Invocation::new(&self.ctx.config.ldd)
            .arg(artifact)
            .current_dir(&self.ctx.config.source_dir)
            .output(OutputMode::Capture);
        let done = self.ctx.executor.execute(&ldd)?;
        let libraries = dynamic_dependencies(&String::from_utf8_lossy(&done.stdout));

        if symbols.is_empty() && libraries.is_empty() {
            return Ok(());
        }
        Err(MatrixError::FreestandingViolation {
            artifact: artifact.to_path_buf(),
            symbols,
            libraries,
        })
    }
}

/// Names of the undefined (`U`) symbols in `nm` output.
pub fn undefined_symbols(nm_output: &str) -> Vec<String> {
    nm_output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                [.., kind, name] if *kind == "U" => Some(name.to_string()),
                _ => None,
            }
        })
        .collect()
}

/// Dependency lines from `ldd` output, excluding the static verdict.
pub fn dynamic_dependencies(ldd_output: &str) -> Vec<String> {
    ldd_output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.contains(STATICALLY_LINKED))
        .map(str::to_string)
        .collect()
}
