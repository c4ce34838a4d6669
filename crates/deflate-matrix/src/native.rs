//! Native build matrix.
//!
//! Every compiler × flag variant is built once; each build then runs the
//! native suite once per CPU feature disable set. The memory-check and
//! sanitized passes follow with the default compiler and base flags.

use crate::builder::{
    BuildConfiguration, FlagVariant, Phase, RunResult, TARGET_ALL, TARGET_TEST_PROGRAMS,
    TEST_SUPPORT_VAR,
};
use crate::compilers::{multilib_disabled, CompilerDiscovery};
use crate::context::RunContext;
use crate::corpus::TestCorpus;
use crate::error::MatrixResult;
use crate::exec::Invocation;
use crate::features::{self, DISABLE_CPU_FEATURES_VAR};
use crate::wrapper::{WrapperMode, WrapperSpec};

/// Runs the native matrix.
pub struct NativeMatrixRunner<'c, 'a> {
    ctx: &'c RunContext<'a>,
    phase: Phase,
    vars: Vec<(String, String)>,
}

impl<'c, 'a> NativeMatrixRunner<'c, 'a> {
    /// Creates a runner for the native phase.
    pub fn new(ctx: &'c RunContext<'a>) -> Self {
        Self {
            ctx,
            phase: Phase::Native,
            vars: vec![(TEST_SUPPORT_VAR.to_string(), "1".to_string())],
        }
    }

    /// Attributes results to `phase`.
    pub fn phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    /// Adds a build-system variable to every build.
    pub fn var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.push((key.into(), value.into()));
        self
    }

    /// Runs every wrapper mode in `modes`, in order.
    ///
    /// Bare mode covers `compilers` × `variants`; the other modes build once
    /// with their own compiler and flags. Returns one result per
    /// (compiler, flags, feature set) cell; the first failure aborts.
    pub fn run(
        &self,
        corpus: &TestCorpus,
        modes: &[WrapperMode],
        compilers: &CompilerDiscovery,
        variants: &[FlagVariant],
    ) -> MatrixResult<Vec<RunResult>> {
        let mut results = Vec::new();
        for &mode in modes {
            let wrapper = self.ctx.wrapper(mode);
            match mode {
                WrapperMode::Bare => {
                    self.run_compilers(corpus, compilers, variants, &wrapper, &mut results)?
                }
                WrapperMode::MemoryCheck => {
                    let config = self.configuration(&self.ctx.config.default_cc, &[], &wrapper);
                    self.run_cell(corpus, &config, &wrapper, &mut results)?;
                }
                WrapperMode::Sanitized => {
                    let config =
                        self.configuration(&self.ctx.config.sanitizer_cc, &[], &wrapper);
                    self.run_cell(corpus, &config, &wrapper, &mut results)?;
                }
            }
        }
        Ok(results)
    }

    fn run_compilers(
        &self,
        corpus: &TestCorpus,
        compilers: &CompilerDiscovery,
        variants: &[FlagVariant],
        wrapper: &WrapperSpec,
        results: &mut Vec<RunResult>,
    ) -> MatrixResult<()> {
        for compiler in compilers.discover() {
            if !compiler.live {
                self.ctx.log.log(format!(
                    "CC={} not found, its builds will fail",
                    compiler.name()
                ));
            }
            let no_multilib = variants.iter().any(FlagVariant::needs_multilib)
                && multilib_disabled(self.ctx.executor, &compiler.path);
            for variant in variants {
                if variant.needs_multilib() && no_multilib {
                    self.ctx.log.log(format!(
                        "Skipping {} with CC={}: multilib is disabled",
                        variant.flags().join(" "),
                        compiler.name()
                    ));
                    continue;
                }
                let config = self.configuration(&compiler.name(), variant.flags(), wrapper);
                self.run_cell(corpus, &config, wrapper, results)?;
            }
        }
        Ok(())
    }

    fn configuration(
        &self,
        compiler: &str,
        variant_flags: &[&str],
        wrapper: &WrapperSpec,
    ) -> BuildConfiguration {
        let mut cflags = self.ctx.config.base_cflags();
        cflags.extend(variant_flags.iter().map(|s| s.to_string()));
        cflags.extend(wrapper.cflags.iter().cloned());
        BuildConfiguration::new(compiler, cflags, self.vars.clone())
    }

    /// Builds `config` once, then runs the suite for each feature disable set.
    fn run_cell(
        &self,
        corpus: &TestCorpus,
        config: &BuildConfiguration,
        wrapper: &WrapperSpec,
        results: &mut Vec<RunResult>,
    ) -> MatrixResult<()> {
        let log = self.ctx.log;
        log.begin(format!(
            "{} WRAPPER=\"{}\"",
            config.describe(),
            wrapper.prefix_string()
        ));

        self.ctx
            .builder()
            .build(config, &[TARGET_ALL, TARGET_TEST_PROGRAMS], self.phase)?;

        for set in features::generate(self.ctx.arch, config.cflags()) {
            log.log(format!("Using {}", set));
            let inv = Invocation::new("sh")
                .arg(self.ctx.config.native_suite())
                .env("WRAPPER", wrapper.prefix_string())
                .env("TESTDATA", corpus.path())
                .env(DISABLE_CPU_FEATURES_VAR, set.env_value())
                .current_dir(&self.ctx.config.source_dir);
            let command = inv.display();
            let done = self.ctx.executor.execute(&inv)?;
            let cell = format!(
                "{} WRAPPER=\"{}\" {}",
                config.describe(),
                wrapper.prefix_string(),
                set
            );
            wrapper.check(&done, &cell, &command)?;
            results.push(RunResult {
                status: done.code,
                phase: self.phase,
                command,
            });
        }

        log.end();
        Ok(())
    }
}
