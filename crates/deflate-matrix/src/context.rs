//! Shared state for one matrix run.

use crate::builder::BuildInvoker;
use crate::config::MatrixConfig;
use crate::exec::Executor;
use crate::features::ArchFamily;
use crate::log::Logger;
use crate::wrapper::{WrapperMode, WrapperSpec};

/// What every runner needs: configuration, the executor, the log, and the
/// host architecture family.
pub struct RunContext<'a> {
    /// Run configuration.
    pub config: &'a MatrixConfig,
    /// Gateway to external programs.
    pub executor: &'a dyn Executor,
    /// Running log.
    pub log: &'a Logger,
    /// Architecture the feature matrix is generated for.
    pub arch: ArchFamily,
}

impl<'a> RunContext<'a> {
    /// Creates a context for the host architecture.
    pub fn new(config: &'a MatrixConfig, executor: &'a dyn Executor, log: &'a Logger) -> Self {
        Self {
            config,
            executor,
            log,
            arch: ArchFamily::host(),
        }
    }

    /// Overrides the architecture family.
    pub fn with_arch(mut self, arch: ArchFamily) -> Self {
        self.arch = arch;
        self
    }

    /// Build invoker for this run.
    pub fn builder(&self) -> BuildInvoker<'a> {
        BuildInvoker::new(
            self.executor,
            self.config.make.clone(),
            self.config.source_dir.clone(),
            self.config.jobs,
        )
    }

    /// Resolves a wrapper mode against this run's configuration.
    pub fn wrapper(&self, mode: WrapperMode) -> WrapperSpec {
        WrapperSpec::select(mode, self.config)
    }

    /// Wrapper modes this run exercises, honouring the skip switches.
    pub fn wrapper_modes(&self) -> Vec<WrapperMode> {
        WrapperMode::ALL
            .into_iter()
            .filter(|mode| match mode {
                WrapperMode::Bare => true,
                WrapperMode::MemoryCheck => !self.config.skip_valgrind,
                WrapperMode::Sanitized => !self.config.skip_ubsan,
            })
            .collect()
    }
}
