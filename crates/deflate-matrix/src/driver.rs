//! Phase sequencing.

use std::ffi::OsString;

use clap::Parser;

use crate::builder::FlagVariant;
use crate::compilers::CompilerDiscovery;
use crate::config::MatrixConfig;
use crate::context::RunContext;
use crate::corpus;
use crate::error::{MatrixError, MatrixResult};
use crate::exec::Executor;
use crate::features::ArchFamily;
use crate::freestanding::FreestandingValidator;
use crate::interop::InteropRunner;
use crate::log::{report_error, Logger};
use crate::native::NativeMatrixRunner;

/// Name of the entry point binary.
pub const BIN_NAME: &str = "run-tests";

/// Usage line printed when arguments are given.
pub const USAGE: &str = "Usage: run-tests";

/// The entry point takes no arguments.
#[derive(Debug, Parser)]
#[command(name = BIN_NAME, disable_help_flag = true, disable_version_flag = true)]
struct Args {}

/// Accepts only an empty argument list (after the program name).
///
/// Configuration comes from the environment; any argument, including
/// `--help`, is a usage error.
pub fn parse_args<I, T>(args: I) -> MatrixResult<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Args::try_parse_from(args)
        .map(|_| ())
        .map_err(|_| MatrixError::Usage {
            usage: USAGE.to_string(),
        })
}

/// Runs native, freestanding and interop phases, in that order.
pub struct Driver<'a> {
    config: &'a MatrixConfig,
    executor: &'a dyn Executor,
    log: &'a Logger,
    arch: ArchFamily,
    discovery: CompilerDiscovery,
}

impl<'a> Driver<'a> {
    /// Creates a driver for the host architecture with the default
    /// compiler search locations.
    pub fn new(config: &'a MatrixConfig, executor: &'a dyn Executor, log: &'a Logger) -> Self {
        Self {
            config,
            executor,
            log,
            arch: ArchFamily::host(),
            discovery: CompilerDiscovery::new(config.default_cc.clone()),
        }
    }

    /// Overrides the architecture family.
    pub fn arch(mut self, arch: ArchFamily) -> Self {
        self.arch = arch;
        self
    }

    /// Overrides compiler discovery.
    pub fn discovery(mut self, discovery: CompilerDiscovery) -> Self {
        self.discovery = discovery;
        self
    }

    /// Runs every phase. The first error aborts the run.
    ///
    /// A generated corpus is removed before this returns, on success and on
    /// error alike.
    pub fn run(&self) -> MatrixResult<()> {
        let ctx = RunContext::new(self.config, self.executor, self.log).with_arch(self.arch);
        let log = self.log;

        let corpus = corpus::acquire(self.config.testdata.as_deref(), &self.config.source_dir)?;
        log.log(format!(
            "Using test data {} ({} bytes)",
            corpus.path().display(),
            corpus.size()
        ));

        log.begin("Native tests");
        NativeMatrixRunner::new(&ctx).run(
            &corpus,
            &ctx.wrapper_modes(),
            &self.discovery,
            &FlagVariant::ALL,
        )?;
        log.end();

        if self.config.skip_freestanding {
            log.log("Skipping freestanding tests");
        } else {
            log.begin("Freestanding tests");
            FreestandingValidator::new(&ctx).validate(&corpus, &self.discovery)?;
            log.end();
        }

        log.begin("gzip/gunzip interop tests");
        InteropRunner::new(&ctx).run(&corpus)?;
        log.end();

        log.success();
        Ok(())
    }
}

/// Reports `result` and returns the process exit code for it.
pub fn exit_status(result: &MatrixResult<()>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            report_error(err);
            err.exit_code()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_arguments_accepted() {
        assert!(parse_args(["run-tests"]).is_ok());
        assert!(parse_args(Vec::<String>::new()).is_ok());
    }

    #[test]
    fn test_any_argument_is_usage_error() {
        for args in [
            vec!["run-tests", "extra"],
            vec!["run-tests", "--help"],
            vec!["run-tests", "-V"],
            vec!["run-tests", "--", "x"],
        ] {
            let err = parse_args(args.clone()).unwrap_err();
            assert!(matches!(err, MatrixError::Usage { .. }), "{:?}", args);
            assert_eq!(err.exit_code(), 2);
            assert_eq!(err.to_string(), USAGE);
        }
    }

    #[test]
    fn test_exit_status_success() {
        assert_eq!(exit_status(&Ok(())), 0);
    }
}
