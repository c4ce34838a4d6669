//! Build system invocation.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{MatrixError, MatrixResult};
use crate::exec::{Executor, Invocation};

/// Library and command-line programs.
pub const TARGET_ALL: &str = "all";
/// Test executables.
pub const TARGET_TEST_PROGRAMS: &str = "test_programs";
/// Command-line compressor.
pub const TARGET_GZIP: &str = "gzip";
/// Command-line decompressor.
pub const TARGET_GUNZIP: &str = "gunzip";

/// Enables `LIBDEFLATE_DISABLE_CPU_FEATURES` in the built library.
pub const TEST_SUPPORT_VAR: &str = "TEST_SUPPORT__DO_NOT_USE";
/// Builds the library without the host's standard runtime.
pub const FREESTANDING_VAR: &str = "FREESTANDING";

/// Pipeline phase a result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Native build matrix.
    Native,
    /// Freestanding build and matrix.
    Freestanding,
    /// gzip/gunzip interoperability.
    Interop,
}

impl Phase {
    /// Returns the string identifier for this phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Native => "native",
            Phase::Freestanding => "freestanding",
            Phase::Interop => "interop",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one successful external step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    /// Exit status of the step.
    pub status: i32,
    /// Phase the step ran in.
    pub phase: Phase,
    /// Reproduction line for the step.
    pub command: String,
}

/// Compile flag variants applied on top of the base flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagVariant {
    /// Base flags only.
    Default,
    /// Pinned to the host's full native feature set.
    MarchNative,
    /// 32-bit build.
    M32,
}

impl FlagVariant {
    /// All variants, in execution order.
    pub const ALL: [FlagVariant; 3] = [
        FlagVariant::Default,
        FlagVariant::MarchNative,
        FlagVariant::M32,
    ];

    /// Flags this variant adds.
    pub fn flags(&self) -> &'static [&'static str] {
        match self {
            FlagVariant::Default => &[],
            FlagVariant::MarchNative => &["-march=native"],
            FlagVariant::M32 => &["-m32"],
        }
    }

    /// Whether building this variant needs multilib support.
    pub fn needs_multilib(&self) -> bool {
        matches!(self, FlagVariant::M32)
    }
}

/// Everything the build system needs for one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfiguration {
    compiler: PathBuf,
    cflags: Vec<String>,
    vars: Vec<(String, String)>,
}

impl BuildConfiguration {
    /// Creates a configuration.
    pub fn new(
        compiler: impl Into<PathBuf>,
        cflags: Vec<String>,
        vars: Vec<(String, String)>,
    ) -> Self {
        Self {
            compiler: compiler.into(),
            cflags,
            vars,
        }
    }

    /// Compiler path.
    pub fn compiler(&self) -> &Path {
        &self.compiler
    }

    /// Compile flags, in order.
    pub fn cflags(&self) -> &[String] {
        &self.cflags
    }

    /// Build-system variables, in order.
    pub fn vars(&self) -> &[(String, String)] {
        &self.vars
    }

    /// `CC=... CFLAGS="..." VAR=...` for logs and error context.
    pub fn describe(&self) -> String {
        let mut text = format!(
            "CC={} CFLAGS=\"{}\"",
            self.compiler.display(),
            self.cflags.join(" ")
        );
        for (key, value) in &self.vars {
            text.push_str(&format!(" {}={}", key, value));
        }
        text
    }
}

/// Drives the external build system.
pub struct BuildInvoker<'a> {
    executor: &'a dyn Executor,
    make: String,
    source_dir: PathBuf,
    jobs: usize,
}

impl<'a> BuildInvoker<'a> {
    /// Creates an invoker running `make` in `source_dir` with `jobs` parallel jobs.
    pub fn new(
        executor: &'a dyn Executor,
        make: impl Into<String>,
        source_dir: impl Into<PathBuf>,
        jobs: usize,
    ) -> Self {
        Self {
            executor,
            make: make.into(),
            source_dir: source_dir.into(),
            jobs: jobs.max(1),
        }
    }

    /// The invocation that builds `targets` with `config`.
    pub fn invocation(&self, config: &BuildConfiguration, targets: &[&str]) -> Invocation {
        let mut inv = Invocation::new(&self.make)
            .arg(format!("-j{}", self.jobs))
            .arg(format!("CC={}", config.compiler.display()))
            .arg(format!("CFLAGS={}", config.cflags.join(" ")));
        for (key, value) in &config.vars {
            inv = inv.arg(format!("{}={}", key, value));
        }
        inv.args(targets.iter().copied())
            .current_dir(&self.source_dir)
    }

    /// Builds `targets`. A non-zero exit is a [`MatrixError::BuildFailure`].
    pub fn build(
        &self,
        config: &BuildConfiguration,
        targets: &[&str],
        phase: Phase,
    ) -> MatrixResult<RunResult> {
        let inv = self.invocation(config, targets);
        let command = inv.display();
        let done = self.executor.execute(&inv)?;
        if !done.succeeded() {
            return Err(MatrixError::BuildFailure {
                exit_code: done.code,
                cell: config.describe(),
                command,
            });
        }
        Ok(RunResult {
            status: done.code,
            phase,
            command,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::Completed;
    use std::cell::RefCell;
    use std::ffi::OsString;

    struct OneShot {
        code: i32,
        seen: RefCell<Vec<Invocation>>,
    }

    impl Executor for OneShot {
        fn execute(&self, invocation: &Invocation) -> MatrixResult<Completed> {
            self.seen.borrow_mut().push(invocation.clone());
            Ok(Completed::exit(self.code))
        }
    }

    fn config() -> BuildConfiguration {
        BuildConfiguration::new(
            "gcc-12",
            vec!["-Werror".to_string(), "-m32".to_string()],
            vec![(TEST_SUPPORT_VAR.to_string(), "1".to_string())],
        )
    }

    #[test]
    fn test_describe() {
        assert_eq!(
            config().describe(),
            "CC=gcc-12 CFLAGS=\"-Werror -m32\" TEST_SUPPORT__DO_NOT_USE=1"
        );
    }

    #[test]
    fn test_invocation_shape() {
        let exec = OneShot {
            code: 0,
            seen: RefCell::new(Vec::new()),
        };
        let invoker = BuildInvoker::new(&exec, "make", "/src", 8);
        let result = invoker
            .build(&config(), &[TARGET_ALL, TARGET_TEST_PROGRAMS], Phase::Native)
            .unwrap();
        assert_eq!(result.status, 0);
        assert_eq!(result.phase, Phase::Native);

        let seen = exec.seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].program, OsString::from("make"));
        let args: Vec<_> = seen[0]
            .args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "-j8",
                "CC=gcc-12",
                "CFLAGS=-Werror -m32",
                "TEST_SUPPORT__DO_NOT_USE=1",
                "all",
                "test_programs",
            ]
        );
        assert_eq!(seen[0].cwd, Some(PathBuf::from("/src")));
    }

    #[test]
    fn test_nonzero_exit_is_build_failure() {
        let exec = OneShot {
            code: 2,
            seen: RefCell::new(Vec::new()),
        };
        let invoker = BuildInvoker::new(&exec, "make", ".", 1);
        let err = invoker
            .build(&config(), &[TARGET_GZIP, TARGET_GUNZIP], Phase::Interop)
            .unwrap_err();
        match err {
            MatrixError::BuildFailure {
                exit_code, cell, ..
            } => {
                assert_eq!(exit_code, 2);
                assert!(cell.contains("CC=gcc-12"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_flag_variants() {
        let flags: Vec<_> = FlagVariant::ALL.iter().map(|v| v.flags()).collect();
        assert_eq!(flags, vec![&[][..], &["-march=native"][..], &["-m32"][..]]);
        assert!(FlagVariant::M32.needs_multilib());
        assert!(!FlagVariant::MarchNative.needs_multilib());
    }
}
