//! gzip/gunzip interoperability.
//!
//! The locally built `gzip`/`gunzip` are crossed with the system's reference
//! binaries. Every pair round-trips the corpus, then the interop suite runs
//! against it.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::builder::{BuildConfiguration, Phase, RunResult, TARGET_GUNZIP, TARGET_GZIP};
use crate::context::RunContext;
use crate::corpus::TestCorpus;
use crate::error::{MatrixError, MatrixResult};
use crate::exec::{Invocation, OutputMode};
use crate::wrapper::{WrapperMode, WrapperSpec};

/// A compressor and the decompressor that must invert it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryPair {
    /// Compressor path.
    pub compressor: PathBuf,
    /// Decompressor path.
    pub decompressor: PathBuf,
}

impl BinaryPair {
    /// Creates a pair.
    pub fn new(compressor: impl Into<PathBuf>, decompressor: impl Into<PathBuf>) -> Self {
        Self {
            compressor: compressor.into(),
            decompressor: decompressor.into(),
        }
    }
}

impl fmt::Display for BinaryPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GZIP={} GUNZIP={}",
            self.compressor.display(),
            self.decompressor.display()
        )
    }
}

/// Runs the interop phase.
pub struct InteropRunner<'c, 'a> {
    ctx: &'c RunContext<'a>,
}

impl<'c, 'a> InteropRunner<'c, 'a> {
    /// Creates a runner.
    pub fn new(ctx: &'c RunContext<'a>) -> Self {
        Self { ctx }
    }

    /// The four (compressor, decompressor) combinations, local binaries first.
    pub fn pairs(&self) -> Vec<BinaryPair> {
        let config = self.ctx.config;
        let compressors = [config.local_gzip.clone(), config.reference_gzip()];
        let decompressors = [config.local_gunzip.clone(), config.reference_gunzip()];
        compressors
            .iter()
            .flat_map(|gzip| {
                decompressors
                    .iter()
                    .map(move |gunzip| BinaryPair::new(gzip, gunzip))
            })
            .collect()
    }

    /// The locally built pair.
    pub fn local_pair(&self) -> BinaryPair {
        BinaryPair::new(&self.ctx.config.local_gzip, &self.ctx.config.local_gunzip)
    }

    /// Builds the local binaries and runs every pair, then the memory-check
    /// and sanitized passes over the local pair.
    pub fn run(&self, corpus: &TestCorpus) -> MatrixResult<Vec<RunResult>> {
        let log = self.ctx.log;
        let scratch = tempfile::Builder::new()
            .prefix("deflate-matrix-interop.")
            .tempdir()?;
        let mut results = Vec::new();

        let base = self.configuration(&self.ctx.config.default_cc, &[]);
        self.build_tools(&base)?;

        for mode in self.ctx.wrapper_modes() {
            let wrapper = self.ctx.wrapper(mode);
            let pairs = match mode {
                WrapperMode::Bare => self.pairs(),
                WrapperMode::MemoryCheck => vec![self.local_pair()],
                WrapperMode::Sanitized => {
                    let sanitized =
                        self.configuration(&self.ctx.config.sanitizer_cc, &wrapper.cflags);
                    self.build_tools(&sanitized)?;
                    vec![self.local_pair()]
                }
            };

            log.begin(format!("Interop, {} mode", mode));
            for pair in &pairs {
                results.extend(self.run_pair(corpus, pair, &wrapper, &scratch)?);
            }
            log.end();
        }

        Ok(results)
    }

    fn configuration(&self, compiler: &str, extra: &[String]) -> BuildConfiguration {
        let mut cflags = self.ctx.config.base_cflags();
        cflags.extend(extra.iter().cloned());
        BuildConfiguration::new(compiler, cflags, Vec::new())
    }

    fn build_tools(&self, config: &BuildConfiguration) -> MatrixResult<RunResult> {
        self.ctx.log.log(format!("Building gzip and gunzip: {}", config.describe()));
        self.ctx
            .builder()
            .build(config, &[TARGET_GZIP, TARGET_GUNZIP], Phase::Interop)
    }

    /// Round-trips the corpus through `pair`, then runs the interop suite.
    pub fn run_pair(
        &self,
        corpus: &TestCorpus,
        pair: &BinaryPair,
        wrapper: &WrapperSpec,
        scratch: &TempDir,
    ) -> MatrixResult<Vec<RunResult>> {
        let log = self.ctx.log;
        let cell = format!("{} WRAPPER=\"{}\"", pair, wrapper.prefix_string());
        log.log(format!("Round trip: {}", cell));

        let compressed = scratch.path().join("roundtrip.gz");
        let restored = scratch.path().join("roundtrip.out");
        let mut results = Vec::new();

        let compress = self.tool(wrapper, &pair.compressor, corpus.path(), &compressed);
        results.push(self.run_checked(compress, wrapper, &cell)?);
        let decompress = self.tool(wrapper, &pair.decompressor, &compressed, &restored);
        results.push(self.run_checked(decompress, wrapper, &cell)?);
        verify_round_trip(pair, corpus.path(), &restored)?;

        log.log(format!("Running interop suite: {}", cell));
        let suite = Invocation::new("sh")
            .arg(self.ctx.config.interop_suite())
            .env("GZIP", &pair.compressor)
            .env("GUNZIP", &pair.decompressor)
            .env("TESTDATA", corpus.path())
            .env("WRAPPER", wrapper.prefix_string())
            .current_dir(&self.ctx.config.source_dir);
        results.push(self.run_checked(suite, wrapper, &cell)?);

        Ok(results)
    }

    /// `[wrapper] <program> -c <input> > <output>`.
    fn tool(
        &self,
        wrapper: &WrapperSpec,
        program: &Path,
        input: &Path,
        output: &Path,
    ) -> Invocation {
        Invocation::prefixed(&wrapper.prefix, program)
            .arg("-c")
            .arg(input)
            .env_remove("GZIP")
            .env_remove("GUNZIP")
            .current_dir(&self.ctx.config.source_dir)
            .output(OutputMode::ToFile(output.to_path_buf()))
    }

    fn run_checked(
        &self,
        inv: Invocation,
        wrapper: &WrapperSpec,
        cell: &str,
    ) -> MatrixResult<RunResult> {
        let command = inv.display();
        let done = self.ctx.executor.execute(&inv)?;
        wrapper.check(&done, cell, &command)?;
        Ok(RunResult {
            status: done.code,
            phase: Phase::Interop,
            command,
        })
    }
}

/// Compares the restored file with the corpus byte for byte.
pub fn verify_round_trip(
    pair: &BinaryPair,
    original: &Path,
    restored: &Path,
) -> MatrixResult<()> {
    let failure = |detail: String| {
        MatrixError::interop(
            pair.compressor.display().to_string(),
            pair.decompressor.display().to_string(),
            detail,
        )
    };
    let read = |path: &Path| {
        fs::read(path).map_err(|e| failure(format!("cannot read {}: {}", path.display(), e)))
    };
    let expected = read(original)?;
    let actual = read(restored)?;

    match first_difference(&expected, &actual) {
        None => Ok(()),
        Some(offset) if offset == expected.len().min(actual.len()) => Err(failure(format!(
            "restored {} bytes, expected {}",
            actual.len(),
            expected.len()
        ))),
        Some(offset) => Err(failure(format!(
            "first difference at byte offset {}",
            offset
        ))),
    }
}

fn first_difference(a: &[u8], b: &[u8]) -> Option<usize> {
    match a.iter().zip(b).position(|(x, y)| x != y) {
        Some(offset) => Some(offset),
        None if a.len() != b.len() => Some(a.len().min(b.len())),
        None => None,
    }
}
