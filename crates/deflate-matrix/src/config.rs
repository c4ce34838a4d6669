//! Run configuration.
//!
//! All knobs come from environment variables; the orchestrator takes no
//! command-line arguments.

use std::path::{Path, PathBuf};

/// Compile flags every build starts with.
pub const BASE_CFLAGS: &[&str] = &["-Werror", "-DLIBDEFLATE_ENABLE_ASSERTIONS"];

/// Memory checker options after `--error-exitcode`. Every leak kind is an
/// error.
pub const MEMCHECK_ARGS: &[&str] = &["--leak-check=full", "--errors-for-leak-kinds=all"];

/// Compile flags for undefined-behavior instrumentation.
pub const SANITIZER_CFLAGS: &[&str] = &["-fsanitize=undefined", "-fno-sanitize-recover=undefined"];

/// Native test suite, relative to the source directory.
pub const NATIVE_SUITE: &str = "scripts/exec_tests.sh";

/// Interop test suite, relative to the source directory.
pub const INTEROP_SUITE: &str = "scripts/gzip_tests.sh";

/// Configuration for a matrix run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixConfig {
    /// Collaborator source tree; builds and suites run here.
    pub source_dir: PathBuf,
    /// Default toolchain name.
    pub default_cc: String,
    /// Extra user compile flags, appended after [`BASE_CFLAGS`].
    pub user_cflags: Vec<String>,
    /// Pre-supplied corpus; bypasses generation.
    pub testdata: Option<PathBuf>,
    /// Command prefix for bare-mode test runs.
    pub wrapper: Vec<String>,
    /// Locally built compressor under test.
    pub local_gzip: PathBuf,
    /// Locally built decompressor under test.
    pub local_gunzip: PathBuf,
    /// System reference compressor, if configured.
    pub ref_gzip: Option<PathBuf>,
    /// System reference decompressor, if configured.
    pub ref_gunzip: Option<PathBuf>,
    /// Build system program.
    pub make: String,
    /// Symbol table inspection tool.
    pub nm: String,
    /// Dynamic dependency inspection tool.
    pub ldd: String,
    /// Memory checker program.
    pub valgrind: String,
    /// Compiler used for sanitized builds.
    pub sanitizer_cc: String,
    /// Skip memory-check passes.
    pub skip_valgrind: bool,
    /// Skip sanitized passes.
    pub skip_ubsan: bool,
    /// Skip the freestanding phase.
    pub skip_freestanding: bool,
    /// Parallelism hint for the build system.
    pub jobs: usize,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl MatrixConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let flag = |key: &str| {
            get(key)
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
        };

        let source_dir = get("LIBDEFLATE_SOURCE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            local_gzip: get("DEFLATE_GZIP")
                .map(PathBuf::from)
                .unwrap_or_else(|| source_dir.join("gzip")),
            local_gunzip: get("DEFLATE_GUNZIP")
                .map(PathBuf::from)
                .unwrap_or_else(|| source_dir.join("gunzip")),
            ref_gzip: get("REF_GZIP").map(PathBuf::from),
            ref_gunzip: get("REF_GUNZIP").map(PathBuf::from),
            default_cc: get("CC").unwrap_or_else(|| "cc".to_string()),
            user_cflags: get("CFLAGS").map(|v| split_words(&v)).unwrap_or_default(),
            testdata: get("TESTDATA").map(PathBuf::from),
            wrapper: get("WRAPPER").map(|v| split_words(&v)).unwrap_or_default(),
            make: get("MAKE").unwrap_or_else(|| "make".to_string()),
            nm: get("NM").unwrap_or_else(|| "nm".to_string()),
            ldd: get("LDD").unwrap_or_else(|| "ldd".to_string()),
            valgrind: get("VALGRIND").unwrap_or_else(|| "valgrind".to_string()),
            sanitizer_cc: get("SANITIZER_CC").unwrap_or_else(|| "clang".to_string()),
            skip_valgrind: flag("SKIP_VALGRIND"),
            skip_ubsan: flag("SKIP_UBSAN"),
            skip_freestanding: flag("SKIP_FREESTANDING"),
            jobs: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            source_dir,
        }
    }

    /// Sets the parallelism hint.
    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Base compile flags plus user flags.
    pub fn base_cflags(&self) -> Vec<String> {
        BASE_CFLAGS
            .iter()
            .map(|s| s.to_string())
            .chain(self.user_cflags.iter().cloned())
            .collect()
    }

    /// Path of the native test suite entry point.
    pub fn native_suite(&self) -> PathBuf {
        PathBuf::from(NATIVE_SUITE)
    }

    /// Path of the interop test suite entry point.
    pub fn interop_suite(&self) -> PathBuf {
        PathBuf::from(INTEROP_SUITE)
    }

    /// The built shared library artifact.
    pub fn shared_library(&self) -> PathBuf {
        let name = if cfg!(target_os = "macos") {
            "libdeflate.dylib"
        } else {
            "libdeflate.so"
        };
        self.source_dir.join(name)
    }

    /// Reference compressor, resolved from `PATH` when not configured.
    pub fn reference_gzip(&self) -> PathBuf {
        resolve_reference(self.ref_gzip.as_deref(), "gzip")
    }

    /// Reference decompressor, resolved from `PATH` when not configured.
    pub fn reference_gunzip(&self) -> PathBuf {
        resolve_reference(self.ref_gunzip.as_deref(), "gunzip")
    }
}

fn resolve_reference(configured: Option<&Path>, name: &str) -> PathBuf {
    if let Some(path) = configured {
        return path.to_path_buf();
    }
    which::which(name).unwrap_or_else(|_| Path::new("/usr/bin").join(name))
}

/// Splits a flags string on whitespace.
pub fn split_words(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = MatrixConfig::from_lookup(|_| None);
        assert_eq!(config.default_cc, "cc");
        assert_eq!(config.source_dir, PathBuf::from("."));
        assert_eq!(config.local_gzip, PathBuf::from("./gzip"));
        assert_eq!(config.local_gunzip, PathBuf::from("./gunzip"));
        assert!(config.testdata.is_none());
        assert!(config.wrapper.is_empty());
        assert_eq!(config.make, "make");
        assert_eq!(config.sanitizer_cc, "clang");
        assert!(!config.skip_valgrind);
        assert!(config.jobs >= 1);
        assert_eq!(
            config.base_cflags(),
            vec!["-Werror", "-DLIBDEFLATE_ENABLE_ASSERTIONS"]
        );
    }

    #[test]
    fn test_overrides() {
        let config = MatrixConfig::from_lookup(lookup(&[
            ("CC", "clang-17"),
            ("CFLAGS", "-O3  -g"),
            ("TESTDATA", "/data/corpus"),
            ("WRAPPER", "qemu-aarch64 -L /usr"),
            ("LIBDEFLATE_SOURCE_DIR", "/src/libdeflate"),
            ("SKIP_VALGRIND", "1"),
            ("SKIP_UBSAN", "TRUE"),
            ("SKIP_FREESTANDING", "0"),
        ]));
        assert_eq!(config.default_cc, "clang-17");
        assert_eq!(
            config.base_cflags(),
            vec!["-Werror", "-DLIBDEFLATE_ENABLE_ASSERTIONS", "-O3", "-g"]
        );
        assert_eq!(config.testdata, Some(PathBuf::from("/data/corpus")));
        assert_eq!(config.wrapper, vec!["qemu-aarch64", "-L", "/usr"]);
        assert_eq!(config.local_gzip, PathBuf::from("/src/libdeflate/gzip"));
        assert!(config.skip_valgrind);
        assert!(config.skip_ubsan);
        assert!(!config.skip_freestanding);
    }

    #[test]
    fn test_empty_values_count_as_unset() {
        let config = MatrixConfig::from_lookup(lookup(&[("CC", ""), ("TESTDATA", "")]));
        assert_eq!(config.default_cc, "cc");
        assert!(config.testdata.is_none());
    }

    #[test]
    fn test_configured_reference_binaries_win() {
        let config = MatrixConfig::from_lookup(lookup(&[
            ("REF_GZIP", "/opt/gzip"),
            ("REF_GUNZIP", "/opt/gunzip"),
        ]));
        assert_eq!(config.reference_gzip(), PathBuf::from("/opt/gzip"));
        assert_eq!(config.reference_gunzip(), PathBuf::from("/opt/gunzip"));
    }

    #[test]
    fn test_source_dir_anchors_derived_paths() {
        let config = MatrixConfig::from_lookup(lookup(&[("LIBDEFLATE_SOURCE_DIR", "/src/ld")]));
        assert_eq!(config.source_dir, PathBuf::from("/src/ld"));
        assert_eq!(config.local_gunzip, PathBuf::from("/src/ld/gunzip"));
        assert!(config.shared_library().starts_with("/src/ld"));
    }

    #[test]
    fn test_jobs_never_zero() {
        assert_eq!(MatrixConfig::default().jobs(0).jobs, 1);
    }
}
