//! Compiler discovery.
//!
//! The default toolchain always comes first. After it come versioned
//! toolchains found by scanning a fixed list of install locations; a
//! location or match that is missing or not executable is skipped.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::exec::{Executor, Invocation, OutputMode};

/// A compiler the matrix may build with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerCandidate {
    /// Executable name or path.
    pub path: PathBuf,
    /// Whether it resolved to an existing executable at discovery time.
    pub live: bool,
}

impl CompilerCandidate {
    /// Display form used in logs (`CC=...`).
    pub fn name(&self) -> String {
        self.path.display().to_string()
    }
}

/// One install location to scan, e.g. `/usr/bin/gcc-[0-9]*` or
/// `/opt/clang*/bin/clang`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPattern {
    /// Directory whose entries are matched.
    pub dir: PathBuf,
    /// Required entry-name prefix.
    pub prefix: String,
    /// Whether a digit must follow the prefix.
    pub versioned: bool,
    /// Path below a matching entry that names the compiler.
    pub subpath: Option<PathBuf>,
}

impl InstallPattern {
    /// Matches `<dir>/<prefix><digit>*`.
    pub fn versioned(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            versioned: true,
            subpath: None,
        }
    }

    /// Matches `<dir>/<prefix>*/<subpath>`.
    pub fn nested(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        subpath: impl Into<PathBuf>,
    ) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            versioned: false,
            subpath: Some(subpath.into()),
        }
    }

    fn matches(&self, name: &str) -> bool {
        match name.strip_prefix(self.prefix.as_str()) {
            Some(rest) if self.versioned => rest.starts_with(|c: char| c.is_ascii_digit()),
            Some(_) => true,
            None => false,
        }
    }

    /// Executable matches of this pattern, in sorted order.
    pub fn scan(&self) -> Vec<PathBuf> {
        if !self.dir.is_dir() {
            return Vec::new();
        }
        WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_str().is_some_and(|n| self.matches(n)))
            .map(|entry| match &self.subpath {
                Some(sub) => entry.path().join(sub),
                None => entry.into_path(),
            })
            .filter(|path| is_executable(path))
            .collect()
    }
}

/// Default install locations.
pub fn default_patterns() -> Vec<InstallPattern> {
    vec![
        InstallPattern::versioned("/usr/bin", "gcc-"),
        InstallPattern::versioned("/usr/bin", "clang-"),
        InstallPattern::nested("/opt", "gcc", "bin/gcc"),
        InstallPattern::nested("/opt", "clang", "bin/clang"),
    ]
}

fn is_executable(path: &Path) -> bool {
    path.is_file() && which::which(path).is_ok()
}

/// Enumerates compilers.
#[derive(Debug, Clone)]
pub struct CompilerDiscovery {
    default_cc: String,
    patterns: Vec<InstallPattern>,
}

impl CompilerDiscovery {
    /// Discovery with the default install locations.
    pub fn new(default_cc: impl Into<String>) -> Self {
        Self::with_patterns(default_cc, default_patterns())
    }

    /// Discovery with custom install locations.
    pub fn with_patterns(default_cc: impl Into<String>, patterns: Vec<InstallPattern>) -> Self {
        Self {
            default_cc: default_cc.into(),
            patterns,
        }
    }

    /// The default toolchain followed by every executable match, in order.
    ///
    /// Locations are scanned lazily as the iterator advances.
    pub fn discover(&self) -> impl Iterator<Item = CompilerCandidate> + '_ {
        let default = CompilerCandidate {
            path: PathBuf::from(&self.default_cc),
            live: which::which(&self.default_cc).is_ok(),
        };
        std::iter::once(default).chain(self.patterns.iter().flat_map(|pattern| {
            pattern
                .scan()
                .into_iter()
                .map(|path| CompilerCandidate { path, live: true })
        }))
    }
}

/// Asks `compiler -v` whether it was configured with `--disable-multilib`.
///
/// A compiler that cannot be run counts as multilib-capable; the build that
/// follows reports the real problem.
pub fn multilib_disabled(executor: &dyn Executor, compiler: &Path) -> bool {
    let probe = Invocation::new(compiler).arg("-v").output(OutputMode::Capture);
    match executor.execute(&probe) {
        Ok(done) => reports_multilib_disabled(&done.combined_output()),
        Err(_) => false,
    }
}

/// Whether a toolchain's self-reported configuration disables multilib.
pub fn reports_multilib_disabled(version_output: &str) -> bool {
    version_output
        .split_whitespace()
        .any(|word| word == "--disable-multilib")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[cfg(unix)]
    fn touch_executable(path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_pattern_matching() {
        let pattern = InstallPattern::versioned("/usr/bin", "gcc-");
        assert!(pattern.matches("gcc-12"));
        assert!(pattern.matches("gcc-9.4"));
        assert!(!pattern.matches("gcc-ar-12"));
        assert!(!pattern.matches("gcc"));
        assert!(!pattern.matches("clang-17"));

        let nested = InstallPattern::nested("/opt", "clang", "bin/clang");
        assert!(nested.matches("clang"));
        assert!(nested.matches("clang18"));
        assert!(!nested.matches("gcc13"));
    }

    #[test]
    fn test_default_candidate_always_first() {
        let discovery = CompilerDiscovery::with_patterns("not-a-real-cc-xyz", Vec::new());
        let found: Vec<_> = discovery.discover().collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, PathBuf::from("not-a-real-cc-xyz"));
        assert!(!found[0].live);
    }

    #[test]
    fn test_missing_directories_are_skipped() {
        let discovery = CompilerDiscovery::with_patterns(
            "cc",
            vec![InstallPattern::versioned("/nonexistent/matrix/bin", "gcc-")],
        );
        assert_eq!(discovery.discover().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_is_sorted_and_filters_non_executables() {
        let root = tempfile::tempdir().unwrap();
        let bin = root.path().join("bin");
        touch_executable(&bin.join("gcc-13"));
        touch_executable(&bin.join("gcc-10"));
        touch_executable(&bin.join("gcc-ar-13"));
        fs::write(bin.join("gcc-11"), "not executable").unwrap();
        touch_executable(&root.path().join("opt/clang18/bin/clang"));
        fs::create_dir_all(root.path().join("opt/clang19")).unwrap();

        let discovery = CompilerDiscovery::with_patterns(
            "cc",
            vec![
                InstallPattern::versioned(&bin, "gcc-"),
                InstallPattern::nested(root.path().join("opt"), "clang", "bin/clang"),
            ],
        );
        let paths: Vec<_> = discovery.discover().skip(1).map(|c| c.path).collect();
        assert_eq!(
            paths,
            vec![
                bin.join("gcc-10"),
                bin.join("gcc-13"),
                root.path().join("opt/clang18/bin/clang"),
            ]
        );
    }

    #[test]
    fn test_reports_multilib_disabled() {
        let gcc = "Using built-in specs.\nTarget: x86_64-linux-gnu\n\
                   Configured with: ../src/configure -v --enable-languages=c --disable-multilib --enable-nls\n\
                   gcc version 12.2.0 (Debian 12.2.0-14)\n";
        assert!(reports_multilib_disabled(gcc));

        let multilib = "Configured with: ../src/configure --enable-multilib --with-arch-32=i686\n";
        assert!(!reports_multilib_disabled(multilib));

        let clang = "clang version 17.0.6\nTarget: x86_64-pc-linux-gnu\nThread model: posix\n";
        assert!(!reports_multilib_disabled(clang));
    }
}
