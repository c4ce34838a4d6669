//! Scripted executor and source tree fixtures for driving the matrix
//! without a toolchain.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use deflate_matrix::config::NATIVE_SUITE;
use deflate_matrix::features::DISABLE_CPU_FEATURES_VAR;
use deflate_matrix::{Completed, Executor, Invocation, MatrixConfig, MatrixResult, OutputMode};

/// Clean `nm` listing of a freestanding library.
pub const NM_CLEAN: &str = include_str!("../fixtures/nm_clean.txt");
/// The same listing with an injected undefined `memcpy`.
pub const NM_UNDEFINED_MEMCPY: &str = include_str!("../fixtures/nm_undefined_memcpy.txt");
/// `ldd` output for a library with no dynamic section.
pub const LDD_STATIC: &str = include_str!("../fixtures/ldd_static.txt");
/// `ldd` output for a library linked against libc.
pub const LDD_DYNAMIC: &str = include_str!("../fixtures/ldd_dynamic.txt");

type Matcher = Box<dyn Fn(&Invocation) -> bool>;

/// A scripted failure: the `nth` matching invocation (1-based) exits with `code`.
struct Failure {
    matcher: Matcher,
    nth: usize,
    code: i32,
}

/// [`Executor`] that records every invocation and answers from a script.
///
/// Defaults: every build and suite succeeds, compilers report multilib
/// support, `nm`/`ldd` report a clean freestanding library, and any
/// `[wrapper] <tool> -c <input>` writing to a file copies its input.
pub struct ScriptedExecutor {
    calls: RefCell<Vec<Invocation>>,
    failures: Vec<Failure>,
    nm_output: String,
    ldd_output: String,
    no_multilib: Vec<String>,
    corrupting: Vec<String>,
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedExecutor {
    /// Create an executor where everything succeeds.
    pub fn new() -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            failures: Vec::new(),
            nm_output: NM_CLEAN.to_string(),
            ldd_output: LDD_STATIC.to_string(),
            no_multilib: Vec::new(),
            corrupting: Vec::new(),
        }
    }

    /// Answer `nm` with `text`.
    pub fn nm_output(mut self, text: impl Into<String>) -> Self {
        self.nm_output = text.into();
        self
    }

    /// Answer `ldd` with `text`.
    pub fn ldd_output(mut self, text: impl Into<String>) -> Self {
        self.ldd_output = text.into();
        self
    }

    /// Compilers whose program name ends with `compiler` report
    /// `--disable-multilib`.
    pub fn without_multilib(mut self, compiler: impl Into<String>) -> Self {
        self.no_multilib.push(compiler.into());
        self
    }

    /// The `nth` invocation (1-based) of a program named `program` exits with `code`.
    pub fn fail_nth(self, program: &str, nth: usize, code: i32) -> Self {
        let program = program.to_string();
        self.fail_when(move |inv| inv.program_name() == program, nth, code)
    }

    /// The `nth` invocation (1-based) matching `matcher` exits with `code`.
    pub fn fail_when(
        mut self,
        matcher: impl Fn(&Invocation) -> bool + 'static,
        nth: usize,
        code: i32,
    ) -> Self {
        self.failures.push(Failure {
            matcher: Box::new(matcher),
            nth,
            code,
        });
        self
    }

    /// The tool whose path ends with `tool` emits its input plus a stray byte.
    pub fn corrupting(mut self, tool: impl Into<String>) -> Self {
        self.corrupting.push(tool.into());
        self
    }

    /// Every invocation so far, in order.
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    fn scripted_failure(&self, inv: &Invocation) -> Option<i32> {
        let calls = self.calls.borrow();
        self.failures.iter().find_map(|failure| {
            if !(failure.matcher)(inv) {
                return None;
            }
            let seen = calls.iter().filter(|c| (failure.matcher)(c)).count();
            (seen == failure.nth).then_some(failure.code)
        })
    }

    fn copy_through(&self, inv: &Invocation, output: &Path) -> MatrixResult<Completed> {
        let Some(input) = tool_input(inv) else {
            return Ok(Completed::success());
        };
        let mut data = fs::read(input)?;
        if let Some(tool) = tool_program(inv) {
            if self.corrupting.iter().any(|c| tool.ends_with(c.as_str())) {
                data.push(b'!');
            }
        }
        fs::write(output, data)?;
        Ok(Completed::success())
    }
}

impl Executor for ScriptedExecutor {
    fn execute(&self, invocation: &Invocation) -> MatrixResult<Completed> {
        self.calls.borrow_mut().push(invocation.clone());

        if let Some(code) = self.scripted_failure(invocation) {
            return Ok(Completed::exit(code));
        }

        let program = invocation.program_name();
        let base = Path::new(&program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if invocation.args.len() == 1 && invocation.args[0] == "-v" {
            let disabled = self.no_multilib.iter().any(|c| program.ends_with(c.as_str()));
            let configure = if disabled {
                "Configured with: ../src/configure --enable-languages=c --disable-multilib\n"
            } else {
                "Configured with: ../src/configure --enable-languages=c --enable-multilib\n"
            };
            return Ok(Completed {
                stderr: configure.as_bytes().to_vec(),
                ..Completed::default()
            });
        }

        match (base.as_str(), &invocation.output) {
            ("nm", _) => Ok(Completed::with_stdout(self.nm_output.clone())),
            ("ldd", _) => Ok(Completed::with_stdout(self.ldd_output.clone())),
            (_, OutputMode::ToFile(path)) => self.copy_through(invocation, path),
            _ => Ok(Completed::success()),
        }
    }
}

/// The argument following `-c`.
pub fn tool_input(inv: &Invocation) -> Option<PathBuf> {
    let pos = inv.args.iter().position(|a| a == "-c")?;
    inv.args.get(pos + 1).map(PathBuf::from)
}

/// The program given `-c`, looking past any wrapper prefix.
pub fn tool_program(inv: &Invocation) -> Option<String> {
    match inv.args.iter().position(|a| a == "-c")? {
        0 => Some(inv.program_name()),
        pos => Some(inv.args[pos - 1].to_string_lossy().into_owned()),
    }
}

/// Value of a `KEY=value` argument.
pub fn arg_value(inv: &Invocation, key: &str) -> Option<String> {
    let prefix = format!("{}=", key);
    inv.args.iter().find_map(|a| {
        a.to_str()
            .and_then(|s| s.strip_prefix(prefix.as_str()))
            .map(str::to_string)
    })
}

/// Value an invocation sets for environment variable `key`.
pub fn env_value(inv: &Invocation, key: &str) -> Option<String> {
    inv.env_value(key).map(|v| v.to_string_lossy().into_owned())
}

/// Whether `inv` runs the build system.
pub fn is_build(inv: &Invocation) -> bool {
    inv.program_name() == "make"
}

/// Whether `inv` runs the native test suite.
pub fn is_native_suite(inv: &Invocation) -> bool {
    inv.program_name() == "sh" && inv.args.first().is_some_and(|a| a == NATIVE_SUITE)
}

/// One native suite run, labelled with the build it ran against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixCell {
    pub cc: String,
    pub cflags: String,
    pub disabled: String,
    pub wrapper: String,
}

/// Native suite runs in order, each paired with the preceding build.
pub fn matrix_cells(calls: &[Invocation]) -> Vec<MatrixCell> {
    let mut cc = String::new();
    let mut cflags = String::new();
    let mut cells = Vec::new();
    for inv in calls {
        if is_build(inv) {
            cc = arg_value(inv, "CC").unwrap_or_default();
            cflags = arg_value(inv, "CFLAGS").unwrap_or_default();
        } else if is_native_suite(inv) {
            cells.push(MatrixCell {
                cc: cc.clone(),
                cflags: cflags.clone(),
                disabled: env_value(inv, DISABLE_CPU_FEATURES_VAR).unwrap_or_default(),
                wrapper: env_value(inv, "WRAPPER").unwrap_or_default(),
            });
        }
    }
    cells
}

/// A minimal collaborator source tree in a temporary directory.
pub struct SourceTree {
    dir: TempDir,
}

impl Default for SourceTree {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceTree {
    /// Create a tree with a few sources and both suite scripts.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create source tree");
        let files: &[(&str, &str)] = &[
            ("lib/deflate_compress.c", "int deflate_compress(void) { return 0; }\n"),
            ("lib/deflate_compress.h", "int deflate_compress(void);\n"),
            ("lib/crc32.c", "unsigned crc32(unsigned c) { return ~c; }\n"),
            ("scripts/exec_tests.sh", "#!/bin/sh\nexit 0\n"),
            (
                "scripts/gzip_tests.sh",
                "#!/bin/sh\ntest -n \"$GZIP\" && test -n \"$GUNZIP\" && test -f \"$TESTDATA\"\n",
            ),
        ];
        for (rel, contents) in files {
            let path = dir.path().join(rel);
            fs::create_dir_all(path.parent().expect("path has parent"))
                .expect("Failed to create directory");
            fs::write(&path, contents).expect("Failed to write source file");
        }
        Self { dir }
    }

    /// Root of the tree.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Configuration rooted at this tree, with fixed reference binaries.
    pub fn config(&self) -> MatrixConfig {
        self.config_with(&[])
    }

    /// Like [`config`](Self::config), with extra environment entries.
    pub fn config_with(&self, extra: &[(&str, &str)]) -> MatrixConfig {
        let mut env: HashMap<String, String> = HashMap::new();
        env.insert(
            "LIBDEFLATE_SOURCE_DIR".to_string(),
            self.path().display().to_string(),
        );
        env.insert("REF_GZIP".to_string(), "/usr/bin/gzip".to_string());
        env.insert("REF_GUNZIP".to_string(), "/usr/bin/gunzip".to_string());
        for (key, value) in extra {
            env.insert(key.to_string(), value.to_string());
        }
        MatrixConfig::from_lookup(move |key| env.get(key).cloned()).jobs(4)
    }
}
