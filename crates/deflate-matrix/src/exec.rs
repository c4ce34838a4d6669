//! External program invocation.
//!
//! Everything the matrix does to the outside world (build system, test
//! suites, compilers, inspection tools) goes through [`Executor`]. Typed
//! configuration is turned into arguments and environment variables here
//! and nowhere else.

use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Mutex, OnceLock};

use crate::error::{MatrixError, MatrixResult};

/// Where a child's stdout goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputMode {
    /// Stdout to null, stderr inherited.
    Discard,
    /// Stdout and stderr collected into [`Completed`].
    Capture,
    /// Stdout written to a file, stderr inherited.
    ToFile(PathBuf),
}

/// A fully described external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program name or path.
    pub program: OsString,
    /// Arguments, in order.
    pub args: Vec<OsString>,
    /// Environment variables set for the child.
    pub env: Vec<(String, OsString)>,
    /// Environment variables removed from the child.
    pub env_remove: Vec<String>,
    /// Working directory.
    pub cwd: Option<PathBuf>,
    /// Output disposition.
    pub output: OutputMode,
}

impl Invocation {
    /// Creates an invocation of `program` with no arguments.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            env_remove: Vec::new(),
            cwd: None,
            output: OutputMode::Discard,
        }
    }

    /// Creates an invocation from a command prefix followed by `program`.
    ///
    /// With an empty prefix this is just `program`.
    pub fn prefixed(prefix: &[String], program: impl Into<OsString>) -> Self {
        match prefix.split_first() {
            Some((first, rest)) => {
                let mut inv = Self::new(first);
                inv.args.extend(rest.iter().map(OsString::from));
                inv.args.push(program.into());
                inv
            }
            None => Self::new(program),
        }
    }

    /// Appends an argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets an environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Removes an environment variable from the child.
    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    /// Sets the working directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Sets the output disposition.
    pub fn output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    /// Returns the value this invocation sets for `key`, if any.
    pub fn env_value(&self, key: &str) -> Option<&OsString> {
        self.env.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Program name as a lossy string.
    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// Renders a shell-like line that reproduces this invocation.
    pub fn display(&self) -> String {
        let mut parts: Vec<String> = self
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, quote(&v.to_string_lossy())))
            .collect();
        parts.push(quote(&self.program.to_string_lossy()));
        parts.extend(self.args.iter().map(|a| quote(&a.to_string_lossy())));
        if let OutputMode::ToFile(path) = &self.output {
            parts.push(format!("> {}", quote(&path.to_string_lossy())));
        }
        parts.join(" ")
    }
}

fn quote(s: &str) -> String {
    if s.is_empty() {
        "\"\"".to_string()
    } else if s.contains(|c: char| c.is_whitespace() || c == '"' || c == '\'') {
        format!("\"{}\"", s.replace('"', "\\\""))
    } else {
        s.to_string()
    }
}

/// Outcome of a finished invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completed {
    /// Exit code; `128 + signal` for signal-terminated children.
    pub code: i32,
    /// Captured stdout (only for [`OutputMode::Capture`]).
    pub stdout: Vec<u8>,
    /// Captured stderr (only for [`OutputMode::Capture`]).
    pub stderr: Vec<u8>,
}

impl Completed {
    /// A successful completion with no output.
    pub fn success() -> Self {
        Self::default()
    }

    /// A completion with the given exit code and no output.
    pub fn exit(code: i32) -> Self {
        Self {
            code,
            ..Self::default()
        }
    }

    /// A successful completion with captured stdout.
    pub fn with_stdout(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    /// Whether the program exited with code 0.
    pub fn succeeded(&self) -> bool {
        self.code == 0
    }

    /// Stdout followed by stderr, lossily decoded.
    pub fn combined_output(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&self.stderr));
        text
    }
}

/// Runs external programs on behalf of the matrix.
///
/// Every call blocks until the child exits. A non-zero exit is not an error
/// at this level; callers decide what it means.
pub trait Executor {
    /// Runs `invocation` to completion.
    fn execute(&self, invocation: &Invocation) -> MatrixResult<Completed>;
}

impl<E: Executor + ?Sized> Executor for &E {
    fn execute(&self, invocation: &Invocation) -> MatrixResult<Completed> {
        (**self).execute(invocation)
    }
}

/// Process IDs of children currently being waited on.
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: Mutex<Vec<u32>>,
}

impl ChildRegistry {
    /// Records a spawned child.
    pub fn register(&self, pid: u32) {
        if let Ok(mut pids) = self.pids.lock() {
            pids.push(pid);
        }
    }

    /// Forgets a child that has been reaped.
    pub fn unregister(&self, pid: u32) {
        if let Ok(mut pids) = self.pids.lock() {
            pids.retain(|p| *p != pid);
        }
    }

    /// Children still running.
    pub fn running(&self) -> Vec<u32> {
        self.pids
            .lock()
            .map(|pids| pids.clone())
            .unwrap_or_default()
    }

    /// Sends SIGTERM to every running child.
    #[cfg(unix)]
    pub fn terminate_all(&self) {
        for pid in self.running() {
            let _ = Command::new("kill")
                .arg("-TERM")
                .arg(pid.to_string())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
    }

    /// Kills every running child.
    #[cfg(not(unix))]
    pub fn terminate_all(&self) {
        for pid in self.running() {
            let _ = Command::new("taskkill")
                .args(["/F", "/PID"])
                .arg(pid.to_string())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
    }
}

/// The process-wide registry [`ProcessExecutor::new`] reports children to.
pub fn running_children() -> &'static ChildRegistry {
    static CHILDREN: OnceLock<ChildRegistry> = OnceLock::new();
    CHILDREN.get_or_init(ChildRegistry::default)
}

/// [`Executor`] backed by real child processes.
#[derive(Debug, Clone, Copy)]
pub struct ProcessExecutor {
    children: &'static ChildRegistry,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessExecutor {
    /// Creates a process executor tracking children in [`running_children`].
    pub fn new() -> Self {
        Self::with_registry(running_children())
    }

    /// Creates a process executor tracking children in `children`.
    pub fn with_registry(children: &'static ChildRegistry) -> Self {
        Self { children }
    }
}

impl Executor for ProcessExecutor {
    fn execute(&self, invocation: &Invocation) -> MatrixResult<Completed> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args).stdin(Stdio::null());
        for key in &invocation.env_remove {
            cmd.env_remove(key);
        }
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }
        if let Some(ref cwd) = invocation.cwd {
            cmd.current_dir(cwd);
        }

        match &invocation.output {
            OutputMode::Capture => {
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
            OutputMode::Discard => {
                cmd.stdout(Stdio::null()).stderr(Stdio::inherit());
            }
            OutputMode::ToFile(path) => {
                let file = create_output_file(path)?;
                cmd.stdout(Stdio::from(file)).stderr(Stdio::inherit());
            }
        }

        let child = cmd.spawn().map_err(|source| MatrixError::SpawnFailed {
            program: invocation.program_name(),
            source,
        })?;
        let pid = child.id();
        self.children.register(pid);
        let output = child.wait_with_output();
        self.children.unregister(pid);
        let output = output?;

        Ok(Completed {
            code: exit_code(output.status),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

fn create_output_file(path: &Path) -> MatrixResult<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(File::create(path)?)
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_without_prefix() {
        let inv = Invocation::prefixed(&[], "./gzip").arg("-c");
        assert_eq!(inv.program, OsString::from("./gzip"));
        assert_eq!(inv.args, vec![OsString::from("-c")]);
    }

    #[test]
    fn test_prefixed_with_wrapper() {
        let prefix = vec!["valgrind".to_string(), "--quiet".to_string()];
        let inv = Invocation::prefixed(&prefix, "./gzip").arg("-c");
        assert_eq!(inv.program, OsString::from("valgrind"));
        assert_eq!(
            inv.args,
            vec![
                OsString::from("--quiet"),
                OsString::from("./gzip"),
                OsString::from("-c")
            ]
        );
    }

    #[test]
    fn test_display_quotes_values() {
        let inv = Invocation::new("make")
            .arg("CFLAGS=-Werror -m32")
            .arg("all")
            .env("WRAPPER", "");
        assert_eq!(inv.display(), "WRAPPER=\"\" make \"CFLAGS=-Werror -m32\" all");
    }

    #[test]
    fn test_env_value_last_wins() {
        let inv = Invocation::new("sh").env("A", "1").env("A", "2");
        assert_eq!(inv.env_value("A"), Some(&OsString::from("2")));
        assert_eq!(inv.env_value("B"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_process_executor_exit_code() {
        let inv = Invocation::new("sh").args(["-c", "exit 3"]);
        let done = ProcessExecutor::new().execute(&inv).unwrap();
        assert_eq!(done.code, 3);
        assert!(!done.succeeded());
    }

    #[cfg(unix)]
    #[test]
    fn test_process_executor_capture_and_env() {
        let inv = Invocation::new("sh")
            .args(["-c", "echo \"$MATRIX_PROBE\"; echo err 1>&2"])
            .env("MATRIX_PROBE", "hello")
            .output(OutputMode::Capture);
        let done = ProcessExecutor::new().execute(&inv).unwrap();
        assert!(done.succeeded());
        assert_eq!(String::from_utf8_lossy(&done.stdout).trim(), "hello");
        assert!(done.combined_output().contains("err"));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_executor_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("out.txt");
        let inv = Invocation::new("sh")
            .args(["-c", "printf abc"])
            .output(OutputMode::ToFile(out.clone()));
        let done = ProcessExecutor::new().execute(&inv).unwrap();
        assert!(done.succeeded());
        assert_eq!(std::fs::read(&out).unwrap(), b"abc");
    }

    #[cfg(unix)]
    #[test]
    fn test_running_child_is_tracked_and_terminated() {
        use std::time::{Duration, Instant};

        let registry: &'static ChildRegistry = Box::leak(Box::default());
        let exec = ProcessExecutor::with_registry(registry);
        let waiter =
            std::thread::spawn(move || exec.execute(&Invocation::new("sleep").arg("30")));

        let started = Instant::now();
        while registry.running().is_empty() {
            assert!(started.elapsed() < Duration::from_secs(10), "child never registered");
            std::thread::sleep(Duration::from_millis(10));
        }
        registry.terminate_all();

        let done = waiter.join().unwrap().unwrap();
        assert_eq!(done.code, 128 + 15);
        assert!(started.elapsed() < Duration::from_secs(20));
        assert!(registry.running().is_empty());
    }

    #[test]
    fn test_finished_child_is_unregistered() {
        let registry: &'static ChildRegistry = Box::leak(Box::default());
        let exec = ProcessExecutor::with_registry(registry);
        let _ = exec.execute(&Invocation::new("definitely-not-a-real-program-xyz"));
        assert!(registry.running().is_empty());
        #[cfg(unix)]
        {
            exec.execute(&Invocation::new("true")).unwrap();
            assert!(registry.running().is_empty());
        }
    }

    #[test]
    fn test_spawn_failure_names_program() {
        let inv = Invocation::new("definitely-not-a-real-program-xyz");
        let err = ProcessExecutor::new().execute(&inv).unwrap_err();
        assert!(matches!(err, MatrixError::SpawnFailed { .. }));
        assert!(err.to_string().contains("definitely-not-a-real-program-xyz"));
        assert_eq!(err.exit_code(), 127);
    }
}
