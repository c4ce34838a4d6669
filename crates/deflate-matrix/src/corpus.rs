//! Test corpus provisioning.
//!
//! The corpus is either supplied by the caller (and left alone) or generated
//! from the collaborator's own sources and removed on every exit path:
//! `Drop` covers normal return and propagated errors, the cleanup registry
//! covers SIGINT/SIGTERM.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::error::{MatrixError, MatrixResult};
use crate::exec::running_children;

/// Upper bound on the size of a generated corpus.
pub const MAX_CORPUS_BYTES: u64 = 1_000_000;

/// Source file extensions concatenated into a generated corpus.
const CORPUS_EXTENSIONS: &[&str] = &["c", "h", "sh"];

/// The shared test input.
#[derive(Debug)]
pub struct TestCorpus {
    path: PathBuf,
    size: u64,
    owned: Option<NamedTempFile>,
}

impl TestCorpus {
    /// Path of the corpus file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether this run generated the corpus and will delete it.
    pub fn is_generated(&self) -> bool {
        self.owned.is_some()
    }
}

impl Drop for TestCorpus {
    fn drop(&mut self) {
        if self.owned.is_some() {
            unregister_cleanup(&self.path);
        }
        // `owned` drops after this, removing the file.
    }
}

/// Acquires the corpus.
///
/// An externally supplied path is used as-is. Otherwise a deterministic
/// snapshot of the `*.c`, `*.h` and `*.sh` files under `source_dir` is
/// concatenated in sorted path order and cut at [`MAX_CORPUS_BYTES`].
pub fn acquire(external: Option<&Path>, source_dir: &Path) -> MatrixResult<TestCorpus> {
    if let Some(path) = external {
        let size = fs::metadata(path)
            .map_err(|e| {
                MatrixError::provision(format!("cannot read {}: {}", path.display(), e))
            })?
            .len();
        return Ok(TestCorpus {
            path: path.to_path_buf(),
            size,
            owned: None,
        });
    }

    let sources = corpus_sources(source_dir);
    if sources.is_empty() {
        return Err(MatrixError::provision(format!(
            "no source files found under {}",
            source_dir.display()
        )));
    }

    let mut file = tempfile::Builder::new()
        .prefix("libdeflate_testdata.")
        .tempfile()
        .map_err(|e| MatrixError::provision(format!("cannot create temp file: {}", e)))?;
    register_cleanup(file.path());

    let written = match write_snapshot(file.as_file_mut(), &sources) {
        Ok(written) => written,
        Err(e) => {
            unregister_cleanup(file.path());
            return Err(e);
        }
    };

    Ok(TestCorpus {
        path: file.path().to_path_buf(),
        size: written,
        owned: Some(file),
    })
}

fn corpus_sources(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| CORPUS_EXTENSIONS.contains(&ext))
        })
        .map(|entry| entry.into_path())
        .collect()
}

fn write_snapshot(out: &mut fs::File, sources: &[PathBuf]) -> MatrixResult<u64> {
    let mut written = 0u64;
    for source in sources {
        if written == MAX_CORPUS_BYTES {
            break;
        }
        let data = fs::read(source).map_err(|e| {
            MatrixError::provision(format!("cannot read {}: {}", source.display(), e))
        })?;
        let take = (MAX_CORPUS_BYTES - written).min(data.len() as u64) as usize;
        out.write_all(&data[..take])
            .map_err(|e| MatrixError::provision(format!("cannot write corpus: {}", e)))?;
        written += take as u64;
    }
    out.flush()
        .map_err(|e| MatrixError::provision(format!("cannot write corpus: {}", e)))?;
    Ok(written)
}

/// Paths of self-generated resources to remove if the process is interrupted.
#[derive(Debug, Default)]
pub struct CleanupRegistry {
    paths: Mutex<Vec<PathBuf>>,
}

impl CleanupRegistry {
    /// Schedules `path` for removal.
    pub fn register(&self, path: &Path) {
        if let Ok(mut paths) = self.paths.lock() {
            paths.push(path.to_path_buf());
        }
    }

    /// Forgets `path`; its owner released it.
    pub fn unregister(&self, path: &Path) {
        if let Ok(mut paths) = self.paths.lock() {
            paths.retain(|p| p != path);
        }
    }

    /// Paths currently scheduled for removal.
    pub fn pending(&self) -> Vec<PathBuf> {
        self.paths
            .lock()
            .map(|paths| paths.clone())
            .unwrap_or_default()
    }

    /// Removes every registered path.
    pub fn run(&self) {
        let paths = match self.paths.lock() {
            Ok(mut paths) => std::mem::take(&mut *paths),
            Err(_) => return,
        };
        for path in paths {
            let _ = fs::remove_file(&path);
        }
    }
}

/// The process-wide registry.
pub fn cleanup_registry() -> &'static CleanupRegistry {
    static CLEANUP: OnceLock<CleanupRegistry> = OnceLock::new();
    CLEANUP.get_or_init(CleanupRegistry::default)
}

fn register_cleanup(path: &Path) {
    cleanup_registry().register(path);
}

fn unregister_cleanup(path: &Path) {
    cleanup_registry().unregister(path);
}

/// Paths currently scheduled for removal on interrupt.
pub fn pending_cleanup() -> Vec<PathBuf> {
    cleanup_registry().pending()
}

/// Removes every registered resource. Called on interrupt, right before
/// the process exits without unwinding.
pub fn run_cleanup() {
    cleanup_registry().run();
}

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Whether an interrupt is being handled. Once set, the watcher owns the
/// process exit code; failures caused by terminating the running child
/// must not be reported.
pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

fn shut_down(code: i32) -> ! {
    INTERRUPTED.store(true, Ordering::SeqCst);
    running_children().terminate_all();
    run_cleanup();
    std::process::exit(code);
}

/// Spawns a background watcher for SIGINT and SIGTERM.
///
/// On either signal the watcher terminates the child the matrix is waiting
/// on (see [`crate::exec::running_children`]), runs [`run_cleanup`], and
/// exits the process with 130 or 143. Signal handlers are registered
/// before this returns.
#[cfg(unix)]
pub fn install_interrupt_cleanup() -> MatrixResult<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let (mut interrupt, mut terminate) = {
        let _guard = runtime.enter();
        (
            signal(SignalKind::interrupt())?,
            signal(SignalKind::terminate())?,
        )
    };

    std::thread::Builder::new()
        .name("interrupt-cleanup".to_string())
        .spawn(move || {
            let code = runtime.block_on(async {
                tokio::select! {
                    _ = interrupt.recv() => 130,
                    _ = terminate.recv() => 143,
                }
            });
            shut_down(code);
        })?;
    Ok(())
}

/// Spawns a background watcher that terminates the running child, runs
/// [`run_cleanup`] and exits the process on Ctrl-C (exit code 130).
#[cfg(not(unix))]
pub fn install_interrupt_cleanup() -> MatrixResult<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    std::thread::Builder::new()
        .name("interrupt-cleanup".to_string())
        .spawn(move || {
            let _ = runtime.block_on(tokio::signal::ctrl_c());
            shut_down(130);
        })?;
    Ok(())
}
