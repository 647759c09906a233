//! The end-to-end packing pipeline and its observable state machine.
//!
//! [`pack_directory`] runs the whole pipeline on the calling thread and is
//! what tests and library callers use. [`Packer`] wraps the same pipeline in
//! a fire-and-forget background thread: `begin` returns immediately and the
//! caller polls [`Packer::is_done`] while pumping the log sink, which is how
//! the CLI keeps worker output flowing during a long pack.

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::error::VfsError;
use crate::hash;
use crate::index::{VfsArchive, VfsIndex};
use crate::logging::LogSink;
use crate::scanner;
use crate::writer::ArchiveWriter;

/// Pipeline states in execution order, plus the two terminal states.
///
/// `Failed` carries the rendered error so a poller that only sees states can
/// still report what went wrong.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PackState {
    Idle,
    Scanning,
    BuildingIndex,
    Hashing,
    FixingOffsets,
    Allocating,
    Writing,
    Done,
    Failed(String),
}

impl PackState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PackState::Done | PackState::Failed(_))
    }
}

/// Totals of a finished pack run.
#[derive(Clone, Debug)]
pub struct PackSummary {
    pub entry_count: u64,
    pub table_byte_size: u64,
    pub payload_bytes: u64,
    pub total_file_size: u64,
}

impl PackSummary {
    /// Captures the size totals of a built archive.
    pub fn of(archive: &VfsArchive) -> Result<Self, VfsError> {
        Ok(Self {
            entry_count: archive.index.entry_count(),
            table_byte_size: archive.index.table_byte_size()?,
            payload_bytes: archive.index.payload_bytes()?,
            total_file_size: archive.total_file_size()?,
        })
    }
}

type SharedState = Arc<Mutex<PackState>>;

fn set_state(state: &SharedState, next: PackState) {
    *state.lock().unwrap() = next;
}

/// Packs every file under `base` into a single archive at `destination`,
/// synchronously. `threads` bounds the hashing fan-out; 0 means one worker
/// per CPU core. Queued worker log lines are drained before returning, so
/// the sink is fully written either way the run ends.
///
/// On success the written archive's in-memory model comes back, entry and
/// index digests filled in, so callers can read the full 64-byte values
/// rather than the hex prefixes in the log. [`PackSummary::of`] derives the
/// size totals from it.
pub fn pack_directory(
    base: &Path,
    destination: &Path,
    threads: usize,
    sink: &LogSink,
) -> Result<VfsArchive, VfsError> {
    let state = Arc::new(Mutex::new(PackState::Idle));
    let result = run_pipeline(base, destination, threads, sink, &state);
    sink.pump_until(|| true);
    result
}

fn run_pipeline(
    base: &Path,
    destination: &Path,
    threads: usize,
    sink: &LogSink,
    state: &SharedState,
) -> Result<VfsArchive, VfsError> {
    let started = Instant::now();

    set_state(state, PackState::Scanning);
    let base = fs::canonicalize(base).map_err(|e| VfsError::io(base, e))?;
    let files = scanner::scan_files(&base, sink);
    sink.log_from_worker(&format!(
        "scan: {} files under '{}'",
        files.len(),
        base.display()
    ));

    set_state(state, PackState::BuildingIndex);
    let index = VfsIndex::build(&base, files)?;
    let mut archive = VfsArchive::new(destination.to_path_buf(), index);

    set_state(state, PackState::Hashing);
    let workers = if threads == 0 { num_cpus::get() } else { threads };
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| VfsError::Other(format!("failed to build hash pool: {e}")))?;
    pool.install(|| hash::compute_digests(&mut archive, sink))?;
    sink.log_from_worker(&format!(
        "index digest: {}",
        hash::hex_digest(&archive.index.index_digest()[..8])
    ));

    set_state(state, PackState::FixingOffsets);
    archive.index.fix_up_offsets()?;

    set_state(state, PackState::Allocating);
    let writer = ArchiveWriter::allocate(&archive, sink)?;

    set_state(state, PackState::Writing);
    writer.write(&archive, sink)?;

    let summary = PackSummary::of(&archive)?;
    sink.log_from_worker(&format!(
        "packed {} files ({} payload bytes) into '{}' ({} bytes) in {:.2}s",
        summary.entry_count,
        summary.payload_bytes,
        destination.display(),
        summary.total_file_size,
        started.elapsed().as_secs_f64()
    ));
    set_state(state, PackState::Done);
    Ok(archive)
}

/// Runs the pipeline with a panic shield: an unwinding defect anywhere in it
/// becomes an ordinary error instead of a dead thread, so a poller waiting on
/// a terminal state can never hang on one.
fn run_shielded<F>(pipeline: F) -> Result<VfsArchive, VfsError>
where
    F: FnOnce() -> Result<VfsArchive, VfsError>,
{
    panic::catch_unwind(AssertUnwindSafe(pipeline))
        .unwrap_or_else(|_| Err(VfsError::Other("pack worker panicked".into())))
}

/// A fire-and-forget packing job.
///
/// The caller constructs it around a shared sink, calls [`begin`](Self::begin)
/// once, then polls [`is_done`](Self::is_done) (typically from the sink's
/// pump loop). Dropping the packer does not cancel the background thread.
pub struct Packer {
    sink: Arc<LogSink>,
    state: SharedState,
    threads: usize,
    handle: Option<JoinHandle<()>>,
}

impl Packer {
    pub fn new(sink: Arc<LogSink>) -> Self {
        Self::with_threads(sink, 0)
    }

    pub fn with_threads(sink: Arc<LogSink>, threads: usize) -> Self {
        Self {
            sink,
            state: Arc::new(Mutex::new(PackState::Idle)),
            threads,
            handle: None,
        }
    }

    /// Starts the pipeline on a background thread and returns immediately.
    /// A packer runs one job; calls after the first do nothing.
    pub fn begin(&mut self, base: impl Into<PathBuf>, destination: impl Into<PathBuf>) {
        if self.handle.is_some() || !matches!(self.state(), PackState::Idle) {
            return;
        }
        let base = base.into();
        let destination = destination.into();
        let sink = Arc::clone(&self.sink);
        let state = Arc::clone(&self.state);
        let threads = self.threads;

        let spawned = thread::Builder::new().name("vfs-pack".into()).spawn(move || {
            let outcome =
                run_shielded(|| run_pipeline(&base, &destination, threads, &sink, &state));
            if let Err(err) = outcome {
                sink.log_from_worker(&format!("pack failed: {err}"));
                set_state(&state, PackState::Failed(err.to_string()));
            }
        });
        match spawned {
            Ok(handle) => self.handle = Some(handle),
            Err(err) => set_state(
                &self.state,
                PackState::Failed(format!("failed to spawn pack thread: {err}")),
            ),
        }
    }

    /// True once the pipeline reached `Done` or `Failed`.
    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    /// A snapshot of the current pipeline state.
    pub fn state(&self) -> PackState {
        self.state.lock().unwrap().clone()
    }

    /// Joins the background thread. Blocks until the pipeline finishes, so
    /// callers normally wait for [`is_done`](Self::is_done) first.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn empty_directory_packs_to_a_bare_header() {
        let src = tempdir().unwrap();
        let out = tempdir().unwrap();
        let archive = out.path().join("empty.vfs");
        let sink = LogSink::discard();

        let packed = pack_directory(src.path(), &archive, 1, &sink).unwrap();
        let summary = PackSummary::of(&packed).unwrap();

        assert_eq!(summary.entry_count, 0);
        assert_eq!(summary.table_byte_size, 80);
        assert_eq!(summary.payload_bytes, 0);
        assert_eq!(summary.total_file_size, 80);
        assert_eq!(fs::metadata(&archive).unwrap().len(), 80);
    }

    #[test]
    fn missing_base_directory_is_an_io_error() {
        let out = tempdir().unwrap();
        let archive = out.path().join("never.vfs");
        let sink = LogSink::discard();

        let err =
            pack_directory(&out.path().join("no-such-dir"), &archive, 1, &sink).unwrap_err();
        assert!(matches!(err, VfsError::Io { .. }));
        assert!(!archive.exists());
    }

    #[test]
    fn packer_reports_done_after_polling() {
        let src = tempdir().unwrap();
        fs::write(src.path().join("a.txt"), b"hello").unwrap();
        let out = tempdir().unwrap();
        let archive = out.path().join("polled.vfs");

        let sink = Arc::new(LogSink::discard());
        let mut packer = Packer::new(Arc::clone(&sink));
        packer.begin(src.path(), &archive);
        sink.pump_until(|| packer.is_done());
        packer.join();

        assert_eq!(packer.state(), PackState::Done);
        assert!(archive.exists());
    }

    #[test]
    fn packer_surfaces_pipeline_failures() {
        let out = tempdir().unwrap();
        let archive = out.path().join("failed.vfs");

        let sink = Arc::new(LogSink::discard());
        let mut packer = Packer::new(Arc::clone(&sink));
        packer.begin(out.path().join("missing"), &archive);
        sink.pump_until(|| packer.is_done());
        packer.join();

        match packer.state() {
            PackState::Failed(reason) => assert!(reason.contains("I/O error")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn shield_turns_a_panicking_pipeline_into_an_error() {
        let err = run_shielded(|| panic!("stage blew up")).unwrap_err();
        match err {
            VfsError::Other(msg) => assert!(msg.contains("panicked")),
            other => panic!("expected Other, got {other}"),
        }
    }

    #[test]
    fn begin_is_a_single_shot() {
        let src = tempdir().unwrap();
        fs::write(src.path().join("a.txt"), b"x").unwrap();
        let out = tempdir().unwrap();

        let sink = Arc::new(LogSink::discard());
        let mut packer = Packer::new(Arc::clone(&sink));
        packer.begin(src.path(), out.path().join("first.vfs"));
        sink.pump_until(|| packer.is_done());

        // Already terminal, so a second begin must not restart anything.
        packer.begin(src.path(), out.path().join("second.vfs"));
        packer.join();
        assert!(!out.path().join("second.vfs").exists());
    }
}
