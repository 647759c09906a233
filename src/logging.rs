//! Timestamped progress logging shared across the packer's threads.
//!
//! The sink has two paths in: [`LogSink::log`] dispatches immediately and is
//! meant for the thread that owns the sink, while [`LogSink::log_from_worker`]
//! enqueues the already-formatted line so background threads never block on
//! console or file I/O. The owning thread drains the queue with
//! [`LogSink::pump_until`] while it polls the operation for completion, so
//! worker output appears live instead of after the fact.
//!
//! There is no global logger: every component that reports progress receives
//! the sink by reference (usually behind an `Arc`).

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use chrono::Local;
use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::error::VfsError;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// A thread-safe logging sink with an immediate path for the owning thread
/// and a queued path for workers.
pub struct LogSink {
    tx: Sender<String>,
    rx: Receiver<String>,
    file: Option<Mutex<File>>,
    echo: bool,
}

impl LogSink {
    /// A sink that echoes every line to the console.
    pub fn to_console() -> Self {
        Self::build(None, true)
    }

    /// A sink that appends to a fresh log file at `path`, optionally echoing
    /// to the console as well. Any previous file at `path` is truncated and a
    /// session banner is written before the first message.
    pub fn to_file(path: &Path, echo: bool) -> Result<Self, VfsError> {
        let mut file = File::create(path).map_err(|e| VfsError::io(path, e))?;
        writeln!(
            file,
            "--- logging session started {} ---",
            Local::now().format(TIMESTAMP_FORMAT)
        )
        .map_err(|e| VfsError::io(path, e))?;
        Ok(Self::build(Some(file), echo))
    }

    /// A sink that drops every message. Used by library callers and tests
    /// that do not care about progress output.
    pub fn discard() -> Self {
        Self::build(None, false)
    }

    fn build(file: Option<File>, echo: bool) -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            file: file.map(Mutex::new),
            echo,
        }
    }

    /// Logs a message from the thread that owns the sink; dispatched
    /// immediately, bypassing the queue.
    pub fn log(&self, msg: &str) {
        self.dispatch(&format_line("main", msg));
    }

    /// Logs a message from a worker thread. The line is formatted here so it
    /// carries the worker's identity and the enqueue-time timestamp, then it
    /// sits in the queue until the owner pumps it.
    pub fn log_from_worker(&self, msg: &str) {
        let _ = self.tx.send(format_line(&thread_tag(), msg));
    }

    /// Drains queued worker messages until `done` returns true and the queue
    /// is empty. Sleeps briefly between polls so an idle queue does not spin.
    pub fn pump_until(&self, done: impl Fn() -> bool) {
        while !done() || !self.rx.is_empty() {
            match self.rx.try_recv() {
                Ok(line) => self.dispatch(&line),
                Err(_) => thread::sleep(Duration::from_millis(1)),
            }
        }
    }

    fn dispatch(&self, line: &str) {
        if let Some(file) = &self.file {
            let mut guard = file.lock().unwrap();
            let _ = writeln!(guard, "{line}");
        }
        if self.echo {
            println!("{line}");
        }
    }
}

fn format_line(tag: &str, msg: &str) -> String {
    format!(
        "[{}][{}] {}",
        Local::now().format(TIMESTAMP_FORMAT),
        tag,
        msg
    )
}

fn thread_tag() -> String {
    let current = thread::current();
    match current.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", current.id()),
    }
}
