//! Per-session diagnostic text log.
//!
//! Appends UTF-8 lines to `<output>.nvenc_log.txt` next to the recording.
//! The log is best-effort: if the file cannot be opened the session runs
//! without it, and write failures are swallowed. The file handle has its
//! own mutex so producer threads can log without touching the file mutex.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use tracing::debug;

/// Append-only diagnostic log for one session.
pub struct DiagnosticLog {
    file: Option<Mutex<File>>,
    started: Instant,
}

impl DiagnosticLog {
    /// Open the log next to `output_path`.
    pub fn open(output_path: &Path) -> Self {
        let mut log_path = output_path.as_os_str().to_owned();
        log_path.push(".nvenc_log.txt");

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .ok();
        if file.is_none() {
            debug!(path = ?log_path, "Diagnostic log unavailable");
        }

        Self {
            file: file.map(Mutex::new),
            started: Instant::now(),
        }
    }

    /// A log that writes nowhere.
    pub fn disabled() -> Self {
        Self {
            file: None,
            started: Instant::now(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.file.is_some()
    }

    /// Append one line, stamped with seconds since session start.
    pub fn line(&self, message: &str) {
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let elapsed = self.started.elapsed().as_secs_f64();
                let _ = writeln!(file, "[{elapsed:9.3}] {message}");
            }
        }
    }
}
