//! Append-only output file with a cached logical position.
//!
//! The sink tracks its own position instead of querying the OS on every
//! `tell`; the position is the authority for sample offsets recorded in the
//! muxer tables, so it must stay equal to the OS file pointer at all times.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{MuxError, MuxResult};

/// Append-only file writer with `write`/`seek`/`tell`.
#[derive(Debug)]
pub struct ByteSink {
    file: File,
    position: u64,
}

impl ByteSink {
    /// Truncate-create the file at `path` (shared read for tailing tools).
    pub fn open(path: &Path) -> MuxResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(MuxError::OpenFailed)?;

        debug!(path = %path.display(), "Output file opened");
        Ok(Self { file, position: 0 })
    }

    /// Write all of `bytes` at the current position.
    pub fn write(&mut self, bytes: &[u8]) -> MuxResult<()> {
        self.file.write_all(bytes).map_err(MuxError::WriteShort)?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    /// Reposition to an absolute offset.
    pub fn seek(&mut self, position: u64) -> MuxResult<()> {
        self.file
            .seek(SeekFrom::Start(position))
            .map_err(MuxError::SeekFailed)?;
        self.position = position;
        Ok(())
    }

    /// The current logical position.
    pub fn tell(&self) -> u64 {
        self.position
    }

    /// Flush and close the file.
    pub fn close(self) -> MuxResult<()> {
        let mut file = self.file;
        file.flush().map_err(MuxError::WriteShort)?;
        Ok(())
    }
}
