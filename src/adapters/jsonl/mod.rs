//! JSON Lines adapter: Implementation of AuditStore.
//!
//! One audit entry per line in a plain text file. Lines are appended and
//! never rewritten, so a crash can at worst leave one truncated last line,
//! which every scan skips.
//!
//! # Concurrency
//!
//! Appends from this process are serialized by a `Mutex`, and each entry is
//! written with a single `write_all` on a file opened in append mode. Reads
//! do not take the lock; a reader racing a writer may miss the line being
//! written but never sees a reordered log.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::domain::AuditLogEntry;
use crate::ports::AuditStore;

/// Error type for audit log operations.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Audit log I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Append-only audit log backed by a JSONL file.
pub struct JsonlAuditStore {
    path: PathBuf,
    writer: Mutex<()>,
}

impl JsonlAuditStore {
    /// Create a store for the given file. Nothing is touched on disk until
    /// the first append.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> AuditError {
        AuditError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Visit well-formed entries in file order until `visit` breaks.
    fn scan<F>(&self, mut visit: F) -> Result<(), AuditError>
    where
        F: FnMut(AuditLogEntry) -> ControlFlow<()>,
    {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(self.io_error(e)),
        };

        let mut reader = BufReader::new(file);
        let mut line = Vec::new();
        let mut line_no = 0usize;
        loop {
            line.clear();
            let read = reader.read_until(b'\n', &mut line).map_err(|e| self.io_error(e))?;
            if read == 0 {
                return Ok(());
            }
            line_no += 1;

            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<AuditLogEntry>(&line) {
                Ok(entry) => {
                    if visit(entry).is_break() {
                        return Ok(());
                    }
                }
                Err(e) => {
                    tracing::warn!("Skipping malformed audit line {} in {}: {}", line_no, self.path.display(), e);
                }
            }
        }
    }
}

impl AuditStore for JsonlAuditStore {
    type Error = AuditError;

    fn append(&self, entry: &AuditLogEntry) -> Result<(), Self::Error> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        // The guard protects no data, so a poisoned lock is still usable.
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        file.write_all(&line).map_err(|e| self.io_error(e))?;
        file.sync_data().map_err(|e| self.io_error(e))?;

        tracing::debug!("Appended audit entry {}", entry.request_id);
        Ok(())
    }

    fn query(&self, date: Option<&str>, route: Option<&str>) -> Result<Vec<AuditLogEntry>, Self::Error> {
        let mut entries = Vec::new();
        self.scan(|entry| {
            if entry.matches(date, route) {
                entries.push(entry);
            }
            ControlFlow::Continue(())
        })?;
        Ok(entries)
    }

    fn get_by_id(&self, request_id: &str) -> Result<Option<AuditLogEntry>, Self::Error> {
        let mut found = None;
        self.scan(|entry| {
            if entry.request_id == request_id {
                found = Some(entry);
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;
        Ok(found)
    }

    fn count(&self) -> Result<usize, Self::Error> {
        let mut count = 0;
        self.scan(|_| {
            count += 1;
            ControlFlow::Continue(())
        })?;
        Ok(count)
    }
}
