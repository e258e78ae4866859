//! Side channel for rejected rows.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use super::parse::RejectedRow;

/// One persisted rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub relation: String,
    pub line: u64,
    pub raw: String,
    pub reason: String,
}

impl ErrorRecord {
    pub fn new(relation: &str, row: &RejectedRow) -> Self {
        Self {
            relation: relation.to_string(),
            line: row.line,
            raw: row.raw.clone(),
            reason: row.reason.clone(),
        }
    }
}

/// Destination for rows diverted during streaming.
///
/// An `append` failure aborts the run; rejected rows are never silently dropped.
pub trait ErrorSink {
    fn append(&mut self, relation: &str, row: &RejectedRow) -> io::Result<()>;
}

impl<E: ErrorSink + ?Sized> ErrorSink for &mut E {
    fn append(&mut self, relation: &str, row: &RejectedRow) -> io::Result<()> {
        (**self).append(relation, row)
    }
}

impl<E: ErrorSink + ?Sized> ErrorSink for Box<E> {
    fn append(&mut self, relation: &str, row: &RejectedRow) -> io::Result<()> {
        (**self).append(relation, row)
    }
}

/// Appends one JSON object per rejected row to a file.
///
/// The file is created on the first rejection; runs without rejections leave no file.
pub struct FileErrorSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl FileErrorSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for FileErrorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileErrorSink")
            .field("path", &self.path)
            .field("open", &self.writer.is_some())
            .finish()
    }
}

impl ErrorSink for FileErrorSink {
    fn append(&mut self, relation: &str, row: &RejectedRow) -> io::Result<()> {
        let writer = match self.writer.take() {
            Some(w) => w,
            None => {
                let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
                BufWriter::new(file)
            }
        };
        let writer = self.writer.insert(writer);
        serde_json::to_writer(&mut *writer, &ErrorRecord::new(relation, row))?;
        writer.write_all(b"\n")?;
        writer.flush()
    }
}

/// Keeps rejections in memory. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryErrorSink {
    records: Arc<Mutex<Vec<ErrorRecord>>>,
}

impl MemoryErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ErrorRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ErrorSink for MemoryErrorSink {
    fn append(&mut self, relation: &str, row: &RejectedRow) -> io::Result<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ErrorRecord::new(relation, row));
        Ok(())
    }
}
