use std::path::PathBuf;

use thiserror::Error;

/// Convenience result type for load operations.
pub type LoadResult<T> = Result<T, LoadError>;

/// Error type produced by [`crate::sink::Sink`] implementations.
///
/// It is carried unchanged as the source of [`LoadError::SinkWrite`].
pub type SinkError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Severity classification used when logging failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Recoverable, the run continues.
    Warning,
    /// The run failed.
    Error,
    /// The run failed because of an I/O or infrastructure problem.
    Critical,
}

/// Error type returned by probing and loading.
///
/// Cancellation is not an error: a cancelled run ends with
/// [`crate::execution::LoadStatus::Cancelled`] in a successful summary.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The source file could not be opened or read.
    #[error("read error on '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Delimited-text decoding error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// The source has no header or no data rows.
    #[error("no data rows found in '{path}'")]
    EmptySource { path: PathBuf },

    /// A row's field count disagrees with the schema.
    ///
    /// Produced per row and absorbed by the error sink; it never aborts a run.
    #[error("schema mismatch at line {line}: expected {expected} fields, found {found}")]
    SchemaMismatch {
        line: u64,
        expected: usize,
        found: usize,
    },

    /// The target sink rejected relation creation or a batch.
    #[error("sink write error on relation '{relation}': {source}")]
    SinkWrite {
        relation: String,
        #[source]
        source: SinkError,
    },

    /// The error sink could not record a rejected row.
    #[error("error sink failure: {0}")]
    ErrorSink(#[from] std::io::Error),

    #[error("invalid relation name '{name}': {reason}")]
    InvalidRelationName { name: String, reason: String },

    #[error("invalid options: {message}")]
    InvalidOptions { message: String },
}

impl LoadError {
    pub(crate) fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    /// Severity used for logging and alerting.
    pub fn severity(&self) -> Severity {
        match self {
            LoadError::Read { .. } | LoadError::ErrorSink(_) => Severity::Critical,
            LoadError::Csv(err) => match err.kind() {
                ::csv::ErrorKind::Io(_) => Severity::Critical,
                _ => Severity::Error,
            },
            LoadError::SchemaMismatch { .. } => Severity::Warning,
            LoadError::EmptySource { .. }
            | LoadError::SinkWrite { .. }
            | LoadError::InvalidRelationName { .. }
            | LoadError::InvalidOptions { .. } => Severity::Error,
        }
    }
}
