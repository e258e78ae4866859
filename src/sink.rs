//! Target sink capability and relation naming.
//!
//! The loader never talks to a database directly. A [`Sink`] receives one
//! `create_relation` call and then one `write_batch` call per chunk, strictly in order.
//! Errors returned by the sink are surfaced unchanged through
//! [`crate::LoadError::SinkWrite`].

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{LoadError, LoadResult, SinkError};
use crate::ingestion::encode::EncodedBatch;
use crate::types::Column;

/// A relational target accepting relation creation and batched writes.
pub trait Sink {
    /// Create `name` with `columns` if it does not exist yet.
    fn create_relation(&mut self, name: &str, columns: &[Column]) -> Result<(), SinkError>;

    /// Write one encoded batch. Must not return until the write is accepted or rejected.
    fn write_batch(&mut self, relation: &str, batch: &EncodedBatch) -> Result<(), SinkError>;
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn create_relation(&mut self, name: &str, columns: &[Column]) -> Result<(), SinkError> {
        (**self).create_relation(name, columns)
    }

    fn write_batch(&mut self, relation: &str, batch: &EncodedBatch) -> Result<(), SinkError> {
        (**self).write_batch(relation, batch)
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn create_relation(&mut self, name: &str, columns: &[Column]) -> Result<(), SinkError> {
        (**self).create_relation(name, columns)
    }

    fn write_batch(&mut self, relation: &str, batch: &EncodedBatch) -> Result<(), SinkError> {
        (**self).write_batch(relation, batch)
    }
}

/// A relation created on a [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedRelation {
    pub name: String,
    pub columns: Vec<Column>,
}

#[derive(Debug, Default)]
struct MemorySinkState {
    relations: Vec<CreatedRelation>,
    batches: Vec<EncodedBatch>,
}

/// Records everything it receives. Clones share the same storage, so a clone kept by the
/// caller can inspect what a running load wrote.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemorySinkState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn relations(&self) -> Vec<CreatedRelation> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .relations
            .clone()
    }

    pub fn batches(&self) -> Vec<EncodedBatch> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .batches
            .clone()
    }

    /// Total rows across all written batches.
    pub fn rows_written(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .batches
            .iter()
            .map(|b| b.row_count)
            .sum()
    }
}

impl Sink for MemorySink {
    fn create_relation(&mut self, name: &str, columns: &[Column]) -> Result<(), SinkError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.relations.iter().any(|r| r.name == name) {
            state.relations.push(CreatedRelation {
                name: name.to_string(),
                columns: columns.to_vec(),
            });
        }
        Ok(())
    }

    fn write_batch(&mut self, relation: &str, batch: &EncodedBatch) -> Result<(), SinkError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.relations.iter().any(|r| r.name == relation) {
            return Err(format!("relation '{relation}' does not exist").into());
        }
        state.batches.push(batch.clone());
        Ok(())
    }
}

/// Check that `name` is usable as a relation name.
///
/// Names must be non-empty, use only ASCII alphanumerics and `_`, and not start with a digit.
pub fn validate_relation_name(name: &str) -> LoadResult<()> {
    let invalid = |reason: &str| LoadError::InvalidRelationName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let Some(first) = name.chars().next() else {
        return Err(invalid("name cannot be empty"));
    };
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid(
            "name must contain only alphanumeric characters and underscores",
        ));
    }
    if first.is_ascii_digit() {
        return Err(invalid("name cannot start with a digit"));
    }
    Ok(())
}

/// Derive a valid relation name from a file name, e.g. `sales-2024.csv` → `sales_2024`.
pub fn relation_name_from_path(path: impl AsRef<Path>) -> String {
    let stem = path
        .as_ref()
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut name: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if name.is_empty() {
        name.push_str("imported");
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnType;

    #[test]
    fn relation_names_are_validated() {
        assert!(validate_relation_name("people_2024").is_ok());
        assert!(validate_relation_name("_tmp").is_ok());

        for bad in ["", "1st", "has space", "semi;colon", "naïve"] {
            let err = validate_relation_name(bad).unwrap_err();
            assert!(matches!(err, LoadError::InvalidRelationName { .. }), "{bad}");
        }
    }

    #[test]
    fn relation_name_from_file_stem() {
        assert_eq!(relation_name_from_path("/data/sales-2024.csv"), "sales_2024");
        assert_eq!(relation_name_from_path("2024.tsv"), "_2024");
        assert_eq!(relation_name_from_path(""), "imported");
        for name in ["/x/a b.c.csv", "2024.tsv", "ünï.csv"] {
            assert!(validate_relation_name(&relation_name_from_path(name)).is_ok());
        }
    }

    #[test]
    fn memory_sink_rejects_unknown_relation() {
        let mut sink = MemorySink::new();
        let batch = EncodedBatch {
            relation: "t".to_string(),
            row_count: 1,
            statement: "INSERT".to_string(),
        };
        assert!(sink.write_batch("t", &batch).is_err());

        sink.create_relation("t", &[Column::new("a", ColumnType::Text)]).unwrap();
        sink.write_batch("t", &batch).unwrap();
        assert_eq!(sink.rows_written(), 1);
        assert_eq!(sink.relations().len(), 1);
    }
}
