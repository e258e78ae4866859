//! `rust-data-loader` streams large delimited text files (CSV, TSV, semicolon-separated) into a
//! relational target in fixed-size batches.
//!
//! A run has two passes over the source:
//!
//! 1. **Probe**: a bounded sample fixes the delimiter, line break and one
//!    [`types::ColumnType`] per column ([`ingestion::probe_schema`]).
//! 2. **Stream**: the whole file is read chunk by chunk; rows are validated against the
//!    schema, encoded and handed to a [`sink::Sink`], one write per chunk.
//!
//! Rows whose field count does not match the schema are diverted to an
//! [`ingestion::ErrorSink`] and the run continues. A sink failure stops the run and is
//! returned unchanged inside [`LoadError::SinkWrite`].
//!
//! ## Quick example
//!
//! ```no_run
//! use rust_data_loader::execution::{LoadCoordinator, LoadOptions, LoadStatus};
//! use rust_data_loader::ingestion::FileErrorSink;
//! use rust_data_loader::sink::{relation_name_from_path, MemorySink};
//!
//! # fn main() -> Result<(), rust_data_loader::LoadError> {
//! let path = "sales-2024.csv";
//! let relation = relation_name_from_path(path);
//! let mut sink = MemorySink::new();
//! let mut errors = FileErrorSink::new("rejected.jsonl");
//!
//! let summary = LoadCoordinator::new(LoadOptions::default()).run(path, &relation, &mut sink, &mut errors)?;
//! assert_eq!(summary.status, LoadStatus::Completed);
//! println!("loaded {} rows, rejected {}", summary.processed_rows, summary.rejected_rows);
//! # Ok(())
//! # }
//! ```
//!
//! ## Running in the background
//!
//! [`execution::LoadCoordinator::spawn`] runs the load on a worker thread and returns a
//! [`execution::LoadHandle`] with a channel of [`execution::ProgressEvent`]s and a way to
//! cancel. Cancellation is cooperative: the chunk in flight is always written first.
//!
//! ```no_run
//! use rust_data_loader::execution::{LoadCoordinator, LoadOptions};
//! use rust_data_loader::ingestion::MemoryErrorSink;
//! use rust_data_loader::sink::MemorySink;
//!
//! # fn main() -> Result<(), rust_data_loader::LoadError> {
//! let handle = LoadCoordinator::new(LoadOptions::default())
//!     .spawn("big.tsv", "big", MemorySink::new(), MemoryErrorSink::new());
//! for event in handle.events() {
//!     println!("{:?} {} rows, eta {:?}", event.status, event.processed_rows, event.eta_display());
//! }
//! let summary = handle.join()?;
//! println!("{:?}", summary.status);
//! # Ok(())
//! # }
//! ```
//!
//! The library logs through `tracing` and installs no subscriber.

pub mod error;
pub mod execution;
pub mod ingestion;
pub mod sink;
pub mod types;

pub use error::{LoadError, LoadResult, Severity, SinkError};
