//! Reading, typing and encoding delimited source files.
//!
//! The pipeline stages live in separate modules:
//!
//! - [`segment`]: bounded line chunks read from a byte offset
//! - [`probe`]: delimiter, line break and column type inference over a sample
//! - [`parse`]: full-file pass validating every row against a [`crate::types::Schema`]
//! - [`encode`]: accepted rows rendered into one write unit per chunk
//! - [`error_sink`]: where rejected rows go

pub mod encode;
pub mod error_sink;
pub mod parse;
pub mod probe;
pub mod segment;

pub use encode::{create_relation_sql, BatchEncoder, EncodedBatch};
pub use error_sink::{ErrorRecord, ErrorSink, FileErrorSink, MemoryErrorSink};
pub use parse::{parse_chunk, ParsedBatch, ParsedRow, RejectedRow, StreamingParser};
pub use probe::{detect_delimiter, detect_linebreak, probe_schema, probe_schema_with, ProbeOptions, MAX_SAMPLE_LINES};
pub use segment::{count_data_rows, read_chunk, Chunk, FileSegmenter};
