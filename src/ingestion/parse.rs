//! Streaming parser: full-file pass producing schema-aligned batches.
//!
//! Rules:
//!
//! - The header line is skipped; blank lines are ignored.
//! - A row whose field count differs from the schema is rejected, not fatal.
//! - Accepted fields are converted by column type. Empty fields become [`Value::Null`]; a
//!   field that does not fit its column type is kept as [`Value::Utf8`]. Text is never trimmed.
//! - Quoted fields may contain the delimiter but not a line break.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{LoadError, LoadResult};
use crate::types::{ColumnType, Delimiter, Schema, Value};

use super::probe::{numeric_kind, parse_bool};
use super::segment::{is_blank, FileSegmenter};

/// One parsed source row.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedRow {
    /// Values aligned 1:1 with the schema columns.
    Accepted(Vec<Value>),
    /// The row was diverted; it carries the raw text.
    Rejected(RejectedRow),
}

/// A row diverted to the error sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRow {
    /// 1-based line number in the source file.
    pub line: u64,
    /// Raw line text, terminator removed.
    pub raw: String,
    /// Why the row was rejected.
    pub reason: String,
}

/// Accepted and rejected rows of one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBatch {
    /// Accepted rows, in source order.
    pub rows: Vec<Vec<Value>>,
    /// Rejected rows, in source order.
    pub rejected: Vec<RejectedRow>,
    /// Byte offset of the chunk this batch was parsed from.
    pub offset: u64,
    /// `true` if this is the final batch of the file.
    pub is_last: bool,
}

/// Reads a file chunk by chunk and validates every row against a [`Schema`].
#[derive(Debug)]
pub struct StreamingParser {
    schema: Schema,
    splitter: FieldSplitter,
    segmenter: FileSegmenter,
    next_line: u64,
}

impl StreamingParser {
    /// Open `path` and position after the header line.
    ///
    /// Each call to [`Self::next_batch`] consumes up to `batch_size` source lines.
    pub fn open(path: impl AsRef<Path>, schema: &Schema, batch_size: usize) -> LoadResult<Self> {
        let mut segmenter = FileSegmenter::open(path, batch_size, schema.linebreak)?;
        let mut next_line = 1u64;
        while let Some(line) = segmenter.next_line()? {
            next_line += 1;
            if !is_blank(&line) {
                break;
            }
        }

        Ok(Self {
            schema: schema.clone(),
            splitter: FieldSplitter::new(schema.delimiter),
            segmenter,
            next_line,
        })
    }

    /// Parse the next chunk, or `None` once the file is exhausted.
    pub fn next_batch(&mut self) -> LoadResult<Option<ParsedBatch>> {
        let Some(chunk) = self.segmenter.next_chunk()? else {
            return Ok(None);
        };
        let first_line = self.next_line;
        self.next_line += chunk.len() as u64;

        let mut batch = ParsedBatch {
            rows: Vec::with_capacity(chunk.len()),
            rejected: Vec::new(),
            offset: chunk.offset,
            is_last: chunk.is_last,
        };
        for row in self.splitter.parse_lines(&self.schema, &chunk.lines, first_line)? {
            match row {
                ParsedRow::Accepted(values) => batch.rows.push(values),
                ParsedRow::Rejected(rejected) => batch.rejected.push(rejected),
            }
        }
        Ok(Some(batch))
    }
}

/// Parse raw data lines against `schema`.
///
/// `first_line` is the 1-based source line number of `lines[0]`. Blank lines yield no row.
pub fn parse_chunk(schema: &Schema, lines: &[String], first_line: u64) -> LoadResult<Vec<ParsedRow>> {
    FieldSplitter::new(schema.delimiter).parse_lines(schema, lines, first_line)
}

/// Split each non-blank line into fields with `delimiter`.
pub(crate) fn split_records<S: AsRef<str>>(
    lines: &[S],
    delimiter: Delimiter,
) -> LoadResult<Vec<Vec<String>>> {
    let splitter = FieldSplitter::new(delimiter);
    let mut out = Vec::with_capacity(lines.len());
    for line in lines {
        let line: &str = line.as_ref();
        if is_blank(line) {
            continue;
        }
        out.push(splitter.split(line)?);
    }
    Ok(out)
}

#[derive(Debug)]
struct FieldSplitter {
    builder: csv::ReaderBuilder,
}

impl FieldSplitter {
    fn new(delimiter: Delimiter) -> Self {
        let mut builder = csv::ReaderBuilder::new();
        builder
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter.as_byte())
            .buffer_capacity(1024);
        Self { builder }
    }

    fn split(&self, line: &str) -> LoadResult<Vec<String>> {
        let mut rdr = self.builder.from_reader(line.as_bytes());
        let mut record = csv::StringRecord::new();
        if rdr.read_record(&mut record)? {
            Ok(record.iter().map(str::to_owned).collect())
        } else {
            Ok(Vec::new())
        }
    }

    fn parse_lines(
        &self,
        schema: &Schema,
        lines: &[String],
        first_line: u64,
    ) -> LoadResult<Vec<ParsedRow>> {
        let expected = schema.arity();
        let mut out = Vec::with_capacity(lines.len());

        for (i, line) in lines.iter().enumerate() {
            if is_blank(line) {
                continue;
            }
            let line_no = first_line + i as u64;
            let fields = self.split(line)?;

            if fields.len() != expected {
                let reason = LoadError::SchemaMismatch {
                    line: line_no,
                    expected,
                    found: fields.len(),
                };
                warn!(line = line_no, expected, found = fields.len(), "diverting malformed row");
                out.push(ParsedRow::Rejected(RejectedRow {
                    line: line_no,
                    raw: line.clone(),
                    reason: reason.to_string(),
                }));
                continue;
            }

            let values = schema
                .columns
                .iter()
                .zip(&fields)
                .map(|(col, raw)| to_value(raw, col.inferred_type))
                .collect();
            out.push(ParsedRow::Accepted(values));
        }
        Ok(out)
    }
}

/// Only an empty field is `Null`. Surrounding whitespace is ignored when parsing numbers and
/// booleans; text is kept byte for byte.
fn to_value(raw: &str, ty: ColumnType) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    let v = raw.trim();

    let typed = match ty {
        ColumnType::Integer => v.parse::<i64>().ok().map(Value::Int64),
        ColumnType::Number => match numeric_kind(v) {
            Some(_) => v.parse::<f64>().ok().map(Value::Float64),
            None => None,
        },
        ColumnType::Boolean => parse_bool(v).map(Value::Bool),
        ColumnType::Date | ColumnType::Text => None,
    };
    typed.unwrap_or_else(|| Value::Utf8(raw.to_owned()))
}
