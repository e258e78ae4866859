//! Schema inference over a bounded sample.
//!
//! Rules:
//!
//! - The delimiter is the candidate that splits the first line into the most fields; ties go
//!   to `,` then `\t` then `;`.
//! - The first non-blank line is the header.
//! - Each column starts from the type of its first data value and can only narrow afterwards
//!   (see [`ColumnType::narrow`]). Empty values after the first row are treated as nulls.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::error::{LoadError, LoadResult};
use crate::types::{Column, ColumnType, Delimiter, Linebreak, Schema};

use super::parse::split_records;
use super::segment::{is_blank, FileSegmenter};

/// Default number of data rows inspected while probing.
pub const MAX_SAMPLE_LINES: usize = 100_000;

const LINEBREAK_WINDOW: usize = 64 * 1024;

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"];
const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Options controlling schema probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOptions {
    /// Upper bound on data rows inspected for typing.
    pub max_sample_lines: usize,
    /// Lines read per segmenter call while sampling.
    pub sample_chunk_lines: usize,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            max_sample_lines: MAX_SAMPLE_LINES,
            sample_chunk_lines: 10_000,
        }
    }
}

/// Infer the [`Schema`] of a delimited file using [`ProbeOptions::default`].
pub fn probe_schema(path: impl AsRef<Path>) -> LoadResult<Schema> {
    probe_schema_with(path, &ProbeOptions::default())
}

/// Infer the [`Schema`] of a delimited file.
///
/// Fails with [`LoadError::EmptySource`] if the file has no header or no data rows.
pub fn probe_schema_with(path: impl AsRef<Path>, opts: &ProbeOptions) -> LoadResult<Schema> {
    let path = path.as_ref();
    if opts.max_sample_lines == 0 || opts.sample_chunk_lines == 0 {
        return Err(LoadError::InvalidOptions {
            message: "sample sizes must be > 0".to_string(),
        });
    }

    let linebreak = detect_linebreak(path)?;
    let mut segmenter = FileSegmenter::open(path, opts.sample_chunk_lines, linebreak)?;

    let mut header: Option<(Delimiter, Vec<String>)> = None;
    let mut inference: Option<TypeInference> = None;
    let mut sampled = 0usize;

    'sample: while let Some(chunk) = segmenter.next_chunk()? {
        let mut lines = chunk.lines.as_slice();

        if header.is_none() {
            let Some(pos) = lines.iter().position(|l| !is_blank(l)) else {
                continue;
            };
            let delimiter = detect_delimiter(&lines[pos]);
            let names = split_records(&lines[pos..=pos], delimiter)?
                .into_iter()
                .next()
                .unwrap_or_default();
            header = Some((delimiter, names));
            lines = &lines[pos + 1..];
        }
        let Some((delimiter, names)) = header.as_ref() else {
            continue;
        };

        for fields in split_records(lines, *delimiter)? {
            if sampled >= opts.max_sample_lines {
                break 'sample;
            }
            sampled += 1;
            if fields.len() != names.len() {
                continue;
            }
            match inference.as_mut() {
                None => inference = Some(TypeInference::from_first_row(&fields)),
                Some(inf) => inf.refine(&fields),
            }
        }
    }

    let empty = || LoadError::EmptySource {
        path: path.to_path_buf(),
    };
    let (delimiter, names) = header.ok_or_else(empty)?;
    let inference = inference.ok_or_else(empty)?;

    let columns = normalize_names(names)
        .into_iter()
        .zip(inference.types)
        .map(|(name, ty)| Column::new(name, ty))
        .collect::<Vec<_>>();

    debug!(
        path = %path.display(),
        delimiter = ?delimiter,
        linebreak = ?linebreak,
        columns = columns.len(),
        sampled,
        "probed schema"
    );
    Ok(Schema::new(columns, delimiter, linebreak))
}

/// Pick the delimiter producing the most fields on `first_line`.
pub fn detect_delimiter(first_line: &str) -> Delimiter {
    let mut best = Delimiter::Comma;
    let mut best_count = 0usize;
    for candidate in Delimiter::CANDIDATES {
        let count = split_records(&[first_line], candidate)
            .ok()
            .and_then(|records| records.into_iter().next())
            .map(|fields| fields.len())
            .unwrap_or(0);
        // Strictly greater keeps the earlier, higher-priority candidate on ties.
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }
    best
}

/// Detect the line terminator from the end of the first line.
///
/// Reads until the first `\n` or `\r`, however long the first line is. A file without
/// any terminator is treated as `Lf`.
pub fn detect_linebreak(path: impl AsRef<Path>) -> LoadResult<Linebreak> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| LoadError::read(path, e))?;
    let mut reader = BufReader::with_capacity(LINEBREAK_WINDOW, file);
    let mut pending_cr = false;

    loop {
        let buf = reader.fill_buf().map_err(|e| LoadError::read(path, e))?;
        if pending_cr {
            return Ok(match buf.first() {
                Some(b'\n') => Linebreak::CrLf,
                _ => Linebreak::Cr,
            });
        }
        if buf.is_empty() {
            return Ok(Linebreak::Lf);
        }
        match buf.iter().position(|&b| b == b'\n' || b == b'\r') {
            Some(pos) if buf[pos] == b'\n' => return Ok(Linebreak::Lf),
            Some(pos) => match buf.get(pos + 1) {
                Some(b'\n') => return Ok(Linebreak::CrLf),
                Some(_) => return Ok(Linebreak::Cr),
                // `\r` ends the buffer; the next byte decides.
                None => pending_cr = true,
            },
            None => {}
        }
        let consumed = buf.len();
        reader.consume(consumed);
    }
}

/// Classify a single value with no prior knowledge of its column.
pub fn classify(value: &str) -> ColumnType {
    let v = value.trim();
    if v.is_empty() {
        return ColumnType::Text;
    }
    if let Some(numeric) = numeric_kind(v) {
        return numeric;
    }
    if is_date(v) {
        return ColumnType::Date;
    }
    if parse_bool(v).is_some() {
        return ColumnType::Boolean;
    }
    ColumnType::Text
}

/// `Integer` for integral numbers, `Number` for other finite numbers.
pub(crate) fn numeric_kind(v: &str) -> Option<ColumnType> {
    if v.parse::<i64>().is_ok() {
        return Some(ColumnType::Integer);
    }
    // f64 parsing accepts "inf"/"NaN"; require a digit and a finite result.
    if !v.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    match v.parse::<f64>() {
        Ok(f) if f.is_finite() => Some(ColumnType::Number),
        _ => None,
    }
}

pub(crate) fn is_date(v: &str) -> bool {
    DATE_FORMATS
        .iter()
        .any(|fmt| NaiveDate::parse_from_str(v, fmt).is_ok())
        || DATETIME_FORMATS
            .iter()
            .any(|fmt| NaiveDateTime::parse_from_str(v, fmt).is_ok())
        || DateTime::parse_from_rfc3339(v).is_ok()
}

pub(crate) fn parse_bool(v: &str) -> Option<bool> {
    if v.eq_ignore_ascii_case("true") {
        Some(true)
    } else if v.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Per-column type state while sampling.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TypeInference {
    types: Vec<ColumnType>,
}

impl TypeInference {
    fn from_first_row(fields: &[String]) -> Self {
        Self {
            types: fields.iter().map(|f| classify(f)).collect(),
        }
    }

    fn refine(&mut self, fields: &[String]) {
        for (ty, raw) in self.types.iter_mut().zip(fields) {
            if *ty == ColumnType::Text {
                continue;
            }
            let v = raw.trim();
            if v.is_empty() {
                continue;
            }
            let observed = match *ty {
                ColumnType::Integer | ColumnType::Number => numeric_kind(v).unwrap_or(ColumnType::Text),
                ColumnType::Date if is_date(v) => ColumnType::Date,
                ColumnType::Boolean if parse_bool(v).is_some() => ColumnType::Boolean,
                _ => ColumnType::Text,
            };
            *ty = ty.narrow(observed);
        }
    }
}

fn normalize_names(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(names.len());
    names
        .into_iter()
        .enumerate()
        .map(|(i, raw)| {
            let base = match raw.trim() {
                "" => format!("column_{}", i + 1),
                trimmed => trimmed.to_string(),
            };
            let mut name = base.clone();
            let mut k = 2;
            while !seen.insert(name.clone()) {
                name = format!("{base}_{k}");
                k += 1;
            }
            name
        })
        .collect()
}
