//! Core data model types for loading.
//!
//! A [`Schema`] is produced once by [`crate::ingestion::probe_schema`] and then drives the
//! streaming phase: its [`Delimiter`] and [`Linebreak`] tell the parser how to split the file,
//! and its ordered [`Column`]s fix the arity every accepted row must have.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Inferred logical type of a column.
///
/// Types form a narrowing lattice: `Integer → Number → Text`, `Date → Text`,
/// `Boolean → Text`. Once a column reaches [`ColumnType::Text`] it stays there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// Integral number.
    Integer,
    /// Any finite number.
    Number,
    /// Calendar date or timestamp.
    Date,
    /// Case-insensitive `true` / `false`.
    Boolean,
    /// Anything else.
    Text,
}

impl ColumnType {
    /// Combine the current column type with the type observed for one more value.
    ///
    /// The result is never more specific than `self`.
    pub fn narrow(self, observed: ColumnType) -> ColumnType {
        use ColumnType::*;
        match (self, observed) {
            (Text, _) => Text,
            (current, seen) if current == seen => current,
            (Integer, Number) | (Number, Integer) => Number,
            _ => Text,
        }
    }

    /// SQL type used when creating the target relation.
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Number => "NUMERIC",
            ColumnType::Date => "TIMESTAMP",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Text => "TEXT",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Number => "number",
            ColumnType::Date => "date",
            ColumnType::Boolean => "boolean",
            ColumnType::Text => "text",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single named, typed column in a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name, taken from the header row.
    pub name: String,
    /// Inferred column type.
    pub inferred_type: ColumnType,
}

impl Column {
    /// Create a new column.
    pub fn new(name: impl Into<String>, inferred_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            inferred_type,
        }
    }
}

/// Field delimiter candidates, listed in tie-break priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delimiter {
    Comma,
    Tab,
    Semicolon,
}

impl Delimiter {
    /// All candidates, highest priority first.
    pub const CANDIDATES: [Delimiter; 3] = [Delimiter::Comma, Delimiter::Tab, Delimiter::Semicolon];

    pub fn as_byte(self) -> u8 {
        match self {
            Delimiter::Comma => b',',
            Delimiter::Tab => b'\t',
            Delimiter::Semicolon => b';',
        }
    }

    pub fn as_char(self) -> char {
        self.as_byte() as char
    }
}

/// Line terminator convention of the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Linebreak {
    #[default]
    Lf,
    CrLf,
    Cr,
}

impl Linebreak {
    pub fn as_str(self) -> &'static str {
        match self {
            Linebreak::Lf => "\n",
            Linebreak::CrLf => "\r\n",
            Linebreak::Cr => "\r",
        }
    }

    /// Byte the segmenter splits on.
    pub(crate) fn terminator(self) -> u8 {
        match self {
            Linebreak::Lf | Linebreak::CrLf => b'\n',
            Linebreak::Cr => b'\r',
        }
    }
}

/// The resolved shape of a delimited source file.
///
/// Immutable once produced by probing; column order is the header order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Ordered list of columns.
    pub columns: Vec<Column>,
    /// Field delimiter.
    pub delimiter: Delimiter,
    /// Line terminator.
    pub linebreak: Linebreak,
}

impl Schema {
    /// Create a new schema.
    pub fn new(columns: Vec<Column>, delimiter: Delimiter, linebreak: Linebreak) -> Self {
        Self {
            columns,
            delimiter,
            linebreak,
        }
    }

    /// Number of fields every accepted row must carry.
    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    /// Iterate column names in order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Returns the index of a column by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// A single typed value of an accepted row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Missing/empty value.
    Null,
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string. Date columns keep their source text here.
    Utf8(String),
}

#[cfg(test)]
mod tests {
    use super::ColumnType::*;

    #[test]
    fn narrowing_never_widens() {
        assert_eq!(Integer.narrow(Number), Number);
        assert_eq!(Number.narrow(Integer), Number);
        assert_eq!(Integer.narrow(Text), Text);
        assert_eq!(Date.narrow(Integer), Text);
        assert_eq!(Boolean.narrow(Date), Text);
        for observed in [Integer, Number, Date, Boolean, Text] {
            assert_eq!(Text.narrow(observed), Text);
        }
    }

    #[test]
    fn sql_types_follow_column_types() {
        assert_eq!(Integer.sql_type(), "INTEGER");
        assert_eq!(Number.sql_type(), "NUMERIC");
        assert_eq!(Date.sql_type(), "TIMESTAMP");
        assert_eq!(Text.sql_type(), "TEXT");
    }
}
