//! Batch encoding into SQL write units.
//!
//! The encoder performs no I/O. It renders accepted rows into one multi-row `INSERT`
//! statement addressed to the target relation; a [`crate::sink::Sink`] decides what to do
//! with it.

use rayon::prelude::*;

use crate::types::{Column, Schema, Value};

/// Literal written for missing or non-representable values.
pub const NULL_MARKER: &str = "NULL";

/// An encoded batch, ready to hand to a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBatch {
    /// Target relation.
    pub relation: String,
    /// Number of rows in `statement`.
    pub row_count: usize,
    /// `INSERT INTO ... VALUES ...` statement.
    pub statement: String,
}

/// Encodes accepted rows for one relation and schema.
#[derive(Debug, Clone)]
pub struct BatchEncoder {
    relation: String,
    insert_prefix: String,
}

impl BatchEncoder {
    pub fn new(relation: impl Into<String>, schema: &Schema) -> Self {
        let relation = relation.into();
        let columns = schema
            .columns
            .iter()
            .map(|c| quote_identifier(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let insert_prefix = format!(
            "INSERT INTO {} ({}) VALUES ",
            quote_identifier(&relation),
            columns
        );
        Self {
            relation,
            insert_prefix,
        }
    }

    pub fn relation(&self) -> &str {
        &self.relation
    }

    /// Encode `rows`, or `None` if there is nothing to write.
    pub fn encode(&self, rows: &[Vec<Value>]) -> Option<EncodedBatch> {
        if rows.is_empty() {
            return None;
        }

        let tuples: Vec<String> = rows.par_iter().map(|row| encode_row(row)).collect();
        let mut statement =
            String::with_capacity(self.insert_prefix.len() + tuples.iter().map(|t| t.len() + 2).sum::<usize>());
        statement.push_str(&self.insert_prefix);
        statement.push_str(&tuples.join(", "));

        Some(EncodedBatch {
            relation: self.relation.clone(),
            row_count: rows.len(),
            statement,
        })
    }
}

/// `CREATE TABLE IF NOT EXISTS` statement for `columns`.
pub fn create_relation_sql(relation: &str, columns: &[Column]) -> String {
    let defs = columns
        .iter()
        .map(|c| format!("{} {}", quote_identifier(&c.name), c.inferred_type.sql_type()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE IF NOT EXISTS {} ({})", quote_identifier(relation), defs)
}

/// Render one row as a parenthesized tuple of literals.
pub fn encode_row(row: &[Value]) -> String {
    let mut out = String::from("(");
    for (i, value) in row.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&encode_value(value));
    }
    out.push(')');
    out
}

/// Render one value as a SQL literal.
pub fn encode_value(value: &Value) -> String {
    match value {
        Value::Null => NULL_MARKER.to_string(),
        Value::Int64(v) => v.to_string(),
        Value::Float64(v) if v.is_finite() => v.to_string(),
        Value::Float64(_) => NULL_MARKER.to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Utf8(s) => quote_literal(s),
    }
}

/// Single-quote a string literal, doubling embedded quotes.
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_identifier(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColumnType, Delimiter, Linebreak};

    fn schema() -> Schema {
        Schema::new(
            vec![
                Column::new("id", ColumnType::Integer),
                Column::new("note", ColumnType::Text),
            ],
            Delimiter::Comma,
            Linebreak::Lf,
        )
    }

    #[test]
    fn encodes_multi_row_insert() {
        let enc = BatchEncoder::new("people", &schema());
        let batch = enc
            .encode(&[
                vec![Value::Int64(1), Value::Utf8("it's".to_string())],
                vec![Value::Int64(2), Value::Null],
            ])
            .unwrap();

        assert_eq!(batch.relation, "people");
        assert_eq!(batch.row_count, 2);
        assert_eq!(
            batch.statement,
            "INSERT INTO \"people\" (\"id\", \"note\") VALUES (1, 'it''s'), (2, NULL)"
        );
    }

    #[test]
    fn empty_batch_encodes_to_nothing() {
        assert!(BatchEncoder::new("t", &schema()).encode(&[]).is_none());
    }

    #[test]
    fn primitives_pass_through_unquoted() {
        assert_eq!(encode_value(&Value::Float64(10.5)), "10.5");
        assert_eq!(encode_value(&Value::Float64(f64::NAN)), NULL_MARKER);
        assert_eq!(encode_value(&Value::Bool(true)), "TRUE");
        assert_eq!(encode_value(&Value::Int64(-7)), "-7");
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(
            create_relation_sql("t", &schema().columns),
            "CREATE TABLE IF NOT EXISTS \"t\" (\"id\" INTEGER, \"note\" TEXT)"
        );
    }
}
