//! Materialized query results.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::backend::FieldDescription;
use crate::protocol::types::Oid;
use crate::value::{FromValue, Value};

/// Metadata for one result column, taken from RowDescription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    /// Column name (or alias)
    pub name: String,
    /// OID of the source table, 0 if the column is computed
    pub table_id: Oid,
    /// Attribute number within the source table, 0 if computed
    pub column_id: i16,
    /// Data type OID
    pub data_type_id: Oid,
}

impl From<&FieldDescription<'_>> for FieldInfo {
    fn from(field: &FieldDescription<'_>) -> Self {
        Self {
            name: field.name.to_string(),
            table_id: field.table_oid(),
            column_id: field.column_id(),
            data_type_id: field.type_oid(),
        }
    }
}

/// One result row.
///
/// Columns keep their server order. Name lookup returns the *last* column
/// with a given name, so `SELECT 1 AS a, 2 AS a` yields `a = 2`.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub(crate) fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column names in server order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values in server order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consume the row, keeping the values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Look up a column by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .rposition(|column| column == name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Look up a column by position.
    pub fn get_index(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Look up a column by name and convert it.
    pub fn try_get<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self
            .get(name)
            .ok_or_else(|| Error::InvalidUsage(format!("no column named {:?}", name)))?;
        T::from_value(value)
    }

    /// Iterate over `(name, value)` pairs in server order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(String::as_str).zip(&self.values)
    }
}

/// Outcome of one `execute`/`query` call.
///
/// For multi-statement simple queries, `rows` accumulates every row of every
/// statement while `command`, `row_count` and `fields` describe the last one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// All returned rows
    pub rows: Vec<Row>,
    /// Count from the command tag, `None` when the tag carries none
    pub row_count: Option<u64>,
    /// First word of the command tag (`"SELECT"`, `"INSERT"`, ...);
    /// empty for an empty query string
    pub command: String,
    /// Column metadata, `None` when the statement returned no row description
    pub fields: Option<Vec<FieldInfo>>,
}

impl QueryResult {
    /// First row, if any.
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    /// Number of rows returned (not the command tag count).
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if no rows were returned.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
