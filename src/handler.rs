//! Result and async-message handlers.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::backend::query::{CommandComplete, DataRow, RowDescription};
use crate::result::{FieldInfo, QueryResult, Row};
use crate::state::action::AsyncMessage;
use crate::value::Value;

/// Receives the result sets of a query as they stream in.
///
/// Callback patterns by statement type:
/// - SELECT with rows: `result_start` → `row*` → `result_end`
/// - SELECT with 0 rows: `result_start` → `result_end`
/// - INSERT/UPDATE/DELETE: `result_end` only (with affected row count)
/// - empty query string: `empty_query`
///
/// For multi-statement queries like `"SELECT 1; UPDATE foo SET x=1"`:
/// ```text
/// result_start → row* → result_end   // SELECT 1
/// result_end                          // UPDATE
/// ```
///
/// An error returned from a callback aborts the query once the server
/// reaches ReadyForQuery; the connection stays usable.
pub trait ResultHandler {
    /// Called when a result set begins.
    fn result_start(&mut self, cols: RowDescription<'_>) -> Result<()> {
        let _ = cols;
        Ok(())
    }

    /// Called for each data row.
    fn row(&mut self, cols: RowDescription<'_>, row: DataRow<'_>) -> Result<()>;

    /// Called when a statement completes.
    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        let _ = complete;
        Ok(())
    }

    /// Called for an empty query string.
    fn empty_query(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Handler that materializes everything into a [`QueryResult`].
#[derive(Debug, Default)]
pub struct QueryResultHandler {
    result: QueryResult,
    columns: Option<Arc<[String]>>,
    fields: Option<Vec<FieldInfo>>,
}

impl QueryResultHandler {
    /// Create a new handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the collected result.
    pub fn into_result(self) -> QueryResult {
        self.result
    }
}

impl ResultHandler for QueryResultHandler {
    fn result_start(&mut self, cols: RowDescription<'_>) -> Result<()> {
        // `SELECT FROM t` describes zero columns but still returns rows.
        self.columns = Some(cols.iter().map(|f| f.name.to_string()).collect());
        self.fields = (!cols.is_empty()).then(|| cols.iter().map(FieldInfo::from).collect());
        Ok(())
    }

    fn row(&mut self, cols: RowDescription<'_>, row: DataRow<'_>) -> Result<()> {
        let raw = row.values()?;
        if raw.len() != cols.len() {
            return Err(Error::Protocol(format!(
                "DataRow has {} columns, RowDescription has {}",
                raw.len(),
                cols.len()
            )));
        }
        let Some(columns) = &self.columns else {
            return Err(Error::Protocol("DataRow without RowDescription".into()));
        };

        let values = cols
            .iter()
            .zip(raw)
            .map(|(field, bytes)| Value::decode(field.type_oid(), field.format(), bytes))
            .collect::<Result<Vec<_>>>()?;
        self.result.rows.push(Row::new(Arc::clone(columns), values));
        Ok(())
    }

    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        self.result.command = complete.command().to_string();
        self.result.row_count = complete.rows_affected();
        self.result.fields = self.fields.take();
        self.columns = None;
        Ok(())
    }

    fn empty_query(&mut self) -> Result<()> {
        self.result.command = String::new();
        self.result.row_count = None;
        self.result.fields = None;
        self.columns = None;
        self.fields = None;
        Ok(())
    }
}

/// Receives messages the server sends outside the request/response flow.
pub trait AsyncMessageHandler: Send {
    /// Handle one notice, notification or parameter change.
    fn handle(&mut self, msg: &AsyncMessage);
}

impl<F: FnMut(&AsyncMessage) + Send> AsyncMessageHandler for F {
    fn handle(&mut self, msg: &AsyncMessage) {
        self(msg)
    }
}
