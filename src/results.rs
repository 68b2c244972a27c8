use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};

use crate::types::SqlValue;

/// A row from a query result.
///
/// Column names and the name-to-index lookup are shared by every row of the result.
#[derive(Debug, Clone)]
pub struct Row {
    /// The column names for this row (shared across all rows in a result)
    pub column_names: Arc<Vec<String>>,
    /// The values for this row
    pub values: Vec<SqlValue>,
    column_index: Arc<HashMap<String, usize>>,
}

impl Row {
    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        self.column_index.get(column_name).copied()
    }

    /// Get a value from the row by column name
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&SqlValue> {
        self.get_column_index(column_name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Get a value from the row by column index
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    /// Field mapping of the row with `skip` removed, in the JSON form used for hashing.
    #[must_use]
    pub fn to_json_map_without(&self, skip: &str) -> Map<String, JsonValue> {
        self.column_names
            .iter()
            .zip(&self.values)
            .filter(|(name, _)| name.as_str() != skip)
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }
}

/// Result of executing a statement.
///
/// Row-returning statements fill `rows`; DML fills `rows_affected` and, for inserts,
/// `last_insert_id`.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// The rows returned by the query
    pub rows: Vec<Row>,
    /// The number of rows affected (for DML statements)
    pub rows_affected: u64,
    /// Identifier generated by the last insert, when the transport reports one
    pub last_insert_id: Option<i64>,
    column_names: Option<Arc<Vec<String>>>,
    column_index: Option<Arc<HashMap<String, usize>>>,
}

impl QueryResult {
    /// Create an empty row-returning result with the given columns.
    #[must_use]
    pub fn with_columns(column_names: Vec<String>, capacity: usize) -> Self {
        let column_index = index_columns(&column_names);
        Self {
            rows: Vec::with_capacity(capacity),
            rows_affected: 0,
            last_insert_id: None,
            column_names: Some(Arc::new(column_names)),
            column_index: Some(Arc::new(column_index)),
        }
    }

    /// Result of a statement that returns no rows.
    #[must_use]
    pub fn affected(rows_affected: u64, last_insert_id: Option<i64>) -> Self {
        Self {
            rows_affected,
            last_insert_id,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn column_names(&self) -> Option<&Arc<Vec<String>>> {
        self.column_names.as_ref()
    }

    /// Append a row; values must follow the column order given at construction.
    pub fn push_row(&mut self, values: Vec<SqlValue>) {
        let (Some(column_names), Some(column_index)) = (&self.column_names, &self.column_index)
        else {
            return;
        };
        self.rows.push(Row {
            column_names: Arc::clone(column_names),
            values,
            column_index: Arc::clone(column_index),
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn index_columns(column_names: &[String]) -> HashMap<String, usize> {
    column_names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), i))
        .collect()
}
