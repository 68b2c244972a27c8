use rusqlite::types::Value;
use rusqlite::{Statement, ToSql};

use crate::results::QueryResult;

use super::params::from_sqlite_value;

/// Run a prepared rusqlite statement.
///
/// Statements that produce columns are read into rows. Anything else is executed and
/// reported as an affected-row count, with the last insert rowid for INSERT/REPLACE.
pub(crate) fn run_statement(
    conn: &rusqlite::Connection,
    stmt: &mut Statement<'_>,
    sql: &str,
    params: &[Value],
) -> rusqlite::Result<QueryResult> {
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|v| v as &dyn ToSql).collect();

    if stmt.column_count() == 0 {
        let changed = stmt.execute(&param_refs[..])?;
        let last_insert_id = is_insert(sql).then(|| conn.last_insert_rowid());
        return Ok(QueryResult::affected(changed as u64, last_insert_id));
    }

    let column_names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();
    let col_count = column_names.len();
    let mut result = QueryResult::with_columns(column_names, 10);

    let mut rows = stmt.query(&param_refs[..])?;
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(col_count);
        for idx in 0..col_count {
            values.push(from_sqlite_value(row.get::<_, Value>(idx)?));
        }
        result.push_row(values);
    }
    Ok(result)
}

fn is_insert(sql: &str) -> bool {
    let head: String = sql
        .trim_start()
        .chars()
        .take(7)
        .collect::<String>()
        .to_ascii_uppercase();
    head.starts_with("INSERT") || head.starts_with("REPLACE")
}
