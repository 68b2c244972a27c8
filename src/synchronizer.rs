//! Declarative table reconciliation.
//!
//! Rows inside the scope selected by the filter fields are compared with the target set by
//! a content hash over their field values, never by primary key. Rows whose hash is not in
//! the target are deleted, targets whose hash is not in the table are inserted, and a
//! changed field is therefore a delete of the old row plus an insert of the new one.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value as JsonValue};

use crate::canonical::content_hash;
use crate::error::DriverError;
use crate::manager::{ConnectionManager, StatementCall};
use crate::statement::Statement;
use crate::types::{SqlValue, massage_value};

/// Field mapping of one row, keyed by column name.
pub type SyncItem = Map<String, JsonValue>;

const ID_COLUMN: &str = "id";

/// One step of the reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DeltaAction {
    /// Insert the target item.
    Create(SyncItem),
    /// Delete the current row with this identifier.
    Delete(SqlValue),
}

/// Counts of what one synchronizer run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub created: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

/// Converges the rows of one table scope to a caller-supplied target set.
pub struct TableSynchronizer {
    manager: ConnectionManager,
    table: String,
    filter_fields: Vec<String>,
    sync_fields: Vec<String>,
    skip_delete: bool,
    query_statement: Statement,
    create_statement: Statement,
    delete_statement: Statement,
}

impl TableSynchronizer {
    pub(crate) fn new(
        manager: ConnectionManager,
        table: &str,
        filter_fields: &[&str],
        sync_fields: &[&str],
    ) -> Self {
        let filter_fields: Vec<String> = filter_fields.iter().map(|f| (*f).to_owned()).collect();
        let sync_fields: Vec<String> = sync_fields.iter().map(|f| (*f).to_owned()).collect();

        let query_statement = manager.statement(&query_sql(table, &filter_fields, &sync_fields));
        let create_statement = manager.statement(&create_sql(table, &filter_fields, &sync_fields));
        let delete_statement = manager.statement(&delete_sql(table));

        Self {
            manager,
            table: table.to_owned(),
            filter_fields,
            sync_fields,
            skip_delete: false,
            query_statement,
            create_statement,
            delete_statement,
        }
    }

    /// Make reconciliation additive-only: rows missing from the target are kept.
    pub fn mark_skip_delete(&mut self) {
        self.skip_delete = true;
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub fn query_statement(&self) -> &Statement {
        &self.query_statement
    }

    #[must_use]
    pub fn create_statement(&self) -> &Statement {
        &self.create_statement
    }

    #[must_use]
    pub fn delete_statement(&self) -> &Statement {
        &self.delete_statement
    }

    /// Reconcile the scope selected by `filter_values` to exactly `items`.
    ///
    /// Target items are projected onto the filter and sync fields; a filter field missing
    /// from an item takes its value from `filter_values`, any other missing field is NULL.
    ///
    /// # Errors
    /// Fails if querying the current rows or any insert/delete of the delta fails.
    pub async fn execute(
        &self,
        filter_values: &SyncItem,
        items: &[SyncItem],
    ) -> Result<SyncOutcome, DriverError> {
        let filter_params: Vec<SqlValue> = self
            .filter_fields
            .iter()
            .map(|field| SqlValue::from(filter_values.get(field).cloned().unwrap_or(JsonValue::Null)))
            .collect();

        let current_rows = self.query_statement.execute(&filter_params).await?;
        let current: Vec<(String, SqlValue)> = current_rows
            .rows
            .iter()
            .map(|row| {
                let id = row.get(ID_COLUMN).cloned().unwrap_or(SqlValue::Null);
                (content_hash(&row.to_json_map_without(ID_COLUMN)), id)
            })
            .collect();

        let target: Vec<(String, SyncItem)> = items
            .iter()
            .map(|item| {
                let item = self.normalize_item(filter_values, item);
                (hash_item(&item), item)
            })
            .collect();

        let delta = compute_delta(current, target, self.skip_delete);
        tracing::debug!(
            table = %self.table,
            creates = delta.created(),
            deletes = delta.deleted(),
            unchanged = delta.unchanged,
            "synchronizer delta"
        );
        let outcome = SyncOutcome {
            created: delta.created(),
            deleted: delta.deleted(),
            unchanged: delta.unchanged,
        };

        let calls: Vec<StatementCall> = delta
            .actions
            .into_iter()
            .map(|action| self.to_call(action))
            .collect();
        self.manager.execute_statements(&calls).await?;
        Ok(outcome)
    }

    fn normalize_item(&self, filter_values: &SyncItem, item: &SyncItem) -> SyncItem {
        let mut normalized = Map::new();
        for field in &self.filter_fields {
            let value = item
                .get(field)
                .or_else(|| filter_values.get(field))
                .cloned()
                .unwrap_or(JsonValue::Null);
            normalized.insert(field.clone(), value);
        }
        for field in &self.sync_fields {
            let value = item.get(field).cloned().unwrap_or(JsonValue::Null);
            normalized.insert(field.clone(), value);
        }
        normalized
    }

    fn to_call(&self, action: DeltaAction) -> StatementCall {
        match action {
            DeltaAction::Create(item) => {
                let params = self
                    .filter_fields
                    .iter()
                    .chain(&self.sync_fields)
                    .map(|field| SqlValue::from(item.get(field).cloned().unwrap_or(JsonValue::Null)))
                    .collect();
                StatementCall::new(self.create_statement.clone(), params)
            }
            DeltaAction::Delete(id) => StatementCall::new(self.delete_statement.clone(), vec![id]),
        }
    }
}

/// Hash a target item the way its row will read back once inserted: values go through the
/// same massaging as bound parameters before hashing.
fn hash_item(item: &SyncItem) -> String {
    let as_bound: SyncItem = item
        .iter()
        .map(|(field, value)| {
            let bound = massage_value(SqlValue::from(value.clone()));
            (field.clone(), bound.to_json())
        })
        .collect();
    content_hash(&as_bound)
}

#[derive(Debug, Default)]
pub(crate) struct Delta {
    actions: Vec<DeltaAction>,
    unchanged: usize,
}

impl Delta {
    fn created(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, DeltaAction::Create(_)))
            .count()
    }

    fn deleted(&self) -> usize {
        self.actions.len() - self.created()
    }
}

/// Deletes first (current-row order), then creates (target order).
///
/// Duplicate current rows with the same content keep one row; the surplus copies are deleted
/// like any other row absent from the target. Duplicate targets collapse to one.
pub(crate) fn compute_delta(
    current: Vec<(String, SqlValue)>,
    target: Vec<(String, SyncItem)>,
    skip_delete: bool,
) -> Delta {
    let mut target_by_hash: HashMap<String, SyncItem> = HashMap::with_capacity(target.len());
    let mut target_order = Vec::with_capacity(target.len());
    for (hash, item) in target {
        if !target_by_hash.contains_key(&hash) {
            target_order.push(hash.clone());
            target_by_hash.insert(hash, item);
        }
    }

    let mut delta = Delta::default();
    let mut matched: HashSet<String> = HashSet::new();
    for (hash, id) in current {
        if target_by_hash.contains_key(&hash) && matched.insert(hash) {
            delta.unchanged += 1;
        } else if !skip_delete {
            delta.actions.push(DeltaAction::Delete(id));
        }
    }

    for hash in target_order {
        if !matched.contains(&hash)
            && let Some(item) = target_by_hash.remove(&hash)
        {
            delta.actions.push(DeltaAction::Create(item));
        }
    }
    delta
}

fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn query_sql(table: &str, filter_fields: &[String], sync_fields: &[String]) -> String {
    let columns: Vec<String> = std::iter::once(ID_COLUMN)
        .chain(filter_fields.iter().map(String::as_str))
        .chain(sync_fields.iter().map(String::as_str))
        .map(quote_ident)
        .collect();
    let mut sql = format!("SELECT {} FROM {}", columns.join(", "), quote_ident(table));
    if !filter_fields.is_empty() {
        let conditions: Vec<String> = filter_fields
            .iter()
            .map(|field| format!("{} = ?", quote_ident(field)))
            .collect();
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql
}

fn create_sql(table: &str, filter_fields: &[String], sync_fields: &[String]) -> String {
    let columns: Vec<String> = filter_fields
        .iter()
        .chain(sync_fields)
        .map(|field| quote_ident(field))
        .collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        columns.join(", "),
        placeholders
    )
}

fn delete_sql(table: &str) -> String {
    format!(
        "DELETE FROM {} WHERE {} = ?",
        quote_ident(table),
        quote_ident(ID_COLUMN)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(value: JsonValue) -> SyncItem {
        match value {
            JsonValue::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| (*n).to_owned()).collect()
    }

    fn current(rows: &[(i64, JsonValue)]) -> Vec<(String, SqlValue)> {
        rows.iter()
            .map(|(id, fields)| (content_hash(&item(fields.clone())), SqlValue::Int(*id)))
            .collect()
    }

    fn target(items: &[JsonValue]) -> Vec<(String, SyncItem)> {
        items
            .iter()
            .map(|value| {
                let item = item(value.clone());
                (hash_item(&item), item)
            })
            .collect()
    }

    #[test]
    fn generates_scoped_statements() {
        let filter = fields(&["owner", "kind"]);
        let sync = fields(&["name", "msg"]);
        assert_eq!(
            query_sql("sync_test", &filter, &sync),
            "SELECT `id`, `owner`, `kind`, `name`, `msg` FROM `sync_test` WHERE `owner` = ? AND `kind` = ?"
        );
        assert_eq!(
            create_sql("sync_test", &filter, &sync),
            "INSERT INTO `sync_test` (`owner`, `kind`, `name`, `msg`) VALUES (?, ?, ?, ?)"
        );
        assert_eq!(delete_sql("sync_test"), "DELETE FROM `sync_test` WHERE `id` = ?");
    }

    #[test]
    fn unscoped_query_has_no_where_clause() {
        assert_eq!(
            query_sql("t", &[], &fields(&["name"])),
            "SELECT `id`, `name` FROM `t`"
        );
    }

    #[test]
    fn identifiers_escape_backticks() {
        assert_eq!(quote_ident("we`ird"), "`we``ird`");
    }

    #[test]
    fn deletes_only_missing_rows() {
        let delta = compute_delta(
            current(&[
                (1, json!({"name": "a"})),
                (2, json!({"name": "b"})),
                (3, json!({"name": "c"})),
            ]),
            target(&[json!({"name": "a"}), json!({"name": "b"})]),
            false,
        );
        assert_eq!(delta.actions, vec![DeltaAction::Delete(SqlValue::Int(3))]);
        assert_eq!(delta.unchanged, 2);
    }

    #[test]
    fn skip_delete_keeps_missing_rows() {
        let delta = compute_delta(
            current(&[(1, json!({"name": "a"})), (3, json!({"name": "c"}))]),
            target(&[json!({"name": "a"}), json!({"name": "d"})]),
            true,
        );
        assert_eq!(delta.actions, vec![DeltaAction::Create(item(json!({"name": "d"})))]);
    }

    #[test]
    fn changed_field_is_delete_plus_create() {
        let delta = compute_delta(
            current(&[(7, json!({"name": "dog", "msg": "hello"}))]),
            target(&[json!({"msg": "hellozzz", "name": "dog"})]),
            false,
        );
        assert_eq!(
            delta.actions,
            vec![
                DeltaAction::Delete(SqlValue::Int(7)),
                DeltaAction::Create(item(json!({"msg": "hellozzz", "name": "dog"}))),
            ]
        );
    }

    #[test]
    fn key_order_does_not_matter() {
        let delta = compute_delta(
            current(&[(1, json!({"name": "dog", "msg": "hi"}))]),
            target(&[json!({"msg": "hi", "name": "dog"})]),
            false,
        );
        assert!(delta.actions.is_empty());
        assert_eq!(delta.unchanged, 1);
    }

    #[test]
    fn duplicates_collapse() {
        let delta = compute_delta(
            current(&[(1, json!({"name": "a"})), (2, json!({"name": "a"}))]),
            target(&[json!({"name": "a"}), json!({"name": "a"}), json!({"name": "b"})]),
            false,
        );
        assert_eq!(
            delta.actions,
            vec![
                DeltaAction::Delete(SqlValue::Int(2)),
                DeltaAction::Create(item(json!({"name": "b"}))),
            ]
        );
    }

    #[test]
    fn structured_targets_hash_like_their_stored_text() {
        let stored = current(&[(1, json!({"meta": r#"{"a":1,"b":2}"#}))]);
        let delta = compute_delta(stored, target(&[json!({"meta": {"b": 2, "a": 1}})]), false);
        assert!(delta.actions.is_empty());
    }

    #[test]
    fn booleans_hash_like_stored_integers() {
        let stored = current(&[(1, json!({"active": 1}))]);
        let delta = compute_delta(stored, target(&[json!({"active": true})]), false);
        assert!(delta.actions.is_empty());
    }
}
