use futures_util::future::join_all;

use crate::error::DriverError;
use crate::results::QueryResult;
use crate::statement::Statement;
use crate::types::{SqlValue, massage_params};

use super::ConnectionManager;

/// A statement and the parameters to execute it with, for batched execution.
#[derive(Clone)]
pub struct StatementCall {
    pub statement: Statement,
    pub params: Vec<SqlValue>,
}

impl StatementCall {
    pub fn new(statement: Statement, params: Vec<SqlValue>) -> Self {
        Self { statement, params }
    }
}

impl ConnectionManager {
    /// Execute ad-hoc SQL with positional parameters on the current connection.
    ///
    /// # Errors
    /// [`DriverError::NotConnected`] without a physical connection, otherwise whatever the
    /// transport reports.
    pub async fn execute_sql(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<QueryResult, DriverError> {
        tracing::trace!(sql, "executing sql");
        if self.is_debug() {
            tracing::info!(sql, ?params, "executing sql");
        }

        let connection = self.connection().ok_or(DriverError::NotConnected)?;
        connection
            .execute(sql, massage_params(params))
            .await
            .inspect_err(|err| tracing::error!(sql, error = %err, "sql execution failed"))
    }

    /// Execute a batch of statement calls.
    ///
    /// In debug mode the calls run one after another in list order and the batch stops at the
    /// first failure. Otherwise they are all issued at once with no ordering between them and
    /// every call runs to completion even when a sibling fails. Results come back in list
    /// order either way.
    ///
    /// # Errors
    /// The first failure in list order.
    pub async fn execute_statements(
        &self,
        calls: &[StatementCall],
    ) -> Result<Vec<QueryResult>, DriverError> {
        tracing::info!(count = calls.len(), "executing statements");

        if self.is_debug() {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                tracing::info!(sql = call.statement.sql(), "executing statement");
                results.push(call.statement.execute(&call.params).await?);
            }
            Ok(results)
        } else {
            join_all(
                calls
                    .iter()
                    .map(|call| call.statement.execute(&call.params)),
            )
            .await
            .into_iter()
            .collect()
        }
    }

    /// Run `body` inside a transaction on the current connection.
    ///
    /// Commits when `body` succeeds. When `body` or the commit fails, rolls back and returns
    /// the original error; a failed rollback is only logged. Transactions do not nest, and
    /// other callers sharing this manager interleave on the same connection.
    ///
    /// # Errors
    /// [`DriverError::NotConnected`] without a physical connection, the failure to begin, the
    /// error returned by `body`, or the commit failure.
    pub async fn execute_in_transaction<F, Fut, T>(&self, body: F) -> Result<T, DriverError>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = Result<T, DriverError>>,
    {
        tracing::info!("transaction begin");
        let connection = self.connection().ok_or(DriverError::NotConnected)?;

        connection.begin_transaction().await?;
        tracing::info!(connection_id = connection.id(), "transaction started");

        let failure = match body(self.clone()).await {
            Ok(value) => match connection.commit().await {
                Ok(()) => {
                    tracing::info!("transaction committed");
                    return Ok(value);
                }
                Err(err) => {
                    tracing::error!(error = %err, "transaction failed to commit");
                    err
                }
            },
            Err(err) => {
                tracing::error!(error = %err, "transaction failed");
                err
            }
        };

        tracing::error!("rolling back");
        match connection.rollback().await {
            Ok(()) => tracing::error!("rollback complete"),
            Err(err) => tracing::error!(error = %err, "rollback failed"),
        }
        Err(failure)
    }
}
