//! Client trait for unified database access.

use crate::error::{OrmError, OrmResult};
use crate::record::Record;
use crate::statement::Statement;
use crate::transaction::TransactionOptions;
use std::future::Future;

/// A handle that executes statements.
///
/// Implemented by the connection pool, by single connections, and by scoped
/// handles for tasks and transactions, so table accessors work unchanged
/// inside or outside a transaction.
pub trait Client: Clone + Send + Sync + 'static {
    /// Handle type for a task or transaction opened on this client.
    type Scoped: Client;

    /// Execute a statement and return all rows.
    fn query(&self, stmt: &Statement) -> impl Future<Output = OrmResult<Vec<Record>>> + Send;

    /// Execute a statement and return the number of affected rows.
    fn execute(&self, stmt: &Statement) -> impl Future<Output = OrmResult<u64>> + Send;

    /// Execute a statement and require that it returns **exactly one** row.
    ///
    /// Semantics:
    /// - 0 rows: returns [`OrmError::NotFound`]
    /// - 1 row: returns that row
    /// - multiple rows: returns [`OrmError::TooManyRows`]
    fn query_one(&self, stmt: &Statement) -> impl Future<Output = OrmResult<Record>> + Send {
        async move {
            let mut rows = self.query(stmt).await?;
            match rows.len() {
                1 => rows
                    .pop()
                    .ok_or_else(|| OrmError::not_found("Expected 1 row, got 0")),
                0 => Err(OrmError::not_found("Expected 1 row, got 0")),
                got => Err(OrmError::too_many_rows(1, got)),
            }
        }
    }

    /// Execute a statement that returns at most one row.
    ///
    /// Semantics:
    /// - 0 rows: returns `Ok(None)`
    /// - 1 row: returns `Ok(Some(row))`
    /// - multiple rows: returns [`OrmError::TooManyRows`]
    fn query_opt(
        &self,
        stmt: &Statement,
    ) -> impl Future<Output = OrmResult<Option<Record>>> + Send {
        async move {
            let mut rows = self.query(stmt).await?;
            match rows.len() {
                0 | 1 => Ok(rows.pop()),
                got => Err(OrmError::too_many_rows(1, got)),
            }
        }
    }

    /// Open a task: a scope in which every statement runs on one connection.
    fn begin_task(
        &self,
        tag: Option<&str>,
    ) -> impl Future<Output = OrmResult<Self::Scoped>> + Send;

    /// Open a transaction. Calling this on a handle that is already inside a
    /// transaction opens a savepoint instead.
    fn begin_transaction(
        &self,
        options: &TransactionOptions,
    ) -> impl Future<Output = OrmResult<Self::Scoped>> + Send;

    /// Commit the transaction this handle was opened for.
    fn commit(&self) -> impl Future<Output = OrmResult<()>> + Send;

    /// Roll back the transaction this handle was opened for.
    fn rollback(&self) -> impl Future<Output = OrmResult<()>> + Send;

    /// End a task. The default implementation does nothing.
    fn finish(&self) -> impl Future<Output = OrmResult<()>> + Send {
        async { Ok(()) }
    }
}
