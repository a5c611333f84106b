//! Postgres-backed clients built on `tokio-postgres`.

#[cfg(feature = "pool")]
mod pool;
mod types;

#[cfg(feature = "pool")]
pub use pool::PgPool;

use crate::client::Client;
use crate::error::{OrmError, OrmResult};
use crate::format::quote_ident;
use crate::log;
use crate::record::Record;
use crate::statement::Statement;
use crate::transaction::{TransactionOptions, next_savepoint_name};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio_postgres::NoTls;
use tokio_postgres::types::ToSql;

enum Conn {
    Direct(tokio_postgres::Client),
    #[cfg(feature = "pool")]
    Pooled(deadpool_postgres::Object),
}

/// The server session behind every clone of a [`PgConnection`].
struct Session {
    conn: Option<Conn>,
    transaction_open: bool,
}

impl Session {
    fn new(conn: Conn) -> Self {
        Self {
            conn: Some(conn),
            transaction_open: false,
        }
    }

    fn client(&self) -> OrmResult<&tokio_postgres::Client> {
        match &self.conn {
            Some(Conn::Direct(client)) => Ok(client),
            #[cfg(feature = "pool")]
            Some(Conn::Pooled(object)) => {
                let client: &tokio_postgres::Client = object;
                Ok(client)
            }
            None => Err(OrmError::Connection("connection already released".to_string())),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.transaction_open {
            return;
        }
        // A pooled connection must not be recycled while a transaction is open on it.
        #[cfg(feature = "pool")]
        if let Some(Conn::Pooled(object)) = self.conn.take() {
            tracing::warn!(
                target: "muckraker",
                "discarding pooled connection with an unfinished transaction"
            );
            drop(deadpool_postgres::Object::take(object));
        }
    }
}

/// Held by every handle of one top-level transaction.
///
/// When the last handle goes away before `COMMIT` or `ROLLBACK` (a panic in
/// the transaction body, or a dropped future), the transaction is rolled back
/// on a background task.
struct TransactionGuard {
    session: Arc<Mutex<Session>>,
    finished: AtomicBool,
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        if *self.finished.get_mut() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let session = Arc::clone(&self.session);
        runtime.spawn(async move {
            let mut session = session.lock().await;
            if !session.transaction_open {
                return;
            }
            tracing::warn!(
                target: "muckraker",
                "rolling back a transaction that was dropped before it finished"
            );
            let rolled_back = match session.client() {
                Ok(client) => client.batch_execute("ROLLBACK").await.is_ok(),
                Err(_) => false,
            };
            if rolled_back {
                session.transaction_open = false;
            }
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Scope {
    Session,
    Task,
    Transaction { savepoint: Option<String> },
}

/// A single database session.
///
/// Clones share the session. Statements are serialized through a mutex, so a
/// transaction opened on a `PgConnection` covers every statement sent through
/// any clone until it finishes. Only one top-level transaction can be open on
/// a session at a time; nest further transactions through the handle that
/// opened it.
#[derive(Clone)]
pub struct PgConnection {
    session: Arc<Mutex<Session>>,
    scope: Scope,
    tag: Option<Arc<str>>,
    transaction: Option<Arc<TransactionGuard>>,
}

impl std::fmt::Debug for PgConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnection")
            .field("scope", &self.scope)
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

impl PgConnection {
    /// Wrap an already-connected client.
    pub fn new(client: tokio_postgres::Client) -> Self {
        Self::from_conn(Conn::Direct(client))
    }

    /// Connect without TLS and drive the connection on a background task.
    pub async fn connect(database_url: &str) -> OrmResult<Self> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| OrmError::Connection(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(target: "muckraker", error = %e, "connection closed with error");
            }
        });
        Ok(Self::new(client))
    }

    #[cfg(feature = "pool")]
    pub(crate) fn pooled(object: deadpool_postgres::Object) -> Self {
        Self::from_conn(Conn::Pooled(object))
    }

    fn from_conn(conn: Conn) -> Self {
        Self {
            session: Arc::new(Mutex::new(Session::new(conn))),
            scope: Scope::Session,
            tag: None,
            transaction: None,
        }
    }

    fn scoped(&self, scope: Scope, tag: Option<&str>) -> Self {
        Self {
            session: Arc::clone(&self.session),
            scope,
            tag: tag.map(Arc::from).or_else(|| self.tag.clone()),
            transaction: self.transaction.clone(),
        }
    }

    /// Whether this handle was opened for a transaction or savepoint.
    pub fn in_transaction(&self) -> bool {
        matches!(self.scope, Scope::Transaction { .. })
    }

    fn log_tag<'a>(&'a self, stmt: &'a Statement) -> Option<&'a str> {
        stmt.tag().or(self.tag.as_deref())
    }

    async fn batch(&self, sql: &str) -> OrmResult<()> {
        log::statement(self.tag.as_deref(), sql, 0);
        let session = self.session.lock().await;
        session
            .client()?
            .batch_execute(sql)
            .await
            .map_err(OrmError::from_db_error)
    }

    async fn begin_top_level(&self, options: &TransactionOptions) -> OrmResult<PgConnection> {
        let mut scoped = self.scoped(Scope::Transaction { savepoint: None }, options.get_tag());
        let sql = options.begin_sql();
        log::statement(scoped.tag.as_deref(), &sql, 0);

        let mut session = self.session.lock().await;
        if session.transaction_open {
            return Err(OrmError::Other(
                "a transaction is already open on this connection; nest it through the handle that opened it"
                    .to_string(),
            ));
        }
        session
            .client()?
            .batch_execute(&sql)
            .await
            .map_err(OrmError::from_db_error)?;
        session.transaction_open = true;

        scoped.transaction = Some(Arc::new(TransactionGuard {
            session: Arc::clone(&self.session),
            finished: AtomicBool::new(false),
        }));
        Ok(scoped)
    }

    /// `COMMIT` or `ROLLBACK` the top-level transaction. The session is free
    /// for a new transaction afterwards even if the statement failed.
    async fn end_top_level(&self, sql: &str) -> OrmResult<()> {
        log::statement(self.tag.as_deref(), sql, 0);
        let mut session = self.session.lock().await;
        let result = match session.client() {
            Ok(client) => client.batch_execute(sql).await.map_err(OrmError::from_db_error),
            Err(e) => Err(e),
        };
        session.transaction_open = false;
        if let Some(guard) = &self.transaction {
            guard.finished.store(true, Ordering::Release);
        }
        result
    }
}

impl Client for PgConnection {
    type Scoped = PgConnection;

    async fn query(&self, stmt: &Statement) -> OrmResult<Vec<Record>> {
        let (sql, values) = stmt.to_positional()?;
        log::statement(self.log_tag(stmt), &sql, values.len());
        let params: Vec<&(dyn ToSql + Sync)> =
            values.iter().map(|v| v as &(dyn ToSql + Sync)).collect();

        let session = self.session.lock().await;
        let rows = session
            .client()?
            .query(sql.as_str(), &params)
            .await
            .map_err(OrmError::from_db_error)?;
        rows.iter().map(types::decode_row).collect()
    }

    async fn execute(&self, stmt: &Statement) -> OrmResult<u64> {
        let (sql, values) = stmt.to_positional()?;
        log::statement(self.log_tag(stmt), &sql, values.len());
        let params: Vec<&(dyn ToSql + Sync)> =
            values.iter().map(|v| v as &(dyn ToSql + Sync)).collect();

        let session = self.session.lock().await;
        session
            .client()?
            .execute(sql.as_str(), &params)
            .await
            .map_err(OrmError::from_db_error)
    }

    async fn begin_task(&self, tag: Option<&str>) -> OrmResult<PgConnection> {
        let scope = match self.scope {
            Scope::Session => Scope::Task,
            ref other => other.clone(),
        };
        Ok(self.scoped(scope, tag))
    }

    async fn begin_transaction(&self, options: &TransactionOptions) -> OrmResult<PgConnection> {
        let scoped = if self.in_transaction() {
            let name = next_savepoint_name();
            let scoped = self.scoped(
                Scope::Transaction {
                    savepoint: Some(name.clone()),
                },
                options.get_tag(),
            );
            scoped.batch(&format!("SAVEPOINT {}", quote_ident(&name))).await?;
            scoped
        } else {
            self.begin_top_level(options).await?
        };
        Ok(scoped)
    }

    async fn commit(&self) -> OrmResult<()> {
        match &self.scope {
            Scope::Transaction { savepoint: None } => self.end_top_level("COMMIT").await,
            Scope::Transaction {
                savepoint: Some(name),
            } => {
                self.batch(&format!("RELEASE SAVEPOINT {}", quote_ident(name)))
                    .await
            }
            _ => Err(OrmError::Other(
                "commit called outside of a transaction".to_string(),
            )),
        }
    }

    async fn rollback(&self) -> OrmResult<()> {
        match &self.scope {
            Scope::Transaction { savepoint: None } => self.end_top_level("ROLLBACK").await,
            Scope::Transaction {
                savepoint: Some(name),
            } => {
                self.batch(&format!("ROLLBACK TO SAVEPOINT {}", quote_ident(name)))
                    .await
            }
            _ => Err(OrmError::Other(
                "rollback called outside of a transaction".to_string(),
            )),
        }
    }
}
