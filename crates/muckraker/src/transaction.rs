//! Transaction options and commit/rollback handling.

use crate::client::Client;
use crate::error::{OrmError, OrmResult};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global counter for savepoint naming.
static SAVEPOINT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique savepoint name for a nested transaction.
pub(crate) fn next_savepoint_name() -> String {
    let n = SAVEPOINT_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("muckraker_sp_{n}")
}

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum TransactionIsolation {
    Serializable,
    RepeatableRead,
    ReadCommitted,
    ReadUncommitted,
}

impl TransactionIsolation {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Serializable => "SERIALIZABLE",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::ReadCommitted => "READ COMMITTED",
            Self::ReadUncommitted => "READ UNCOMMITTED",
        }
    }
}

impl fmt::Display for TransactionIsolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for TransactionIsolation {
    type Err = OrmError;

    /// Accepts `serializable`, `repeatableRead`, `repeatable_read`,
    /// `REPEATABLE READ` and similar spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "serializable" => Ok(Self::Serializable),
            "repeatableread" => Ok(Self::RepeatableRead),
            "readcommitted" => Ok(Self::ReadCommitted),
            "readuncommitted" => Ok(Self::ReadUncommitted),
            _ => Err(OrmError::validation(format!(
                "invalid transaction isolation level \"{s}\""
            ))),
        }
    }
}

impl TryFrom<String> for TransactionIsolation {
    type Error = OrmError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Options for opening a transaction.
///
/// ```ignore
/// let opts = TransactionOptions::new()
///     .tag("transfer")
///     .isolation_level(TransactionIsolation::Serializable)
///     .read_only(true);
/// db.tx(opts, |db| async move { /* ... */ Ok(()) }).await?;
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    tag: Option<String>,
    isolation: Option<TransactionIsolation>,
    read_only: Option<bool>,
    deferrable: Option<bool>,
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag used in logs for statements run inside the transaction.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn isolation_level(mut self, isolation: TransactionIsolation) -> Self {
        self.isolation = Some(isolation);
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = Some(read_only);
        self
    }

    pub fn deferrable(mut self, deferrable: bool) -> Self {
        self.deferrable = Some(deferrable);
        self
    }

    pub fn get_tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn get_isolation_level(&self) -> Option<TransactionIsolation> {
        self.isolation
    }

    pub fn get_read_only(&self) -> Option<bool> {
        self.read_only
    }

    pub fn get_deferrable(&self) -> Option<bool> {
        self.deferrable
    }

    /// The `BEGIN` statement for these options.
    pub fn begin_sql(&self) -> String {
        let mut sql = String::from("BEGIN");
        if let Some(isolation) = self.isolation {
            sql.push_str(" ISOLATION LEVEL ");
            sql.push_str(isolation.as_sql());
        }
        match self.read_only {
            Some(true) => sql.push_str(" READ ONLY"),
            Some(false) => sql.push_str(" READ WRITE"),
            None => {}
        }
        match self.deferrable {
            Some(true) => sql.push_str(" DEFERRABLE"),
            Some(false) => sql.push_str(" NOT DEFERRABLE"),
            None => {}
        }
        sql
    }
}

/// Commit on `Ok`, roll back on `Err`.
///
/// A failed rollback is folded into the returned error.
pub(crate) async fn finish<C: Client, T>(client: &C, result: OrmResult<T>) -> OrmResult<T> {
    match result {
        Ok(value) => {
            client.commit().await?;
            Ok(value)
        }
        Err(error) => match client.rollback().await {
            Ok(()) => Err(error),
            Err(rollback_err) => {
                tracing::warn!(
                    target: "muckraker",
                    error = %rollback_err,
                    "rollback failed"
                );
                Err(OrmError::Other(format!(
                    "{error} (rollback failed: {rollback_err})"
                )))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_isolation_spellings() {
        for s in ["serializable", "SERIALIZABLE"] {
            assert_eq!(s.parse::<TransactionIsolation>().unwrap(), TransactionIsolation::Serializable);
        }
        for s in ["repeatableRead", "repeatable_read", "REPEATABLE READ"] {
            assert_eq!(
                s.parse::<TransactionIsolation>().unwrap(),
                TransactionIsolation::RepeatableRead
            );
        }
        assert_eq!(
            "readCommitted".parse::<TransactionIsolation>().unwrap(),
            TransactionIsolation::ReadCommitted
        );
        assert!("chaos".parse::<TransactionIsolation>().is_err());
    }

    #[test]
    fn begin_sql_includes_modes() {
        assert_eq!(TransactionOptions::new().begin_sql(), "BEGIN");
        let opts = TransactionOptions::new()
            .isolation_level(TransactionIsolation::Serializable)
            .read_only(true)
            .deferrable(true);
        assert_eq!(
            opts.begin_sql(),
            "BEGIN ISOLATION LEVEL SERIALIZABLE READ ONLY DEFERRABLE"
        );
    }

    #[test]
    fn savepoint_names_are_unique() {
        let a = next_savepoint_name();
        let b = next_savepoint_name();
        assert_ne!(a, b);
        assert!(a.starts_with("muckraker_sp_"));
    }
}
