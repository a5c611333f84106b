//! Recording client for unit tests.
//!
//! Answers the discovery queries with a fixed schema and every other query
//! with a single row `{ "sql": <formatted statement> }`.

use crate::catalog::{COLUMNS_SQL, ROUTINES_SQL};
use crate::client::Client;
use crate::error::{OrmError, OrmResult};
use crate::record::Record;
use crate::statement::Statement;
use crate::transaction::TransactionOptions;
use crate::value::{Map, Value};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Event {
    Sql(String),
    Task(Option<String>),
    Begin(TransactionOptions),
    Commit,
    Rollback,
}

#[derive(Debug, Clone)]
pub(crate) struct MockClient {
    events: Arc<Mutex<Vec<Event>>>,
    fail: bool,
    rows: usize,
}

impl Default for MockClient {
    fn default() -> Self {
        Self {
            events: Arc::default(),
            fail: false,
            rows: 1,
        }
    }
}

impl MockClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every query fails as if the server were unreachable.
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Return `rows` copies of the echo row instead of one.
    pub(crate) fn returning(mut self, rows: usize) -> Self {
        self.rows = rows;
        self
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub(crate) fn statements(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Sql(sql) => Some(sql),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn last_sql(&self) -> Option<String> {
        self.statements().pop()
    }

    fn record(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    fn respond(&self, stmt: &Statement) -> OrmResult<Vec<Record>> {
        if self.fail {
            return Err(OrmError::Connection("Failed to connect".to_string()));
        }
        let sql = stmt.format()?;
        self.record(Event::Sql(sql.clone()));

        if stmt.sql() == COLUMNS_SQL {
            return Ok(column_rows());
        }
        if stmt.sql() == ROUTINES_SQL {
            return Ok(["something_random", "users_self", "users_one_person"]
                .into_iter()
                .map(|name| Record::new(Map::new().with("routine_name", name)))
                .collect());
        }
        let row = Record::new(Map::new().with("sql", sql));
        Ok(vec![row; self.rows])
    }
}

impl Client for MockClient {
    type Scoped = MockClient;

    async fn query(&self, stmt: &Statement) -> OrmResult<Vec<Record>> {
        self.respond(stmt)
    }

    async fn execute(&self, stmt: &Statement) -> OrmResult<u64> {
        self.respond(stmt).map(|rows| rows.len() as u64)
    }

    async fn begin_task(&self, tag: Option<&str>) -> OrmResult<MockClient> {
        self.record(Event::Task(tag.map(str::to_string)));
        Ok(self.clone())
    }

    async fn begin_transaction(&self, options: &TransactionOptions) -> OrmResult<MockClient> {
        self.record(Event::Begin(options.clone()));
        Ok(self.clone())
    }

    async fn commit(&self) -> OrmResult<()> {
        self.record(Event::Commit);
        Ok(())
    }

    async fn rollback(&self) -> OrmResult<()> {
        self.record(Event::Rollback);
        Ok(())
    }
}

fn column(table: &str, name: &str, data_type: &str, default: Option<&str>, nullable: bool) -> Record {
    Record::new(
        Map::new()
            .with("table_name", table)
            .with("column_name", name)
            .with("data_type", data_type)
            .with("column_default", default.map(Value::from).unwrap_or_default())
            .with("is_nullable", if nullable { "YES" } else { "NO" }),
    )
}

fn column_rows() -> Vec<Record> {
    const TZ: &str = "timestamp with time zone";
    vec![
        column("users", "id", "uuid", Some("uuid_generate_v4()"), false),
        column("users", "user_name", "text", None, true),
        column("users", "blob", "jsonb", None, true),
        column("users", "json_blob", "json", None, true),
        column("users", "created", TZ, None, true),
        column("users", "pets", "integer", None, false),
        column("users", "pet_names", "text[]", None, true),
        column("users", "unknown", "something else", None, true),
        column("entries", "created_at", TZ, None, true),
        column("entries", "updated_at", TZ, None, true),
        column("entries", "deleted_at", TZ, None, true),
        column("entries", "id", "integer", None, true),
        column("entries", "value", "text", None, true),
        column("with_underscores", "id", "integer", None, false),
        column("articles", "id", "integer", None, false),
        column("articles", "title", "text", None, true),
        column("articles", "updated", TZ, None, true),
        column("articles", "deleted", TZ, None, true),
    ]
}
