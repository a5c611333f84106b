use super::*;
use crate::config::TimestampNames;
use crate::mock::{Event, MockClient};
use crate::scripts::ScriptDef;
use crate::transaction::TransactionIsolation;
use crate::value::Map;
use std::path::PathBuf;

const USERS_COLUMNS: &str =
    r#""id","user_name","blob","json_blob","created","pets","pet_names","unknown"::text AS "unknown""#;

fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn options() -> Config {
    Config::new().script_dir(fixtures().join("db"))
}

fn mocked() -> (MockClient, Database<MockClient>) {
    let mock = MockClient::new();
    (mock.clone(), Database::new(mock, options()))
}

fn sql(record: &Record) -> &str {
    record.get("sql").and_then(Value::as_str).unwrap()
}

fn discovery_count(mock: &MockClient) -> usize {
    mock.statements()
        .iter()
        .filter(|s| s.contains("information_schema.columns"))
        .count()
}

// ==================== construction ====================

#[tokio::test]
async fn new_defers_discovery() {
    let (mock, db) = mocked();
    assert!(mock.events().is_empty());
    db.init().await.unwrap();
    assert_eq!(discovery_count(&mock), 1);
    assert!(mock.statements()[0].contains("table_schema = 'public'"));
}

#[tokio::test]
async fn connect_discovers_eagerly() {
    let mock = MockClient::new();
    let db = Database::connect(mock.clone(), options()).await.unwrap();
    assert_eq!(discovery_count(&mock), 1);
    assert_eq!(
        db.tables().await.unwrap(),
        vec!["articles", "entries", "users", "with_underscores"]
    );
}

#[tokio::test]
async fn concurrent_callers_share_one_discovery() {
    let (mock, db) = mocked();
    let (a, b, c) = tokio::join!(db.init(), db.table("users"), db.tables());
    a.unwrap();
    b.unwrap();
    c.unwrap();
    db.init().await.unwrap();
    assert_eq!(discovery_count(&mock), 1);
}

#[tokio::test]
async fn discovery_uses_the_configured_schema() {
    let mock = MockClient::new();
    let db = Database::new(mock.clone(), options().schema("app"));
    db.init().await.unwrap();
    assert!(mock.statements()[0].contains("table_schema = 'app'"));
}

#[tokio::test]
async fn connection_failures_are_reported_to_every_caller() {
    let db = Database::new(MockClient::failing(), options());

    let err = db.table("users").await.unwrap_err();
    assert!(err.to_string().contains("Failed to connect"));
    assert!(matches!(err.root_cause(), OrmError::Connection(_)));

    let again = db
        .table("users")
        .await
        .unwrap_err();
    assert!(matches!(again, OrmError::Init(_)));
    assert!(Database::connect(MockClient::failing(), options()).await.is_err());
}

#[tokio::test]
async fn unknown_tables_are_not_found() {
    let (_, db) = mocked();
    let err = db.table("bananas").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().contains(r#"Unknown table "bananas""#));
}

#[tokio::test]
async fn raw_queries_pass_through() {
    let (_, db) = mocked();
    let rows = db
        .query(r#"SELECT * FROM "users""#, NamedParams::new())
        .await
        .unwrap();
    assert_eq!(sql(&rows[0]), r#"SELECT * FROM "users""#);

    let mut params = NamedParams::new();
    params.insert("id", 7);
    let rows = db
        .query(r#"SELECT * FROM "users" WHERE id = $[id]"#, params)
        .await
        .unwrap();
    assert_eq!(sql(&rows[0]), r#"SELECT * FROM "users" WHERE id = 7"#);
}

#[tokio::test]
async fn tables_honor_timestamp_config() {
    let mock = MockClient::new();
    let config = options().timestamps(TimestampNames::new().deleted("deleted"));
    let db = Database::new(mock, config);
    let articles = db.table("articles").await.unwrap();
    assert_eq!(articles.schema().timestamps().deleted.as_deref(), Some("deleted"));
    let entries = db.table("entries").await.unwrap();
    assert_eq!(entries.schema().timestamps().deleted, None);
}

// ==================== scripts ====================

#[tokio::test]
async fn runs_database_scripts() {
    let (mock, db) = mocked();
    let output = db.script("another_thing", NamedParams::new()).await.unwrap();
    let rows = output.into_rows();
    assert_eq!(sql(&rows[0]), r#"SELECT * FROM "users""#);
    assert!(mock.events().contains(&Event::Task(Some("another_thing".to_string()))));

    let output = db.script("row", NamedParams::new()).await.unwrap();
    assert!(matches!(output, QueryOutput::One(ref row) if sql(row) == r#"SELECT * FROM "users""#));
}

#[tokio::test]
async fn runs_table_scripts() {
    let (_, db) = mocked();
    let users = db.table("users").await.unwrap();

    let random = users.script("random", NamedParams::new()).await.unwrap();
    assert!(matches!(random, QueryOutput::Many(ref rows) if rows.len() == 1));

    let leader = users.script("leader", NamedParams::new()).await.unwrap();
    assert!(matches!(leader, QueryOutput::One(_)));

    let feed = users.script("feed", NamedParams::new()).await.unwrap();
    assert_eq!(
        feed.into_first().as_ref().map(sql),
        Some(r#"SELECT * FROM "users""#)
    );

    let underscored = db.table("with_underscores").await.unwrap();
    let row = underscored.script("row", NamedParams::new()).await.unwrap();
    assert!(matches!(row, QueryOutput::One(_)));

    assert!(users.script("row", NamedParams::new()).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn transactional_scripts_open_tagged_transactions() {
    let (mock, db) = mocked();
    let users = db.table("users").await.unwrap();

    users.script("simple_transaction", NamedParams::new()).await.unwrap();
    users.script("complex_transaction", NamedParams::new()).await.unwrap();

    let begins: Vec<TransactionOptions> = mock
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::Begin(options) => Some(options),
            _ => None,
        })
        .collect();
    assert_eq!(begins.len(), 2);
    assert_eq!(begins[0].get_tag(), Some("simple_transaction"));
    assert_eq!(begins[0].get_isolation_level(), None);
    assert_eq!(begins[1].get_tag(), Some("something-complex"));
    assert_eq!(
        begins[1].get_isolation_level(),
        Some(TransactionIsolation::Serializable)
    );
    assert_eq!(begins[1].get_read_only(), Some(true));
    assert_eq!(begins[1].get_deferrable(), Some(true));

    let commits = mock.events().iter().filter(|e| **e == Event::Commit).count();
    assert_eq!(commits, 2);
}

#[tokio::test]
async fn missing_script_directory_is_not_an_error() {
    for dir in [
        PathBuf::from("/some/file/that/definitely/does/not/exist"),
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml"),
    ] {
        let db = Database::new(MockClient::new(), Config::new().script_dir(dir));
        db.init().await.unwrap();
        assert!(db.script("another_thing", NamedParams::new()).await.is_err());
    }
}

#[tokio::test]
async fn malformed_scripts_fail_initialization() {
    for dir in ["bad_returns", "bad_isolation"] {
        let db = Database::new(MockClient::new(), Config::new().script_dir(fixtures().join(dir)));
        let err = db.init().await.unwrap_err();
        assert!(matches!(err.root_cause(), OrmError::Script(_)), "{dir}: {err}");
        assert!(db.table("users").await.is_err());
    }
}

#[tokio::test]
async fn scripts_can_be_registered_in_code() {
    let mock = MockClient::new();
    let config = options()
        .script(ScriptDef::new("count_users", "SELECT count(*) FROM \"users\" WHERE pets > $[pets]"))
        .script(ScriptDef::new("by_name", "SELECT * FROM $[_table~] WHERE user_name = $[name]").table("users"));
    let db = Database::new(mock, config);

    let mut params = NamedParams::new();
    params.insert("pets", 2);
    let output = db.script("count_users", params).await.unwrap();
    assert_eq!(
        output.into_first().as_ref().map(sql),
        Some(r#"SELECT count(*) FROM "users" WHERE pets > 2"#)
    );

    let users = db.table("users").await.unwrap();
    let mut params = NamedParams::new();
    params.insert("name", "o'hara");
    let output = users.script("by_name", params).await.unwrap();
    assert_eq!(
        output.into_first().as_ref().map(sql),
        Some(r#"SELECT * FROM "users" WHERE user_name = 'o''hara'"#)
    );
}

// ==================== routines ====================

#[tokio::test]
async fn calls_routines() {
    let (_, db) = mocked();
    let output = db.routine("something_random", vec![]).await.unwrap();
    assert_eq!(
        output.into_first().as_ref().map(sql),
        Some(r#"SELECT * FROM "something_random"()"#)
    );

    let users = db.table("users").await.unwrap();
    let output = users.routine("self", vec![Value::from(1)]).await.unwrap();
    assert!(matches!(output, QueryOutput::Many(ref rows) if sql(&rows[0]) == r#"SELECT * FROM "users_self"(1)"#));

    let output = users.routine("person", vec![Value::from("x")]).await.unwrap();
    assert!(matches!(output, QueryOutput::One(ref row) if sql(row) == r#"SELECT * FROM "users_one_person"('x')"#));

    assert!(db.routine("users_self", vec![]).await.unwrap_err().is_not_found());
}

// ==================== tasks and transactions ====================

#[tokio::test]
async fn runs_a_transaction() {
    let (mock, db) = mocked();
    db.init().await.unwrap();

    let rows = db
        .tx(TransactionOptions::new(), |d| async move {
            d.query(r#"SELECT * FROM "users""#, NamedParams::new()).await
        })
        .await
        .unwrap();
    assert_eq!(sql(&rows[0]), r#"SELECT * FROM "users""#);

    let events = mock.events();
    let tail = &events[events.len() - 3..];
    assert_eq!(tail[0], Event::Begin(TransactionOptions::new()));
    assert_eq!(tail[1], Event::Sql(r#"SELECT * FROM "users""#.to_string()));
    assert_eq!(tail[2], Event::Commit);
}

#[tokio::test]
async fn transaction_options_reach_the_client() {
    let (mock, db) = mocked();
    let opts = TransactionOptions::new()
        .tag("test")
        .isolation_level(TransactionIsolation::RepeatableRead);
    db.tx(opts.clone(), |_| async { Ok(()) }).await.unwrap();
    assert!(mock.events().contains(&Event::Begin(opts)));
}

#[tokio::test]
async fn failed_transactions_roll_back() {
    let (mock, db) = mocked();
    let err = db
        .tx(TransactionOptions::new(), |d| async move {
            let users = d.table("users").await?;
            users.destroy(None, Default::default()).await?;
            Err::<(), _>(OrmError::validation("boom"))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::Validation(ref m) if m == "boom"));

    let events = mock.events();
    assert_eq!(events.last(), Some(&Event::Rollback));
    assert!(!events.contains(&Event::Commit));
    assert_eq!(mock.last_sql().unwrap(), r#"DELETE FROM "users""#);
}

#[tokio::test]
async fn tables_inside_a_transaction_use_the_scoped_client() {
    let (mock, db) = mocked();
    db.tx(TransactionOptions::new(), |d| async move {
        let users = d.table("users").await?;
        users.find(Some(&Map::new().with("id", 0)), None).await?;
        Ok(())
    })
    .await
    .unwrap();

    let events = mock.events();
    let n = events.len();
    assert_eq!(
        events[n - 2],
        Event::Sql(format!(r#"SELECT {USERS_COLUMNS} FROM "users" WHERE "id" = 0"#))
    );
    assert_eq!(events[n - 1], Event::Commit);
    assert_eq!(discovery_count(&mock), 1);
}

#[tokio::test]
async fn nested_transactions() {
    let (mock, db) = mocked();
    db.tx(TransactionOptions::new().tag("outer"), |d| async move {
        d.tx(TransactionOptions::new().tag("inner"), |_| async { Ok(()) })
            .await
    })
    .await
    .unwrap();

    let events: Vec<_> = mock
        .events()
        .into_iter()
        .filter(|e| !matches!(e, Event::Sql(_)))
        .collect();
    assert_eq!(
        events,
        vec![
            Event::Begin(TransactionOptions::new().tag("outer")),
            Event::Begin(TransactionOptions::new().tag("inner")),
            Event::Commit,
            Event::Commit,
        ]
    );
}

#[tokio::test]
async fn runs_tasks() {
    let (mock, db) = mocked();
    let rows = db
        .task(Some("some-tag"), |d| async move {
            d.query(r#"SELECT * FROM "users""#, NamedParams::new()).await
        })
        .await
        .unwrap();
    assert_eq!(sql(&rows[0]), r#"SELECT * FROM "users""#);
    assert!(mock.events().contains(&Event::Task(Some("some-tag".to_string()))));

    db.task(None, |_| async { Ok(()) }).await.unwrap();
    assert!(mock.events().contains(&Event::Task(None)));
}

#[tokio::test]
async fn task_and_tx_wait_for_discovery() {
    let db = Database::new(MockClient::failing(), options());
    let ran = db.task(None, |_| async { Ok(true) }).await;
    assert!(ran.is_err());
    let ran = db.tx(TransactionOptions::new(), |_| async { Ok(true) }).await;
    assert!(ran.is_err());
}
