use muckraker::{
    Client, Config, Database, DestroyOptions, Map, NamedParams, OrmError, OrmResult,
    PgConnection, PgPool, Statement, TransactionOptions,
};
use std::time::{SystemTime, UNIX_EPOCH};

fn database_url(test: &str) -> Option<String> {
    let _ = dotenvy::dotenv();
    match std::env::var("DATABASE_URL") {
        Ok(v) => Some(v),
        Err(_) => {
            eprintln!("DATABASE_URL is not set; skipping {test}");
            None
        }
    }
}

fn unique_table() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before UNIX_EPOCH")
        .as_nanos();
    format!("muckraker_live_{}_{}", std::process::id(), nanos)
}

#[tokio::test]
async fn crud_roundtrip_against_postgres() -> OrmResult<()> {
    let Some(database_url) = database_url("crud_roundtrip_against_postgres") else {
        return Ok(());
    };

    let pool = PgPool::connect(&database_url)?;
    let config = Config::new().script_dir(std::env::temp_dir().join("muckraker-no-scripts"));
    let db = Database::new(pool, config);

    let table = unique_table();
    db.query(
        &format!(
            "CREATE TABLE \"{table}\" (\
             id serial PRIMARY KEY, \
             body text NOT NULL, \
             meta jsonb, \
             created_at timestamptz, \
             updated_at timestamptz, \
             deleted_at timestamptz)"
        ),
        NamedParams::new(),
    )
    .await?;

    let result = exercise(&db, &table).await;

    let mut params = NamedParams::new();
    params.insert("name", table.as_str());
    db.query("DROP TABLE IF EXISTS $[name~]", params).await?;

    result
}

async fn exercise(db: &Database<PgPool>, table: &str) -> OrmResult<()> {
    assert!(db.tables().await?.iter().any(|t| t == table));
    let notes = db.table(table).await?;

    let inserted = notes
        .insert(
            &Map::new()
                .with("body", "first")
                .with("meta", Map::new().with("plan", "pro")),
            None,
        )
        .await?;
    let id = inserted.try_get("id")?.clone();
    assert!(!inserted.try_get("created_at")?.is_null());

    let found = notes
        .find(
            Some(&Map::new().with("meta", Map::new().with("plan", "pro"))),
            None,
        )
        .await?;
    assert_eq!(found.len(), 1);

    let updated = notes
        .update_one(
            Some(&Map::new().with("id", id.clone())),
            &Map::new().with("body", "second"),
            None,
        )
        .await?
        .ok_or_else(|| OrmError::not_found("updated row"))?;
    assert_eq!(updated.get("body").and_then(|v| v.as_str()), Some("second"));
    assert!(!updated.try_get("updated_at")?.is_null());

    let rolled_back = db
        .tx(TransactionOptions::new().tag("abort"), |scoped| {
            let table = table.to_string();
            async move {
                let notes = scoped.table(&table).await?;
                notes.insert(&Map::new().with("body", "ghost"), None).await?;
                Err::<(), _>(OrmError::validation("abort"))
            }
        })
        .await;
    assert!(matches!(rolled_back, Err(OrmError::Validation(_))));
    assert_eq!(notes.find(None, None).await?.len(), 1);

    let soft = notes
        .destroy(Some(&Map::new().with("id", id.clone())), DestroyOptions::default())
        .await?;
    assert_eq!(soft, 1);
    assert!(notes.find_one(Some(&Map::new().with("id", id.clone())), None).await?.is_none());

    let hard = notes
        .destroy(Some(&Map::new().with("id", id)), DestroyOptions::force())
        .await?;
    assert_eq!(hard, 1);
    Ok(())
}

#[tokio::test]
async fn one_top_level_transaction_per_connection() -> OrmResult<()> {
    let Some(database_url) = database_url("one_top_level_transaction_per_connection") else {
        return Ok(());
    };

    let conn = PgConnection::connect(&database_url).await?;
    let options = TransactionOptions::new();
    let first = conn.begin_transaction(&options).await?;

    let second = conn.begin_transaction(&options).await;
    assert!(matches!(second, Err(OrmError::Other(_))));

    // nesting through the open handle still works
    let nested = first.begin_transaction(&options).await?;
    nested.rollback().await?;
    first.rollback().await?;

    let again = conn.begin_transaction(&options).await?;
    again.commit().await?;
    Ok(())
}

#[tokio::test]
async fn dropped_transaction_does_not_leak_into_the_pool() -> OrmResult<()> {
    let Some(database_url) = database_url("dropped_transaction_does_not_leak_into_the_pool") else {
        return Ok(());
    };

    let pool = PgPool::connect_with_max_size(&database_url, 1)?;
    let tx = pool.begin_transaction(&TransactionOptions::new()).await?;
    tx.query(&Statement::new("SELECT 1")).await?;
    drop(tx);

    // the only connection comes back outside any transaction
    let rows = pool
        .query(&Statement::new("SELECT now() = statement_timestamp() AS fresh"))
        .await?;
    assert_eq!(rows[0].get("fresh").and_then(|v| v.as_bool()), Some(true));
    Ok(())
}
