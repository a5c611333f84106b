//! Database facade: schema discovery, table lookup, tasks and transactions.

use crate::builder::{Clock, QueryBuilder};
use crate::catalog::Catalog;
use crate::client::Client;
use crate::config::Config;
use crate::error::{OrmError, OrmResult};
use crate::record::Record;
use crate::routines::RoutineSet;
use crate::scripts::{QueryOutput, ScriptSet};
use crate::statement::{NamedParams, Statement};
use crate::table::Table;
use crate::transaction::{self, TransactionOptions};
use crate::value::Value;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Everything discovered by initialization. Shared by every scoped clone.
#[derive(Debug)]
struct Shared {
    catalog: Catalog,
    scripts: Arc<ScriptSet>,
    routines: Arc<RoutineSet>,
}

type InitState = Result<Arc<Shared>, Arc<OrmError>>;

/// Entry point: discovers the schema once and hands out table accessors.
///
/// ```ignore
/// let pool = PgPool::connect(&database_url)?;
/// let db = Database::connect(pool, Config::default()).await?;
///
/// let users = db.table("users").await?;
/// let active = users
///     .find(Some(&Map::new().with("pets", op::gt(0))), None)
///     .await?;
///
/// db.tx(TransactionOptions::new().tag("rename"), |db| async move {
///     let users = db.table("users").await?;
///     users
///         .update(Some(&Map::new().with("id", 1)), &Map::new().with("user_name", "x"), None)
///         .await
/// })
/// .await?;
/// ```
pub struct Database<C: Client> {
    client: C,
    config: Arc<Config>,
    clock: Clock,
    state: Arc<OnceCell<InitState>>,
}

impl<C: Client> Clone for Database<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            config: self.config.clone(),
            clock: self.clock,
            state: self.state.clone(),
        }
    }
}

impl<C: Client> std::fmt::Debug for Database<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("schema", &self.config.schema)
            .field("initialized", &self.state.initialized())
            .finish_non_exhaustive()
    }
}

impl<C: Client> Database<C> {
    /// Create a facade. Discovery runs on first use.
    pub fn new(client: C, config: Config) -> Self {
        Self {
            client,
            config: Arc::new(config),
            clock: Utc::now,
            state: Arc::new(OnceCell::new()),
        }
    }

    /// Create a facade and run discovery immediately.
    pub async fn connect(client: C, config: Config) -> OrmResult<Self> {
        let db = Self::new(client, config);
        db.init().await?;
        Ok(db)
    }

    /// Replace the clock used for timestamp columns.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run discovery if it has not run yet.
    ///
    /// Concurrent callers share one discovery. A failure is kept and returned
    /// to every later caller.
    pub async fn init(&self) -> OrmResult<()> {
        self.shared().await.map(|_| ())
    }

    async fn shared(&self) -> OrmResult<Arc<Shared>> {
        let state = self
            .state
            .get_or_init(|| async {
                discover(&self.client, &self.config)
                    .await
                    .map(Arc::new)
                    .map_err(|e| {
                        tracing::warn!(target: "muckraker", error = %e, "initialization failed");
                        Arc::new(e)
                    })
            })
            .await;
        state.clone().map_err(OrmError::Init)
    }

    /// The same facade on another client, sharing the discovered schema.
    fn rebind<D: Client>(&self, client: D) -> Database<D> {
        Database {
            client,
            config: self.config.clone(),
            clock: self.clock,
            state: self.state.clone(),
        }
    }

    /// Run raw SQL with named placeholders.
    pub async fn query(&self, sql: &str, params: NamedParams) -> OrmResult<Vec<Record>> {
        self.client.query(&Statement::with_params(sql, params)).await
    }

    /// Accessor for a discovered table.
    pub async fn table(&self, name: &str) -> OrmResult<Table<C>> {
        let shared = self.shared().await?;
        let schema = shared
            .catalog
            .table(name)
            .ok_or_else(|| OrmError::not_found(format!("Unknown table \"{name}\"")))?;
        Ok(Table::from_parts(
            self.client.clone(),
            QueryBuilder::new(schema.clone()).with_clock(self.clock),
            shared.scripts.clone(),
            shared.routines.clone(),
        ))
    }

    /// Names of every discovered table.
    pub async fn tables(&self) -> OrmResult<Vec<String>> {
        let shared = self.shared().await?;
        Ok(shared.catalog.table_names().map(str::to_string).collect())
    }

    /// Run a database-level script.
    pub async fn script(&self, name: &str, params: NamedParams) -> OrmResult<QueryOutput> {
        let shared = self.shared().await?;
        let script = shared
            .scripts
            .get(name)
            .ok_or_else(|| OrmError::not_found(format!("Unknown script \"{name}\"")))?;
        script.run(&self.client, params).await
    }

    /// Call a routine that does not belong to a table.
    pub async fn routine(&self, name: &str, args: Vec<Value>) -> OrmResult<QueryOutput> {
        let shared = self.shared().await?;
        let routine = shared
            .routines
            .get(name)
            .ok_or_else(|| OrmError::not_found(format!("Unknown routine \"{name}\"")))?;
        routine.run(&self.client, args).await
    }

    /// Run `f` on a facade bound to one connection.
    pub async fn task<F, Fut, T>(&self, tag: Option<&str>, f: F) -> OrmResult<T>
    where
        F: FnOnce(Database<C::Scoped>) -> Fut,
        Fut: Future<Output = OrmResult<T>>,
    {
        self.shared().await?;
        let scoped = self.client.begin_task(tag).await?;
        let result = f(self.rebind(scoped.clone())).await;
        let finished = scoped.finish().await;
        let value = result?;
        finished?;
        Ok(value)
    }

    /// Run `f` in a transaction: commit when it returns `Ok`, roll back otherwise.
    pub async fn tx<F, Fut, T>(&self, options: TransactionOptions, f: F) -> OrmResult<T>
    where
        F: FnOnce(Database<C::Scoped>) -> Fut,
        Fut: Future<Output = OrmResult<T>>,
    {
        self.shared().await?;
        let scoped = self.client.begin_transaction(&options).await?;
        let result = f(self.rebind(scoped.clone())).await;
        transaction::finish(&scoped, result).await
    }
}

async fn discover<C: Client>(client: &C, config: &Config) -> OrmResult<Shared> {
    let catalog = Catalog::load(client, config).await?;

    let mut scripts = ScriptSet::load_dir(&config.effective_script_dir())?;
    for script in &config.scripts {
        scripts.insert(script.clone());
    }

    let tables: Vec<&str> = catalog.table_names().collect();
    let routines = RoutineSet::new(catalog.routines(), tables.iter().copied());

    tracing::info!(
        target: "muckraker",
        schema = %config.schema,
        tables = tables.len(),
        routines = routines.len(),
        scripts = scripts.len(),
        "schema discovered"
    );

    Ok(Shared {
        scripts: Arc::new(scripts),
        routines: Arc::new(routines),
        catalog,
    })
}

#[cfg(test)]
mod tests;
