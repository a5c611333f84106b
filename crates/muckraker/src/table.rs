//! Per-table CRUD built from filter and data objects.
//!
//! ```ignore
//! let users = db.table("users").await?;
//! let rows = users
//!     .find(Some(&Map::new().with("pets", op::gt(1))), None)
//!     .await?;
//! ```

use crate::builder::{ColumnRef, INPUT_PREFIX, QueryBuilder};
use crate::catalog::TableSchema;
use crate::client::Client;
use crate::error::{OrmError, OrmResult};
use crate::format::quote_ident;
use crate::record::Record;
use crate::routines::RoutineSet;
use crate::scripts::{QueryOutput, ScriptSet};
use crate::statement::{NamedParams, Statement, TABLE_PARAM};
use crate::value::{Data, Filter, Value};
use std::sync::Arc;

/// Options for [`Table::destroy`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DestroyOptions {
    /// Physically delete rows even when the table has a deleted column.
    pub force: bool,
}

impl DestroyOptions {
    pub fn force() -> Self {
        Self { force: true }
    }
}

/// Accessor for one table, bound to a client.
#[derive(Clone)]
pub struct Table<C: Client> {
    client: C,
    builder: QueryBuilder,
    scripts: Arc<ScriptSet>,
    routines: Arc<RoutineSet>,
}

impl<C: Client> std::fmt::Debug for Table<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

impl<C: Client> Table<C> {
    /// An accessor with no scripts or routines attached.
    pub fn new(client: C, schema: Arc<TableSchema>) -> Self {
        Self::from_parts(
            client,
            QueryBuilder::new(schema),
            Arc::default(),
            Arc::default(),
        )
    }

    pub(crate) fn from_parts(
        client: C,
        builder: QueryBuilder,
        scripts: Arc<ScriptSet>,
        routines: Arc<RoutineSet>,
    ) -> Self {
        Self {
            client,
            builder,
            scripts,
            routines,
        }
    }

    /// The same table bound to another client.
    pub fn rebind<D: Client>(&self, client: D) -> Table<D> {
        Table::from_parts(
            client,
            self.builder.clone(),
            self.scripts.clone(),
            self.routines.clone(),
        )
    }

    pub fn name(&self) -> &str {
        self.builder.schema().name()
    }

    pub fn schema(&self) -> &TableSchema {
        self.builder.schema()
    }

    pub fn builder(&self) -> &QueryBuilder {
        &self.builder
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    fn projection(&self, columns: Option<&[ColumnRef]>) -> OrmResult<String> {
        let names = self.builder.column_names(columns);
        if names.is_empty() {
            return Err(OrmError::validation(format!(
                "no valid columns selected from \"{}\"",
                self.name()
            )));
        }
        Ok(names.join(","))
    }

    fn statement(&self, op: &str, sql: String, params: NamedParams) -> Statement {
        Statement::with_params(sql, params).tagged(format!("{}.{op}", self.name()))
    }

    // ==================== Statements ====================

    pub fn select_statement(
        &self,
        filter: Option<&Filter>,
        columns: Option<&[ColumnRef]>,
    ) -> OrmResult<Statement> {
        let projection = self.projection(columns)?;
        let clause = self.builder.generate_where(filter, false, false);
        let sql = format!("SELECT {projection} FROM $[_table~]{}", clause.to_sql());
        Ok(self.statement("find", sql, clause.params))
    }

    /// A table with nothing to insert falls back to `DEFAULT VALUES`.
    pub fn insert_statement(
        &self,
        data: &Data,
        columns: Option<&[ColumnRef]>,
    ) -> OrmResult<Statement> {
        let projection = self.projection(columns)?;
        let input = self.builder.parse_input(data, false, false);
        let sql = if input.is_empty() {
            format!("INSERT INTO $[_table~] DEFAULT VALUES RETURNING {projection}")
        } else {
            format!(
                "INSERT INTO $[_table~] ({}) VALUES ({}) RETURNING {projection}",
                input.columns.join(","),
                input.values.join(",")
            )
        };
        Ok(self.statement("insert", sql, input.params))
    }

    /// WHERE parameters are prefixed `_query_` and SET parameters `_input_`.
    pub fn update_statement(
        &self,
        filter: Option<&Filter>,
        data: &Data,
        columns: Option<&[ColumnRef]>,
    ) -> OrmResult<Statement> {
        let projection = self.projection(columns)?;
        let clause = self.builder.generate_where(filter, true, false);
        let input = self.builder.parse_input(data, true, true);
        if input.is_empty() {
            return Err(OrmError::validation(format!(
                "update on \"{}\" has no valid columns to set",
                self.name()
            )));
        }

        let sql = format!(
            "UPDATE $[_table~] SET {}{} RETURNING {projection}",
            input.assignments(),
            clause.to_sql()
        );
        let mut params = clause.params;
        params.extend(input.params);
        Ok(self.statement("update", sql, params))
    }

    /// A soft delete when the table has a deleted column, otherwise `DELETE`.
    ///
    /// The implicit deleted-column condition is never applied here.
    pub fn destroy_statement(
        &self,
        filter: Option<&Filter>,
        options: DestroyOptions,
    ) -> OrmResult<Statement> {
        let deleted = self
            .schema()
            .timestamps()
            .deleted
            .as_deref()
            .filter(|_| !options.force);

        let stmt = match deleted {
            Some(deleted) => {
                let clause = self.builder.generate_where(filter, true, true);
                let name = format!("{INPUT_PREFIX}{deleted}");
                let sql = format!(
                    "UPDATE $[_table~] SET {} = $[{name}]{}",
                    quote_ident(deleted),
                    clause.to_sql()
                );
                let mut params = clause.params;
                params.insert(name, self.builder.now());
                self.statement("destroy", sql, params)
            }
            None => {
                let clause = self.builder.generate_where(filter, false, true);
                let sql = format!("DELETE FROM $[_table~]{}", clause.to_sql());
                self.statement("destroy", sql, clause.params)
            }
        };
        Ok(stmt)
    }

    // ==================== Operations ====================

    pub async fn find(
        &self,
        filter: Option<&Filter>,
        columns: Option<&[ColumnRef]>,
    ) -> OrmResult<Vec<Record>> {
        let stmt = self.select_statement(filter, columns)?;
        self.client.query(&stmt).await
    }

    /// At most one row; more than one is an error.
    pub async fn find_one(
        &self,
        filter: Option<&Filter>,
        columns: Option<&[ColumnRef]>,
    ) -> OrmResult<Option<Record>> {
        let stmt = self.select_statement(filter, columns)?;
        self.client.query_opt(&stmt).await
    }

    /// Insert one row and return it.
    pub async fn insert(&self, data: &Data, columns: Option<&[ColumnRef]>) -> OrmResult<Record> {
        let stmt = self.insert_statement(data, columns)?;
        self.client.query_one(&stmt).await
    }

    pub async fn update(
        &self,
        filter: Option<&Filter>,
        data: &Data,
        columns: Option<&[ColumnRef]>,
    ) -> OrmResult<Vec<Record>> {
        let stmt = self.update_statement(filter, data, columns)?;
        self.client.query(&stmt).await
    }

    pub async fn update_one(
        &self,
        filter: Option<&Filter>,
        data: &Data,
        columns: Option<&[ColumnRef]>,
    ) -> OrmResult<Option<Record>> {
        let stmt = self.update_statement(filter, data, columns)?;
        self.client.query_opt(&stmt).await
    }

    /// Returns the number of rows deleted or stamped.
    pub async fn destroy(&self, filter: Option<&Filter>, options: DestroyOptions) -> OrmResult<u64> {
        let stmt = self.destroy_statement(filter, options)?;
        self.client.execute(&stmt).await
    }

    /// Run a script scoped to this table. `$[_table~]` is available to it.
    pub async fn script(&self, name: &str, mut params: NamedParams) -> OrmResult<QueryOutput> {
        let script = self.scripts.get_for_table(self.name(), name).ok_or_else(|| {
            OrmError::not_found(format!("Unknown script \"{}.{name}\"", self.name()))
        })?;
        if !params.contains(TABLE_PARAM) {
            params.insert(TABLE_PARAM, self.name());
        }
        script.run(&self.client, params).await
    }

    /// Call a routine named `<table>_<name>` or `<table>_one_<name>`.
    pub async fn routine(&self, name: &str, args: Vec<Value>) -> OrmResult<QueryOutput> {
        let routine = self.routines.get_for_table(self.name(), name).ok_or_else(|| {
            OrmError::not_found(format!("Unknown routine \"{}.{name}\"", self.name()))
        })?;
        routine.run(&self.client, args).await
    }

    pub fn script_names(&self) -> impl Iterator<Item = &str> {
        self.scripts.table_names(self.name())
    }
}
