//! Stored functions exposed as callable routines.
//!
//! A routine named `<table>_<fn>` belongs to `<table>` and returns every row;
//! `<table>_one_<fn>` returns a single row. Anything else is database-level.

use crate::client::Client;
use crate::error::OrmResult;
use crate::format::quote_ident;
use crate::scripts::QueryOutput;
use crate::statement::{NamedParams, Statement};
use crate::value::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutineDef {
    /// The function name in the database.
    pub routine: String,
    pub table: Option<String>,
    /// The name the routine is called by.
    pub name: String,
    /// Whether exactly one row is expected.
    pub single: bool,
}

impl RoutineDef {
    /// Classify a routine against the known tables, longest table name first.
    pub fn parse<'a>(routine: &str, tables: impl IntoIterator<Item = &'a str>) -> Self {
        let mut tables: Vec<&str> = tables.into_iter().collect();
        tables.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        for table in tables {
            let Some(rest) = routine
                .strip_prefix(table)
                .and_then(|rest| rest.strip_prefix('_'))
            else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            let (name, single) = match rest.strip_prefix("one_") {
                Some(name) if !name.is_empty() => (name, true),
                _ => (rest, false),
            };
            return Self {
                routine: routine.to_string(),
                table: Some(table.to_string()),
                name: name.to_string(),
                single,
            };
        }

        Self {
            routine: routine.to_string(),
            table: None,
            name: routine.to_string(),
            single: false,
        }
    }

    /// `SELECT * FROM "routine"($[_arg0], ...)`
    pub fn statement(&self, args: Vec<Value>) -> Statement {
        let placeholders = (0..args.len())
            .map(|i| format!("$[_arg{i}]"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("SELECT * FROM {}({placeholders})", quote_ident(&self.routine));
        Statement::with_params(sql, NamedParams::positional(args)).tagged(self.routine.clone())
    }

    pub(crate) async fn run<C: Client>(
        &self,
        client: &C,
        args: Vec<Value>,
    ) -> OrmResult<QueryOutput> {
        let stmt = self.statement(args);
        if self.single {
            client.query_one(&stmt).await.map(QueryOutput::One)
        } else {
            client.query(&stmt).await.map(QueryOutput::Many)
        }
    }
}

/// Routines by scope and call name.
#[derive(Debug, Clone, Default)]
pub struct RoutineSet {
    global: BTreeMap<String, RoutineDef>,
    tables: BTreeMap<String, BTreeMap<String, RoutineDef>>,
}

impl RoutineSet {
    pub fn new<'a, I>(routines: &[String], tables: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
        I::IntoIter: Clone,
    {
        let tables = tables.into_iter();
        let mut set = Self::default();
        for routine in routines {
            let def = RoutineDef::parse(routine, tables.clone());
            match &def.table {
                Some(table) => {
                    set.tables
                        .entry(table.clone())
                        .or_default()
                        .insert(def.name.clone(), def);
                }
                None => {
                    set.global.insert(def.name.clone(), def);
                }
            }
        }
        set
    }

    pub fn get(&self, name: &str) -> Option<&RoutineDef> {
        self.global.get(name)
    }

    pub fn get_for_table(&self, table: &str, name: &str) -> Option<&RoutineDef> {
        self.tables.get(table)?.get(name)
    }

    pub fn len(&self) -> usize {
        self.global.len() + self.tables.values().map(BTreeMap::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
