//! # muckraker
//!
//! Schema-introspecting data access for Postgres.
//!
//! ## Features
//!
//! - **Discovered tables**: columns, types and routines are read from the catalog at startup
//! - **Declarative filters**: WHERE clauses from filter objects, including JSON paths and `$`-operators
//! - **Timestamps**: created/updated columns are stamped, deleted columns give soft deletes
//! - **Encrypted columns**: `pgp_sym_encrypt` on write, hidden from default projections
//! - **Scripts and routines**: `.sql` files and stored functions callable by name
//! - **Transaction-friendly**: tasks and transactions hand out a facade bound to one connection
//!
//! ```ignore
//! use muckraker::{Config, Database, Map, PgPool, op};
//!
//! let db = Database::connect(PgPool::connect(&url)?, Config::default()).await?;
//! let users = db.table("users").await?;
//!
//! let rows = users
//!     .find(Some(&Map::new().with("blob", Map::new().with("plan", op::ne("free")))), None)
//!     .await?;
//!
//! users
//!     .update(Some(&Map::new().with("id", 0)), &Map::new().with("user_name", "alice"), None)
//!     .await?;
//! ```

pub mod builder;
pub mod catalog;
pub mod client;
pub mod config;
pub mod database;
pub mod error;
pub mod format;
pub mod op;
pub mod pg;
pub mod record;
pub mod routines;
pub mod scripts;
pub mod statement;
pub mod table;
pub mod transaction;
pub mod value;

mod log;

#[cfg(test)]
mod mock;

pub use builder::{ColumnRef, InputClause, QueryBuilder, WhereClause};
pub use catalog::{Catalog, ColumnDescriptor, ColumnKind, TableSchema, Timestamps};
pub use client::Client;
pub use config::{Config, EncryptConfig, EncryptedColumn, TimestampConfig, TimestampNames};
pub use database::Database;
pub use error::{OrmError, OrmResult};
pub use op::Operator;
pub use pg::PgConnection;
pub use record::Record;
pub use routines::{RoutineDef, RoutineSet};
pub use scripts::{QueryOutput, ResultMask, ScriptDef, ScriptSet};
pub use statement::{NamedParams, Statement};
pub use table::{DestroyOptions, Table};
pub use transaction::{TransactionIsolation, TransactionOptions};
pub use value::{Data, Filter, Map, Value};

#[cfg(feature = "pool")]
pub use pg::PgPool;
