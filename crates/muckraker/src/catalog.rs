//! Schema catalog: tables, columns and routines discovered at startup.

use crate::client::Client;
use crate::config::Config;
use crate::error::{OrmError, OrmResult};
use crate::record::Record;
use crate::statement::{NamedParams, Statement};
use std::collections::BTreeMap;
use std::sync::Arc;

pub(crate) const COLUMNS_SQL: &str = "\
SELECT table_name, column_name, \
(quote_ident(udt_schema) || '.' || quote_ident(udt_name))::regtype::text AS data_type, \
column_default, is_nullable \
FROM information_schema.columns \
WHERE table_schema = $[schema] \
ORDER BY table_name, ordinal_position";

pub(crate) const ROUTINES_SQL: &str = "\
SELECT DISTINCT routine_name \
FROM information_schema.routines \
WHERE routine_schema = $[schema] AND routine_type = 'FUNCTION' \
ORDER BY routine_name";

/// Types the Postgres client encodes and decodes natively, by `regtype` name.
/// Columns of any other type are selected and bound as text.
const NATIVE_TYPES: &[&str] = &[
    "boolean",
    "smallint",
    "integer",
    "bigint",
    "oid",
    "real",
    "double precision",
    "numeric",
    "json",
    "jsonb",
    "uuid",
    "timestamp with time zone",
    "timestamp without time zone",
    "date",
    "time without time zone",
    "bytea",
    "text",
    "character varying",
    "character",
    "name",
    "\"char\"",
    "citext",
    "inet",
    "cidr",
    "macaddr",
    "bit",
    "bit varying",
];

/// How the builder treats a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// `json` or `jsonb`: filters may descend into nested keys.
    Json,
    /// Any `...[]` type: input is rendered as a cast array constructor.
    Array,
    Scalar,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub sql_type: String,
    pub nullable: bool,
    pub default_expr: Option<String>,
    pub encrypted: bool,
    pub encryption_key: Option<String>,
    pub encryption_cipher: Option<String>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            nullable: true,
            default_expr: None,
            encrypted: false,
            encryption_key: None,
            encryption_cipher: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_expr(mut self, expr: impl Into<String>) -> Self {
        self.default_expr = Some(expr.into());
        self
    }

    pub fn encrypted(mut self, key: impl Into<String>, cipher: impl Into<String>) -> Self {
        self.encrypted = true;
        self.encryption_key = Some(key.into());
        self.encryption_cipher = Some(cipher.into());
        self
    }

    pub fn kind(&self) -> ColumnKind {
        if self.sql_type.ends_with("[]") {
            ColumnKind::Array
        } else if matches!(self.sql_type.as_str(), "json" | "jsonb") {
            ColumnKind::Json
        } else {
            ColumnKind::Scalar
        }
    }

    pub fn is_json(&self) -> bool {
        self.kind() == ColumnKind::Json
    }

    /// `text` (or `text[]`) when the column's type has no native codec and
    /// must cross the wire as text.
    pub fn text_cast(&self) -> Option<&'static str> {
        let (element, cast) = match self.sql_type.strip_suffix("[]") {
            Some(element) => (element, "text[]"),
            None => (self.sql_type.as_str(), "text"),
        };
        (!NATIVE_TYPES.contains(&element)).then_some(cast)
    }

    /// Key and cipher, when the column is encrypted.
    pub fn encryption(&self) -> Option<(&str, &str)> {
        if !self.encrypted {
            return None;
        }
        Some((
            self.encryption_key.as_deref().unwrap_or_default(),
            self.encryption_cipher.as_deref().unwrap_or(crate::config::DEFAULT_CIPHER),
        ))
    }
}

/// Timestamp columns a table actually has.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timestamps {
    pub created: Option<String>,
    pub updated: Option<String>,
    pub deleted: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    name: String,
    columns: Vec<ColumnDescriptor>,
    timestamps: Timestamps,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            name: name.into(),
            columns,
            timestamps: Timestamps::default(),
        }
    }

    /// Configure timestamp columns. Names with no matching column are dropped.
    pub fn with_timestamps(
        mut self,
        created: Option<&str>,
        updated: Option<&str>,
        deleted: Option<&str>,
    ) -> Self {
        let keep = |name: Option<&str>| {
            name.filter(|n| self.has_column(n)).map(str::to_string)
        };
        self.timestamps = Timestamps {
            created: keep(created),
            updated: keep(updated),
            deleted: keep(deleted),
        };
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn timestamps(&self) -> &Timestamps {
        &self.timestamps
    }
}

/// One row of the column discovery query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRow {
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    pub column_default: Option<String>,
    pub is_nullable: bool,
}

impl ColumnRow {
    pub fn new(
        table_name: impl Into<String>,
        column_name: impl Into<String>,
        data_type: impl Into<String>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            column_name: column_name.into(),
            data_type: data_type.into(),
            column_default: None,
            is_nullable: true,
        }
    }

    pub(crate) fn from_record(record: &Record) -> OrmResult<Self> {
        let text = |column: &str| -> OrmResult<String> {
            record
                .try_get(column)?
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| OrmError::decode(column, "expected text"))
        };
        Ok(Self {
            table_name: text("table_name")?,
            column_name: text("column_name")?,
            data_type: text("data_type")?,
            column_default: record
                .get("column_default")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            is_nullable: text("is_nullable")? == "YES",
        })
    }
}

/// Every table in the schema and the routine names visible to it.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: BTreeMap<String, Arc<TableSchema>>,
    routines: Vec<String>,
}

impl Catalog {
    /// Build from discovery rows, applying encryption and timestamp configuration.
    pub fn from_rows(rows: Vec<ColumnRow>, routines: Vec<String>, config: &Config) -> Self {
        let mut grouped: BTreeMap<String, Vec<ColumnDescriptor>> = BTreeMap::new();
        for row in rows {
            let mut column = ColumnDescriptor::new(&row.column_name, row.data_type);
            column.nullable = row.is_nullable;
            column.default_expr = row.column_default;
            if let Some((key, cipher)) = config.encrypt.lookup(&row.table_name, &row.column_name) {
                column = column.encrypted(key, cipher);
            }
            grouped.entry(row.table_name).or_default().push(column);
        }

        let tables = grouped
            .into_iter()
            .map(|(name, columns)| {
                let (created, updated, deleted) = config.timestamps.resolve(&name);
                let schema = TableSchema::new(name.clone(), columns).with_timestamps(
                    Some(&created),
                    Some(&updated),
                    Some(&deleted),
                );
                (name, Arc::new(schema))
            })
            .collect();

        Self { tables, routines }
    }

    /// Run the discovery queries.
    pub async fn load<C: Client>(client: &C, config: &Config) -> OrmResult<Self> {
        let mut params = NamedParams::new();
        params.insert("schema", config.schema.as_str());

        let column_records = client
            .query(&Statement::with_params(COLUMNS_SQL, params.clone()).tagged("muckraker:init"))
            .await?;
        let rows = column_records
            .iter()
            .map(ColumnRow::from_record)
            .collect::<OrmResult<Vec<_>>>()?;

        let routine_records = client
            .query(&Statement::with_params(ROUTINES_SQL, params).tagged("muckraker:init"))
            .await?;
        let routines = routine_records
            .iter()
            .filter_map(|r| r.get("routine_name").and_then(|v| v.as_str()).map(str::to_string))
            .collect();

        Ok(Self::from_rows(rows, routines, config))
    }

    pub fn table(&self, name: &str) -> Option<&Arc<TableSchema>> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Arc<TableSchema>> {
        self.tables.values()
    }

    pub fn routines(&self) -> &[String] {
        &self.routines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimestampNames;

    fn rows() -> Vec<ColumnRow> {
        vec![
            ColumnRow::new("entries", "created_at", "timestamp with time zone"),
            ColumnRow::new("entries", "deleted_at", "timestamp with time zone"),
            ColumnRow::new("entries", "value", "text"),
            ColumnRow::new("users", "id", "uuid"),
            ColumnRow::new("users", "blob", "jsonb"),
            ColumnRow::new("users", "pet_names", "text[]"),
        ]
    }

    #[test]
    fn groups_columns_in_row_order() {
        let catalog = Catalog::from_rows(rows(), vec![], &Config::default());
        let users = catalog.table("users").unwrap();
        let names: Vec<_> = users.column_names().collect();
        assert_eq!(names, vec!["id", "blob", "pet_names"]);
        assert_eq!(users.column("blob").unwrap().kind(), ColumnKind::Json);
        assert_eq!(users.column("pet_names").unwrap().kind(), ColumnKind::Array);
        assert_eq!(users.column("id").unwrap().kind(), ColumnKind::Scalar);
    }

    #[test]
    fn types_without_a_native_codec_travel_as_text() {
        assert_eq!(ColumnDescriptor::new("a", "integer").text_cast(), None);
        assert_eq!(ColumnDescriptor::new("a", "inet").text_cast(), None);
        assert_eq!(ColumnDescriptor::new("a", "character varying[]").text_cast(), None);
        assert_eq!(ColumnDescriptor::new("a", "interval").text_cast(), Some("text"));
        assert_eq!(ColumnDescriptor::new("a", "money").text_cast(), Some("text"));
        assert_eq!(ColumnDescriptor::new("a", "tsvector[]").text_cast(), Some("text[]"));
    }

    #[test]
    fn timestamps_only_name_existing_columns() {
        let catalog = Catalog::from_rows(rows(), vec![], &Config::default());
        let entries = catalog.table("entries").unwrap();
        assert_eq!(
            entries.timestamps(),
            &Timestamps {
                created: Some("created_at".into()),
                updated: None,
                deleted: Some("deleted_at".into()),
            }
        );
        assert_eq!(catalog.table("users").unwrap().timestamps(), &Timestamps::default());
    }

    #[test]
    fn applies_encryption_and_overrides() {
        let config = Config::new()
            .encrypt_column("entries.value", "somekey")
            .table_timestamps("entries", TimestampNames::new().deleted("value"));
        let catalog = Catalog::from_rows(rows(), vec![], &config);
        let entries = catalog.table("entries").unwrap();
        assert_eq!(
            entries.column("value").unwrap().encryption(),
            Some(("somekey", "aes256"))
        );
        assert_eq!(entries.timestamps().deleted.as_deref(), Some("value"));
    }

    #[test]
    fn decodes_discovery_records() {
        let record = Record::new(
            crate::value::Map::new()
                .with("table_name", "users")
                .with("column_name", "id")
                .with("data_type", "uuid")
                .with("column_default", "uuid_generate_v4()")
                .with("is_nullable", "NO"),
        );
        let row = ColumnRow::from_record(&record).unwrap();
        assert_eq!(row.column_default.as_deref(), Some("uuid_generate_v4()"));
        assert!(!row.is_nullable);
    }
}
