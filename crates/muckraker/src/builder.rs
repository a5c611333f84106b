//! Query builder: filter and data objects to SQL fragments for one table.
//!
//! Everything here is pure. A [`QueryBuilder`] turns a filter into WHERE
//! conditions, a data object into column/value lists, and a projection into a
//! select list. Parameters are named; see [`crate::statement`] for the
//! placeholder forms.
//!
//! ```ignore
//! let clause = builder.generate_where(Some(&Map::new().with("pets", op::gt(1))), false, false);
//! assert_eq!(clause.conditions, vec!["\"pets\" > $[pets]"]);
//! ```

use crate::catalog::{ColumnDescriptor, ColumnKind, TableSchema};
use crate::format::{self, quote_ident};
use crate::op::{Operand, Operator, Resolved, operator_of};
use crate::statement::NamedParams;
use crate::value::{Data, Filter, Map, Value};
use chrono::{DateTime, Utc};
use std::fmt::Write;
use std::sync::Arc;

/// Prefix for WHERE parameters that share a statement with input parameters.
pub const QUERY_PREFIX: &str = "_query_";

/// Prefix for SET/VALUES parameters that share a statement with WHERE parameters.
pub const INPUT_PREFIX: &str = "_input_";

/// Source of the current time for auto-stamped columns.
pub type Clock = fn() -> DateTime<Utc>;

/// A requested output column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRef {
    /// A plain column.
    Name(String),
    /// A key path inside a JSON column, selected as text and aliased to the last key.
    Path(String, Vec<String>),
}

impl ColumnRef {
    pub fn path<S: Into<String>>(column: impl Into<String>, path: impl IntoIterator<Item = S>) -> Self {
        ColumnRef::Path(column.into(), path.into_iter().map(Into::into).collect())
    }
}

impl From<&str> for ColumnRef {
    fn from(name: &str) -> Self {
        ColumnRef::Name(name.to_string())
    }
}

impl From<String> for ColumnRef {
    fn from(name: String) -> Self {
        ColumnRef::Name(name)
    }
}

impl<S: Into<String>, const N: usize> From<[S; N]> for ColumnRef {
    /// `["blob", "some", "path"]` selects a JSON path; a single element is a plain column.
    fn from(parts: [S; N]) -> Self {
        let mut parts = parts.into_iter().map(Into::into);
        let column = parts.next().unwrap_or_default();
        let path: Vec<String> = parts.collect();
        if path.is_empty() {
            ColumnRef::Name(column)
        } else {
            ColumnRef::Path(column, path)
        }
    }
}

/// WHERE conditions (joined with `AND` by the caller) and their parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    pub conditions: Vec<String>,
    pub params: NamedParams,
}

impl WhereClause {
    /// ` WHERE a AND b`, or an empty string when there are no conditions.
    pub fn to_sql(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }
}

/// Quoted columns paired positionally with value expressions.
#[derive(Debug, Clone, PartialEq)]
pub struct InputClause {
    pub columns: Vec<String>,
    pub values: Vec<String>,
    pub params: NamedParams,
}

impl InputClause {
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// `"a" = $[a], "b" = $[b]`
    pub fn assignments(&self) -> String {
        self.columns
            .iter()
            .zip(&self.values)
            .map(|(column, value)| format!("{column} = {value}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Clone)]
pub struct QueryBuilder {
    schema: Arc<TableSchema>,
    clock: Clock,
}

impl std::fmt::Debug for QueryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("table", &self.schema.name())
            .finish_non_exhaustive()
    }
}

impl QueryBuilder {
    pub fn new(schema: Arc<TableSchema>) -> Self {
        Self {
            schema,
            clock: Utc::now,
        }
    }

    /// Replace the clock used for created/updated stamps.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Select-list entries for the requested columns.
    ///
    /// With no request, every column except encrypted ones is returned in
    /// schema order. An explicit request is honored as given, including
    /// encrypted columns; unknown names and paths into non-JSON columns are
    /// dropped.
    pub fn column_names(&self, requested: Option<&[ColumnRef]>) -> Vec<String> {
        let Some(requested) = requested else {
            return self
                .schema
                .columns()
                .iter()
                .filter(|c| !c.encrypted)
                .map(select_column)
                .collect();
        };

        requested
            .iter()
            .filter_map(|column| match column {
                ColumnRef::Name(name) => self.schema.column(name).map(select_column),
                ColumnRef::Path(name, path) => {
                    let column = self.schema.column(name)?;
                    let last = path.last()?;
                    column.is_json().then(|| {
                        format!(
                            "{}#>>{} AS {}",
                            quote_ident(name),
                            format::json_path(path),
                            quote_ident(last)
                        )
                    })
                }
            })
            .collect()
    }

    /// Translate a filter into WHERE conditions.
    ///
    /// `use_prefix` namespaces parameters under `_query_` so they can be merged
    /// with input parameters. Unless `bypass_soft_delete` is set, a table with a
    /// deleted column gets an implicit `IS NULL` condition on it when the filter
    /// does not mention that column.
    pub fn generate_where(
        &self,
        filter: Option<&Filter>,
        use_prefix: bool,
        bypass_soft_delete: bool,
    ) -> WhereClause {
        let empty = Map::new();
        let filter = filter.unwrap_or(&empty);
        let mut params = NamedParams::for_table(self.schema.name());
        let mut conditions = Vec::new();

        for (column, value) in filter.iter() {
            let Some(descriptor) = self.schema.column(column) else {
                continue;
            };
            let name = param_name(QUERY_PREFIX, column, use_prefix);
            let target = quote_ident(column);

            match value {
                Value::Null => conditions.push(format!("{target} IS NULL")),
                Value::Timestamp(_) => {
                    conditions.push(format!("{target} = $[{name}^]"));
                    params.insert(name, format::literal(value));
                }
                Value::Object(map) if descriptor.is_json() && !map.is_empty() => {
                    let (path, op, operand) = descend(map);
                    let target = if path.is_empty() {
                        target
                    } else {
                        format!("{target}#>>{}", format::json_path(&path))
                    };
                    let resolved = op.resolve(operand);
                    push_condition(&mut conditions, &mut params, &target, name, resolved, None);
                }
                Value::Object(map) => match operator_of(map) {
                    Some((op, operand)) => {
                        let resolved = op.resolve(operand);
                        push_condition(&mut conditions, &mut params, &target, name, resolved, Some(descriptor));
                    }
                    None => {
                        conditions.push(format!("{target} = $[{name}^]"));
                        params.insert(name, format::literal(value));
                    }
                },
                _ => {
                    conditions.push(format!("{target} = {}", bound(descriptor, &name)));
                    params.insert(name, value.clone());
                }
            }
        }

        if !bypass_soft_delete
            && let Some(deleted) = &self.schema.timestamps().deleted
            && !filter.contains_key(deleted)
        {
            conditions.push(format!("{} IS NULL", quote_ident(deleted)));
        }

        WhereClause { conditions, params }
    }

    /// Translate a data object into columns and value expressions.
    ///
    /// `use_prefix` namespaces parameters under `_input_`. `is_update` skips
    /// stamping the created column. Both stamps share one clock reading.
    pub fn parse_input(&self, data: &Data, use_prefix: bool, is_update: bool) -> InputClause {
        let now = self.now();
        let mut params = NamedParams::for_table(self.schema.name());
        let mut columns = Vec::new();
        let mut values = Vec::new();

        for (column, value) in data.iter() {
            let Some(descriptor) = self.schema.column(column) else {
                continue;
            };
            let name = param_name(INPUT_PREFIX, column, use_prefix);
            columns.push(quote_ident(column));

            match descriptor.kind() {
                ColumnKind::Array => {
                    values.push(format!("$[{name}^]"));
                    params.insert(name, format::array_cast(value, &descriptor.sql_type));
                    continue;
                }
                ColumnKind::Json if !value.is_null() => {
                    params.insert(name.clone(), format::json(value));
                }
                _ => params.insert(name.clone(), value.clone()),
            }
            values.push(input_expr(descriptor, &name));
        }

        let stamps = [
            (self.schema.timestamps().created.as_ref(), !is_update),
            (self.schema.timestamps().updated.as_ref(), true),
        ];
        for (column, enabled) in stamps {
            let Some(column) = column.filter(|_| enabled) else {
                continue;
            };
            if data.contains_key(column) {
                continue;
            }
            let name = param_name(INPUT_PREFIX, column, use_prefix);
            columns.push(quote_ident(column));
            values.push(match self.schema.column(column) {
                Some(descriptor) => bound(descriptor, &name),
                None => format!("$[{name}]"),
            });
            params.insert(name, now);
        }

        InputClause {
            columns,
            values,
            params,
        }
    }
}

/// Placeholder name for a column.
///
/// Letters, digits, `_` and `.` are kept. Any other character is written as
/// `$` followed by its UTF-8 bytes in hex, so `e-mail` becomes `e$2dmail`.
fn param_name(prefix: &str, column: &str, use_prefix: bool) -> String {
    let mut name = String::with_capacity(prefix.len() + column.len());
    if use_prefix {
        name.push_str(prefix);
    }
    for c in column.chars() {
        if c.is_alphanumeric() || c == '_' || c == '.' {
            name.push(c);
            continue;
        }
        let mut utf8 = [0u8; 4];
        for byte in c.encode_utf8(&mut utf8).bytes() {
            let _ = write!(name, "${byte:02x}");
        }
    }
    name
}

fn select_column(column: &ColumnDescriptor) -> String {
    let quoted = quote_ident(&column.name);
    match (column.encryption(), column.text_cast()) {
        (Some((key, cipher)), _) => format::decrypt(&column.name, key, cipher),
        (None, Some(cast)) => format!("{quoted}::{cast} AS {quoted}"),
        (None, None) => quoted,
    }
}

/// A bound placeholder for a value written to or compared with `column`.
fn bound(column: &ColumnDescriptor, name: &str) -> String {
    match column.text_cast() {
        Some(cast) => format!("$[{name}]::{cast}::{}", column.sql_type),
        None => format!("$[{name}]"),
    }
}

fn input_expr(column: &ColumnDescriptor, name: &str) -> String {
    match column.encryption() {
        Some((key, cipher)) => format::encrypt(&format!("$[{name}]"), key, cipher),
        None => bound(column, name),
    }
}

fn push_condition(
    conditions: &mut Vec<String>,
    params: &mut NamedParams,
    target: &str,
    name: String,
    resolved: Resolved,
    column: Option<&ColumnDescriptor>,
) {
    match resolved.operand {
        Operand::Bound(value) => {
            let placeholder = match column {
                Some(column) => bound(column, &name),
                None => format!("$[{name}]"),
            };
            conditions.push(format!("{target} {} {placeholder}", resolved.sql));
            params.insert(name, value);
        }
        Operand::Raw(text) => {
            conditions.push(format!("{target} {} $[{name}^]", resolved.sql));
            params.insert(name, text);
        }
    }
}

/// Follow single-key objects down to an operator object or a plain leaf.
///
/// Returns the key path, the operator (`$eq` for plain leaves) and its operand.
fn descend(map: &Map) -> (Vec<String>, Operator, &Value) {
    if let Some((op, operand)) = operator_of(map) {
        return (Vec::new(), op, operand);
    }
    static NULL: Value = Value::Null;
    let Some((key, value)) = map.first() else {
        return (Vec::new(), Operator::Eq, &NULL);
    };
    match value {
        Value::Object(inner) if !inner.is_empty() => {
            let (mut path, op, operand) = descend(inner);
            path.insert(0, key.to_string());
            (path, op, operand)
        }
        leaf => (vec![key.to_string()], Operator::Eq, leaf),
    }
}
