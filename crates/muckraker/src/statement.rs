//! SQL statements with named placeholders.
//!
//! Placeholders take three forms:
//!
//! - `$[name]` binds the named value as a query parameter.
//! - `$[name^]` inlines the value verbatim (text) or as a literal (anything else).
//! - `$[name~]` inlines the value as a quoted identifier.
//!
//! Generated statements always reference their table as `$[_table~]`.

use crate::error::{OrmError, OrmResult};
use crate::format;
use crate::value::{Map, Value};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

/// Name of the parameter that carries the statement's table.
pub const TABLE_PARAM: &str = "_table";

/// Named parameter values for a [`Statement`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedParams {
    values: BTreeMap<String, Value>,
}

impl NamedParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parameters seeded with the table sentinel.
    pub fn for_table(table: &str) -> Self {
        let mut params = Self::new();
        params.insert(TABLE_PARAM, table);
        params
    }

    /// Positional arguments bound as `_arg0`, `_arg1`, ...
    pub fn positional<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        args.into_iter()
            .enumerate()
            .map(|(i, v)| (format!("_arg{i}"), v.into()))
            .collect()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Merge `other` into `self`; on a name clash `other` wins.
    pub fn extend(&mut self, other: NamedParams) {
        self.values.extend(other.values);
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for NamedParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = NamedParams::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

impl From<Map> for NamedParams {
    fn from(map: Map) -> Self {
        map.into_iter().collect()
    }
}

/// A SQL statement with named placeholders and the values to fill them.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    params: NamedParams,
    tag: Option<String>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self::with_params(sql, NamedParams::new())
    }

    pub fn with_params(sql: impl Into<String>, params: NamedParams) -> Self {
        Self {
            sql: sql.into(),
            params,
            tag: None,
        }
    }

    /// Bind a named value.
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name, value);
        self
    }

    /// Attach a tag for logging.
    pub fn tagged(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &NamedParams {
        &self.params
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Interpolate every placeholder as a literal.
    ///
    /// The result is what the database would execute; it is used for
    /// presentation and by tests that compare exact SQL.
    pub fn format(&self) -> OrmResult<String> {
        let mut out = String::with_capacity(self.sql.len());
        for segment in parse(&self.sql) {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Param { name, kind } => {
                    let value = self.lookup(name)?;
                    match kind {
                        ParamKind::Bound => out.push_str(&format::literal(value)),
                        _ => out.push_str(&inline(name, kind, value)?),
                    }
                }
            }
        }
        Ok(out)
    }

    /// Rewrite named placeholders as `$1..$n` and collect the bound values in order.
    ///
    /// A name used more than once reuses its position. Raw and identifier
    /// placeholders are inlined.
    pub fn to_positional(&self) -> OrmResult<(String, Vec<Value>)> {
        let mut out = String::with_capacity(self.sql.len());
        let mut positions: BTreeMap<&str, usize> = BTreeMap::new();
        let mut values = Vec::new();

        for segment in parse(&self.sql) {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Param {
                    name,
                    kind: ParamKind::Bound,
                } => {
                    let value = self.lookup(name)?;
                    let index = match positions.entry(name) {
                        Entry::Occupied(e) => *e.get(),
                        Entry::Vacant(e) => {
                            values.push(value.clone());
                            *e.insert(values.len())
                        }
                    };
                    out.push('$');
                    out.push_str(&index.to_string());
                }
                Segment::Param { name, kind } => {
                    let value = self.lookup(name)?;
                    out.push_str(&inline(name, kind, value)?);
                }
            }
        }
        Ok((out, values))
    }

    fn lookup(&self, name: &str) -> OrmResult<&Value> {
        self.params
            .get(name)
            .ok_or_else(|| OrmError::validation(format!("Property '{name}' doesn't exist")))
    }
}

fn inline(name: &str, kind: ParamKind, value: &Value) -> OrmResult<String> {
    match (kind, value) {
        (ParamKind::Raw, Value::Text(text)) => Ok(text.clone()),
        (ParamKind::Raw, other) => Ok(format::literal(other)),
        (ParamKind::Ident, Value::Text(text)) => Ok(format::quote_ident(text)),
        (ParamKind::Ident, _) => Err(OrmError::validation(format!(
            "Property '{name}' must be text to be used as an identifier"
        ))),
        (ParamKind::Bound, other) => Ok(format::literal(other)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamKind {
    Bound,
    Raw,
    Ident,
}

#[derive(Debug, PartialEq)]
enum Segment<'a> {
    Text(&'a str),
    Param { name: &'a str, kind: ParamKind },
}

fn parse(sql: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut rest = sql;

    while let Some(start) = rest.find("$[") {
        let after = &rest[start + 2..];
        let Some(end) = after.find(']') else {
            break;
        };
        let inner = after[..end].trim();
        let (name, kind) = if let Some(name) = inner.strip_suffix('^') {
            (name.trim_end(), ParamKind::Raw)
        } else if let Some(name) = inner.strip_suffix('~') {
            (name.trim_end(), ParamKind::Ident)
        } else {
            (inner, ParamKind::Bound)
        };

        if !is_param_name(name) {
            segments.push(Segment::Text(&rest[..start + 2]));
            rest = after;
            continue;
        }

        if start > 0 {
            segments.push(Segment::Text(&rest[..start]));
        }
        segments.push(Segment::Param { name, kind });
        rest = &after[end + 1..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Text(rest));
    }
    segments
}

fn is_param_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '.')
}
