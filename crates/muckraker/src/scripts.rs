//! SQL scripts loaded from a directory tree.
//!
//! `<root>/*.sql` are database-level scripts and `<root>/<table>/*.sql` are
//! scoped to a table. A file may start with TOML front matter between `---`
//! lines:
//!
//! ```text
//! ---
//! returns = "one||none"
//! transaction = { tag = "rename", isolation = "serializable" }
//! ---
//! UPDATE users SET user_name = $[name] WHERE id = $[id] RETURNING *
//! ```

use crate::client::Client;
use crate::error::{OrmError, OrmResult};
use crate::record::Record;
use crate::statement::{NamedParams, Statement};
use crate::transaction::{self, TransactionIsolation, TransactionOptions};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Which row counts a script accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultMask(u8);

impl ResultMask {
    pub const ONE: ResultMask = ResultMask(1);
    pub const MANY: ResultMask = ResultMask(2);
    pub const NONE: ResultMask = ResultMask(4);
    pub const ANY: ResultMask = ResultMask(6);

    /// Parse `one`, `many`, `none`, `any` or a `||`-separated combination.
    pub fn parse(s: &str) -> OrmResult<Self> {
        s.split("||").map(str::trim).try_fold(ResultMask(0), |mask, part| {
            let bits = match part {
                "one" => Self::ONE,
                "many" => Self::MANY,
                "none" => Self::NONE,
                "any" => Self::ANY,
                _ => {
                    return Err(OrmError::script(format!("invalid return type \"{part}\"")));
                }
            };
            Ok(mask | bits)
        })
    }

    pub fn contains(self, other: ResultMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check a result set against the mask.
    pub fn apply(self, mut rows: Vec<Record>) -> OrmResult<QueryOutput> {
        if rows.is_empty() {
            return if !self.contains(Self::NONE) {
                Err(OrmError::not_found("No data returned from the query"))
            } else if self.contains(Self::MANY) {
                Ok(QueryOutput::Many(rows))
            } else {
                Ok(QueryOutput::None)
            };
        }
        if self.contains(Self::MANY) {
            return Ok(QueryOutput::Many(rows));
        }
        if !self.contains(Self::ONE) {
            return Err(OrmError::too_many_rows(0, rows.len()));
        }
        match rows.len() {
            1 => rows
                .pop()
                .map(QueryOutput::One)
                .ok_or_else(|| OrmError::not_found("No data returned from the query")),
            got => Err(OrmError::too_many_rows(1, got)),
        }
    }
}

impl Default for ResultMask {
    fn default() -> Self {
        Self::ANY
    }
}

impl std::ops::BitOr for ResultMask {
    type Output = ResultMask;

    fn bitor(self, rhs: ResultMask) -> ResultMask {
        ResultMask(self.0 | rhs.0)
    }
}

/// Output of a script or routine.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    None,
    One(Record),
    Many(Vec<Record>),
}

impl QueryOutput {
    /// All rows, whatever the shape.
    pub fn into_rows(self) -> Vec<Record> {
        match self {
            QueryOutput::None => Vec::new(),
            QueryOutput::One(record) => vec![record],
            QueryOutput::Many(rows) => rows,
        }
    }

    /// The first row, if any.
    pub fn into_first(self) -> Option<Record> {
        self.into_rows().into_iter().next()
    }
}

/// A named SQL script.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptDef {
    pub name: String,
    /// Table the script is scoped to, or `None` for database-level scripts.
    pub table: Option<String>,
    pub sql: String,
    pub returns: ResultMask,
    /// Run inside a transaction with these options instead of a plain task.
    pub transaction: Option<TransactionOptions>,
}

impl ScriptDef {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            sql: sql.into(),
            returns: ResultMask::ANY,
            transaction: None,
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn returns(mut self, mask: ResultMask) -> Self {
        self.returns = mask;
        self
    }

    /// Run in a transaction. Without a tag the script name is used.
    pub fn transaction(mut self, options: TransactionOptions) -> Self {
        let options = match options.get_tag() {
            Some(_) => options,
            None => options.tag(self.name.clone()),
        };
        self.transaction = Some(options);
        self
    }

    /// Parse a script file's contents.
    pub fn parse(path: &Path, table: Option<&str>, content: &str) -> OrmResult<Self> {
        let (front, body) = split_front_matter(content);
        let front: FrontMatter = match front {
            Some(raw) => toml::from_str(raw).map_err(|e| {
                OrmError::script(format!("invalid front matter in {}: {e}", path.display()))
            })?,
            None => FrontMatter::default(),
        };

        let name = match front.name {
            Some(name) => name,
            None => path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
                .ok_or_else(|| {
                    OrmError::script(format!("invalid file name: {}", path.display()))
                })?,
        };

        let returns = match front.returns.as_deref() {
            Some(mask) => ResultMask::parse(mask).map_err(|e| {
                OrmError::script(format!("script at {} specified {}", path.display(), detail(&e)))
            })?,
            None => ResultMask::ANY,
        };

        let mut script = ScriptDef::new(name, body.trim()).returns(returns);
        if let Some(table) = table {
            script = script.table(table);
        }

        match front.transaction {
            None | Some(TransactionSetting::Enabled(false)) => {}
            Some(TransactionSetting::Enabled(true)) => {
                script = script.transaction(TransactionOptions::new());
            }
            Some(TransactionSetting::Detailed(detail)) => {
                let mut options = TransactionOptions::new();
                if let Some(tag) = detail.tag {
                    options = options.tag(tag);
                }
                if let Some(isolation) = detail.isolation {
                    let level: TransactionIsolation = isolation.parse().map_err(|_| {
                        OrmError::script(format!(
                            "script at {} specified invalid transaction isolation level \"{isolation}\"",
                            path.display()
                        ))
                    })?;
                    options = options.isolation_level(level);
                }
                if let Some(read_only) = detail.read_only {
                    options = options.read_only(read_only);
                }
                if let Some(deferrable) = detail.deferrable {
                    options = options.deferrable(deferrable);
                }
                script = script.transaction(options);
            }
        }

        Ok(script)
    }

    /// Run the script on `client` with a task or transaction around it.
    pub(crate) async fn run<C: Client>(
        &self,
        client: &C,
        params: NamedParams,
    ) -> OrmResult<QueryOutput> {
        let stmt = Statement::with_params(self.sql.clone(), params).tagged(self.name.clone());
        match &self.transaction {
            Some(options) => {
                let tx = client.begin_transaction(options).await?;
                let result = query_masked(&tx, &stmt, self.returns).await;
                transaction::finish(&tx, result).await
            }
            None => {
                let task = client.begin_task(Some(&self.name)).await?;
                let result = query_masked(&task, &stmt, self.returns).await;
                task.finish().await?;
                result
            }
        }
    }
}

async fn query_masked<C: Client>(
    client: &C,
    stmt: &Statement,
    mask: ResultMask,
) -> OrmResult<QueryOutput> {
    let rows = client.query(stmt).await?;
    mask.apply(rows)
}

fn detail(error: &OrmError) -> String {
    match error {
        OrmError::Script(message) => message.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct FrontMatter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    returns: Option<String>,
    #[serde(default)]
    transaction: Option<TransactionSetting>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TransactionSetting {
    Enabled(bool),
    Detailed(TransactionDetail),
}

#[derive(Debug, Default, Deserialize)]
struct TransactionDetail {
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    isolation: Option<String>,
    #[serde(default)]
    read_only: Option<bool>,
    #[serde(default)]
    deferrable: Option<bool>,
}

/// Split `---` delimited front matter from the body.
fn split_front_matter(content: &str) -> (Option<&str>, &str) {
    let trimmed = content.trim_start_matches('\u{feff}');
    let Some(rest) = trimmed
        .strip_prefix("---\n")
        .or_else(|| trimmed.strip_prefix("---\r\n"))
    else {
        return (None, trimmed);
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return (Some(&rest[..offset]), &rest[offset + line.len()..]);
        }
        offset += line.len();
    }
    (None, trimmed)
}

/// Every loaded script, by scope and name.
#[derive(Debug, Clone, Default)]
pub struct ScriptSet {
    global: BTreeMap<String, ScriptDef>,
    tables: BTreeMap<String, BTreeMap<String, ScriptDef>>,
}

impl ScriptSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every script under `root`.
    ///
    /// A missing root, or one that is not a directory, yields an empty set.
    pub fn load_dir(root: &Path) -> OrmResult<Self> {
        let mut set = Self::new();
        if !root.is_dir() {
            tracing::debug!(
                target: "muckraker",
                script_dir = %root.display(),
                "script directory not found, no scripts loaded"
            );
            return Ok(set);
        }

        for path in expand_globs(root)? {
            let table = path
                .parent()
                .filter(|parent| *parent != root)
                .and_then(|parent| parent.file_name())
                .and_then(|name| name.to_str());
            let content = std::fs::read_to_string(&path).map_err(|e| {
                OrmError::script(format!("failed to read {}: {e}", path.display()))
            })?;
            set.insert(ScriptDef::parse(&path, table, &content)?);
        }
        Ok(set)
    }

    /// Add a script, replacing any script with the same scope and name.
    pub fn insert(&mut self, script: ScriptDef) {
        match &script.table {
            Some(table) => {
                self.tables
                    .entry(table.clone())
                    .or_default()
                    .insert(script.name.clone(), script);
            }
            None => {
                self.global.insert(script.name.clone(), script);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&ScriptDef> {
        self.global.get(name)
    }

    pub fn get_for_table(&self, table: &str, name: &str) -> Option<&ScriptDef> {
        self.tables.get(table)?.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.global.keys().map(String::as_str)
    }

    pub fn table_names(&self, table: &str) -> impl Iterator<Item = &str> {
        self.tables
            .get(table)
            .into_iter()
            .flat_map(|scripts| scripts.keys().map(String::as_str))
    }

    pub fn len(&self) -> usize {
        self.global.len() + self.tables.values().map(BTreeMap::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn expand_globs(root: &Path) -> OrmResult<Vec<PathBuf>> {
    let escaped = glob::Pattern::escape(&root.to_string_lossy());
    let mut files: BTreeSet<PathBuf> = BTreeSet::new();

    for suffix in ["*.sql", "*/*.sql"] {
        let pattern = format!("{escaped}/{suffix}");
        let entries = glob::glob(&pattern)
            .map_err(|e| OrmError::script(format!("invalid glob {pattern}: {e}")))?;
        for entry in entries {
            let path =
                entry.map_err(|e| OrmError::script(format!("glob error for {pattern}: {e}")))?;
            if path.is_file() {
                files.insert(path);
            }
        }
    }

    Ok(files.into_iter().collect())
}
