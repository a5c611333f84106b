//! Configuration: schema, script directory, encrypted columns and timestamp columns.
//!
//! Loadable from TOML:
//!
//! ```toml
//! schema = "public"
//! script_dir = "${APP_ROOT}/db"
//!
//! [encrypt]
//! cipher = "aes256"
//! "users.ssn" = "secret-key"
//! "users.notes" = { key = "other-key", cipher = "aes192" }
//!
//! [timestamps]
//! created = "created_at"
//! updated = "updated_at"
//! deleted = "deleted_at"
//! articles = { deleted = "removed" }
//! ```

use crate::error::{OrmError, OrmResult};
use crate::scripts::ScriptDef;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_SCHEMA: &str = "public";
pub const DEFAULT_CIPHER: &str = "aes256";
pub const DEFAULT_CREATED: &str = "created_at";
pub const DEFAULT_UPDATED: &str = "updated_at";
pub const DEFAULT_DELETED: &str = "deleted_at";

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

fn default_cipher() -> String {
    DEFAULT_CIPHER.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_schema")]
    pub schema: String,

    /// Directory scanned for `.sql` scripts. Defaults to `./db`.
    #[serde(default)]
    pub script_dir: Option<PathBuf>,

    #[serde(default)]
    pub encrypt: EncryptConfig,

    #[serde(default)]
    pub timestamps: TimestampConfig,

    /// Scripts registered in code rather than loaded from files.
    #[serde(skip)]
    pub scripts: Vec<ScriptDef>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema: default_schema(),
            script_dir: None,
            encrypt: EncryptConfig::default(),
            timestamps: TimestampConfig::default(),
            scripts: Vec::new(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML, expanding `${VAR}` references in `script_dir`.
    pub fn from_toml_str(raw: &str) -> OrmResult<Self> {
        let mut config: Config = toml::from_str(raw)
            .map_err(|e| OrmError::Config(format!("failed to parse config: {e}")))?;
        if let Some(dir) = &config.script_dir {
            let expanded = expand_env_vars(&dir.to_string_lossy())?;
            config.script_dir = Some(PathBuf::from(expanded));
        }
        Ok(config)
    }

    /// Load a TOML file. A relative `script_dir` is resolved against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> OrmResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            OrmError::Config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&raw)?;

        let config_dir = path.parent().unwrap_or_else(|| Path::new("."));
        if let Some(dir) = &config.script_dir
            && dir.is_relative()
        {
            config.script_dir = Some(config_dir.join(dir));
        }
        Ok(config)
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn script_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.script_dir = Some(dir.into());
        self
    }

    /// Default cipher for encrypted columns.
    pub fn cipher(mut self, cipher: impl Into<String>) -> Self {
        self.encrypt.cipher = cipher.into();
        self
    }

    /// Mark `table.column` as encrypted with `key`.
    pub fn encrypt_column(mut self, column: impl Into<String>, key: impl Into<String>) -> Self {
        self.encrypt
            .columns
            .insert(column.into(), EncryptedColumn::Key(key.into()));
        self
    }

    /// Mark `table.column` as encrypted with `key` and a column-specific cipher.
    pub fn encrypt_column_with_cipher(
        mut self,
        column: impl Into<String>,
        key: impl Into<String>,
        cipher: impl Into<String>,
    ) -> Self {
        self.encrypt.columns.insert(
            column.into(),
            EncryptedColumn::Detailed {
                key: key.into(),
                cipher: Some(cipher.into()),
            },
        );
        self
    }

    /// Override timestamp column names for every table.
    pub fn timestamps(mut self, names: TimestampNames) -> Self {
        self.timestamps.created = names.created;
        self.timestamps.updated = names.updated;
        self.timestamps.deleted = names.deleted;
        self
    }

    /// Override timestamp column names for one table.
    pub fn table_timestamps(mut self, table: impl Into<String>, names: TimestampNames) -> Self {
        self.timestamps.tables.insert(table.into(), names);
        self
    }

    /// Register a script in code.
    pub fn script(mut self, script: ScriptDef) -> Self {
        self.scripts.push(script);
        self
    }

    /// The script directory to scan.
    pub fn effective_script_dir(&self) -> PathBuf {
        self.script_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("db"))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EncryptConfig {
    #[serde(default = "default_cipher")]
    pub cipher: String,

    /// `table.column` → key or `{ key, cipher }`.
    #[serde(flatten)]
    pub columns: BTreeMap<String, EncryptedColumn>,
}

impl Default for EncryptConfig {
    fn default() -> Self {
        Self {
            cipher: default_cipher(),
            columns: BTreeMap::new(),
        }
    }
}

impl EncryptConfig {
    /// Key and effective cipher for a column, if it is encrypted.
    pub fn lookup(&self, table: &str, column: &str) -> Option<(&str, &str)> {
        let entry = self.columns.get(&format!("{table}.{column}"))?;
        Some(match entry {
            EncryptedColumn::Key(key) => (key.as_str(), self.cipher.as_str()),
            EncryptedColumn::Detailed { key, cipher } => (
                key.as_str(),
                cipher.as_deref().unwrap_or(self.cipher.as_str()),
            ),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum EncryptedColumn {
    Key(String),
    Detailed {
        key: String,
        #[serde(default)]
        cipher: Option<String>,
    },
}

/// Timestamp column names; unset fields fall back to the next level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TimestampNames {
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub updated: Option<String>,
    #[serde(default)]
    pub deleted: Option<String>,
}

impl TimestampNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(mut self, column: impl Into<String>) -> Self {
        self.created = Some(column.into());
        self
    }

    pub fn updated(mut self, column: impl Into<String>) -> Self {
        self.updated = Some(column.into());
        self
    }

    pub fn deleted(mut self, column: impl Into<String>) -> Self {
        self.deleted = Some(column.into());
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimestampConfig {
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub updated: Option<String>,
    #[serde(default)]
    pub deleted: Option<String>,

    /// Per-table overrides keyed by table name.
    #[serde(flatten)]
    pub tables: BTreeMap<String, TimestampNames>,
}

impl TimestampConfig {
    /// Effective names for a table: per-table, then global, then the defaults.
    pub fn resolve(&self, table: &str) -> (String, String, String) {
        let per_table = self.tables.get(table);
        let pick = |local: Option<&Option<String>>, global: &Option<String>, default: &str| {
            local
                .and_then(|v| v.clone())
                .or_else(|| global.clone())
                .unwrap_or_else(|| default.to_string())
        };
        (
            pick(per_table.map(|t| &t.created), &self.created, DEFAULT_CREATED),
            pick(per_table.map(|t| &t.updated), &self.updated, DEFAULT_UPDATED),
            pick(per_table.map(|t| &t.deleted), &self.deleted, DEFAULT_DELETED),
        )
    }
}

/// Substitute `${NAME}` references in a configured path with the environment.
fn expand_env_vars(path: &str) -> OrmResult<String> {
    let mut expanded = String::with_capacity(path.len());
    let mut rest = path;

    while let Some(open) = rest.find("${") {
        expanded.push_str(&rest[..open]);
        let reference = &rest[open + 2..];
        let close = reference.find('}').ok_or_else(|| {
            OrmError::Config(format!("script_dir {path:?} has an unclosed `${{`"))
        })?;

        let name = &reference[..close];
        if name.is_empty() {
            return Err(OrmError::Config(format!(
                "script_dir {path:?} names an empty environment variable"
            )));
        }
        let value = std::env::var(name).map_err(|_| {
            OrmError::Config(format!("script_dir {path:?} needs ${name}, which is not set"))
        })?;
        expanded.push_str(&value);
        rest = &reference[close + 1..];
    }

    expanded.push_str(rest);
    Ok(expanded)
}
