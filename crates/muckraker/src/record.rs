//! Rows returned to callers.

use crate::error::{OrmError, OrmResult};
use crate::value::{Map, Value};
use serde::de::DeserializeOwned;

/// A decoded row: column values in select-list order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    columns: Map,
}

impl Record {
    pub fn new(columns: Map) -> Self {
        Self { columns }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    /// Fetch a column, failing with a decode error when it is absent.
    pub fn try_get(&self, column: &str) -> OrmResult<&Value> {
        self.columns
            .get(column)
            .ok_or_else(|| OrmError::decode(column, "column not present in row"))
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        Value::Object(self.columns.clone()).to_json()
    }

    /// Deserialize the row into any `serde` type.
    pub fn deserialize<T: DeserializeOwned>(&self) -> OrmResult<T> {
        serde_json::from_value(self.to_json()).map_err(|e| OrmError::Serialization(e.to_string()))
    }

    pub fn into_map(self) -> Map {
        self.columns
    }
}

impl From<Map> for Record {
    fn from(columns: Map) -> Self {
        Self::new(columns)
    }
}
