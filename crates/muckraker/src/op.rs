//! Comparison operators recognized inside filter objects.
//!
//! An operator object is a single-key object whose key is one of the tokens
//! below, e.g. `{"$gt": 5}`. The helpers in this module build those objects:
//!
//! ```ignore
//! use muckraker::{op, Map};
//!
//! let filter = Map::new()
//!     .with("pets", op::gte(2))
//!     .with("user_name", op::like("a%"));
//! ```

use crate::format;
use crate::value::{Map, Value};

/// A comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    NotLike,
    In,
    NotIn,
}

impl Operator {
    pub const ALL: [Operator; 10] = [
        Operator::Eq,
        Operator::Ne,
        Operator::Lt,
        Operator::Lte,
        Operator::Gt,
        Operator::Gte,
        Operator::Like,
        Operator::NotLike,
        Operator::In,
        Operator::NotIn,
    ];

    /// The filter-object key for this operator.
    pub fn token(self) -> &'static str {
        match self {
            Operator::Eq => "$eq",
            Operator::Ne => "$ne",
            Operator::Lt => "$lt",
            Operator::Lte => "$lte",
            Operator::Gt => "$gt",
            Operator::Gte => "$gte",
            Operator::Like => "$like",
            Operator::NotLike => "$nlike",
            Operator::In => "$in",
            Operator::NotIn => "$nin",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.token() == token)
    }

    /// SQL rendering of the operator.
    pub fn sql(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
        }
    }

    /// Resolve this operator against its operand.
    pub(crate) fn resolve(self, operand: &Value) -> Resolved {
        match (self, operand) {
            (Operator::Eq, Value::Null) => Resolved::raw("IS", "NULL"),
            (Operator::Ne, Value::Null) => Resolved::raw("IS NOT", "NULL"),
            (Operator::In | Operator::NotIn, value) => {
                Resolved::raw(self.sql(), format!("({})", format::csv(value)))
            }
            (op, value) => Resolved {
                sql: op.sql(),
                operand: Operand::Bound(value.clone()),
            },
        }
    }
}

/// An operator resolved to its SQL and how its operand is carried.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Resolved {
    pub sql: &'static str,
    pub operand: Operand,
}

impl Resolved {
    fn raw(sql: &'static str, text: impl Into<String>) -> Self {
        Self {
            sql,
            operand: Operand::Raw(text.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Operand {
    /// Bound through a named parameter.
    Bound(Value),
    /// Already-formatted SQL inlined through a raw placeholder.
    Raw(String),
}

/// If `map` is an operator object, return its operator and operand.
pub(crate) fn operator_of(map: &Map) -> Option<(Operator, &Value)> {
    let (key, value) = map.first()?;
    Operator::from_token(key).map(|op| (op, value))
}

fn object(op: Operator, value: impl Into<Value>) -> Value {
    Value::Object(Map::new().with(op.token(), value))
}

pub fn eq(value: impl Into<Value>) -> Value {
    object(Operator::Eq, value)
}

pub fn ne(value: impl Into<Value>) -> Value {
    object(Operator::Ne, value)
}

pub fn lt(value: impl Into<Value>) -> Value {
    object(Operator::Lt, value)
}

pub fn lte(value: impl Into<Value>) -> Value {
    object(Operator::Lte, value)
}

pub fn gt(value: impl Into<Value>) -> Value {
    object(Operator::Gt, value)
}

pub fn gte(value: impl Into<Value>) -> Value {
    object(Operator::Gte, value)
}

pub fn like(pattern: impl Into<Value>) -> Value {
    object(Operator::Like, pattern)
}

pub fn nlike(pattern: impl Into<Value>) -> Value {
    object(Operator::NotLike, pattern)
}

pub fn in_list<T: Into<Value>>(values: impl IntoIterator<Item = T>) -> Value {
    object(
        Operator::In,
        Value::Array(values.into_iter().map(Into::into).collect()),
    )
}

pub fn not_in<T: Into<Value>>(values: impl IntoIterator<Item = T>) -> Value {
    object(
        Operator::NotIn,
        Value::Array(values.into_iter().map(Into::into).collect()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_round_trip() {
        for op in Operator::ALL {
            assert_eq!(Operator::from_token(op.token()), Some(op));
        }
        assert_eq!(Operator::from_token("$between"), None);
    }

    #[test]
    fn null_equality_becomes_is_null() {
        let resolved = Operator::Eq.resolve(&Value::Null);
        assert_eq!(resolved.sql, "IS");
        assert_eq!(resolved.operand, Operand::Raw("NULL".into()));

        let resolved = Operator::Ne.resolve(&Value::Null);
        assert_eq!(resolved.sql, "IS NOT");
    }

    #[test]
    fn in_list_is_inlined_and_escaped() {
        let resolved = Operator::In.resolve(&Value::from(vec!["a", "it's"]));
        assert_eq!(resolved.operand, Operand::Raw("('a','it''s')".into()));

        let resolved = Operator::NotIn.resolve(&Value::Array(vec![]));
        assert_eq!(resolved.sql, "NOT IN");
        assert_eq!(resolved.operand, Operand::Raw("(NULL)".into()));
    }

    #[test]
    fn helpers_build_operator_objects() {
        let value = gt(5);
        let (op, operand) = operator_of(value.as_object().unwrap()).unwrap();
        assert_eq!(op, Operator::Gt);
        assert_eq!(operand, &Value::Int(5));
    }
}
