//! SQL literal formatting.
//!
//! Everything the builder inlines into statement text (date literals,
//! `IN` lists, array constructors, JSON paths) goes through here.

use crate::value::Value;
use chrono::{DateTime, SecondsFormat, Utc};

/// Quote an identifier, doubling embedded double quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal, doubling embedded single quotes.
pub fn quote_text(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// ISO-8601 rendering with millisecond precision and an explicit offset.
pub fn timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, false)
}

/// Render a value as an inline SQL literal.
pub fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => float(*f),
        Value::Text(s) => quote_text(s),
        Value::Timestamp(ts) => quote_text(&timestamp(ts)),
        Value::Array(_) => array(value),
        Value::Object(_) => quote_text(&json(value)),
    }
}

fn float(f: f64) -> String {
    if f.is_nan() {
        "'NaN'".to_string()
    } else if f.is_infinite() {
        if f > 0.0 {
            "'Infinity'".to_string()
        } else {
            "'-Infinity'".to_string()
        }
    } else {
        f.to_string()
    }
}

/// Comma-separated literals, as used inside `IN (...)`.
///
/// An empty list renders `NULL` so that `IN (NULL)` stays valid SQL and
/// matches nothing. Nested arrays become `array[...]` constructors.
pub fn csv(value: &Value) -> String {
    match value {
        Value::Array(items) if items.is_empty() => "NULL".to_string(),
        Value::Array(items) => items.iter().map(literal).collect::<Vec<_>>().join(","),
        other => literal(other),
    }
}

/// Array constructor literal. Empty arrays render as `'{}'` so a cast can
/// give them an element type.
pub fn array(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Array(items) if items.is_empty() => "'{}'".to_string(),
        Value::Array(items) => format!(
            "array[{}]",
            items.iter().map(literal).collect::<Vec<_>>().join(",")
        ),
        scalar => format!("array[{}]", literal(scalar)),
    }
}

/// Array constructor with an explicit cast, e.g. `array['a','b']::text[]`.
pub fn array_cast(value: &Value, sql_type: &str) -> String {
    format!("{}::{}", array(value), sql_type)
}

/// Serialize to JSON text.
pub fn json(value: &Value) -> String {
    value.to_json().to_string()
}

/// JSON path literal for `#>>`, e.g. `'{some,value}'`.
pub fn json_path<S: AsRef<str>>(path: &[S]) -> String {
    let segments = path
        .iter()
        .map(|segment| path_segment(segment.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    quote_text(&format!("{{{segments}}}"))
}

fn path_segment(segment: &str) -> String {
    let needs_quotes = segment.is_empty()
        || segment.eq_ignore_ascii_case("null")
        || segment
            .chars()
            .any(|c| matches!(c, ',' | '{' | '}' | '"' | '\\') || c.is_whitespace());
    if !needs_quotes {
        return segment.to_string();
    }
    let escaped = segment.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Wrap an expression in `pgp_sym_encrypt`.
pub fn encrypt(expr: &str, key: &str, cipher: &str) -> String {
    format!(
        "pgp_sym_encrypt({expr},{},{})",
        quote_text(key),
        quote_text(&format!("cipher-algo={cipher}"))
    )
}

/// Wrap a column in `pgp_sym_decrypt`, aliased back to the column name.
pub fn decrypt(column: &str, key: &str, cipher: &str) -> String {
    format!(
        "pgp_sym_decrypt({},{},{}) AS {}",
        quote_ident(column),
        quote_text(key),
        quote_text(&format!("cipher-algo={cipher}")),
        quote_ident(column)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Map;
    use chrono::TimeZone;

    #[test]
    fn literals() {
        assert_eq!(literal(&Value::Null), "NULL");
        assert_eq!(literal(&Value::Bool(true)), "true");
        assert_eq!(literal(&Value::Int(-3)), "-3");
        assert_eq!(literal(&Value::Float(1.5)), "1.5");
        assert_eq!(literal(&Value::Float(f64::NAN)), "'NaN'");
        assert_eq!(literal(&Value::from("it's")), "'it''s'");
        assert_eq!(
            literal(&Value::Object(Map::new().with("some", "thing"))),
            r#"'{"some":"thing"}'"#
        );
    }

    #[test]
    fn timestamp_literal_has_millis_and_offset() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(literal(&Value::Timestamp(ts)), "'2024-01-02T03:04:05.000+00:00'");
    }

    #[test]
    fn arrays() {
        assert_eq!(array(&Value::Array(vec![])), "'{}'");
        assert_eq!(
            array_cast(&Value::from(vec!["fluffy", "spike"]), "text[]"),
            "array['fluffy','spike']::text[]"
        );
        assert_eq!(array_cast(&Value::Null, "text[]"), "NULL::text[]");
    }

    #[test]
    fn csv_escapes_each_item() {
        assert_eq!(csv(&Value::from(vec![1, 2, 3])), "1,2,3");
        assert_eq!(
            csv(&Value::from(vec!["x'); DROP TABLE users; --"])),
            "'x''); DROP TABLE users; --'"
        );
        assert_eq!(csv(&Value::Array(vec![])), "NULL");
    }

    #[test]
    fn csv_renders_nested_arrays_as_constructors() {
        let lists = Value::Array(vec![
            Value::from(vec!["fluffy", "o'malley"]),
            Value::from(vec!["spike"]),
        ]);
        assert_eq!(csv(&lists), "array['fluffy','o''malley'],array['spike']");
    }

    #[test]
    fn json_paths() {
        assert_eq!(json_path(&["some", "value"]), "'{some,value}'");
        assert_eq!(json_path(&["a,b", "it's"]), r#"'{"a,b",it''s}'"#);
    }

    #[test]
    fn identifiers() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn encryption_wrappers() {
        assert_eq!(
            encrypt("'test'", "somekey", "aes256"),
            "pgp_sym_encrypt('test','somekey','cipher-algo=aes256')"
        );
        assert_eq!(
            decrypt("value", "somekey", "aes256"),
            "pgp_sym_decrypt(\"value\",'somekey','cipher-algo=aes256') AS \"value\""
        );
    }
}
