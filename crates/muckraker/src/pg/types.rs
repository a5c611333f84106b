//! Conversions between [`Value`] and the Postgres binary wire format.

use crate::error::{OrmError, OrmResult};
use crate::format;
use crate::record::Record;
use crate::value::{Map, Value};
use bit_vec::BitVec;
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use cidr::{IpCidr, IpInet};
use eui48::MacAddress;
use rust_decimal::Decimal;
use std::error::Error;
use std::str::FromStr;
use tokio_postgres::Row;
use tokio_postgres::types::{FromSql, IsNull, Kind, ToSql, Type, to_sql_checked};

type BoxError = Box<dyn Error + Sync + Send>;

fn is_text_type(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN | Type::CHAR
    ) || matches!(ty.kind(), Kind::Enum(_))
        || ty.name() == "citext"
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Int(_) => "integer",
        Value::Float(_) => "float",
        Value::Text(_) => "text",
        Value::Timestamp(_) => "timestamp",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn mismatch(value: &Value, ty: &Type) -> BoxError {
    format!("cannot bind {} value to parameter of type {}", kind_name(value), ty).into()
}

/// Text rendering used for text-typed targets.
fn text_of(value: &Value) -> String {
    match value {
        Value::Text(s) => s.clone(),
        Value::Timestamp(ts) => format::timestamp(ts),
        Value::Array(_) | Value::Object(_) => format::json(value),
        Value::Float(f) if f.is_nan() => "NaN".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Null => String::new(),
    }
}

fn int_of(value: &Value, ty: &Type) -> Result<i64, BoxError> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Ok(*f as i64),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::Text(s) => Ok(s.trim().parse()?),
        other => Err(mismatch(other, ty)),
    }
}

fn float_of(value: &Value, ty: &Type) -> Result<f64, BoxError> {
    match value {
        Value::Int(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        Value::Text(s) => Ok(s.trim().parse()?),
        other => Err(mismatch(other, ty)),
    }
}

fn bool_of(value: &Value, ty: &Type) -> Result<bool, BoxError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Int(i) => Ok(*i != 0),
        Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "t" | "true" | "yes" | "on" | "1" => Ok(true),
            "f" | "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(mismatch(value, ty)),
        },
        other => Err(mismatch(other, ty)),
    }
}

fn timestamp_of(value: &Value, ty: &Type) -> Result<DateTime<Utc>, BoxError> {
    match value {
        Value::Timestamp(ts) => Ok(*ts),
        Value::Text(s) => {
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Ok(ts.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
                return Ok(naive.and_utc());
            }
            let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")?;
            Ok(date.and_time(chrono::NaiveTime::MIN).and_utc())
        }
        other => Err(mismatch(other, ty)),
    }
}

fn decimal_of(value: &Value, ty: &Type) -> Result<Decimal, BoxError> {
    match value {
        Value::Int(i) => Ok(Decimal::from(*i)),
        Value::Float(f) => Ok(Decimal::try_from(*f)?),
        Value::Text(s) => {
            let s = s.trim();
            Ok(Decimal::from_str(s).or_else(|_| Decimal::from_scientific(s))?)
        }
        other => Err(mismatch(other, ty)),
    }
}

fn time_of(value: &Value, ty: &Type) -> Result<NaiveTime, BoxError> {
    match value {
        Value::Timestamp(ts) => Ok(ts.time()),
        Value::Text(s) => Ok(NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f")
            .or_else(|_| NaiveTime::parse_from_str(s.trim(), "%H:%M"))?),
        other => Err(mismatch(other, ty)),
    }
}

fn text_ref<'v>(value: &'v Value, ty: &Type) -> Result<&'v str, BoxError> {
    match value {
        Value::Text(s) => Ok(s.trim()),
        other => Err(mismatch(other, ty)),
    }
}

fn bits_of(value: &Value, ty: &Type) -> Result<BitVec, BoxError> {
    let text = text_ref(value, ty)?;
    if !text.bytes().all(|b| b == b'0' || b == b'1') {
        return Err(format!("invalid bit string \"{text}\"").into());
    }
    let bytes = text.as_bytes();
    Ok(BitVec::from_fn(bytes.len(), |i| bytes[i] == b'1'))
}

/// Sign word of a binary `NUMERIC` marking NaN, which `Decimal` cannot hold.
fn is_numeric_nan(raw: &[u8]) -> bool {
    raw.get(4..6) == Some(&[0xC0, 0x00][..])
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        if self.is_null() {
            return Ok(IsNull::Yes);
        }

        match ty.kind() {
            Kind::Array(_) => {
                return match self {
                    Value::Array(items) => items.to_sql(ty, out),
                    other => Err(mismatch(other, ty)),
                };
            }
            Kind::Domain(inner) => return self.to_sql(inner, out),
            _ => {}
        }

        if is_text_type(ty) {
            out.put_slice(text_of(self).as_bytes());
            return Ok(IsNull::No);
        }

        match *ty {
            Type::BOOL => bool_of(self, ty)?.to_sql(ty, out),
            Type::INT2 => i16::try_from(int_of(self, ty)?)?.to_sql(ty, out),
            Type::INT4 => i32::try_from(int_of(self, ty)?)?.to_sql(ty, out),
            Type::INT8 => int_of(self, ty)?.to_sql(ty, out),
            Type::OID => u32::try_from(int_of(self, ty)?)?.to_sql(ty, out),
            Type::FLOAT4 => (float_of(self, ty)? as f32).to_sql(ty, out),
            Type::FLOAT8 => float_of(self, ty)?.to_sql(ty, out),
            Type::NUMERIC => decimal_of(self, ty)?.to_sql(ty, out),
            Type::JSON | Type::JSONB => {
                if *ty == Type::JSONB {
                    out.put_u8(1);
                }
                // Text is taken to be serialized JSON already.
                match self {
                    Value::Text(s) => out.put_slice(s.as_bytes()),
                    other => out.put_slice(format::json(other).as_bytes()),
                }
                Ok(IsNull::No)
            }
            Type::UUID => match self {
                Value::Text(s) => uuid::Uuid::parse_str(s.trim())?.to_sql(ty, out),
                other => Err(mismatch(other, ty)),
            },
            Type::TIMESTAMPTZ => timestamp_of(self, ty)?.to_sql(ty, out),
            Type::TIMESTAMP => timestamp_of(self, ty)?.naive_utc().to_sql(ty, out),
            Type::DATE => timestamp_of(self, ty)?.date_naive().to_sql(ty, out),
            Type::TIME => time_of(self, ty)?.to_sql(ty, out),
            Type::INET => IpInet::from_str(text_ref(self, ty)?)?.to_sql(ty, out),
            Type::CIDR => IpCidr::from_str(text_ref(self, ty)?)?.to_sql(ty, out),
            Type::MACADDR => MacAddress::parse_str(text_ref(self, ty)?)?.to_sql(ty, out),
            Type::BIT | Type::VARBIT => bits_of(self, ty)?.to_sql(ty, out),
            Type::BYTEA => match self {
                Value::Text(s) => s.as_bytes().to_sql(ty, out),
                other => Err(mismatch(other, ty)),
            },
            _ => Err(mismatch(self, ty)),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

impl<'a> FromSql<'a> for Value {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        match ty.kind() {
            Kind::Array(_) => return Ok(Value::Array(Vec::<Value>::from_sql(ty, raw)?)),
            Kind::Domain(inner) => return Value::from_sql(inner, raw),
            _ => {}
        }

        if is_text_type(ty) {
            return Ok(Value::Text(std::str::from_utf8(raw)?.to_string()));
        }

        let value = match *ty {
            Type::BOOL => Value::Bool(bool::from_sql(ty, raw)?),
            Type::INT2 => Value::Int(i64::from(i16::from_sql(ty, raw)?)),
            Type::INT4 => Value::Int(i64::from(i32::from_sql(ty, raw)?)),
            Type::INT8 => Value::Int(i64::from_sql(ty, raw)?),
            Type::OID => Value::Int(i64::from(u32::from_sql(ty, raw)?)),
            Type::FLOAT4 => Value::Float(f64::from(f32::from_sql(ty, raw)?)),
            Type::FLOAT8 => Value::Float(f64::from_sql(ty, raw)?),
            Type::NUMERIC if is_numeric_nan(raw) => Value::Float(f64::NAN),
            Type::NUMERIC => Value::Text(Decimal::from_sql(ty, raw)?.to_string()),
            Type::JSON | Type::JSONB => Value::from(serde_json::Value::from_sql(ty, raw)?),
            Type::UUID => Value::Text(uuid::Uuid::from_sql(ty, raw)?.to_string()),
            Type::TIMESTAMPTZ => Value::Timestamp(DateTime::<Utc>::from_sql(ty, raw)?),
            Type::TIMESTAMP => Value::Timestamp(NaiveDateTime::from_sql(ty, raw)?.and_utc()),
            Type::DATE => Value::Text(NaiveDate::from_sql(ty, raw)?.to_string()),
            Type::TIME => Value::Text(NaiveTime::from_sql(ty, raw)?.to_string()),
            Type::INET => Value::Text(IpInet::from_sql(ty, raw)?.to_string()),
            Type::CIDR => Value::Text(IpCidr::from_sql(ty, raw)?.to_string()),
            Type::MACADDR => Value::Text(MacAddress::from_sql(ty, raw)?.to_hex_string()),
            Type::BIT | Type::VARBIT => Value::Text(
                BitVec::from_sql(ty, raw)?
                    .iter()
                    .map(|bit| if bit { '1' } else { '0' })
                    .collect(),
            ),
            Type::BYTEA => Value::Text(hex(raw)),
            _ => {
                return Err(format!(
                    "unsupported column type {ty}; select it as text (\"col\"::text)"
                )
                .into());
            }
        };
        Ok(value)
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, BoxError> {
        Ok(Value::Null)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

fn hex(raw: &[u8]) -> String {
    let mut out = String::with_capacity(2 + raw.len() * 2);
    out.push_str("\\x");
    for byte in raw {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Decode a driver row into a [`Record`].
pub(crate) fn decode_row(row: &Row) -> OrmResult<Record> {
    let mut columns = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value: Value = row
            .try_get(idx)
            .map_err(|e| OrmError::decode(column.name(), e.to_string()))?;
        columns.insert(column.name(), value);
    }
    Ok(Record::new(columns))
}
