//! Conversion between [`Value`] and the Postgres wire format.
//!
//! Writing coerces a value to the parameter type the server inferred, so a
//! `SetDefault` literal such as `'0'` can land in an integer column and a
//! pseudonymized integer can land in a text column. Reading picks the Rust type
//! from the column's reported type.

use crate::error::DbError;
use crate::value::Value;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use postgres_types::{to_sql_checked, IsNull, ToSql, Type};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::error::Error;
use uuid::Uuid;

type BoxError = Box<dyn Error + Sync + Send>;

fn mismatch(value: &Value, ty: &Type) -> BoxError {
    format!("cannot bind {} value `{value}` to a {} parameter", value.type_name(), ty.name()).into()
}

impl Value {
    fn coerce_i64(&self, ty: &Type) -> Result<i64, BoxError> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(i64::from(*b)),
            Value::Decimal(d) if d.fract().is_zero() => d.to_i64().ok_or_else(|| mismatch(self, ty)),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Ok(*f as i64),
            Value::Text(s) => Ok(s.trim().parse::<i64>()?),
            _ => Err(mismatch(self, ty)),
        }
    }

    fn coerce_f64(&self, ty: &Type) -> Result<f64, BoxError> {
        match self {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            Value::Decimal(d) => d.to_f64().ok_or_else(|| mismatch(self, ty)),
            Value::Text(s) => Ok(s.trim().parse::<f64>()?),
            _ => Err(mismatch(self, ty)),
        }
    }

    fn coerce_decimal(&self, ty: &Type) -> Result<Decimal, BoxError> {
        match self {
            Value::Decimal(d) => Ok(*d),
            Value::Int(i) => Ok(Decimal::from(*i)),
            Value::Float(f) => Ok(Decimal::try_from(*f)?),
            Value::Text(s) => Ok(s.trim().parse::<Decimal>()?),
            _ => Err(mismatch(self, ty)),
        }
    }

    fn coerce_bool(&self, ty: &Type) -> Result<bool, BoxError> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "t" | "true" | "y" | "yes" | "on" | "1" => Ok(true),
                "f" | "false" | "n" | "no" | "off" | "0" => Ok(false),
                _ => Err(mismatch(self, ty)),
            },
            _ => Err(mismatch(self, ty)),
        }
    }

    fn coerce_timestamp(&self, ty: &Type) -> Result<NaiveDateTime, BoxError> {
        match self {
            Value::Timestamp(t) => Ok(*t),
            Value::TimestampTz(t) => Ok(t.naive_utc()),
            Value::Date(d) => d
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| mismatch(self, ty)),
            Value::Text(s) => parse_timestamp(s).ok_or_else(|| mismatch(self, ty)),
            _ => Err(mismatch(self, ty)),
        }
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|t| t.naive_utc()))
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        if self.is_null() {
            return Ok(IsNull::Yes);
        }
        match *ty {
            Type::INT2 => i16::try_from(self.coerce_i64(ty)?)?.to_sql(ty, out),
            Type::INT4 => i32::try_from(self.coerce_i64(ty)?)?.to_sql(ty, out),
            Type::INT8 => self.coerce_i64(ty)?.to_sql(ty, out),
            Type::FLOAT4 => (self.coerce_f64(ty)? as f32).to_sql(ty, out),
            Type::FLOAT8 => self.coerce_f64(ty)?.to_sql(ty, out),
            Type::NUMERIC => self.coerce_decimal(ty)?.to_sql(ty, out),
            Type::BOOL => self.coerce_bool(ty)?.to_sql(ty, out),
            Type::TIMESTAMP => self.coerce_timestamp(ty)?.to_sql(ty, out),
            Type::TIMESTAMPTZ => match self {
                Value::TimestampTz(t) => t.to_sql(ty, out),
                other => other.coerce_timestamp(ty)?.and_utc().to_sql(ty, out),
            },
            Type::DATE => self.coerce_timestamp(ty)?.date().to_sql(ty, out),
            Type::UUID => match self {
                Value::Uuid(u) => u.to_sql(ty, out),
                Value::Text(s) => Uuid::parse_str(s.trim())?.to_sql(ty, out),
                other => Err(mismatch(other, ty)),
            },
            Type::JSON | Type::JSONB => match self {
                Value::Json(j) => j.to_sql(ty, out),
                Value::Text(s) => serde_json::from_str::<serde_json::Value>(s)
                    .unwrap_or_else(|_| serde_json::Value::String(s.clone()))
                    .to_sql(ty, out),
                other => serde_json::Value::String(other.to_string()).to_sql(ty, out),
            },
            Type::BYTEA => match self {
                Value::Bytes(b) => b.as_slice().to_sql(ty, out),
                Value::Text(s) => s.as_bytes().to_sql(ty, out),
                other => Err(mismatch(other, ty)),
            },
            _ => {
                // text-like and anything bound through a `::text` cast
                let rendered = match self {
                    Value::Text(s) => s.clone(),
                    other => other.to_string(),
                };
                out.extend_from_slice(rendered.as_bytes());
                Ok(IsNull::No)
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Read column `idx` of a result row as a [`Value`]
///
/// # Errors
///
/// Returns `DbError::UnsupportedType` for a column type with no mapping and
/// `DbError::Query` if decoding fails.
pub fn value_from_row(row: &may_postgres::Row, idx: usize) -> Result<Value, DbError> {
    let ty = row
        .columns()
        .get(idx)
        .map(|c| c.type_().clone())
        .ok_or_else(|| DbError::Query(format!("result has no column {idx}")))?;
    let type_name = ty.name().to_string();
    let decode =
        |e: may_postgres::Error| DbError::Query(format!("cannot decode column {idx} ({type_name}): {e}"));

    let value = match ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx).map_err(decode)?.map(Value::Bool),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)
            .map_err(decode)?
            .map(|v| Value::Int(i64::from(v))),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)
            .map_err(decode)?
            .map(|v| Value::Int(i64::from(v))),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx).map_err(decode)?.map(Value::Int),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)
            .map_err(decode)?
            .map(|v| Value::Float(f64::from(v))),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx).map_err(decode)?.map(Value::Float),
        Type::NUMERIC => row
            .try_get::<_, Option<Decimal>>(idx)
            .map_err(decode)?
            .map(Value::Decimal),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => row
            .try_get::<_, Option<String>>(idx)
            .map_err(decode)?
            .map(Value::Text),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)
            .map_err(decode)?
            .map(Value::Date),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)
            .map_err(decode)?
            .map(Value::Timestamp),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)
            .map_err(decode)?
            .map(Value::TimestampTz),
        Type::UUID => row.try_get::<_, Option<Uuid>>(idx).map_err(decode)?.map(Value::Uuid),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .map_err(decode)?
            .map(Value::Json),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(idx)
            .map_err(decode)?
            .map(Value::Bytes),
        other => return Err(DbError::UnsupportedType(other.name().to_string())),
    };
    Ok(value.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bind(value: &Value, ty: &Type) -> Result<Vec<u8>, BoxError> {
        let mut out = BytesMut::new();
        match value.to_sql_checked(ty, &mut out)? {
            IsNull::Yes => Ok(Vec::new()),
            IsNull::No => Ok(out.to_vec()),
        }
    }

    #[test]
    fn test_text_literal_binds_to_integer_column() {
        let bytes = bind(&Value::Text(" 42 ".to_string()), &Type::INT4).unwrap();
        assert_eq!(bytes, 42i32.to_be_bytes().to_vec());
    }

    #[test]
    fn test_integer_binds_to_text_column() {
        let bytes = bind(&Value::Int(7), &Type::VARCHAR).unwrap();
        assert_eq!(bytes, b"7".to_vec());
    }

    #[test]
    fn test_null_binds_to_any_type() {
        let mut out = BytesMut::new();
        let is_null = Value::Null.to_sql_checked(&Type::UUID, &mut out).unwrap();
        assert!(matches!(is_null, IsNull::Yes));
    }

    #[test]
    fn test_overflow_is_rejected() {
        assert!(bind(&Value::Int(i64::from(i16::MAX) + 1), &Type::INT2).is_err());
    }

    #[test]
    fn test_garbage_text_is_rejected_for_uuid() {
        assert!(bind(&Value::Text("not-a-uuid".to_string()), &Type::UUID).is_err());
    }

    #[test]
    fn test_parse_timestamp_accepts_common_forms() {
        assert!(parse_timestamp("2024-02-29 13:45:00").is_some());
        assert!(parse_timestamp("2024-02-29T13:45:00.123").is_some());
        assert!(parse_timestamp("2024-02-29").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }
}
