//! Database-agnostic type mappings.
//!
//! Decodes driver rows into [`Row`]s of [`Value`]s.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders handle the actual value extraction
//!
//! SQLite columns carry no enforced type, so its decoder dispatches on the
//! storage class of each value and uses the declared type only to refine it.

use crate::models::{DatabaseType, Row, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row as _, Type, TypeInfo, ValueRef};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Date,
    Time,
    DateTime,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Names that would otherwise match the "int" check below
    if lower == "interval" || lower == "point" {
        return TypeCategory::Text;
    }

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if db == DatabaseType::SQLite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    // Integer types
    if lower.contains("int")
        || lower.contains("serial")
        || lower.contains("tiny")
        || lower == "year"
    {
        return TypeCategory::Integer;
    }

    // Boolean
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    // Float types
    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    // JSON types
    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    // UUID (PostgreSQL)
    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    // Date/time, most specific first ("datetime" contains "date" and "time")
    if lower.contains("timestamp") || lower.contains("datetime") {
        return TypeCategory::DateTime;
    }
    if lower == "date" {
        return TypeCategory::Date;
    }
    if lower.starts_with("time") {
        return TypeCategory::Time;
    }

    // Binary types
    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") || lower == "name" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => pg_numeric_to_string(value.as_bytes()?)
                .map(RawDecimal)
                .ok_or_else(|| "malformed binary NUMERIC value".into()),
        }
    }
}

const PG_NUMERIC_NEG: u16 = 0x4000;
const PG_NUMERIC_NAN: u16 = 0xC000;
const PG_NUMERIC_PINF: u16 = 0xD000;
const PG_NUMERIC_NINF: u16 = 0xF000;

/// Render PostgreSQL's binary NUMERIC (base-10000 digit groups) as text.
fn pg_numeric_to_string(bytes: &[u8]) -> Option<String> {
    let read = |at: usize| -> Option<i16> {
        bytes
            .get(at..at + 2)
            .map(|b| i16::from_be_bytes([b[0], b[1]]))
    };

    let ndigits = usize::try_from(read(0)?).ok()?;
    let weight = read(2)? as i32;
    let sign = read(4)? as u16;
    let dscale = read(6)? as u16 as usize;

    match sign {
        PG_NUMERIC_NAN => return Some("NaN".to_string()),
        PG_NUMERIC_PINF => return Some("Infinity".to_string()),
        PG_NUMERIC_NINF => return Some("-Infinity".to_string()),
        _ => {}
    }

    let digits: Vec<i16> = (0..ndigits)
        .map(|i| read(8 + i * 2))
        .collect::<Option<_>>()?;
    // Group i has weight (weight - i); positions outside the stored digits are zero.
    let group = |pos: i32| -> i16 {
        usize::try_from(pos)
            .ok()
            .and_then(|p| digits.get(p).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == PG_NUMERIC_NEG {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        for pos in 0..=weight {
            if pos == 0 {
                out.push_str(&group(pos).to_string());
            } else {
                out.push_str(&format!("{:04}", group(pos)));
            }
        }
    }

    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut pos = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", group(pos)));
            pos += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }

    Some(out)
}

fn text_or_json(s: String) -> Value {
    match serde_json::from_str::<JsonValue>(&s) {
        Ok(json) => Value::Json(json),
        Err(_) => Value::Text(s),
    }
}

// =============================================================================
// Row Decoding Trait
// =============================================================================

/// Trait for converting database rows to [`Row`]s.
pub trait RowToValues {
    /// Column name to value, in result-set order.
    fn to_row(&self) -> Row;
}

impl RowToValues for MySqlRow {
    fn to_row(&self) -> Row {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, DatabaseType::MySQL);
                let value = mysql::decode_column(self, idx, type_name, category);
                (col.name().to_string(), value)
            })
            .collect()
    }
}

impl RowToValues for PgRow {
    fn to_row(&self) -> Row {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, DatabaseType::PostgreSQL);
                let value = postgres::decode_column(self, idx, type_name, category);
                (col.name().to_string(), value)
            })
            .collect()
    }
}

impl RowToValues for SqliteRow {
    fn to_row(&self) -> Row {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), DatabaseType::SQLite);
                let value = sqlite::decode_column(self, idx, category);
                (col.name().to_string(), value)
            })
            .collect()
    }
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

/// Keep a decoded value, or log the failure and read the column another way.
fn decoded_or_else<E: std::fmt::Display>(
    decoded: Result<Value, E>,
    column: usize,
    sql_type: &str,
    fallback: impl FnOnce() -> Value,
) -> Value {
    decoded.unwrap_or_else(|e| {
        tracing::warn!(
            column,
            sql_type,
            error = %e,
            "Failed to decode column, falling back to text"
        );
        fallback()
    })
}

mod mysql {
    use super::*;

    pub fn decode_column(
        row: &MySqlRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
    ) -> Value {
        match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return Value::Null,
            Err(e) => {
                tracing::error!(column = idx, "Failed to read MySQL column: {:?}", e);
                return Value::Null;
            }
            _ => {}
        }

        match category {
            TypeCategory::Decimal => decode_decimal(row, idx, type_name),
            TypeCategory::Integer => decode_integer(row, idx, type_name),
            TypeCategory::Boolean => decode_boolean(row, idx, type_name),
            TypeCategory::Float => decode_float(row, idx, type_name),
            TypeCategory::Binary => decode_binary(row, idx, type_name),
            TypeCategory::Json => decode_json(row, idx, type_name),
            TypeCategory::Date => decode_temporal::<NaiveDate>(row, idx, type_name, Value::Date),
            TypeCategory::Time => decode_temporal::<NaiveTime>(row, idx, type_name, Value::Time),
            TypeCategory::DateTime => {
                decode_temporal::<NaiveDateTime>(row, idx, type_name, Value::DateTime)
            }
            _ => decode_text(row, idx, type_name),
        }
    }

    fn decode_decimal(row: &MySqlRow, idx: usize, type_name: &str) -> Value {
        decoded_or_else(
            row.try_get::<RawDecimal, _>(idx).map(|v| Value::Text(v.0)),
            idx,
            type_name,
            || decode_text(row, idx, type_name),
        )
    }

    fn decode_integer(row: &MySqlRow, idx: usize, type_name: &str) -> Value {
        // Try signed types
        if let Ok(v) = row.try_get::<i8, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(v) = row.try_get::<i16, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(v) = row.try_get::<i32, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return Value::Int(v);
        }
        // Try unsigned types
        if let Ok(v) = row.try_get::<u8, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(v) = row.try_get::<u16, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(v) = row.try_get::<u32, _>(idx) {
            return Value::Int(v.into());
        }
        // BIGINT UNSIGNED above i64::MAX keeps its digits as text
        decoded_or_else(
            row.try_get::<u64, _>(idx).map(|v| {
                i64::try_from(v)
                    .map(Value::Int)
                    .unwrap_or_else(|_| Value::Text(v.to_string()))
            }),
            idx,
            type_name,
            || decode_text(row, idx, type_name),
        )
    }

    fn decode_boolean(row: &MySqlRow, idx: usize, type_name: &str) -> Value {
        decoded_or_else(
            row.try_get::<bool, _>(idx).map(Value::Bool),
            idx,
            type_name,
            || decode_text(row, idx, type_name),
        )
    }

    fn decode_float(row: &MySqlRow, idx: usize, type_name: &str) -> Value {
        if let Ok(v) = row.try_get::<f64, _>(idx) {
            return Value::Float(v);
        }
        decoded_or_else(
            row.try_get::<f32, _>(idx).map(|v| Value::Float(v.into())),
            idx,
            type_name,
            || decode_text(row, idx, type_name),
        )
    }

    fn decode_binary(row: &MySqlRow, idx: usize, type_name: &str) -> Value {
        decoded_or_else(
            row.try_get::<Vec<u8>, _>(idx).map(Value::Bytes),
            idx,
            type_name,
            || decode_text(row, idx, type_name),
        )
    }

    fn decode_json(row: &MySqlRow, idx: usize, type_name: &str) -> Value {
        decoded_or_else(
            row.try_get::<JsonValue, _>(idx).map(Value::Json),
            idx,
            type_name,
            || decode_text(row, idx, type_name),
        )
    }

    fn decode_temporal<'r, T>(
        row: &'r MySqlRow,
        idx: usize,
        type_name: &str,
        wrap: fn(T) -> Value,
    ) -> Value
    where
        T: Decode<'r, sqlx::MySql> + Type<sqlx::MySql>,
    {
        match row.try_get::<T, _>(idx) {
            Ok(v) => wrap(v),
            // e.g. TIME values outside 00:00..24:00 or zero dates
            Err(_) => decode_text(row, idx, type_name),
        }
    }

    fn decode_text(row: &MySqlRow, idx: usize, type_name: &str) -> Value {
        if let Ok(v) = row.try_get::<String, _>(idx) {
            // Check if this might be JSON
            if type_name.to_lowercase().contains("json") {
                return text_or_json(v);
            }
            return Value::Text(v);
        }
        if let Ok(v) = row.try_get_unchecked::<Vec<u8>, _>(idx) {
            return match String::from_utf8(v) {
                Ok(s) => Value::Text(s),
                Err(e) => Value::Bytes(e.into_bytes()),
            };
        }
        Value::Null
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(
        row: &PgRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
    ) -> Value {
        match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return Value::Null,
            Err(e) => {
                tracing::error!(column = idx, "Failed to read PostgreSQL column: {:?}", e);
                return Value::Null;
            }
            _ => {}
        }

        match category {
            TypeCategory::Decimal => decode_decimal(row, idx, type_name),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx, type_name),
            TypeCategory::Float => decode_float(row, idx, type_name),
            TypeCategory::Binary => decode_binary(row, idx, type_name),
            TypeCategory::Json => decode_json(row, idx, type_name),
            TypeCategory::Uuid => decode_uuid(row, idx),
            TypeCategory::Date => row
                .try_get::<NaiveDate, _>(idx)
                .map(Value::Date)
                .unwrap_or_else(|_| decode_text(row, idx)),
            TypeCategory::Time => row
                .try_get::<NaiveTime, _>(idx)
                .map(Value::Time)
                .unwrap_or_else(|_| decode_text(row, idx)),
            TypeCategory::DateTime => decode_timestamp(row, idx, type_name),
            _ => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &PgRow, idx: usize, type_name: &str) -> Value {
        decoded_or_else(
            row.try_get::<RawDecimal, _>(idx).map(|v| Value::Text(v.0)),
            idx,
            type_name,
            || decode_text(row, idx),
        )
    }

    fn decode_integer(row: &PgRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<i16, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(v) = row.try_get::<i32, _>(idx) {
            return Value::Int(v.into());
        }
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return Value::Int(v);
        }
        decode_text(row, idx)
    }

    fn decode_boolean(row: &PgRow, idx: usize, type_name: &str) -> Value {
        decoded_or_else(
            row.try_get::<bool, _>(idx).map(Value::Bool),
            idx,
            type_name,
            || decode_text(row, idx),
        )
    }

    fn decode_float(row: &PgRow, idx: usize, type_name: &str) -> Value {
        if let Ok(v) = row.try_get::<f64, _>(idx) {
            return Value::Float(v);
        }
        decoded_or_else(
            row.try_get::<f32, _>(idx).map(|v| Value::Float(v.into())),
            idx,
            type_name,
            || decode_text(row, idx),
        )
    }

    fn decode_binary(row: &PgRow, idx: usize, type_name: &str) -> Value {
        decoded_or_else(
            row.try_get::<Vec<u8>, _>(idx).map(Value::Bytes),
            idx,
            type_name,
            || decode_text(row, idx),
        )
    }

    fn decode_json(row: &PgRow, idx: usize, type_name: &str) -> Value {
        decoded_or_else(
            row.try_get::<JsonValue, _>(idx).map(Value::Json),
            idx,
            type_name,
            || decode_text(row, idx),
        )
    }

    fn decode_timestamp(row: &PgRow, idx: usize, type_name: &str) -> Value {
        if type_name.eq_ignore_ascii_case("timestamptz") {
            if let Ok(v) = row.try_get::<DateTime<Utc>, _>(idx) {
                return Value::DateTime(v.naive_utc());
            }
        } else if let Ok(v) = row.try_get::<NaiveDateTime, _>(idx) {
            return Value::DateTime(v);
        }
        // +/-infinity and friends
        decode_text(row, idx)
    }

    fn decode_uuid(row: &PgRow, idx: usize) -> Value {
        let Ok(raw) = row.try_get_raw(idx) else {
            return Value::Null;
        };
        match raw.format() {
            PgValueFormat::Text => raw
                .as_str()
                .map(|s| Value::Text(s.to_string()))
                .unwrap_or(Value::Null),
            PgValueFormat::Binary => match raw.as_bytes() {
                Ok(bytes) if bytes.len() == 16 => Value::Text(format_uuid(bytes)),
                _ => Value::Null,
            },
        }
    }

    fn decode_text(row: &PgRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<String, _>(idx) {
            return Value::Text(v);
        }
        // Types without a Rust mapping still arrive as text from simple queries
        match row.try_get_raw(idx) {
            Ok(raw) if matches!(raw.format(), PgValueFormat::Text) => raw
                .as_str()
                .map(|s| Value::Text(s.to_string()))
                .unwrap_or(Value::Null),
            Ok(raw) => raw
                .as_bytes()
                .map(|b| Value::Bytes(b.to_vec()))
                .unwrap_or(Value::Null),
            Err(_) => Value::Null,
        }
    }
}

/// Hyphenated lowercase form of a 16-byte UUID.
fn format_uuid(bytes: &[u8]) -> String {
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

mod sqlite {
    use super::*;

    pub fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> Value {
        let storage_class = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return Value::Null,
            Ok(raw) => raw.type_info().name().to_string(),
            Err(e) => {
                tracing::error!(column = idx, "Failed to read SQLite column: {:?}", e);
                return Value::Null;
            }
        };

        match storage_class.as_str() {
            "INTEGER" => decode_integer(row, idx, category),
            "REAL" => row
                .try_get_unchecked::<f64, _>(idx)
                .map(Value::Float)
                .unwrap_or(Value::Null),
            "BLOB" => row
                .try_get_unchecked::<Vec<u8>, _>(idx)
                .map(Value::Bytes)
                .unwrap_or(Value::Null),
            _ => decode_text(row, idx, category),
        }
    }

    fn decode_integer(row: &SqliteRow, idx: usize, category: TypeCategory) -> Value {
        match row.try_get_unchecked::<i64, _>(idx) {
            Ok(v) if category == TypeCategory::Boolean => Value::Bool(v != 0),
            Ok(v) => Value::Int(v),
            Err(_) => Value::Null,
        }
    }

    fn decode_text(row: &SqliteRow, idx: usize, category: TypeCategory) -> Value {
        let Ok(text) = row.try_get_unchecked::<String, _>(idx) else {
            return Value::Null;
        };
        match category {
            TypeCategory::Date => NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                .map(Value::Date)
                .unwrap_or(Value::Text(text)),
            TypeCategory::Time => NaiveTime::parse_from_str(&text, "%H:%M:%S%.f")
                .map(Value::Time)
                .unwrap_or(Value::Text(text)),
            TypeCategory::DateTime => parse_datetime(&text)
                .map(Value::DateTime)
                .unwrap_or(Value::Text(text)),
            TypeCategory::Json => text_or_json(text),
            _ => Value::Text(text),
        }
    }

    fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
        ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
            .or_else(|| {
                DateTime::parse_from_rfc3339(text)
                    .ok()
                    .map(|dt| dt.naive_utc())
            })
    }
}
