//! Owned dynamic value used for feature attributes.
//!
//! `Value` is a closed set of variants. Conversions between declared column
//! types go through [`try_convert`], which is total: every pair either has a
//! defined result or returns `None`.

use crate::error::{AppendError, Result};
use crate::types::ColumnType;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use std::fmt;

const DATE_FORMAT: &str = "%Y-%m-%d";
// cf. https://www.geopackage.org/spec140/index.html#_sqlite_container
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Boolean(_) => "boolean",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
            Value::Blob(_) => "blob",
        }
    }

    /// Build a value from a raw SQLite cell, using the declared column type to
    /// recover booleans and dates that SQLite stores as integers and text.
    pub(crate) fn from_sql(value_ref: ValueRef<'_>, column_type: ColumnType) -> Self {
        match value_ref {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => match column_type {
                ColumnType::Boolean => Value::Boolean(i != 0),
                ColumnType::Double => Value::Real(i as f64),
                _ => Value::Integer(i),
            },
            ValueRef::Real(r) => Value::Real(r),
            ValueRef::Text(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                let parsed = match column_type {
                    ColumnType::Date => parse_date(&text).map(Value::Date),
                    ColumnType::DateTime => parse_datetime(&text).map(Value::DateTime),
                    _ => None,
                };
                parsed.unwrap_or_else(|| Value::Text(text.into_owned()))
            }
            ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Real(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Date(v) => write!(f, "{}", v.format(DATE_FORMAT)),
            Value::DateTime(v) => write!(f, "{}", v.format(DATETIME_FORMAT)),
            Value::Blob(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

/// Convert `value` so that it is comparable with values of `target` type.
///
/// Returns `None` when the pair has no defined conversion or when this
/// particular value cannot be represented (for example, `"abc"` as an
/// integer, or `2.5` as an integer).
pub fn try_convert(value: &Value, target: ColumnType) -> Option<Value> {
    use ColumnType as T;

    match (value, target) {
        (Value::Null, _) => Some(Value::Null),

        (Value::Integer(v), T::Integer) => Some(Value::Integer(*v)),
        (Value::Integer(v), T::Double) => Some(Value::Real(*v as f64)),
        (Value::Integer(v), T::Varchar) => Some(Value::Text(v.to_string())),
        (Value::Integer(v), T::Boolean) => Some(Value::Boolean(*v != 0)),

        (Value::Real(v), T::Double) => Some(Value::Real(*v)),
        (Value::Real(v), T::Integer) => real_to_integer(*v).map(Value::Integer),
        (Value::Real(v), T::Varchar) => Some(Value::Text(v.to_string())),
        (Value::Real(v), T::Boolean) => Some(Value::Boolean(*v != 0.0)),

        (Value::Text(v), T::Varchar) => Some(Value::Text(v.clone())),
        (Value::Text(v), T::Integer) => v.trim().parse().ok().map(Value::Integer),
        (Value::Text(v), T::Double) => v.trim().parse().ok().map(Value::Real),
        (Value::Text(v), T::Boolean) => parse_bool(v).map(Value::Boolean),
        (Value::Text(v), T::Date) => parse_date(v).map(Value::Date),
        (Value::Text(v), T::DateTime) => parse_datetime(v).map(Value::DateTime),
        (Value::Text(v), T::Blob) => Some(Value::Blob(v.as_bytes().to_vec())),

        (Value::Boolean(v), T::Boolean) => Some(Value::Boolean(*v)),
        (Value::Boolean(v), T::Integer) => Some(Value::Integer(i64::from(*v))),
        (Value::Boolean(v), T::Double) => Some(Value::Real(f64::from(u8::from(*v)))),
        (Value::Boolean(v), T::Varchar) => Some(Value::Text(v.to_string())),

        (Value::Date(v), T::Date) => Some(Value::Date(*v)),
        (Value::Date(v), T::DateTime) => Some(Value::DateTime(v.and_time(NaiveTime::MIN))),
        (Value::Date(v), T::Varchar) => Some(Value::Text(v.format(DATE_FORMAT).to_string())),

        (Value::DateTime(v), T::DateTime) => Some(Value::DateTime(*v)),
        (Value::DateTime(v), T::Date) => Some(Value::Date(v.date())),
        (Value::DateTime(v), T::Varchar) => {
            Some(Value::Text(v.format(DATETIME_FORMAT).to_string()))
        }

        (Value::Blob(v), T::Blob) => Some(Value::Blob(v.clone())),
        (Value::Blob(v), T::Varchar) => String::from_utf8(v.clone()).ok().map(Value::Text),

        _ => None,
    }
}

fn real_to_integer(v: f64) -> Option<i64> {
    // i64::MAX is not representable as f64; the upper bound is exclusive.
    if v.is_finite() && v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    let s = s.trim();
    if ["true", "1", "yes"].iter().any(|t| s.eq_ignore_ascii_case(t)) {
        Some(true)
    } else if ["false", "0", "no"].iter().any(|t| s.eq_ignore_ascii_case(t)) {
        Some(false)
    } else {
        None
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    let s = s.strip_suffix('Z').unwrap_or(s);
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let output = match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Integer(v) => ToSqlOutput::Owned(SqlValue::Integer(*v)),
            Value::Real(v) => ToSqlOutput::Owned(SqlValue::Real(*v)),
            Value::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Value::Boolean(v) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*v))),
            Value::Date(v) => ToSqlOutput::Owned(SqlValue::Text(v.format(DATE_FORMAT).to_string())),
            Value::DateTime(v) => {
                ToSqlOutput::Owned(SqlValue::Text(v.format(DATETIME_FORMAT).to_string()))
            }
            Value::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
        };
        Ok(output)
    }
}

macro_rules! impl_value_conversions {
    ($ty:ty, $variant:ident, $name:literal) => {
        impl From<$ty> for Value {
            fn from(value: $ty) -> Self {
                Value::$variant(value)
            }
        }

        impl From<Option<$ty>> for Value {
            fn from(value: Option<$ty>) -> Self {
                value.map_or(Value::Null, Value::$variant)
            }
        }

        impl TryFrom<Value> for $ty {
            type Error = AppendError;

            fn try_from(value: Value) -> Result<Self> {
                match value {
                    Value::$variant(v) => Ok(v),
                    other => Err(AppendError::ValueTypeMismatch {
                        expected: $name,
                        actual: other.type_name(),
                    }),
                }
            }
        }

        impl TryFrom<Value> for Option<$ty> {
            type Error = AppendError;

            fn try_from(value: Value) -> Result<Self> {
                match value {
                    Value::Null => Ok(None),
                    other => <$ty>::try_from(other).map(Some),
                }
            }
        }
    };
}

impl_value_conversions!(i64, Integer, "integer");
impl_value_conversions!(f64, Real, "real");
impl_value_conversions!(String, Text, "text");
impl_value_conversions!(bool, Boolean, "boolean");
impl_value_conversions!(NaiveDate, Date, "date");
impl_value_conversions!(NaiveDateTime, DateTime, "datetime");
impl_value_conversions!(Vec<u8>, Blob, "blob");

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl TryFrom<Value> for i32 {
    type Error = AppendError;

    fn try_from(value: Value) -> Result<Self> {
        let v = i64::try_from(value)?;
        i32::try_from(v).map_err(|_| AppendError::ValueOutOfRange { target: "i32" })
    }
}

#[cfg(test)]
mod tests {
    use super::{Value, try_convert};
    use crate::types::ColumnType;
    use chrono::NaiveDate;

    #[test]
    fn numbers_convert_to_text_the_way_they_print() {
        assert_eq!(
            try_convert(&Value::Integer(2), ColumnType::Varchar),
            Some(Value::Text("2".to_string()))
        );
        assert_eq!(
            try_convert(&Value::Real(2.0), ColumnType::Varchar),
            Some(Value::Text("2".to_string()))
        );
        assert_eq!(
            try_convert(&Value::Real(0.25), ColumnType::Varchar),
            Some(Value::Text("0.25".to_string()))
        );
    }

    #[test]
    fn text_parses_into_numbers_and_dates() {
        assert_eq!(
            try_convert(&Value::from(" 42 "), ColumnType::Integer),
            Some(Value::Integer(42))
        );
        assert_eq!(
            try_convert(&Value::from("0.1234"), ColumnType::Double),
            Some(Value::Real(0.1234))
        );
        assert_eq!(
            try_convert(&Value::from("1984-02-19"), ColumnType::Date),
            NaiveDate::from_ymd_opt(1984, 2, 19).map(Value::Date)
        );
        let dt = NaiveDate::from_ymd_opt(2020, 1, 2)
            .and_then(|d| d.and_hms_opt(3, 4, 5))
            .expect("valid datetime");
        for text in [
            "2020-01-02T03:04:05Z",
            "2020-01-02T03:04:05.000Z",
            "2020-01-02 03:04:05",
        ] {
            assert_eq!(
                try_convert(&Value::from(text), ColumnType::DateTime),
                Some(Value::DateTime(dt)),
                "{text}"
            );
        }
        assert_eq!(try_convert(&Value::from("abc"), ColumnType::Integer), None);
    }

    #[test]
    fn undefined_pairs_do_not_convert() {
        assert_eq!(try_convert(&Value::Integer(1), ColumnType::Date), None);
        assert_eq!(try_convert(&Value::Real(1.0), ColumnType::DateTime), None);
        assert_eq!(try_convert(&Value::Boolean(true), ColumnType::Blob), None);
        assert_eq!(try_convert(&Value::Blob(vec![0xff]), ColumnType::Varchar), None);
    }

    #[test]
    fn reals_become_integers_only_when_integral() {
        assert_eq!(
            try_convert(&Value::Real(3.0), ColumnType::Integer),
            Some(Value::Integer(3))
        );
        assert_eq!(try_convert(&Value::Real(2.5), ColumnType::Integer), None);
        assert_eq!(try_convert(&Value::Real(f64::NAN), ColumnType::Integer), None);
    }

    #[test]
    fn typed_accessors() -> crate::Result<()> {
        let name: String = Value::from("alpha").try_into()?;
        assert_eq!(name, "alpha");

        let maybe: Option<i64> = Value::Null.try_into()?;
        assert_eq!(maybe, None);

        let err = i64::try_from(Value::from("x")).expect_err("text is not integer");
        assert!(matches!(
            err,
            crate::AppendError::ValueTypeMismatch {
                expected: "integer",
                actual: "text"
            }
        ));
        Ok(())
    }
}
