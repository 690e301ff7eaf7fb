//! SQL type descriptors used for parameter declarations
//!
//! Type codes follow the standard JDBC numbering so that declarations carry
//! the same meaning across engines.

use crate::{ConduitError, Result, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Declared SQL type of a parameter or routine argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Boolean,
    Real,
    Double,
    Decimal,
    /// Fixed-width character string, padded with spaces to the width
    Char(u32),
    /// Variable-width character string with a maximum width
    Varchar(u32),
    LongVarchar,
    /// Fixed-width binary string
    Binary(u32),
    Varbinary,
    Date,
    Time,
    Timestamp,
    Uuid,
    Json,
    /// Type resolved from the supplied value
    Unknown,
}

impl SqlType {
    /// Standard numeric type code
    pub fn type_code(&self) -> i32 {
        match self {
            SqlType::TinyInt => -6,
            SqlType::SmallInt => 5,
            SqlType::Integer => 4,
            SqlType::BigInt => -5,
            SqlType::Boolean => 16,
            SqlType::Real => 7,
            SqlType::Double => 8,
            SqlType::Decimal => 3,
            SqlType::Char(_) => 1,
            SqlType::Varchar(_) => 12,
            SqlType::LongVarchar => -1,
            SqlType::Binary(_) => -2,
            SqlType::Varbinary => -3,
            SqlType::Date => 91,
            SqlType::Time => 92,
            SqlType::Timestamp => 93,
            SqlType::Uuid | SqlType::Json => 1111,
            SqlType::Unknown => i32::MIN,
        }
    }

    /// Resolve a standard type code. Width-carrying types get the given width.
    pub fn from_type_code(code: i32, width: u32) -> Option<Self> {
        let ty = match code {
            -6 => SqlType::TinyInt,
            5 => SqlType::SmallInt,
            4 => SqlType::Integer,
            -5 => SqlType::BigInt,
            16 | -7 => SqlType::Boolean,
            7 => SqlType::Real,
            6 | 8 => SqlType::Double,
            2 | 3 => SqlType::Decimal,
            1 => SqlType::Char(width),
            12 => SqlType::Varchar(width),
            -1 => SqlType::LongVarchar,
            -2 => SqlType::Binary(width),
            -3 | -4 => SqlType::Varbinary,
            91 => SqlType::Date,
            92 => SqlType::Time,
            93 => SqlType::Timestamp,
            i32::MIN => SqlType::Unknown,
            _ => return None,
        };
        Some(ty)
    }

    /// Type family named by a declared column type.
    ///
    /// Only families that an engine may hand back as plain text or integers
    /// are recognised; everything else is left to the engine's own typing.
    pub fn from_declared(declared: &str) -> Option<Self> {
        let declared = declared.to_ascii_uppercase();
        let ty = if declared.contains("BOOL") {
            SqlType::Boolean
        } else if declared.contains("TIMESTAMP") || declared.contains("DATETIME") {
            SqlType::Timestamp
        } else if declared.contains("DATE") {
            SqlType::Date
        } else if declared.contains("TIME") {
            SqlType::Time
        } else if declared.contains("UUID") {
            SqlType::Uuid
        } else if declared.contains("JSON") {
            SqlType::Json
        } else if declared.contains("DECIMAL") || declared.contains("NUMERIC") {
            SqlType::Decimal
        } else {
            return None;
        };
        Some(ty)
    }

    pub fn is_character(&self) -> bool {
        matches!(
            self,
            SqlType::Char(_) | SqlType::Varchar(_) | SqlType::LongVarchar
        )
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            SqlType::TinyInt | SqlType::SmallInt | SqlType::Integer | SqlType::BigInt
        )
    }

    fn integer_range(&self) -> (i64, i64) {
        match self {
            SqlType::TinyInt => (i8::MIN as i64, i8::MAX as i64),
            SqlType::SmallInt => (i16::MIN as i64, i16::MAX as i64),
            SqlType::Integer => (i32::MIN as i64, i32::MAX as i64),
            _ => (i64::MIN, i64::MAX),
        }
    }

    /// Check whether a value can be bound to a parameter of this type.
    ///
    /// Returns a description of the mismatch when it cannot.
    pub fn check(&self, value: &Value) -> std::result::Result<(), String> {
        if value.is_null() || *self == SqlType::Unknown {
            return Ok(());
        }
        let compatible = match self {
            SqlType::TinyInt | SqlType::SmallInt | SqlType::Integer | SqlType::BigInt => {
                match value {
                    Value::Int32(_) | Value::Int64(_) => {
                        let (min, max) = self.integer_range();
                        let v = value.as_i64().unwrap_or_default();
                        if v < min || v > max {
                            return Err(format!("value {} is out of range for {}", v, self));
                        }
                        true
                    }
                    _ => false,
                }
            }
            SqlType::Boolean => matches!(value, Value::Bool(_)),
            SqlType::Real | SqlType::Double => {
                matches!(value, Value::Float64(_) | Value::Int32(_) | Value::Int64(_))
            }
            SqlType::Decimal => match value {
                Value::Decimal(_) | Value::Float64(_) | Value::Int32(_) | Value::Int64(_) => true,
                Value::String(s) => s.trim().parse::<f64>().is_ok(),
                _ => false,
            },
            SqlType::Char(width) | SqlType::Varchar(width) => match value {
                Value::String(s) => {
                    let len = s.chars().count();
                    if len > *width as usize {
                        return Err(format!(
                            "string of length {} exceeds declared width of {}",
                            len, self
                        ));
                    }
                    true
                }
                _ => false,
            },
            SqlType::LongVarchar => matches!(value, Value::String(_)),
            SqlType::Binary(width) => match value {
                Value::Bytes(b) => {
                    if b.len() > *width as usize {
                        return Err(format!(
                            "{} bytes exceed declared width of {}",
                            b.len(),
                            self
                        ));
                    }
                    true
                }
                _ => false,
            },
            SqlType::Varbinary => matches!(value, Value::Bytes(_)),
            SqlType::Date => matches!(value, Value::Date(_)),
            SqlType::Time => matches!(value, Value::Time(_)),
            SqlType::Timestamp => matches!(value, Value::DateTime(_) | Value::DateTimeUtc(_)),
            SqlType::Uuid => matches!(value, Value::Uuid(_)),
            SqlType::Json => matches!(value, Value::Json(_) | Value::String(_)),
            SqlType::Unknown => true,
        };
        if compatible {
            Ok(())
        } else {
            Err(format!(
                "{} value is not compatible with declared type {}",
                value.type_name(),
                self
            ))
        }
    }

    /// Whether a value can be bound to a parameter of this type
    pub fn accepts(&self, value: &Value) -> bool {
        self.check(value).is_ok()
    }

    /// Coerce a raw engine value to this declared type.
    ///
    /// CHAR(n) values are right-padded to n characters and never trimmed.
    pub fn coerce(&self, value: Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let coerced = match self {
            SqlType::Unknown => value,
            SqlType::TinyInt | SqlType::SmallInt | SqlType::Integer | SqlType::BigInt => {
                let wide = value
                    .as_i64()
                    .ok_or_else(|| coercion_error(&value, self))?;
                let (min, max) = self.integer_range();
                if wide < min || wide > max {
                    return Err(coercion_error(&value, self));
                }
                if *self == SqlType::BigInt {
                    Value::Int64(wide)
                } else {
                    Value::Int32(wide as i32)
                }
            }
            SqlType::Boolean => Value::Bool(
                value
                    .as_bool()
                    .ok_or_else(|| coercion_error(&value, self))?,
            ),
            SqlType::Real | SqlType::Double => Value::Float64(
                value.as_f64().ok_or_else(|| coercion_error(&value, self))?,
            ),
            SqlType::Decimal => match value {
                Value::Decimal(_) => value,
                Value::Int32(_) | Value::Int64(_) | Value::Float64(_) => {
                    Value::Decimal(value.to_string())
                }
                Value::String(s) if s.trim().parse::<f64>().is_ok() => {
                    Value::Decimal(s.trim().to_string())
                }
                other => return Err(coercion_error(&other, self)),
            },
            SqlType::Char(width) => {
                let text = character_text(value, self)?;
                Value::String(pad_to_width(text, *width))
            }
            SqlType::Varchar(_) | SqlType::LongVarchar => {
                Value::String(character_text(value, self)?)
            }
            SqlType::Binary(_) | SqlType::Varbinary => match value {
                Value::Bytes(_) => value,
                Value::String(s) => Value::Bytes(s.into_bytes()),
                other => return Err(coercion_error(&other, self)),
            },
            SqlType::Date => match value {
                Value::Date(_) => value,
                Value::String(ref s) => Value::Date(
                    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                        .map_err(|_| coercion_error(&value, self))?,
                ),
                other => return Err(coercion_error(&other, self)),
            },
            SqlType::Time => match value {
                Value::Time(_) => value,
                Value::String(ref s) => Value::Time(
                    NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f")
                        .map_err(|_| coercion_error(&value, self))?,
                ),
                other => return Err(coercion_error(&other, self)),
            },
            SqlType::Timestamp => match value {
                Value::DateTime(_) | Value::DateTimeUtc(_) => value,
                Value::String(ref s) => parse_timestamp(s.trim())
                    .ok_or_else(|| coercion_error(&value, self))?,
                other => return Err(coercion_error(&other, self)),
            },
            SqlType::Uuid => match value {
                Value::Uuid(_) => value,
                Value::String(ref s) => Value::Uuid(
                    uuid::Uuid::parse_str(s.trim()).map_err(|_| coercion_error(&value, self))?,
                ),
                other => return Err(coercion_error(&other, self)),
            },
            SqlType::Json => match value {
                Value::Json(_) => value,
                Value::String(ref s) => Value::Json(serde_json::from_str(s)?),
                other => Value::Json(other.to_json()),
            },
        };
        Ok(coerced)
    }
}

impl std::fmt::Display for SqlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlType::TinyInt => write!(f, "TINYINT"),
            SqlType::SmallInt => write!(f, "SMALLINT"),
            SqlType::Integer => write!(f, "INTEGER"),
            SqlType::BigInt => write!(f, "BIGINT"),
            SqlType::Boolean => write!(f, "BOOLEAN"),
            SqlType::Real => write!(f, "REAL"),
            SqlType::Double => write!(f, "DOUBLE"),
            SqlType::Decimal => write!(f, "DECIMAL"),
            SqlType::Char(n) => write!(f, "CHAR({})", n),
            SqlType::Varchar(n) => write!(f, "VARCHAR({})", n),
            SqlType::LongVarchar => write!(f, "LONGVARCHAR"),
            SqlType::Binary(n) => write!(f, "BINARY({})", n),
            SqlType::Varbinary => write!(f, "VARBINARY"),
            SqlType::Date => write!(f, "DATE"),
            SqlType::Time => write!(f, "TIME"),
            SqlType::Timestamp => write!(f, "TIMESTAMP"),
            SqlType::Uuid => write!(f, "UUID"),
            SqlType::Json => write!(f, "JSON"),
            SqlType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

fn coercion_error(value: &Value, target: &SqlType) -> ConduitError {
    ConduitError::Mapping(format!(
        "cannot coerce {} value '{}' to {}",
        value.type_name(),
        value,
        target
    ))
}

fn character_text(value: Value, target: &SqlType) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        Value::Bytes(b) => String::from_utf8(b)
            .map_err(|e| ConduitError::Mapping(format!("invalid UTF-8 for {}: {}", target, e))),
        other => Ok(other.to_string()),
    }
}

fn pad_to_width(mut text: String, width: u32) -> String {
    let len = text.chars().count();
    let width = width as usize;
    if len < width {
        text.extend(std::iter::repeat_n(' ', width - len));
    }
    text
}

fn parse_timestamp(s: &str) -> Option<Value> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(Value::DateTimeUtc(dt.with_timezone(&chrono::Utc)));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(Value::DateTime)
}
