//! Conversions between conduit values and SQLite storage values

use conduit_core::{ColumnMeta, Result, Row, RowSet, SqlType, Value};
use rusqlite::params_from_iter;
use rusqlite::types::{Value as SqliteValue, ValueRef};
use std::sync::Arc;

use crate::error::map_error;

pub(crate) fn values_to_rusqlite(values: &[Value]) -> Vec<SqliteValue> {
    values.iter().map(value_to_rusqlite).collect()
}

pub(crate) fn value_to_rusqlite(value: &Value) -> SqliteValue {
    match value {
        Value::Null => SqliteValue::Null,
        Value::Bool(b) => SqliteValue::Integer(i64::from(*b)),
        Value::Int32(i) => SqliteValue::Integer(i64::from(*i)),
        Value::Int64(i) => SqliteValue::Integer(*i),
        Value::Float64(f) => SqliteValue::Real(*f),
        Value::Decimal(d) => SqliteValue::Text(d.clone()),
        Value::String(s) => SqliteValue::Text(s.clone()),
        Value::Bytes(b) => SqliteValue::Blob(b.clone()),
        Value::Uuid(u) => SqliteValue::Text(u.to_string()),
        Value::Date(d) => SqliteValue::Text(d.to_string()),
        Value::Time(t) => SqliteValue::Text(t.to_string()),
        Value::DateTime(dt) => SqliteValue::Text(dt.to_string()),
        Value::DateTimeUtc(dt) => SqliteValue::Text(dt.to_rfc3339()),
        Value::Json(j) => SqliteValue::Text(j.to_string()),
    }
}

pub(crate) fn value_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

/// Decode a stored value by its column's declared type.
///
/// SQLite keeps dates, times, timestamps, UUIDs, JSON and decimals as text or
/// numbers and booleans as integers; the declared type brings them back as the
/// values that were written. A stored value that does not parse as its
/// declared type is returned as stored.
pub(crate) fn column_value(raw: Value, declared: Option<SqlType>) -> Value {
    match declared {
        Some(sql_type) => sql_type.coerce(raw.clone()).unwrap_or(raw),
        None => raw,
    }
}

/// Run a prepared query and materialize its rows.
///
/// Every row is read before the row set is returned.
pub(crate) fn collect_rows(
    stmt: &mut rusqlite::Statement<'_>,
    params: &[SqliteValue],
) -> Result<RowSet> {
    let columns: Vec<ColumnMeta> = stmt
        .columns()
        .iter()
        .enumerate()
        .map(|(ordinal, col)| ColumnMeta {
            name: col.name().to_string(),
            data_type: col.decl_type().unwrap_or("DYNAMIC").to_string(),
            ordinal,
        })
        .collect();
    let names: Arc<[String]> = columns.iter().map(|c| c.name.clone()).collect();
    let declared: Vec<Option<SqlType>> = columns
        .iter()
        .map(|c| SqlType::from_declared(&c.data_type))
        .collect();

    let mut rows = Vec::new();
    let mut query_rows = stmt.query(params_from_iter(params.iter())).map_err(map_error)?;
    while let Some(row) = query_rows.next().map_err(map_error)? {
        let values = declared
            .iter()
            .enumerate()
            .map(|(idx, declared)| {
                row.get_ref(idx)
                    .map(|value| column_value(value_from_ref(value), *declared))
                    .map_err(map_error)
            })
            .collect::<Result<Vec<_>>>()?;
        rows.push(Row::new(names.clone(), values));
    }

    Ok(RowSet::new(columns, rows))
}
