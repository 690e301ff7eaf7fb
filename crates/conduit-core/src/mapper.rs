//! Result mapping
//!
//! Rows are handed to mappers one at a time through a forward-only cursor.
//! Out-parameter values are coerced to their declared SQL type; fixed-width
//! CHAR values keep their padding.

use crate::{
    CallOutput, ConduitError, FromValue, Result, Row, RowCursor, RowSet, StatementSpec, Value,
};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

/// Maps one row to a value
pub trait RowMapper<T> {
    /// `index` is the 0-based row number within the result
    fn map_row(&self, row: &Row, index: usize) -> Result<T>;
}

impl<T, F> RowMapper<T> for F
where
    F: Fn(&Row, usize) -> Result<T>,
{
    fn map_row(&self, row: &Row, index: usize) -> Result<T> {
        self(row, index)
    }
}

/// Consumes a whole cursor and produces one value
pub trait ResultSetExtractor<T> {
    fn extract(&self, cursor: &mut RowCursor) -> Result<T>;
}

impl<T, F> ResultSetExtractor<T> for F
where
    F: Fn(&mut RowCursor) -> Result<T>,
{
    fn extract(&self, cursor: &mut RowCursor) -> Result<T> {
        self(cursor)
    }
}

/// Maps the first column of each row through [`FromValue`]
#[derive(Debug)]
pub struct SingleColumn<T>(PhantomData<fn() -> T>);

impl<T> SingleColumn<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for SingleColumn<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: FromValue> RowMapper<T> for SingleColumn<T> {
    fn map_row(&self, row: &Row, _index: usize) -> Result<T> {
        row.get_as(0)
    }
}

/// Deserializes each row into a record, matching columns to field names
#[derive(Debug)]
pub struct SerdeRowMapper<T>(PhantomData<fn() -> T>);

impl<T> SerdeRowMapper<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for SerdeRowMapper<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> RowMapper<T> for SerdeRowMapper<T> {
    fn map_row(&self, row: &Row, _index: usize) -> Result<T> {
        let record: serde_json::Map<String, serde_json::Value> = row
            .columns()
            .iter()
            .zip(row.values.iter())
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        Ok(serde_json::from_value(serde_json::Value::Object(record))?)
    }
}

/// Lazy, single-pass iterator of mapped rows
pub struct MappedRows<M, T> {
    cursor: RowCursor,
    mapper: M,
    _marker: PhantomData<fn() -> T>,
}

impl<M, T> std::fmt::Debug for MappedRows<M, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRows")
            .field("position", &self.cursor.position())
            .field("remaining", &self.cursor.remaining())
            .finish()
    }
}

impl<M: RowMapper<T>, T> Iterator for MappedRows<M, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        let index = self.cursor.position();
        let row = self.cursor.next()?;
        Some(self.mapper.map_row(&row, index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.cursor.size_hint()
    }
}

/// Map a row set lazily. Each row is mapped only when the iterator reaches it.
///
/// Laziness covers mapping only: the rows were read from the engine when
/// the query ran.
pub fn map_rows<M, T>(row_set: RowSet, mapper: M) -> MappedRows<M, T>
where
    M: RowMapper<T>,
{
    MappedRows {
        cursor: row_set.into_cursor(),
        mapper,
        _marker: PhantomData,
    }
}

/// Run an extractor over a row set
pub fn extract<E, T>(row_set: RowSet, extractor: &E) -> Result<T>
where
    E: ResultSetExtractor<T> + ?Sized,
{
    let mut cursor = row_set.into_cursor();
    extractor.extract(&mut cursor)
}

/// Output of a callable statement: OUT/INOUT values and returned result sets.
///
/// Values are keyed by parameter name, or `#<position>` for unnamed
/// parameters. Result sets are keyed by their declared name or
/// `#result-set-<n>`.
#[derive(Debug, Default)]
pub struct OutParameters {
    values: IndexMap<String, Value>,
    positions: Vec<(usize, String)>,
    result_sets: IndexMap<String, RowSet>,
}

impl OutParameters {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).or_else(|| {
            self.values
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
    }

    pub fn get_as<T: FromValue>(&self, key: &str) -> Result<T> {
        let value = self
            .get(key)
            .ok_or_else(|| ConduitError::Mapping(format!("no output parameter '{}'", key)))?;
        T::from_value(value)
    }

    /// Value bound at a 1-based placeholder position
    pub fn at(&self, position: usize) -> Option<&Value> {
        self.positions
            .iter()
            .find(|(p, _)| *p == position)
            .and_then(|(_, key)| self.values.get(key))
    }

    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn result_set_names(&self) -> impl Iterator<Item = &str> {
        self.result_sets.keys().map(String::as_str)
    }

    /// Take ownership of a returned result set
    pub fn take_result_set(&mut self, name: &str) -> Option<RowSet> {
        self.result_sets.shift_remove(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.result_sets.is_empty()
    }
}

/// Key out values by parameter identity and coerce them to their declared type
pub fn map_out_parameters(output: CallOutput, spec: &StatementSpec) -> Result<OutParameters> {
    let mut out = OutParameters::default();

    for binding in spec.bindings() {
        let parameter = &spec.parameters()[binding.parameter];
        if !parameter.direction().is_output() {
            continue;
        }
        let key = parameter.id(binding.position).key();
        out.positions.push((binding.position, key.clone()));
        if out.values.contains_key(&key) {
            continue;
        }

        let raw = output.value_at(binding.position).cloned().ok_or_else(|| {
            ConduitError::Mapping(format!(
                "engine returned no value for output position {}",
                binding.position
            ))
        })?;
        let value = parameter.sql_type().coerce(raw)?;
        out.values.insert(key, value);
    }

    let names = spec.result_set_names();
    for (idx, row_set) in output.result_sets.into_iter().enumerate() {
        let name = names
            .get(idx)
            .cloned()
            .unwrap_or_else(|| format!("#result-set-{}", idx + 1));
        out.result_sets.insert(name, row_set);
    }

    Ok(out)
}
