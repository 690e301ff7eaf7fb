//! Statement, parameter and batch specifications
//!
//! Specs are built once per call and never mutated afterwards. Placeholder
//! resolution happens at build time so that a statement which builds successfully
//! always knows which declared parameter feeds which bind position.

use crate::sql::{ParsedSql, Placeholder, StatementKind, parse_placeholders};
use crate::{ConduitError, Result, SqlType, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Directionality of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterDirection {
    In,
    Out,
    InOut,
}

impl ParameterDirection {
    pub fn is_input(&self) -> bool {
        matches!(self, ParameterDirection::In | ParameterDirection::InOut)
    }

    pub fn is_output(&self) -> bool {
        matches!(self, ParameterDirection::Out | ParameterDirection::InOut)
    }
}

/// Identity of a parameter: its name, or its 1-based position when unnamed.
///
/// Position 0 designates the statement as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ParameterId {
    Position(usize),
    Name(String),
}

impl ParameterId {
    /// Key used for the parameter in output maps
    pub fn key(&self) -> String {
        match self {
            ParameterId::Position(p) => format!("#{}", p),
            ParameterId::Name(n) => n.clone(),
        }
    }
}

impl std::fmt::Display for ParameterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParameterId::Position(0) => write!(f, "statement"),
            ParameterId::Position(p) => write!(f, "parameter #{}", p),
            ParameterId::Name(n) => write!(f, "parameter '{}'", n),
        }
    }
}

impl From<usize> for ParameterId {
    fn from(position: usize) -> Self {
        ParameterId::Position(position)
    }
}

impl From<&str> for ParameterId {
    fn from(name: &str) -> Self {
        ParameterId::Name(name.to_string())
    }
}

impl From<String> for ParameterId {
    fn from(name: String) -> Self {
        ParameterId::Name(name)
    }
}

/// Declaration of one statement parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    name: Option<String>,
    sql_type: SqlType,
    direction: ParameterDirection,
    value: Option<Value>,
}

impl ParameterSpec {
    /// IN parameter with a value
    pub fn input(sql_type: SqlType, value: impl Into<Value>) -> Self {
        Self {
            name: None,
            sql_type,
            direction: ParameterDirection::In,
            value: Some(value.into()),
        }
    }

    /// Named IN parameter with a value
    pub fn named_input(name: &str, sql_type: SqlType, value: impl Into<Value>) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::input(sql_type, value)
        }
    }

    /// IN parameter declared without a value (batch templates)
    pub fn typed(sql_type: SqlType) -> Self {
        Self {
            name: None,
            sql_type,
            direction: ParameterDirection::In,
            value: None,
        }
    }

    /// Named IN parameter declared without a value (batch templates)
    pub fn named(name: &str, sql_type: SqlType) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::typed(sql_type)
        }
    }

    /// OUT parameter; the value is produced by the callee
    pub fn output(name: &str, sql_type: SqlType) -> Self {
        Self {
            name: Some(name.to_string()),
            sql_type,
            direction: ParameterDirection::Out,
            value: None,
        }
    }

    /// Unnamed OUT parameter, such as the return placeholder of `{? = call F(?)}`
    pub fn returned(sql_type: SqlType) -> Self {
        Self {
            name: None,
            sql_type,
            direction: ParameterDirection::Out,
            value: None,
        }
    }

    /// INOUT parameter with an initial value
    pub fn in_out(name: &str, sql_type: SqlType, value: impl Into<Value>) -> Self {
        Self {
            name: Some(name.to_string()),
            sql_type,
            direction: ParameterDirection::InOut,
            value: Some(value.into()),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn sql_type(&self) -> SqlType {
        self.sql_type
    }

    pub fn direction(&self) -> ParameterDirection {
        self.direction
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Identity of this parameter when bound at `position`
    pub fn id(&self, position: usize) -> ParameterId {
        match &self.name {
            Some(n) => ParameterId::Name(n.clone()),
            None => ParameterId::Position(position),
        }
    }

    fn matches_name(&self, name: &str) -> bool {
        self.name.as_deref() == Some(name)
    }

    fn matches_name_loosely(&self, name: &str) -> bool {
        self.name
            .as_deref()
            .is_some_and(|n| n.eq_ignore_ascii_case(name))
    }
}

/// Link between a bind position and the declared parameter feeding it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedBinding {
    /// 1-based bind position
    pub position: usize,
    /// Index into the declared parameter list
    pub parameter: usize,
}

#[derive(Debug)]
struct SpecInner {
    sql: String,
    parsed: ParsedSql,
    kind: StatementKind,
    parameters: Vec<ParameterSpec>,
    bindings: Vec<ResolvedBinding>,
    result_sets: Vec<String>,
}

/// SQL text plus its ordered parameter declarations. Immutable once built.
#[derive(Debug, Clone)]
pub struct StatementSpec {
    inner: Arc<SpecInner>,
}

impl StatementSpec {
    pub fn builder(sql: impl Into<String>) -> StatementSpecBuilder {
        StatementSpecBuilder {
            sql: sql.into(),
            kind: None,
            parameters: Vec::new(),
            result_sets: Vec::new(),
        }
    }

    /// Statement without declared parameters; placeholders become untyped IN parameters
    pub fn new(sql: impl Into<String>) -> Result<Self> {
        Self::builder(sql).build()
    }

    /// Statement whose positional placeholders take the given values in order
    pub fn with_values<I, V>(sql: impl Into<String>, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::builder(sql)
            .params(
                values
                    .into_iter()
                    .map(|v| ParameterSpec::input(SqlType::Unknown, v)),
            )
            .build()
    }

    /// SQL as written by the caller
    pub fn sql(&self) -> &str {
        &self.inner.sql
    }

    /// SQL handed to the engine, with named placeholders rewritten
    pub fn engine_sql(&self) -> &str {
        &self.inner.parsed.sql
    }

    pub fn kind(&self) -> StatementKind {
        self.inner.kind
    }

    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.inner.parameters
    }

    /// Bind positions in ascending order
    pub fn bindings(&self) -> &[ResolvedBinding] {
        &self.inner.bindings
    }

    pub fn placeholder_count(&self) -> usize {
        self.inner.parsed.parameter_count()
    }

    /// Names under which returned result sets are exposed
    pub fn result_set_names(&self) -> &[String] {
        &self.inner.result_sets
    }
}

/// Builder for [`StatementSpec`]
#[derive(Debug)]
pub struct StatementSpecBuilder {
    sql: String,
    kind: Option<StatementKind>,
    parameters: Vec<ParameterSpec>,
    result_sets: Vec<String>,
}

impl StatementSpecBuilder {
    pub fn param(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn params(mut self, parameters: impl IntoIterator<Item = ParameterSpec>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    /// Override the kind inferred from the leading keyword
    pub fn kind(mut self, kind: StatementKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Name the next result set returned by a callable statement
    pub fn returning_result_set(mut self, name: &str) -> Self {
        self.result_sets.push(name.to_string());
        self
    }

    pub fn build(self) -> Result<StatementSpec> {
        let parsed = parse_placeholders(&self.sql)?;
        let kind = self.kind.unwrap_or_else(|| StatementKind::detect(&self.sql));

        let parameters = if self.parameters.is_empty() {
            infer_parameters(&parsed)
        } else {
            self.parameters
        };

        if kind != StatementKind::Callable {
            if let Some((idx, p)) = parameters
                .iter()
                .enumerate()
                .find(|(_, p)| p.direction().is_output())
            {
                return Err(ConduitError::binding(
                    p.id(idx + 1),
                    "OUT and INOUT parameters are only valid for callable statements",
                ));
            }
        }

        let bindings = resolve_bindings(&parsed, &parameters)?;

        Ok(StatementSpec {
            inner: Arc::new(SpecInner {
                sql: self.sql,
                parsed,
                kind,
                parameters,
                bindings,
                result_sets: self.result_sets,
            }),
        })
    }
}

fn infer_parameters(parsed: &ParsedSql) -> Vec<ParameterSpec> {
    if parsed.uses_named() {
        parsed
            .names()
            .into_iter()
            .map(|name| ParameterSpec::named(name, SqlType::Unknown))
            .collect()
    } else {
        (0..parsed.parameter_count())
            .map(|_| ParameterSpec::typed(SqlType::Unknown))
            .collect()
    }
}

fn resolve_bindings(
    parsed: &ParsedSql,
    parameters: &[ParameterSpec],
) -> Result<Vec<ResolvedBinding>> {
    if parsed.uses_named() {
        parsed
            .placeholders
            .iter()
            .enumerate()
            .map(|(idx, placeholder)| {
                let Placeholder::Named(name) = placeholder else {
                    unreachable!("mixed placeholders are rejected while parsing");
                };
                let parameter = parameters
                    .iter()
                    .position(|p| p.matches_name(name))
                    .or_else(|| parameters.iter().position(|p| p.matches_name_loosely(name)))
                    .ok_or_else(|| {
                        ConduitError::binding(
                            name.as_str(),
                            "placeholder has no declared parameter",
                        )
                    })?;
                Ok(ResolvedBinding {
                    position: idx + 1,
                    parameter,
                })
            })
            .collect()
    } else {
        if parsed.parameter_count() != parameters.len() {
            return Err(ConduitError::binding(
                ParameterId::Position(0),
                format!(
                    "statement has {} placeholders but {} parameters were declared",
                    parsed.parameter_count(),
                    parameters.len()
                ),
            ));
        }
        Ok((0..parameters.len())
            .map(|idx| ResolvedBinding {
                position: idx + 1,
                parameter: idx,
            })
            .collect())
    }
}

/// Values for one execution of a statement template
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterSet {
    /// Values in declared parameter order
    Positional(Vec<Value>),
    /// Values keyed by parameter name
    Named(IndexMap<String, Value>),
}

impl ParameterSet {
    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        ParameterSet::Positional(values.into_iter().map(Into::into).collect())
    }

    pub fn named<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        ParameterSet::Named(
            values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Named set built from the fields of any serializable record
    pub fn from_serialize<T: Serialize + ?Sized>(record: &T) -> Result<Self> {
        match serde_json::to_value(record)? {
            serde_json::Value::Object(fields) => Ok(ParameterSet::Named(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            )),
            other => Err(ConduitError::Mapping(format!(
                "parameter source must serialize to a map, got {}",
                other
            ))),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ParameterSet::Positional(v) => v.len(),
            ParameterSet::Named(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value supplied for the declared parameter at `index`
    pub fn value_for(&self, index: usize, parameter: &ParameterSpec) -> Option<&Value> {
        match self {
            ParameterSet::Positional(values) => values.get(index),
            ParameterSet::Named(map) => {
                let name = parameter.name()?;
                map.get(name).or_else(|| {
                    map.iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case(name))
                        .map(|(_, v)| v)
                })
            }
        }
    }
}

/// A statement template repeated over a sequence of parameter sets
#[derive(Debug, Clone)]
pub struct BatchSpec {
    template: StatementSpec,
    sets: Vec<ParameterSet>,
}

impl BatchSpec {
    /// Build a batch, checking that every set supplies every input parameter
    pub fn new(template: StatementSpec, sets: Vec<ParameterSet>) -> Result<Self> {
        if template.kind() == StatementKind::Query {
            return Err(ConduitError::NotSupported(
                "queries cannot be executed as a batch".into(),
            ));
        }
        if let Some((idx, p)) = template
            .parameters()
            .iter()
            .enumerate()
            .find(|(_, p)| p.direction().is_output())
        {
            return Err(ConduitError::binding(
                p.id(idx + 1),
                "batch templates cannot declare OUT or INOUT parameters",
            ));
        }

        for (member, set) in sets.iter().enumerate() {
            if let ParameterSet::Positional(values) = set {
                if values.len() > template.parameters().len() {
                    return Err(ConduitError::binding(
                        ParameterId::Position(0),
                        format!(
                            "batch member {} supplies {} values for {} parameters",
                            member,
                            values.len(),
                            template.parameters().len()
                        ),
                    ));
                }
            }
            for (idx, parameter) in template.parameters().iter().enumerate() {
                if parameter.direction().is_input() && set.value_for(idx, parameter).is_none() {
                    return Err(ConduitError::binding(
                        parameter.id(idx + 1),
                        format!("batch member {} supplies no value", member),
                    ));
                }
            }
        }

        Ok(Self { template, sets })
    }

    /// Build a batch of `count` members, asking `setter` for each member's values
    pub fn from_fn<F>(template: StatementSpec, count: usize, mut setter: F) -> Result<Self>
    where
        F: FnMut(usize) -> Result<ParameterSet>,
    {
        let sets = (0..count).map(&mut setter).collect::<Result<Vec<_>>>()?;
        Self::new(template, sets)
    }

    pub fn template(&self) -> &StatementSpec {
        &self.template
    }

    pub fn sets(&self) -> &[ParameterSet] {
        &self.sets
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}
