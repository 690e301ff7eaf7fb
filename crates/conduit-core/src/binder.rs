//! Parameter binding
//!
//! Prepares a statement on a connection and attaches every declared
//! parameter to its bind position. IN and INOUT values are type-checked
//! against their declaration; OUT and INOUT positions are registered with
//! their SQL type before execution.

use crate::{
    ConduitError, Connection, ParameterId, ParameterSet, ParameterSpec, Result, Statement,
    StatementSpec, Value,
};

/// A prepared statement with its parameters attached.
///
/// Dropping it releases the underlying engine statement.
pub struct BoundStatement<'c> {
    statement: Box<dyn Statement + 'c>,
    spec: StatementSpec,
}

impl<'c> BoundStatement<'c> {
    pub fn spec(&self) -> &StatementSpec {
        &self.spec
    }

    pub(crate) fn statement_mut(&mut self) -> &mut (dyn Statement + 'c) {
        self.statement.as_mut()
    }
}

impl std::fmt::Debug for BoundStatement<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundStatement")
            .field("sql", &self.spec.sql())
            .finish_non_exhaustive()
    }
}

/// Maps declared parameters onto engine bind positions
#[derive(Debug, Default, Clone, Copy)]
pub struct ParameterBinder;

impl ParameterBinder {
    pub fn new() -> Self {
        Self
    }

    /// Prepare `spec` on `conn` and bind every declared parameter
    #[tracing::instrument(skip(self, spec, conn), fields(sql_preview = %sql_preview(spec.sql())))]
    pub fn bind<'c>(&self, spec: &StatementSpec, conn: &'c dyn Connection) -> Result<BoundStatement<'c>> {
        let mut bound = self.prepare(spec, conn)?;
        let statement = bound.statement_mut();

        for binding in spec.bindings() {
            let parameter = &spec.parameters()[binding.parameter];
            let id = parameter.id(binding.position);

            if parameter.direction().is_input() {
                let value = parameter
                    .value()
                    .ok_or_else(|| ConduitError::binding(id.clone(), "no value supplied"))?;
                bind_checked(statement, binding.position, parameter, &id, value)?;
            }
            if parameter.direction().is_output() {
                statement.register_out(binding.position, parameter.sql_type())?;
            }
        }

        tracing::trace!(bindings = spec.bindings().len(), "parameters bound");
        Ok(bound)
    }

    /// Prepare a batch template without binding any values
    pub fn prepare<'c>(&self, spec: &StatementSpec, conn: &'c dyn Connection) -> Result<BoundStatement<'c>> {
        let statement = conn.prepare(spec.engine_sql(), spec.kind())?;

        let expected = spec.placeholder_count();
        let actual = statement.parameter_count();
        if actual != expected {
            return Err(ConduitError::binding(
                ParameterId::Position(0),
                format!(
                    "engine reports {} bind positions but the statement has {} placeholders",
                    actual, expected
                ),
            ));
        }

        Ok(BoundStatement {
            statement,
            spec: spec.clone(),
        })
    }

    /// Type-check one parameter set against `spec` without touching a statement
    pub fn check_set(&self, spec: &StatementSpec, set: &ParameterSet, member: usize) -> Result<()> {
        for binding in spec.bindings() {
            let parameter = &spec.parameters()[binding.parameter];
            let id = parameter.id(binding.position);
            let value = member_value(set, binding.parameter, parameter, &id, member)?;
            parameter.sql_type().check(value).map_err(|message| {
                ConduitError::binding(id, format!("batch member {}: {}", member, message))
            })?;
        }
        Ok(())
    }

    /// Bind one parameter set onto a prepared template
    pub fn bind_set(
        &self,
        bound: &mut BoundStatement<'_>,
        set: &ParameterSet,
        member: usize,
    ) -> Result<()> {
        let spec = bound.spec.clone();
        let statement = bound.statement_mut();

        for binding in spec.bindings() {
            let parameter = &spec.parameters()[binding.parameter];
            let id = parameter.id(binding.position);
            let value = member_value(set, binding.parameter, parameter, &id, member)?;
            bind_checked(statement, binding.position, parameter, &id, value)?;
        }
        Ok(())
    }
}

fn member_value<'s>(
    set: &'s ParameterSet,
    index: usize,
    parameter: &ParameterSpec,
    id: &ParameterId,
    member: usize,
) -> Result<&'s Value> {
    set.value_for(index, parameter).ok_or_else(|| {
        ConduitError::binding(id.clone(), format!("batch member {} supplies no value", member))
    })
}

fn bind_checked<S: Statement + ?Sized>(
    statement: &mut S,
    position: usize,
    parameter: &ParameterSpec,
    id: &ParameterId,
    value: &Value,
) -> Result<()> {
    parameter
        .sql_type()
        .check(value)
        .map_err(|message| ConduitError::binding(id.clone(), message))?;
    statement.bind(position, value)
}

pub(crate) fn sql_preview(sql: &str) -> String {
    sql.chars().take(100).collect()
}
