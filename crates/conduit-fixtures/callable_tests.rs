//! Callable Statement Tests
//!
//! Functions and procedures invoked through the `{call ...}` escape, with
//! IN, OUT and INOUT parameters and returned result sets.

use crate::fixtures::{FixtureConnection, fixture_conn};
use anyhow::{Context, Result};
use conduit_core::{
    ConduitError, ParameterSpec, ProcedureDef, RoutineParameter, RowCursor, SqlType,
    StatementSpec, Value, extract,
};
use pretty_assertions::assert_eq;
use rstest::rstest;

fn procedure_call(name: &str) -> Result<StatementSpec> {
    Ok(StatementSpec::builder("{call PROCEDURE_TEST(?,?)}")
        .param(ParameterSpec::in_out("inOutName", SqlType::Varchar(100), name))
        .param(ParameterSpec::output("outId", SqlType::Integer))
        .build()?)
}

/// A function called without a return placeholder hands back a result set
#[rstest]
fn test_call_function_returning_result_set(fixture_conn: FixtureConnection) -> Result<()> {
    let spec = StatementSpec::builder("{call FUNCTION_TEST(?)}")
        .param(ParameterSpec::input(SqlType::Char(100), "test"))
        .returning_result_set("result")
        .build()?;

    let mut out = fixture_conn.template().call(&spec)?;
    let rows = out.take_result_set("result").context("missing result set")?;
    let first = |cursor: &mut RowCursor| -> conduit_core::Result<i64> {
        match cursor.next() {
            Some(row) => row.get_as(0),
            None => Ok(0),
        }
    };

    assert_eq!(extract(rows, &first)?, 4);
    Ok(())
}

#[rstest]
fn test_call_function_with_return_placeholder(fixture_conn: FixtureConnection) -> Result<()> {
    let spec = StatementSpec::builder("{? = call FUNCTION_TEST(?)}")
        .param(ParameterSpec::returned(SqlType::Integer))
        .param(ParameterSpec::input(SqlType::Char(100), "test"))
        .build()?;

    let out = fixture_conn.template().call(&spec)?;

    assert_eq!(out.at(1), Some(&Value::Int32(4)));
    Ok(())
}

/// The function is usable anywhere an expression is
#[rstest]
fn test_function_in_query(fixture_conn: FixtureConnection) -> Result<()> {
    fixture_conn.execute_sql("INSERT INTO test(name) VALUES ('abcdef')")?;
    let length: i64 = fixture_conn.template().query_for_object(&StatementSpec::new(
        "SELECT FUNCTION_TEST(name) FROM test",
    )?)?;
    assert_eq!(length, 6);
    Ok(())
}

#[rstest]
fn test_call_procedure_with_inout_and_out(fixture_conn: FixtureConnection) -> Result<()> {
    let out = fixture_conn.template().call(&procedure_call("test")?)?;

    assert_eq!(out.get("inOutName"), Some(&Value::from("Hello,test")));
    assert_eq!(out.get_as::<i64>("outId")?, 1);
    assert_eq!(fixture_conn.row_count()?, 1);
    Ok(())
}

/// The OUT identity follows the generated row ids
#[rstest]
fn test_procedure_identity_is_monotonic(fixture_conn: FixtureConnection) -> Result<()> {
    let template = fixture_conn.template();
    let first = template.call(&procedure_call("first")?)?;
    let second = template.call(&procedure_call("second")?)?;

    let first_id: i64 = first.get_as("outId")?;
    let second_id: i64 = second.get_as("outId")?;
    assert_eq!((first_id, second_id), (1, 2));
    assert_eq!(second.get_as::<String>("inOutName")?, "Hello,second");

    let stored: String = template.query_for_object(
        &StatementSpec::with_values("SELECT name FROM test WHERE id = ?", [second_id])?,
    )?;
    assert_eq!(stored, "second");
    Ok(())
}

#[rstest]
fn test_out_values_are_keyed_case_insensitively(fixture_conn: FixtureConnection) -> Result<()> {
    let out = fixture_conn.template().call(&procedure_call("x")?)?;
    assert_eq!(out.get("INOUTNAME"), out.get("inOutName"));
    assert_eq!(out.at(2), out.get("outId"));
    Ok(())
}

/// CHAR outputs come back padded to their declared width
#[rstest]
fn test_char_output_keeps_padding(fixture_conn: FixtureConnection) -> Result<()> {
    let routines = fixture_conn.routines().context("routines")?;
    routines.create_procedure(ProcedureDef::new(
        "PAD_TEST",
        vec![
            RoutineParameter::input("value", SqlType::Varchar(8)),
            RoutineParameter::output("padded", SqlType::Char(8)),
        ],
        |ctx| {
            let value = ctx.arg("value")?.clone();
            ctx.set("padded", value)
        },
    ))?;

    let spec = StatementSpec::builder("{call PAD_TEST(?, ?)}")
        .param(ParameterSpec::named_input("value", SqlType::Varchar(8), "abc"))
        .param(ParameterSpec::output("padded", SqlType::Char(8)))
        .build()?;
    let out = fixture_conn.template().call(&spec)?;

    let padded: String = out.get_as("padded")?;
    assert_eq!(padded, "abc     ");
    assert_eq!(padded.trim_end(), "abc");
    Ok(())
}

#[rstest]
fn test_oversized_inout_value_is_a_binding_error(fixture_conn: FixtureConnection) -> Result<()> {
    let too_long = "x".repeat(101);
    let err = fixture_conn
        .template()
        .call(&procedure_call(&too_long)?)
        .err()
        .context("call should fail")?;

    assert!(err.is_binding_error(), "{}", err);
    assert_eq!(fixture_conn.row_count()?, 0);
    Ok(())
}

#[rstest]
fn test_unknown_routine_keeps_sql_state(fixture_conn: FixtureConnection) -> Result<()> {
    let spec = StatementSpec::with_values("{call NO_SUCH_ROUTINE(?)}", ["x"])?;
    let err = fixture_conn
        .template()
        .call(&spec)
        .err()
        .context("call should fail")?;

    assert!(matches!(err, ConduitError::Execution { .. }), "{}", err);
    assert_eq!(err.sql_state(), Some("42000"));
    Ok(())
}

#[rstest]
fn test_failing_procedure_leaves_no_rows(fixture_conn: FixtureConnection) -> Result<()> {
    let routines = fixture_conn.routines().context("routines")?;
    routines.create_procedure(ProcedureDef::new(
        "INSERT_THEN_FAIL",
        vec![RoutineParameter::input("name", SqlType::Varchar(100))],
        |ctx| {
            let name = ctx.arg("name")?.clone();
            ctx.execute("INSERT INTO test(name) VALUES (?)", &[name])?;
            ctx.execute("INSERT INTO missing_table VALUES (1)", &[])?;
            Ok(())
        },
    ))?;

    let spec = StatementSpec::with_values("{call INSERT_THEN_FAIL(?)}", ["doomed"])?;
    let err = fixture_conn
        .template()
        .call(&spec)
        .err()
        .context("call should fail")?;

    assert_eq!(err.sql_state(), Some("42000"));
    assert_eq!(fixture_conn.row_count()?, 0);
    Ok(())
}

#[rstest]
fn test_dropped_function_is_gone(fixture_conn: FixtureConnection) -> Result<()> {
    let routines = fixture_conn.routines().context("routines")?;
    assert!(routines.drop_function("function_test")?);
    assert!(!routines.drop_function("function_test")?);

    let spec = StatementSpec::builder("{? = call FUNCTION_TEST(?)}")
        .param(ParameterSpec::returned(SqlType::Integer))
        .param(ParameterSpec::input(SqlType::Char(100), "test"))
        .build()?;
    assert!(fixture_conn.template().call(&spec).is_err());
    Ok(())
}
