//! Batch Tests
//!
//! Literal SQL batches, one template over many parameter sets, named
//! parameter sets built from records, and partial failure reporting.

use crate::fixtures::{FixtureConnection, fixture_conn};
use anyhow::{Context, Result};
use conduit_core::{
    BatchOptions, BatchPolicy, BatchSpec, ConduitError, ParameterSet, ParameterSpec, SqlTemplate,
    SqlType, StatementSpec,
};
use indoc::indoc;
use pretty_assertions::assert_eq;
use rstest::rstest;
use serde::Serialize;

#[derive(Serialize)]
struct UserModel {
    #[serde(rename = "myName")]
    my_name: String,
}

fn unique_names(conn: &FixtureConnection) -> Result<()> {
    conn.execute_sql(indoc! {"
        CREATE TABLE unique_names (
            name VARCHAR(100) NOT NULL UNIQUE
        )
    "})?;
    Ok(())
}

fn name_batch(names: &[&str]) -> Result<BatchSpec> {
    let template = StatementSpec::builder("INSERT INTO unique_names(name) VALUES (?)")
        .param(ParameterSpec::typed(SqlType::Varchar(100)))
        .build()?;
    let sets = names.iter().map(|n| ParameterSet::positional([*n])).collect();
    Ok(BatchSpec::new(template, sets)?)
}

fn expect_partial_failure(result: conduit_core::Result<Vec<u64>>) -> Result<conduit_core::BatchFailure> {
    match result {
        Err(ConduitError::BatchPartialFailure(failure)) => Ok(failure),
        other => anyhow::bail!("expected a partial batch failure, got {:?}", other),
    }
}

/// Two literal inserts submitted as one batch
#[rstest]
fn test_literal_sql_batch(fixture_conn: FixtureConnection) -> Result<()> {
    let insert = "insert into test(name) values('name5')";
    let counts = fixture_conn.template().batch_update_sql([insert, insert])?;

    assert_eq!(counts, vec![1, 1]);
    assert_eq!(fixture_conn.row_count()?, 2);
    Ok(())
}

/// One prepared template bound to two value sets through a setter callback
#[rstest]
fn test_parameterized_batch(fixture_conn: FixtureConnection) -> Result<()> {
    let values = ["name5", "name6"];
    let template = StatementSpec::builder("INSERT INTO test(name) VALUES(?)")
        .param(ParameterSpec::typed(SqlType::Varchar(100)))
        .build()?;
    let batch = BatchSpec::from_fn(template, values.len(), |i| {
        Ok(ParameterSet::positional([values[i]]))
    })?;

    let counts = fixture_conn.template().batch_update(&batch)?;

    assert_eq!(counts, vec![1, 1]);
    let names = fixture_conn
        .template()
        .query_for_list("SELECT name FROM test ORDER BY id")?;
    let names: Vec<_> = names
        .iter()
        .map(|row| row.get("name").and_then(|v| v.as_str()).map(str::to_owned))
        .collect();
    assert_eq!(names, vec![Some("name5".to_string()), Some("name6".to_string())]);
    Ok(())
}

/// Named placeholders filled from serializable records
#[rstest]
fn test_named_parameter_batch(fixture_conn: FixtureConnection) -> Result<()> {
    let model = UserModel {
        my_name: "name5".into(),
    };
    let template = StatementSpec::new("INSERT INTO test(name) VALUES(:myName)")?;
    let sets = vec![
        ParameterSet::from_serialize(&model)?,
        ParameterSet::from_serialize(&model)?,
    ];
    let batch = BatchSpec::new(template, sets)?;

    let counts = fixture_conn.template().batch_update(&batch)?;

    assert_eq!(counts.len(), 2);
    assert_eq!(fixture_conn.row_count()?, 2);
    Ok(())
}

#[rstest]
fn test_literal_batch_mixing_ddl_and_inserts(fixture_conn: FixtureConnection) -> Result<()> {
    let counts = fixture_conn.template().batch_update_sql([
        "CREATE TABLE audit (entry VARCHAR(20))",
        "INSERT INTO audit VALUES ('created')",
        "UPDATE test SET name = 'none' WHERE id < 0",
    ])?;

    assert_eq!(counts, vec![0, 1, 0]);
    Ok(())
}

#[rstest]
fn test_batch_stops_at_first_failure(fixture_conn: FixtureConnection) -> Result<()> {
    unique_names(&fixture_conn)?;
    let batch = name_batch(&["a", "a", "b"])?;

    let failure = expect_partial_failure(fixture_conn.template().batch_update(&batch))?;

    assert_eq!(failure.succeeded(), 1);
    assert_eq!(failure.failed(), 1);
    assert_eq!(failure.not_executed(), 1);
    assert_eq!(failure.failed_members(), vec![1]);
    assert_eq!(failure.first_sql_state(), Some("23000"));
    assert_eq!(failure.update_counts(), vec![Some(1), None, None]);

    let remaining: i64 = fixture_conn
        .template()
        .query_for_object(&StatementSpec::new("SELECT COUNT(*) FROM unique_names")?)?;
    assert_eq!(remaining, 1, "successful members are kept, nothing is retried");
    Ok(())
}

#[rstest]
fn test_batch_continues_after_failure(fixture_conn: FixtureConnection) -> Result<()> {
    unique_names(&fixture_conn)?;
    let batch = name_batch(&["a", "a", "b"])?;
    let template = SqlTemplate::with_batch_options(
        &*fixture_conn,
        BatchOptions {
            policy: BatchPolicy::ContinueOnError,
            max_batch_size: None,
        },
    );

    let failure = expect_partial_failure(template.batch_update(&batch))?;

    assert_eq!(failure.succeeded(), 2);
    assert_eq!(failure.failed_members(), vec![1]);
    assert_eq!(failure.not_executed(), 0);
    Ok(())
}

#[rstest]
fn test_literal_batch_partial_failure(fixture_conn: FixtureConnection) -> Result<()> {
    let result = fixture_conn.template().batch_update_sql([
        "INSERT INTO test(name) VALUES ('ok')",
        "INSERT INTO missing_table VALUES (1)",
        "INSERT INTO test(name) VALUES ('skipped')",
    ]);

    let failure = expect_partial_failure(result)?;
    assert_eq!(failure.first_sql_state(), Some("42000"));
    assert_eq!(failure.not_executed(), 1);
    assert_eq!(fixture_conn.row_count()?, 1);
    Ok(())
}

#[rstest]
#[case::one_chunk(None)]
#[case::chunks_of_two(Some(2))]
#[case::chunks_of_one(Some(1))]
fn test_batch_chunking(
    fixture_conn: FixtureConnection,
    #[case] max_batch_size: Option<usize>,
) -> Result<()> {
    let template = SqlTemplate::with_batch_options(
        &*fixture_conn,
        BatchOptions {
            policy: BatchPolicy::StopOnFirstError,
            max_batch_size,
        },
    );
    let spec = StatementSpec::new("INSERT INTO test(name) VALUES(?)")?;
    let batch = BatchSpec::from_fn(spec, 5, |i| {
        Ok(ParameterSet::positional([format!("name{}", i)]))
    })?;

    let counts = template.batch_update(&batch)?;

    assert_eq!(counts, vec![1; 5]);
    assert_eq!(fixture_conn.row_count()?, 5);
    Ok(())
}

#[rstest]
fn test_later_chunks_not_executed_after_failure(fixture_conn: FixtureConnection) -> Result<()> {
    unique_names(&fixture_conn)?;
    let batch = name_batch(&["a", "a", "b", "c"])?;
    let template = SqlTemplate::with_batch_options(
        &*fixture_conn,
        BatchOptions {
            policy: BatchPolicy::StopOnFirstError,
            max_batch_size: Some(2),
        },
    );

    let failure = expect_partial_failure(template.batch_update(&batch))?;

    assert_eq!(failure.outcomes().len(), 4);
    assert_eq!(failure.succeeded(), 1);
    assert_eq!(failure.not_executed(), 2);
    Ok(())
}

#[rstest]
fn test_wrongly_typed_member_fails_binding(fixture_conn: FixtureConnection) -> Result<()> {
    let template = StatementSpec::builder("INSERT INTO test(id, name) VALUES(?, ?)")
        .param(ParameterSpec::typed(SqlType::Integer))
        .param(ParameterSpec::typed(SqlType::Varchar(100)))
        .build()?;
    let batch = BatchSpec::new(
        template,
        vec![
            ParameterSet::positional([conduit_core::Value::Int32(1), "a".into()]),
            ParameterSet::positional(["two", "b"]),
        ],
    )?;

    let err = fixture_conn
        .template()
        .batch_update(&batch)
        .err()
        .context("binding should fail")?;

    assert!(err.is_binding_error(), "{}", err);
    assert_eq!(fixture_conn.row_count()?, 0, "nothing is flushed before binding completes");
    Ok(())
}

/// A mistyped member in a later chunk is caught before the first chunk runs
#[rstest]
fn test_mistyped_member_in_later_chunk_flushes_nothing(fixture_conn: FixtureConnection) -> Result<()> {
    let template = SqlTemplate::with_batch_options(
        &*fixture_conn,
        BatchOptions {
            policy: BatchPolicy::StopOnFirstError,
            max_batch_size: Some(1),
        },
    );
    let spec = StatementSpec::builder("INSERT INTO test(name) VALUES(?)")
        .param(ParameterSpec::typed(SqlType::Varchar(100)))
        .build()?;
    let batch = BatchSpec::new(
        spec,
        vec![
            ParameterSet::positional(["a"]),
            ParameterSet::positional([conduit_core::Value::Int32(2)]),
        ],
    )?;

    let err = template.batch_update(&batch).err().context("binding should fail")?;

    assert!(err.is_binding_error(), "{}", err);
    assert_eq!(fixture_conn.row_count()?, 0);
    Ok(())
}
