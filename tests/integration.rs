//! Live database scenarios
//!
//! Needs two or more reachable PostgreSQL-compatible targets:
//! `PGVERIFY_TEST_TARGETS=postgres://...,postgres://... cargo test -- --ignored`

use pgverify::column::cast_expression;
use pgverify::{CellError, TargetConfig, TestMode, TimestampPrecision, VerifyConfig, VerifyError};
use tokio_postgres::NoTls;
use tokio_util::sync::CancellationToken;

fn target_uris() -> Vec<String> {
    std::env::var("PGVERIFY_TEST_TARGETS")
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|uri| !uri.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn targets(uris: &[String]) -> Vec<TargetConfig> {
    uris.iter()
        .map(|uri| TargetConfig::from_connection_string(uri).unwrap())
        .collect()
}

async fn execute(uri: &str, sql: &str) {
    let (client, connection) = tokio_postgres::connect(uri, NoTls).await.unwrap();
    tokio::spawn(connection);
    client.batch_execute(sql).await.unwrap();
}

fn has_divergence(errors: &[CellError], table: &str, mode: TestMode) -> bool {
    errors.iter().any(|e| {
        matches!(e, CellError::Divergent { table: t, mode: m, .. } if t == table && *m == mode)
    })
}

#[tokio::test]
#[ignore]
async fn test_detects_row_added_to_one_target() {
    let uris = target_uris();
    if uris.len() < 2 {
        eprintln!("PGVERIFY_TEST_TARGETS needs at least two targets, skipping");
        return;
    }

    let schema = "pgverify_failtest";
    for uri in &uris {
        execute(
            uri,
            &format!(
                "DROP SCHEMA IF EXISTS {schema} CASCADE;
                 CREATE SCHEMA {schema};
                 CREATE TABLE {schema}.failtest (id INTEGER PRIMARY KEY, label TEXT, created_at TIMESTAMPTZ);
                 INSERT INTO {schema}.failtest VALUES
                     (1, 'one', '2021-06-01 10:00:00+00'),
                     (2, 'two', '2021-06-01 10:00:01+00'),
                     (3, 'three', '2021-06-01 10:00:02+00'),
                     (5, 'five', '2021-06-01 10:00:04+00'),
                     (6, 'six', '2021-06-01 10:00:05+00');",
                schema = schema
            ),
        )
        .await;
    }

    let config = || {
        VerifyConfig::builder()
            .include_schemas([schema])
            .test_modes(["full", "bookend", "sparse", "rowcount"])
            .build()
            .unwrap()
    };
    let targets = targets(&uris);

    let results = pgverify::verify(CancellationToken::new(), &targets, config())
        .await
        .unwrap();
    assert!(results.content[schema].contains_key("failtest"));

    execute(
        &uris[0],
        &format!(
            "INSERT INTO {}.failtest VALUES (4, 'four', '2021-06-01 10:00:03+00');",
            schema
        ),
    )
    .await;

    let err = pgverify::verify(CancellationToken::new(), &targets, config())
        .await
        .unwrap_err();
    match err {
        VerifyError::Mismatch { errors, .. } => {
            assert!(has_divergence(&errors, "failtest", TestMode::Full));
            assert!(has_divergence(&errors, "failtest", TestMode::Bookend));
            assert!(has_divergence(&errors, "failtest", TestMode::RowCount));
        }
        other => panic!("expected mismatch, got {:?}", other),
    }
}

#[tokio::test]
#[ignore]
async fn test_timestamps_compare_at_configured_precision() {
    let uris = target_uris();
    if uris.len() < 2 {
        eprintln!("PGVERIFY_TEST_TARGETS needs at least two targets, skipping");
        return;
    }

    let schema = "pgverify_tztest";
    // Same instant written with different offsets and sub-millisecond noise.
    let instants = ["2021-06-01 10:00:00.123456+00", "2021-06-01 12:00:00.123999+02"];
    for (idx, uri) in uris.iter().enumerate() {
        execute(
            uri,
            &format!(
                "DROP SCHEMA IF EXISTS {schema} CASCADE;
                 CREATE SCHEMA {schema};
                 CREATE TABLE {schema}.events (id INTEGER PRIMARY KEY, at TIMESTAMPTZ);
                 INSERT INTO {schema}.events VALUES (1, '{at}');",
                schema = schema,
                at = instants[idx % instants.len()]
            ),
        )
        .await;
    }

    let targets = targets(&uris);
    let config = |precision: &str| {
        VerifyConfig::builder()
            .include_schemas([schema])
            .timestamp_precision(precision)
            .build()
            .unwrap()
    };

    pgverify::verify(CancellationToken::new(), &targets, config("milliseconds"))
        .await
        .unwrap();

    let err = pgverify::verify(CancellationToken::new(), &targets, config("microseconds"))
        .await
        .unwrap_err();
    assert!(err.is_mismatch());
}

#[tokio::test]
async fn test_unreachable_target_fails_with_connection_error() {
    let targets = targets(&["postgres://postgres@127.0.0.1:1/postgres".to_string()]);

    let err = pgverify::verify(CancellationToken::new(), &targets, VerifyConfig::default())
        .await
        .unwrap_err();

    assert!(matches!(err, VerifyError::Connection { target, .. } if target == "127.0.0.1:1"));
}

#[tokio::test]
#[ignore]
async fn test_timestamp_cast_normalizes_offset_and_fraction() {
    let uris = target_uris();
    let Some(uri) = uris.first() else {
        eprintln!("PGVERIFY_TEST_TARGETS is empty, skipping");
        return;
    };

    let cast = |literal: &str| {
        cast_expression(
            &format!("'{}'::timestamptz", literal),
            "timestamp with time zone",
            TimestampPrecision::Milliseconds,
        )
    };
    let sql = format!(
        "SELECT ({} = {})::TEXT",
        cast("2021-06-01 10:00:00.123456+00"),
        cast("2021-06-01 12:00:00.123999+02")
    );

    let (client, connection) = tokio_postgres::connect(uri, NoTls).await.unwrap();
    tokio::spawn(connection);
    let row = client.query_one(sql.as_str(), &[]).await.unwrap();
    assert_eq!(row.get::<_, String>(0), "true");
}
