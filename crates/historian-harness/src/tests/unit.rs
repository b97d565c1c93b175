//! Unit tests pinning the statement protocol the preparer speaks.

use std::sync::Arc;

use historian_config::{HistorianConfig, TableNames};
use mockall::Sequence;
use rstest::rstest;

use crate::database::{CatalogScope, DatabaseError, MockAdminConnection};
use crate::fixture::{FixtureError, FixtureRequest, HistorianFixture};
use crate::lifecycle::{LifecycleEvent, SchemaLifecycle};
use crate::preparer::{CleanupError, PrepareError, Preparer, ResetMode, TableFailureReason};
use crate::readiness::{CatalogProbe, PollPolicy};
use crate::schema::{IdentifierError, SchemaGeneration, SchemaVersion};
use crate::service::{MockServiceController, ServiceError, ServiceHandle};
use crate::testing::{
    MemoryDatabase, PreparationEvent, RecordingReporter, ScriptedService, ServiceCall,
};

use super::support::{params, scope};

const DROPS: [&str; 3] = [
    "DROP TABLE IF EXISTS \"public\".\"data\"",
    "DROP TABLE IF EXISTS \"public\".\"topics\"",
    "DROP TABLE IF EXISTS \"public\".\"meta\"",
];

fn version(constraint: &str) -> SchemaVersion {
    constraint.parse().expect("valid version constraint")
}

fn expect_sql(
    mock: &mut MockAdminConnection,
    sequence: &mut Sequence,
    sql: &'static str,
    result: fn() -> Result<(), DatabaseError>,
) {
    mock.expect_execute()
        .withf(move |statement| statement.sql() == sql)
        .times(1)
        .in_sequence(sequence)
        .returning(move |_| result());
}

fn expect_commit(mock: &mut MockAdminConnection, sequence: &mut Sequence) {
    mock.expect_commit()
        .times(1)
        .in_sequence(sequence)
        .returning(|| Ok(()));
}

fn preparer(mock: MockAdminConnection) -> (Preparer<MockAdminConnection>, Arc<RecordingReporter>) {
    let reporter = Arc::new(RecordingReporter::default());
    (Preparer::new(mock, scope(), reporter.clone()), reporter)
}

#[rstest]
fn legacy_preparation_drops_then_creates_in_order() {
    let mut mock = MockAdminConnection::new();
    let mut sequence = Sequence::new();
    for sql in DROPS {
        expect_sql(&mut mock, &mut sequence, sql, || Ok(()));
    }
    expect_commit(&mut mock, &mut sequence);
    for sql in [
        "CREATE TABLE IF NOT EXISTS \"public\".\"data\" (ts TIMESTAMP NOT NULL, topic_id INTEGER NOT NULL, value_string TEXT NOT NULL, UNIQUE (topic_id, ts))",
        "CREATE INDEX IF NOT EXISTS \"idx_data\" ON \"public\".\"data\" (ts ASC)",
        "CREATE TABLE IF NOT EXISTS \"public\".\"topics\" (topic_id SERIAL PRIMARY KEY NOT NULL, topic_name VARCHAR(512) NOT NULL, UNIQUE (topic_name))",
        "CREATE TABLE IF NOT EXISTS \"public\".\"meta\" (topic_id INTEGER PRIMARY KEY NOT NULL, metadata TEXT NOT NULL)",
    ] {
        expect_sql(&mut mock, &mut sequence, sql, || Ok(()));
    }
    expect_commit(&mut mock, &mut sequence);
    mock.expect_table_names()
        .withf(|requested| *requested == scope())
        .times(1)
        .in_sequence(&mut sequence)
        .returning(|_| Ok(vec!["data".to_owned(), "meta".to_owned(), "topics".to_owned()]));

    let (mut preparer, reporter) = preparer(mock);
    let outcome = preparer
        .prepare(&TableNames::default(), &version("<4.0.0"))
        .expect("preparation succeeds");

    assert_eq!(outcome.generation(), SchemaGeneration::Legacy);
    assert_eq!(outcome.created().len(), 3);
    assert_eq!(preparer.lifecycle(), SchemaLifecycle::LegacyCreated);
    assert_eq!(
        reporter.events().first(),
        Some(&PreparationEvent::Starting(SchemaGeneration::Legacy))
    );
}

#[rstest]
fn modern_preparation_only_drops() {
    let mut mock = MockAdminConnection::new();
    let mut sequence = Sequence::new();
    for sql in DROPS {
        expect_sql(&mut mock, &mut sequence, sql, || Ok(()));
    }
    expect_commit(&mut mock, &mut sequence);
    mock.expect_table_names().never();

    let (mut preparer, reporter) = preparer(mock);
    let outcome = preparer
        .prepare(&TableNames::default(), &version(">=4.0.0"))
        .expect("preparation succeeds");

    assert!(outcome.created().is_empty());
    assert_eq!(outcome.to_string(), "modern schema: no tables created");
    assert_eq!(preparer.lifecycle(), SchemaLifecycle::AwaitingServiceBootstrap);
    assert!(reporter.events().contains(&PreparationEvent::BootstrapDeferred));
}

#[rstest]
fn ddl_failure_keeps_the_database_message() {
    let mut mock = MockAdminConnection::new();
    let mut sequence = Sequence::new();
    for sql in DROPS {
        expect_sql(&mut mock, &mut sequence, sql, || Ok(()));
    }
    expect_commit(&mut mock, &mut sequence);
    expect_sql(
        &mut mock,
        &mut sequence,
        "CREATE TABLE IF NOT EXISTS \"public\".\"data\" (ts TIMESTAMP NOT NULL, topic_id INTEGER NOT NULL, value_string TEXT NOT NULL, UNIQUE (topic_id, ts))",
        || Err(DatabaseError::rejected("permission denied for schema public")),
    );

    let (mut preparer, reporter) = preparer(mock);
    let error = preparer
        .prepare(&TableNames::default(), &version("<4.0.0"))
        .expect_err("DDL failure is fatal");

    assert_eq!(error.to_string(), "permission denied for schema public");
    assert!(matches!(error, PrepareError::Schema { ref statement, .. } if statement.starts_with("CREATE TABLE")));
    assert_eq!(preparer.lifecycle(), SchemaLifecycle::TablesDropped);
    assert!(reporter.events().contains(&PreparationEvent::SchemaFailed(
        "permission denied for schema public".to_owned()
    )));
}

#[rstest]
fn legacy_tables_must_become_visible() {
    let mut mock = MockAdminConnection::new();
    mock.expect_execute().returning(|_| Ok(()));
    mock.expect_commit().returning(|| Ok(()));
    mock.expect_table_names()
        .returning(|_| Ok(vec!["data".to_owned()]));

    let (mut preparer, _reporter) = preparer(mock);
    let error = preparer
        .prepare(&TableNames::default(), &version("<4.0.0"))
        .expect_err("tables never appear");

    match error {
        PrepareError::SchemaNotVisible { missing, .. } => {
            assert_eq!(missing, vec!["meta".to_owned(), "topics".to_owned()]);
        }
        other => panic!("expected SchemaNotVisible, got {other:?}"),
    }
}

#[rstest]
fn failed_drops_are_reported_and_preparation_continues() {
    let mut mock = MockAdminConnection::new();
    mock.expect_execute()
        .returning(|_| Err(DatabaseError::rejected("lock timeout")));
    mock.expect_commit().times(1).returning(|| Ok(()));

    let (mut preparer, reporter) = preparer(mock);
    let outcome = preparer
        .prepare(&TableNames::default(), &version(">=4.0.0"))
        .expect("cleanup failures are not fatal");

    assert!(outcome.cleanup().is_none());
    let events = reporter.events();
    assert!(
        events.iter().any(|event| matches!(
            event,
            PreparationEvent::CleanupFailed(message)
                if message == "failed to reset 3 table(s): data: drop failed: lock timeout; \
                               topics: drop failed: lock timeout; meta: drop failed: lock timeout"
        )),
        "events: {events:?}"
    );
}

#[rstest]
fn reset_skips_empty_names() {
    let mut mock = MockAdminConnection::new();
    let mut sequence = Sequence::new();
    expect_sql(
        &mut mock,
        &mut sequence,
        "TRUNCATE TABLE \"public\".\"data\"",
        || Ok(()),
    );
    expect_commit(&mut mock, &mut sequence);

    let (mut preparer, _reporter) = preparer(mock);
    let names = vec![String::new(), "data".to_owned()];
    let report = preparer
        .reset(Some(names.as_slice()), ResetMode::Truncate)
        .expect("reset succeeds");

    assert_eq!(report.tables(), ["data".to_owned()]);
    assert_eq!(report.skipped(), 1);
    assert!(!report.discovered());
}

#[rstest]
fn reset_rejects_names_with_nul() {
    let mut mock = MockAdminConnection::new();
    mock.expect_execute().never();
    mock.expect_commit().times(1).returning(|| Ok(()));

    let (mut preparer, _reporter) = preparer(mock);
    let names = vec!["da\0ta".to_owned()];
    let error = preparer
        .reset(Some(names.as_slice()), ResetMode::Drop)
        .expect_err("NUL cannot be quoted");
    assert!(matches!(error, CleanupError::Tables { ref failures, .. } if failures.len() == 1));
}

#[rstest]
fn commit_failure_is_a_cleanup_error() {
    let mut mock = MockAdminConnection::new();
    mock.expect_execute().returning(|_| Ok(()));
    mock.expect_commit()
        .returning(|| Err(DatabaseError::rejected("connection reset")));

    let (mut preparer, _reporter) = preparer(mock);
    let names = vec!["data".to_owned()];
    let error = preparer
        .reset(Some(names.as_slice()), ResetMode::Drop)
        .expect_err("commit failed");
    assert_eq!(
        error.to_string(),
        "failed to commit table reset: connection reset"
    );
}

#[rstest]
fn running_service_blocks_preparation() {
    let mut mock = MockAdminConnection::new();
    mock.expect_execute().never();

    let (mut preparer, _reporter) = preparer(mock);
    preparer
        .record(LifecycleEvent::TablesDropped)
        .and_then(|_| preparer.record(LifecycleEvent::BootstrapDeferred))
        .and_then(|_| preparer.record(LifecycleEvent::ServiceStarted))
        .expect("service lifecycle is valid");

    let error = preparer
        .prepare(&TableNames::default(), &version(">=4.0.0"))
        .expect_err("tables must not be dropped under a running service");
    assert!(matches!(error, PrepareError::Lifecycle(_)));
}

#[rstest]
fn invalid_layout_is_rejected_before_any_statement() {
    let mut mock = MockAdminConnection::new();
    mock.expect_execute().never();
    mock.expect_commit().never();

    let (mut preparer, _reporter) = preparer(mock);
    let tables = TableNames {
        meta_table: String::new(),
        ..TableNames::default()
    };
    let error = preparer
        .prepare(&tables, &version("<4.0.0"))
        .expect_err("legacy layout needs every role");
    assert_eq!(error.to_string(), "invalid meta_table name: identifier must not be empty");
}

#[rstest]
fn discovery_recovers_once_the_catalog_is_readable() {
    let database = MemoryDatabase::new(scope());
    database.create_table("stray");
    database.fail_catalog("permission denied for relation tables");
    let reporter = Arc::new(RecordingReporter::default());
    let mut preparer = Preparer::new(database.clone(), scope(), reporter.clone());

    let report = preparer
        .reset(None, ResetMode::Drop)
        .expect("discovery failure is not an error");
    assert!(report.tables().is_empty());
    assert!(database.executed().is_empty());

    database.restore_catalog();
    let report = preparer
        .reset(None, ResetMode::Drop)
        .expect("discovered tables are dropped");
    assert_eq!(report.tables(), ["stray".to_owned()]);
    assert_eq!(database.commits(), 2);
    assert!(database.tables().is_empty());
    assert_eq!(
        reporter.events(),
        vec![PreparationEvent::DiscoveryFailed(
            "permission denied for relation tables".to_owned()
        )]
    );
}

fn staging() -> CatalogScope {
    CatalogScope::new(scope().database(), "staging")
}

#[rstest]
fn reset_leaves_same_named_tables_in_other_namespaces() {
    let database = MemoryDatabase::new(staging());
    database.create_table("stray");
    database.create_table_in("public", "stray");
    let reporter = Arc::new(RecordingReporter::default());
    let mut preparer = Preparer::new(database.clone(), staging(), reporter);

    let report = preparer
        .reset(None, ResetMode::Drop)
        .expect("discovered tables are dropped");

    assert_eq!(report.tables(), ["stray".to_owned()]);
    assert!(database.tables().is_empty());
    assert_eq!(
        database.tables_in("public").into_iter().collect::<Vec<_>>(),
        vec!["stray".to_owned()]
    );
}

#[rstest]
fn legacy_tables_are_created_in_the_scoped_namespace() {
    let database = MemoryDatabase::new(staging());
    database.create_table_in("public", "data");
    let reporter = Arc::new(RecordingReporter::default());
    let mut preparer = Preparer::new(database.clone(), staging(), reporter);

    let outcome = preparer
        .prepare(&TableNames::default(), &version("<4.0.0"))
        .expect("tables become visible in staging");

    assert_eq!(outcome.created(), &database.tables());
    assert!(database.has_index("idx_data"));
    assert_eq!(
        database.tables_in("public").into_iter().collect::<Vec<_>>(),
        vec!["data".to_owned()]
    );
    assert!(
        database
            .executed()
            .iter()
            .all(|statement| statement.table().namespace().as_str() == "staging")
    );
}

#[rstest]
fn unquotable_namespace_is_rejected_before_any_statement() {
    let mut mock = MockAdminConnection::new();
    mock.expect_execute().never();
    mock.expect_commit().never();
    let reporter = Arc::new(RecordingReporter::default());
    let mut preparer = Preparer::new(
        mock,
        CatalogScope::new(scope().database(), ""),
        reporter,
    );

    let error = preparer
        .prepare(&TableNames::default(), &version(">=4.0.0"))
        .expect_err("an empty namespace cannot qualify statements");
    assert!(matches!(
        error,
        PrepareError::Namespace {
            source: IdentifierError::Empty,
            ..
        }
    ));
    let error = preparer
        .reset(None, ResetMode::Drop)
        .expect_err("reset needs the namespace too");
    assert!(matches!(error, CleanupError::Namespace { .. }));
}

#[rstest]
fn overlong_table_name_is_rejected_before_any_statement() {
    let mut mock = MockAdminConnection::new();
    mock.expect_execute().never();
    mock.expect_commit().never();

    let (mut preparer, _reporter) = preparer(mock);
    let tables = TableNames {
        data_table: "d".repeat(70),
        ..TableNames::default()
    };
    let error = preparer
        .prepare(&tables, &version("<4.0.0"))
        .expect_err("PostgreSQL would truncate the name");
    assert!(matches!(
        error,
        PrepareError::Layout(ref layout) if matches!(layout.source, IdentifierError::TooLong { .. })
    ));
}

#[rstest]
fn overlong_reset_name_is_a_table_failure() {
    let mut mock = MockAdminConnection::new();
    mock.expect_execute().never();
    mock.expect_commit().times(1).returning(|| Ok(()));

    let (mut preparer, _reporter) = preparer(mock);
    let names = vec!["d".repeat(64)];
    let error = preparer
        .reset(Some(names.as_slice()), ResetMode::Truncate)
        .expect_err("name exceeds the identifier limit");
    assert!(matches!(
        error,
        CleanupError::Tables { ref failures, .. }
            if matches!(
                failures.as_slice(),
                [failure] if matches!(failure.reason, TableFailureReason::Identifier(IdentifierError::TooLong { .. }))
            )
    ));
}

fn legacy_request() -> FixtureRequest {
    FixtureRequest::new(
        HistorianConfig::postgresql(params(), TableNames::default()),
        version("<4.0.0"),
    )
    .with_startup(PollPolicy::immediate())
    .with_shutdown(PollPolicy::immediate())
}

fn memory_preparer(database: &MemoryDatabase) -> Preparer<MemoryDatabase> {
    Preparer::new(
        database.clone(),
        scope(),
        Arc::new(RecordingReporter::default()),
    )
}

fn handle() -> ServiceHandle {
    ServiceHandle::new("platform.historian-1", "platform.historian")
}

#[rstest]
fn failed_preparation_never_installs_the_historian() {
    let database = MemoryDatabase::new(scope());
    database.fail_once("create table", "meta", "disk full");
    let mut controller = MockServiceController::new();
    controller.expect_install().never();
    let mut probe = CatalogProbe::new(TableNames::default().physical_names());

    let error = HistorianFixture::setup(
        memory_preparer(&database),
        controller,
        legacy_request(),
        &mut probe,
    )
    .err()
    .expect("preparation failure is fatal");
    assert_eq!(error.to_string(), "database preparation failed: disk full");
}

#[rstest]
fn rejected_install_is_not_started() {
    let database = MemoryDatabase::new(scope());
    let mut controller = MockServiceController::new();
    controller
        .expect_install()
        .times(1)
        .returning(|_| Err(ServiceError::rejected("identity already installed")));
    controller.expect_start().never();
    let mut probe = CatalogProbe::new(TableNames::default().physical_names());

    let error = HistorianFixture::setup(
        memory_preparer(&database),
        controller,
        legacy_request(),
        &mut probe,
    )
    .err()
    .expect("install failure is fatal");
    assert!(matches!(error, FixtureError::Service(_)));
}

#[rstest]
fn teardown_stops_before_removing() {
    let database = MemoryDatabase::new(scope());
    let mut controller = MockServiceController::new();
    let mut sequence = Sequence::new();
    controller
        .expect_install()
        .withf(|spec| spec.identity == "platform.historian")
        .times(1)
        .in_sequence(&mut sequence)
        .returning(|_| Ok(handle()));
    controller
        .expect_start()
        .times(1)
        .in_sequence(&mut sequence)
        .returning(|_| Ok(()));
    controller
        .expect_is_running()
        .times(2)
        .in_sequence(&mut sequence)
        .returning(|_| Ok(true));
    controller
        .expect_stop()
        .times(1)
        .in_sequence(&mut sequence)
        .returning(|_| Ok(()));
    controller
        .expect_is_running()
        .times(1)
        .in_sequence(&mut sequence)
        .returning(|_| Ok(false));
    controller
        .expect_remove()
        .times(1)
        .in_sequence(&mut sequence)
        .returning(|_| Ok(()));
    let mut probe = CatalogProbe::new(TableNames::default().physical_names());

    let fixture = HistorianFixture::setup(
        memory_preparer(&database),
        controller,
        legacy_request(),
        &mut probe,
    )
    .expect("legacy tables satisfy the probe");
    assert_eq!(fixture.handle(), Some(&handle()));
    fixture.teardown().expect("teardown succeeds");
}

#[rstest]
fn failed_start_removes_the_install() {
    let database = MemoryDatabase::new(scope());
    let service = ScriptedService::new();
    service.fail_start("historian binary not found");
    let mut probe = CatalogProbe::new(TableNames::default().physical_names());

    let error = HistorianFixture::setup(
        memory_preparer(&database),
        service.clone(),
        legacy_request(),
        &mut probe,
    )
    .err()
    .expect("start failure is fatal");

    assert_eq!(
        error.to_string(),
        "service control failed: historian binary not found"
    );
    assert_eq!(service.installed(), 0);
    let specs = service.specs();
    assert_eq!(specs.len(), 1);
    assert_eq!(
        specs.first().map(|spec| &spec.config.tables_def),
        Some(&TableNames::default())
    );
}

#[rstest]
fn failed_install_is_never_started() {
    let database = MemoryDatabase::new(scope());
    let service = ScriptedService::new();
    service.fail_install("identity already installed");
    let mut probe = CatalogProbe::new(TableNames::default().physical_names());

    let result = HistorianFixture::setup(
        memory_preparer(&database),
        service.clone(),
        legacy_request(),
        &mut probe,
    );

    assert!(result.is_err());
    assert_eq!(
        service.calls(),
        vec![ServiceCall::Install("platform.historian".to_owned())]
    );
}

#[rstest]
fn teardown_removes_even_when_stop_fails() {
    let database = MemoryDatabase::new(scope());
    let mut controller = MockServiceController::new();
    let mut sequence = Sequence::new();
    controller
        .expect_install()
        .times(1)
        .in_sequence(&mut sequence)
        .returning(|_| Ok(handle()));
    controller
        .expect_start()
        .times(1)
        .in_sequence(&mut sequence)
        .returning(|_| Ok(()));
    controller
        .expect_is_running()
        .times(2)
        .in_sequence(&mut sequence)
        .returning(|_| Ok(true));
    controller
        .expect_stop()
        .times(1)
        .in_sequence(&mut sequence)
        .returning(|_| Err(ServiceError::rejected("stop signal refused")));
    controller
        .expect_is_running()
        .times(1)
        .in_sequence(&mut sequence)
        .returning(|_| Err(ServiceError::rejected("status unavailable")));
    controller
        .expect_remove()
        .times(1)
        .in_sequence(&mut sequence)
        .returning(|_| Ok(()));
    let mut probe = CatalogProbe::new(TableNames::default().physical_names());

    let fixture = HistorianFixture::setup(
        memory_preparer(&database),
        controller,
        legacy_request(),
        &mut probe,
    )
    .expect("legacy tables satisfy the probe");
    let error = fixture.teardown().expect_err("stop was refused");
    assert_eq!(
        error.to_string(),
        "service control failed: stop signal refused"
    );
}
