//! Schema-version-aware database preparation.
//!
//! [`Preparer::prepare`] resets the configured tables and, for historian
//! releases older than 4.0.0, creates the legacy layout those releases
//! expect. Newer releases bootstrap their own schema, so nothing is created
//! for them.
//!
//! Two error policies apply. Cleanup is best effort: a failed reset is
//! reported and preparation carries on, because a dirty table is diagnosed
//! by the conformance suite itself. Schema creation is fatal: the first DDL
//! failure ends preparation with the database's message intact.

mod errors;
mod report;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use historian_config::{ConnectionParams, TableNames};
use tracing::debug;

use crate::database::{AdminConnection, CatalogScope, DatabaseError, PostgresAdmin};
use crate::lifecycle::{LifecycleError, LifecycleEvent, SchemaLifecycle};
use crate::readiness::{CatalogView, PollPolicy, poll_until};
use crate::reporter::PreparationReporter;
use crate::schema::{Identifier, LegacyLayout, QualifiedName, SchemaVersion};

pub use errors::{CleanupError, PrepareError, TableFailure, TableFailureReason};
pub use report::{CleanupReport, PreparationOutcome, ResetMode};

const PREPARE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::prepare");

/// Resets and stages one database for a historian run.
pub struct Preparer<C> {
    connection: C,
    scope: CatalogScope,
    reporter: Arc<dyn PreparationReporter>,
    lifecycle: SchemaLifecycle,
    schema_wait: PollPolicy,
}

impl<C> Preparer<C>
where
    C: AdminConnection,
{
    /// Wraps an administrative session.
    ///
    /// Legacy tables must be visible immediately after creation unless
    /// [`Preparer::with_schema_wait`] allows more time.
    pub fn new(
        connection: C,
        scope: CatalogScope,
        reporter: Arc<dyn PreparationReporter>,
    ) -> Self {
        Self {
            connection,
            scope,
            reporter,
            lifecycle: SchemaLifecycle::default(),
            schema_wait: PollPolicy::immediate(),
        }
    }

    /// Sets how long to wait for legacy tables to appear in the catalog.
    #[must_use]
    pub fn with_schema_wait(mut self, policy: PollPolicy) -> Self {
        self.schema_wait = policy;
        self
    }

    /// Catalog scope inspected by discovery and [`Preparer::list_tables`].
    #[must_use]
    pub const fn scope(&self) -> &CatalogScope {
        &self.scope
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn lifecycle(&self) -> SchemaLifecycle {
        self.lifecycle
    }

    /// Returns the wrapped session.
    pub fn into_connection(self) -> C {
        self.connection
    }

    /// Resets the configured tables and stages the layout `version` expects.
    ///
    /// Reset failures are reported and swallowed. For legacy releases the
    /// data table, its timestamp index, the topics table and the meta table
    /// are created in that order and must then show up in the catalog.
    pub fn prepare(
        &mut self,
        tables: &TableNames,
        version: &SchemaVersion,
    ) -> Result<PreparationOutcome, PrepareError> {
        let result = self.stage(tables, version);
        if let Err(error) = &result {
            self.reporter.schema_failed(error);
        }
        result
    }

    fn stage(
        &mut self,
        tables: &TableNames,
        version: &SchemaVersion,
    ) -> Result<PreparationOutcome, PrepareError> {
        let dropped = self.lifecycle.advance(LifecycleEvent::TablesDropped)?;
        let layout = if version.is_legacy() {
            Some(LegacyLayout::from_tables(tables)?)
        } else {
            None
        };
        let namespace = self
            .scope
            .namespace()
            .map_err(|source| PrepareError::Namespace {
                scope: self.scope.to_string(),
                source,
            })?;
        self.reporter.preparation_starting(&self.scope, version);

        let names = tables.physical_names();
        let cleanup = match self.reset(Some(names.as_slice()), ResetMode::Drop) {
            Ok(report) => {
                self.reporter.tables_reset(&report);
                Some(report)
            }
            Err(error) => {
                self.reporter.cleanup_failed(&error);
                None
            }
        };
        self.lifecycle = dropped;

        let Some(layout) = layout else {
            self.lifecycle = self.lifecycle.advance(LifecycleEvent::BootstrapDeferred)?;
            self.reporter.bootstrap_deferred(version);
            return Ok(PreparationOutcome::new(
                version.generation(),
                BTreeSet::new(),
                cleanup,
            ));
        };

        for statement in layout.statements(&namespace) {
            self.connection
                .execute(&statement)
                .map_err(|source| PrepareError::Schema {
                    statement: statement.sql(),
                    source,
                })?;
        }
        self.connection
            .commit()
            .map_err(|source| PrepareError::Schema {
                statement: "COMMIT".to_owned(),
                source,
            })?;

        let created = layout.table_names();
        self.await_tables(&created)?;
        self.lifecycle = self.lifecycle.advance(LifecycleEvent::LegacyCreated)?;
        self.reporter.legacy_schema_created(&created);
        Ok(PreparationOutcome::new(
            version.generation(),
            created,
            cleanup,
        ))
    }

    fn await_tables(&mut self, expected: &BTreeSet<String>) -> Result<(), PrepareError> {
        let started = Instant::now();
        let mut missing = Vec::new();
        let visible = poll_until(self.schema_wait, || {
            let present = self.list_tables().map_err(PrepareError::Catalog)?;
            missing = expected.difference(&present).cloned().collect();
            Ok::<_, PrepareError>(missing.is_empty().then_some(()))
        })?;
        if visible.is_some() {
            return Ok(());
        }
        Err(PrepareError::SchemaNotVisible {
            scope: self.scope.to_string(),
            missing,
            waited_ms: started.elapsed().as_millis(),
        })
    }

    /// Drops or truncates tables in the catalog scope's namespace, skipping
    /// empty names.
    ///
    /// With `tables` absent the tables currently in the catalog scope are
    /// used; if the catalog cannot be read that failure is reported and the
    /// reset acts on no tables. Every table is attempted even after a
    /// failure, then the batch is committed.
    pub fn reset(
        &mut self,
        tables: Option<&[String]>,
        mode: ResetMode,
    ) -> Result<CleanupReport, CleanupError> {
        let namespace = self
            .scope
            .namespace()
            .map_err(|source| CleanupError::Namespace {
                scope: self.scope.to_string(),
                source,
            })?;
        let (names, discovered) = match tables {
            Some(names) => (names.to_vec(), false),
            None => (self.discover(), true),
        };
        let mut report = CleanupReport::new(mode, discovered);
        let mut failures = Vec::new();
        for name in names {
            if name.is_empty() {
                report.skip();
                continue;
            }
            let table = match Identifier::new(name.as_str()) {
                Ok(table) => table,
                Err(error) => {
                    failures.push(TableFailure {
                        table: name,
                        reason: error.into(),
                    });
                    continue;
                }
            };
            let statement = mode.statement(QualifiedName::new(namespace.clone(), table));
            match self.connection.execute(&statement) {
                Ok(()) => report.record(&name),
                Err(source) => failures.push(TableFailure {
                    table: name,
                    reason: TableFailureReason::Statement {
                        verb: statement.verb(),
                        source,
                    },
                }),
            }
        }
        self.connection
            .commit()
            .map_err(|source| CleanupError::Commit { source })?;
        if failures.is_empty() {
            debug!(target: PREPARE_TARGET, %mode, tables = ?report.tables(), "reset complete");
            Ok(report)
        } else {
            Err(CleanupError::Tables { report, failures })
        }
    }

    fn discover(&mut self) -> Vec<String> {
        match self.connection.table_names(&self.scope) {
            Ok(names) => names,
            Err(error) => {
                self.reporter.discovery_failed(&self.scope, &error);
                Vec::new()
            }
        }
    }

    /// Tables currently present in the catalog scope.
    pub fn list_tables(&mut self) -> Result<BTreeSet<String>, DatabaseError> {
        Ok(self
            .connection
            .table_names(&self.scope)?
            .into_iter()
            .collect())
    }

    /// Records a service lifecycle transition.
    pub fn record(&mut self, event: LifecycleEvent) -> Result<SchemaLifecycle, LifecycleError> {
        self.lifecycle = self.lifecycle.advance(event)?;
        Ok(self.lifecycle)
    }
}

impl<C> CatalogView for Preparer<C>
where
    C: AdminConnection,
{
    fn list_tables(&mut self) -> Result<BTreeSet<String>, DatabaseError> {
        Self::list_tables(self)
    }
}

/// Connects with `params` and prepares the database for `version`.
///
/// The catalog scope is the connected database and `schema`.
pub fn prepare_database(
    params: &ConnectionParams,
    schema: &str,
    tables: &TableNames,
    version: &SchemaVersion,
    reporter: Arc<dyn PreparationReporter>,
    schema_wait: PollPolicy,
) -> Result<(Preparer<PostgresAdmin>, PreparationOutcome), PrepareError> {
    let connection = match PostgresAdmin::connect(params) {
        Ok(connection) => connection,
        Err(error) => {
            let error = PrepareError::from(error);
            reporter.schema_failed(&error);
            return Err(error);
        }
    };
    let scope = CatalogScope::new(params.dbname.as_str(), schema);
    let mut preparer = Preparer::new(connection, scope, reporter).with_schema_wait(schema_wait);
    let outcome = preparer.prepare(tables, version)?;
    Ok((preparer, outcome))
}
