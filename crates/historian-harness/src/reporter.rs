//! Structured reporting for database preparation events.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::database::{CatalogScope, DatabaseError};
use crate::preparer::{CleanupError, CleanupReport, PrepareError};
use crate::schema::SchemaVersion;

const PREPARE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::prepare");

/// Observer trait used to surface preparation events to telemetry sinks.
pub trait PreparationReporter: Send + Sync {
    /// Invoked before any statement is issued.
    fn preparation_starting(&self, scope: &CatalogScope, version: &SchemaVersion);

    /// Invoked after the configured tables were reset.
    fn tables_reset(&self, report: &CleanupReport);

    /// Invoked when the reset failed; preparation continues regardless.
    fn cleanup_failed(&self, error: &CleanupError);

    /// Invoked when table discovery failed and cleanup fell back to no tables.
    fn discovery_failed(&self, scope: &CatalogScope, error: &DatabaseError);

    /// Invoked after the legacy tables were created and became visible.
    fn legacy_schema_created(&self, tables: &BTreeSet<String>);

    /// Invoked when schema creation is left to the historian.
    fn bootstrap_deferred(&self, version: &SchemaVersion);

    /// Invoked when preparation fails.
    fn schema_failed(&self, error: &PrepareError);
}

impl<T> PreparationReporter for Arc<T>
where
    T: PreparationReporter + ?Sized,
{
    fn preparation_starting(&self, scope: &CatalogScope, version: &SchemaVersion) {
        (**self).preparation_starting(scope, version);
    }

    fn tables_reset(&self, report: &CleanupReport) {
        (**self).tables_reset(report);
    }

    fn cleanup_failed(&self, error: &CleanupError) {
        (**self).cleanup_failed(error);
    }

    fn discovery_failed(&self, scope: &CatalogScope, error: &DatabaseError) {
        (**self).discovery_failed(scope, error);
    }

    fn legacy_schema_created(&self, tables: &BTreeSet<String>) {
        (**self).legacy_schema_created(tables);
    }

    fn bootstrap_deferred(&self, version: &SchemaVersion) {
        (**self).bootstrap_deferred(version);
    }

    fn schema_failed(&self, error: &PrepareError) {
        (**self).schema_failed(error);
    }
}

/// Default reporter that records preparation events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredPreparationReporter;

impl StructuredPreparationReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl PreparationReporter for StructuredPreparationReporter {
    fn preparation_starting(&self, scope: &CatalogScope, version: &SchemaVersion) {
        tracing::info!(
            target: PREPARE_TARGET,
            event = "preparation_starting",
            scope = %scope,
            version = %version,
            generation = %version.generation(),
            "preparing historian database"
        );
    }

    fn tables_reset(&self, report: &CleanupReport) {
        tracing::info!(
            target: PREPARE_TARGET,
            event = "tables_reset",
            mode = %report.mode(),
            tables = ?report.tables(),
            skipped = report.skipped(),
            discovered = report.discovered(),
            "tables reset"
        );
    }

    fn cleanup_failed(&self, error: &CleanupError) {
        tracing::warn!(
            target: PREPARE_TARGET,
            event = "cleanup_failed",
            error = %error,
            "table cleanup failed; continuing"
        );
    }

    fn discovery_failed(&self, scope: &CatalogScope, error: &DatabaseError) {
        tracing::warn!(
            target: PREPARE_TARGET,
            event = "discovery_failed",
            scope = %scope,
            error = %error,
            "table discovery failed; nothing to clean"
        );
    }

    fn legacy_schema_created(&self, tables: &BTreeSet<String>) {
        tracing::info!(
            target: PREPARE_TARGET,
            event = "legacy_schema_created",
            tables = ?tables,
            "legacy schema created"
        );
    }

    fn bootstrap_deferred(&self, version: &SchemaVersion) {
        tracing::info!(
            target: PREPARE_TARGET,
            event = "bootstrap_deferred",
            version = %version,
            "historian will create its own schema"
        );
    }

    fn schema_failed(&self, error: &PrepareError) {
        tracing::error!(
            target: PREPARE_TARGET,
            event = "schema_failed",
            error = %error,
            "database preparation failed"
        );
    }
}
