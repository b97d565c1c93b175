//! Error types for cleanup and preparation.

use std::fmt;

use thiserror::Error;

use crate::database::{ConnectError, DatabaseError};
use crate::lifecycle::LifecycleError;
use crate::schema::{IdentifierError, LegacyLayoutError};

use super::CleanupReport;

/// One table the reset could not clear.
#[derive(Debug)]
pub struct TableFailure {
    /// Name as requested.
    pub table: String,
    /// Why it failed.
    pub reason: TableFailureReason,
}

/// Cause of a [`TableFailure`].
#[derive(Debug, Error)]
pub enum TableFailureReason {
    /// The name cannot be used as an identifier.
    #[error(transparent)]
    Identifier(#[from] IdentifierError),
    /// The database rejected the statement.
    #[error("{verb} failed: {source}")]
    Statement {
        /// Operation that failed.
        verb: &'static str,
        /// Database error, unchanged.
        #[source]
        source: DatabaseError,
    },
}

impl fmt::Display for TableFailure {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}: {}", self.table, self.reason)
    }
}

/// A reset did not complete cleanly.
///
/// Statements run in autocommit mode, so tables cleared before the failure
/// stay cleared.
#[derive(Debug, Error)]
pub enum CleanupError {
    /// Some tables could not be cleared; the rest were.
    #[error("failed to reset {count} table(s): {summary}", count = .failures.len(), summary = summarise(.failures))]
    Tables {
        /// Tables that were cleared.
        report: CleanupReport,
        /// Tables that were not.
        failures: Vec<TableFailure>,
    },
    /// The catalog scope names a namespace that cannot be quoted.
    #[error("invalid namespace in {scope}: {source}")]
    Namespace {
        /// Catalog scope being reset.
        scope: String,
        /// Underlying identifier error.
        #[source]
        source: IdentifierError,
    },
    /// The closing commit failed.
    #[error("failed to commit table reset: {source}")]
    Commit {
        /// Database error, unchanged.
        #[source]
        source: DatabaseError,
    },
}

fn summarise(failures: &[TableFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Preparation failed.
///
/// Statement failures display the database's own message unchanged.
#[derive(Debug, Error)]
pub enum PrepareError {
    /// The administrative session could not be opened.
    #[error(transparent)]
    Connect(#[from] ConnectError),
    /// The configured table names cannot form the legacy layout.
    #[error(transparent)]
    Layout(#[from] LegacyLayoutError),
    /// The catalog scope names a namespace that cannot be quoted.
    #[error("invalid namespace in {scope}: {source}")]
    Namespace {
        /// Catalog scope being prepared.
        scope: String,
        /// Underlying identifier error.
        #[source]
        source: IdentifierError,
    },
    /// A legacy DDL statement failed. Earlier statements stay applied.
    #[error("{source}")]
    Schema {
        /// SQL of the failing statement.
        statement: String,
        /// Database error, unchanged.
        #[source]
        source: DatabaseError,
    },
    /// The catalog could not be read while waiting for the new tables.
    #[error("failed to inspect catalog: {0}")]
    Catalog(#[source] DatabaseError),
    /// The legacy tables never became visible.
    #[error("tables {missing:?} not visible in {scope} after {waited_ms} ms")]
    SchemaNotVisible {
        /// Catalog scope that was inspected.
        scope: String,
        /// Tables still absent at the deadline.
        missing: Vec<String>,
        /// Time spent waiting.
        waited_ms: u128,
    },
    /// Preparation is not allowed in the current lifecycle state.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}
