//! Administrative database access used by the preparer.
//!
//! The preparer only needs three capabilities from its session: run one
//! schema statement, read table names from the catalog, and commit. Keeping
//! them behind [`AdminConnection`] lets behaviour tests stage the protocol
//! against an in-memory catalog while production runs use [`PostgresAdmin`].

mod postgres_admin;

use std::fmt;

use thiserror::Error;

use crate::schema::{Identifier, IdentifierError, SchemaStatement};

pub use postgres_admin::{ConnectError, PostgresAdmin};

/// Database and namespace whose catalog the preparer inspects.
///
/// Both parts are explicit so neither discovery nor the statements the
/// preparer issues depend on whichever database or `search_path` the session
/// happens to default to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogScope {
    database: String,
    schema: String,
}

impl CatalogScope {
    /// Builds a scope.
    #[must_use]
    pub fn new(database: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            schema: schema.into(),
        }
    }

    /// Catalog (database) name.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Namespace name.
    #[must_use]
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Namespace as an identifier for qualifying statement targets.
    pub fn namespace(&self) -> Result<Identifier, IdentifierError> {
        Identifier::new(self.schema.as_str())
    }
}

impl fmt::Display for CatalogScope {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}.{}", self.database, self.schema)
    }
}

/// Session capabilities the preparer relies on.
///
/// Implementations run every statement in autocommit mode: a statement is
/// durable as soon as [`AdminConnection::execute`] returns, and a later
/// failure never rolls back earlier statements.
#[cfg_attr(test, mockall::automock)]
pub trait AdminConnection {
    /// Executes a single schema statement.
    fn execute(&mut self, statement: &SchemaStatement) -> Result<(), DatabaseError>;

    /// Lists the base tables in `scope`, sorted by name.
    fn table_names(&mut self, scope: &CatalogScope) -> Result<Vec<String>, DatabaseError>;

    /// Marks the end of a statement batch.
    fn commit(&mut self) -> Result<(), DatabaseError>;
}

impl<T> AdminConnection for &mut T
where
    T: AdminConnection + ?Sized,
{
    fn execute(&mut self, statement: &SchemaStatement) -> Result<(), DatabaseError> {
        (**self).execute(statement)
    }

    fn table_names(&mut self, scope: &CatalogScope) -> Result<Vec<String>, DatabaseError> {
        (**self).table_names(scope)
    }

    fn commit(&mut self) -> Result<(), DatabaseError> {
        (**self).commit()
    }
}

/// Errors reported by the database while serving a request.
///
/// The display form is the database's own message so callers surfacing it
/// keep it intact.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Error from the PostgreSQL client.
    #[error(transparent)]
    Postgres(#[from] postgres::Error),
    /// A store without a native error type rejected the request.
    #[error("{message}")]
    Rejected {
        /// Message as reported by the store.
        message: String,
    },
}

impl DatabaseError {
    /// Builds a [`DatabaseError::Rejected`].
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }
}
