//! PostgreSQL implementation of [`AdminConnection`].

use std::time::Duration;

use historian_config::ConnectionParams;
use postgres::{Client, NoTls};
use thiserror::Error;
use tracing::{debug, info};

use super::{AdminConnection, CatalogScope, DatabaseError};
use crate::schema::SchemaStatement;

const DATABASE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::database");
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// information_schema columns are `sql_identifier` domains; compare and return
// them as text so the client never has to decode the domain type.
const CATALOG_QUERY: &str = "SELECT table_name::text FROM information_schema.tables \
     WHERE table_catalog::text = $1::text AND table_schema::text = $2::text \
     AND table_type = 'BASE TABLE' \
     ORDER BY table_name";

/// Administrative PostgreSQL session.
///
/// The underlying client never opens an explicit transaction, so every
/// statement commits on its own.
pub struct PostgresAdmin {
    client: Client,
}

impl PostgresAdmin {
    /// Opens a session with the given parameters.
    pub fn connect(params: &ConnectionParams) -> Result<Self, ConnectError> {
        let mut config = postgres::Config::new();
        config
            .host(&params.host)
            .port(params.port)
            .user(&params.user)
            .password(&params.password)
            .dbname(&params.dbname)
            .application_name(env!("CARGO_PKG_NAME"))
            .connect_timeout(CONNECT_TIMEOUT);
        let client = config.connect(NoTls).map_err(|source| ConnectError {
            endpoint: params.to_string(),
            source,
        })?;
        info!(
            target: DATABASE_TARGET,
            endpoint = %params,
            "administrative session opened"
        );
        Ok(Self { client })
    }

    /// Wraps an already connected client.
    #[must_use]
    pub const fn from_client(client: Client) -> Self {
        Self { client }
    }
}

impl AdminConnection for PostgresAdmin {
    fn execute(&mut self, statement: &SchemaStatement) -> Result<(), DatabaseError> {
        let sql = statement.sql();
        debug!(target: DATABASE_TARGET, %sql, "executing statement");
        self.client.batch_execute(&sql)?;
        Ok(())
    }

    fn table_names(&mut self, scope: &CatalogScope) -> Result<Vec<String>, DatabaseError> {
        let rows = self
            .client
            .query(CATALOG_QUERY, &[&scope.database(), &scope.schema()])?;
        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(DatabaseError::from))
            .collect()
    }

    fn commit(&mut self) -> Result<(), DatabaseError> {
        // Autocommit already made every statement durable.
        debug!(target: DATABASE_TARGET, "statement batch complete");
        Ok(())
    }
}

/// The administrative session could not be opened.
#[derive(Debug, Error)]
#[error("failed to connect to {endpoint}: {source}")]
pub struct ConnectError {
    /// Redacted connection URL.
    pub endpoint: String,
    /// Underlying client error.
    #[source]
    pub source: postgres::Error,
}
