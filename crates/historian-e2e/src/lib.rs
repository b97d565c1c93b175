//! End-to-end tests for the historian harness against a live PostgreSQL.
//!
//! The tests connect to the server named by `HISTORIAN_TEST_DATABASE_URL`
//! and skip gracefully when it is unset, so the suite stays green on
//! machines without a database.
//!
//! # Isolation
//!
//! Every test works inside its own [`Scratch`] namespace. The namespace is
//! created on open and dropped with everything in it when the [`Scratch`]
//! goes away. Raw SQL issued through a [`Scratch`] runs with the namespace
//! on its `search_path`; administrative sessions handed to the preparer keep
//! the server default, so the preparer has to address the namespace itself.

use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};

use historian_config::{ConnectionParams, ConnectionParseError};
use historian_harness::schema::{Identifier, IdentifierError};
use historian_harness::{CatalogScope, PostgresAdmin};
use postgres::{Client, NoTls};
use thiserror::Error;

/// Environment variable naming the server the tests run against.
pub const DATABASE_URL_VAR: &str = "HISTORIAN_TEST_DATABASE_URL";

static NEXT_SCRATCH: AtomicUsize = AtomicUsize::new(0);

/// Errors raised while staging or inspecting a scratch namespace.
#[derive(Debug, Error)]
pub enum E2eError {
    /// The configured URL is not a PostgreSQL URL.
    #[error("invalid {DATABASE_URL_VAR}: {0}")]
    Url(#[from] ConnectionParseError),
    /// The scratch namespace name was rejected.
    #[error("invalid scratch namespace: {0}")]
    Namespace(#[from] IdentifierError),
    /// The server rejected a request.
    #[error("postgres error: {0}")]
    Postgres(#[from] postgres::Error),
}

/// Connection parameters from [`DATABASE_URL_VAR`], if set.
pub fn test_database() -> Result<Option<ConnectionParams>, E2eError> {
    match std::env::var(DATABASE_URL_VAR) {
        Ok(url) if !url.trim().is_empty() => Ok(Some(url.trim().parse()?)),
        _ => Ok(None),
    }
}

/// A throwaway namespace on the test server.
pub struct Scratch {
    params: ConnectionParams,
    namespace: Identifier,
    inspector: Client,
}

impl Scratch {
    /// Creates a fresh namespace, or returns `None` when no server is
    /// configured.
    pub fn open() -> Result<Option<Self>, E2eError> {
        let Some(params) = test_database()? else {
            return Ok(None);
        };
        let namespace = Identifier::new(format!(
            "historian_e2e_{}_{}",
            process::id(),
            NEXT_SCRATCH.fetch_add(1, Ordering::Relaxed)
        ))?;
        let mut inspector = connect(&params)?;
        inspector.batch_execute(&format!("CREATE SCHEMA {namespace}"))?;
        inspector.batch_execute(&format!("SET search_path TO {namespace}"))?;
        Ok(Some(Self {
            params,
            namespace,
            inspector,
        }))
    }

    /// Catalog scope covering the scratch namespace.
    #[must_use]
    pub fn scope(&self) -> CatalogScope {
        CatalogScope::new(self.params.dbname.as_str(), self.namespace.as_str())
    }

    /// Administrative session on the server's default `search_path`.
    pub fn admin(&self) -> Result<PostgresAdmin, E2eError> {
        Ok(PostgresAdmin::from_client(connect(&self.params)?))
    }

    /// Administrative session whose `search_path` holds only `other`'s
    /// namespace, so unqualified names would resolve there.
    pub fn admin_searching(&self, other: &Self) -> Result<PostgresAdmin, E2eError> {
        let mut client = connect(&self.params)?;
        client.batch_execute(&format!("SET search_path TO {}", other.namespace))?;
        Ok(PostgresAdmin::from_client(client))
    }

    /// Base tables in the namespace, sorted.
    pub fn tables(&mut self) -> Result<Vec<String>, E2eError> {
        let rows = self.inspector.query(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema::text = $1::text AND table_type = 'BASE TABLE' \
             ORDER BY table_name",
            &[&self.namespace.as_str()],
        )?;
        rows.iter()
            .map(|row| row.try_get(0).map_err(E2eError::from))
            .collect()
    }

    /// Runs raw SQL in the namespace.
    pub fn execute(&mut self, sql: &str) -> Result<(), E2eError> {
        self.inspector.batch_execute(sql)?;
        Ok(())
    }

    /// Column names and types of `table`, in declaration order.
    pub fn columns(&mut self, table: &str) -> Result<Vec<(String, String)>, E2eError> {
        let rows = self.inspector.query(
            "SELECT column_name::text, data_type::text FROM information_schema.columns \
             WHERE table_schema::text = $1::text AND table_name::text = $2::text \
             ORDER BY ordinal_position",
            &[&self.namespace.as_str(), &table],
        )?;
        rows.iter()
            .map(|row| -> Result<(String, String), E2eError> {
                Ok((row.try_get(0)?, row.try_get(1)?))
            })
            .collect()
    }

    /// Column sets of the constraints of `kind` (`u` unique, `p` primary
    /// key) on `table`, sorted.
    pub fn constraints(&mut self, table: &str, kind: char) -> Result<Vec<Vec<String>>, E2eError> {
        let rows = self.inspector.query(
            "SELECT array_agg(a.attname::text ORDER BY k.ord) \
             FROM pg_constraint c \
             JOIN pg_class r ON r.oid = c.conrelid \
             JOIN pg_namespace n ON n.oid = r.relnamespace \
             CROSS JOIN LATERAL unnest(c.conkey) WITH ORDINALITY AS k(attnum, ord) \
             JOIN pg_attribute a ON a.attrelid = r.oid AND a.attnum = k.attnum \
             WHERE n.nspname::text = $1::text AND r.relname::text = $2::text \
             AND c.contype::text = $3::text \
             GROUP BY c.oid ORDER BY 1",
            &[&self.namespace.as_str(), &table, &kind.to_string()],
        )?;
        rows.iter()
            .map(|row| row.try_get(0).map_err(E2eError::from))
            .collect()
    }

    /// Whether an index named `index` exists in the namespace.
    pub fn has_index(&mut self, index: &str) -> Result<bool, E2eError> {
        let row = self.inspector.query_one(
            "SELECT EXISTS (SELECT 1 FROM pg_indexes \
             WHERE schemaname::text = $1::text AND indexname::text = $2::text)",
            &[&self.namespace.as_str(), &index],
        )?;
        Ok(row.try_get(0)?)
    }

    /// Number of rows in `table`.
    pub fn row_count(&mut self, table: &str) -> Result<i64, E2eError> {
        let table = Identifier::new(table)?;
        let row = self
            .inspector
            .query_one(&format!("SELECT count(*) FROM {table}"), &[])?;
        Ok(row.try_get(0)?)
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let sql = format!("DROP SCHEMA IF EXISTS {} CASCADE", self.namespace);
        drop(self.inspector.batch_execute(&sql));
    }
}

fn connect(params: &ConnectionParams) -> Result<Client, E2eError> {
    let mut config = postgres::Config::new();
    config
        .host(&params.host)
        .port(params.port)
        .user(&params.user)
        .password(&params.password)
        .dbname(&params.dbname);
    Ok(config.connect(NoTls)?)
}
