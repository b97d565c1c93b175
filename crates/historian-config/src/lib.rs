//! Layered configuration for the historian conformance harness.
//!
//! [`Config`] merges built-in defaults, configuration files,
//! `HISTORIAN_HARNESS_*` environment variables and command-line flags through
//! `ortho_config`. The flat settings resolve into the structured values the
//! harness consumes: [`ConnectionParams`] for the administrative session,
//! [`TableNames`] for the tables under test and the [`HistorianConfig`]
//! document installed alongside the service.

mod connection;
pub mod defaults;
mod historian;
mod modes;
mod tables;

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use connection::{BackendKind, ConnectionConfig, ConnectionParams, ConnectionParseError};
pub use defaults::{default_log_filter, default_log_format};
pub use historian::HistorianConfig;
pub use modes::{LogFormat, ModeParseError, PrepAction};
pub use tables::{TableNames, TableRole};

use defaults::{
    DEFAULT_DB_PORT, DEFAULT_SCHEMA_WAIT_MS, default_action, default_data_table,
    default_db_host, default_db_name, default_db_password, default_db_schema, default_db_user,
    default_historian_version, default_log_filter_string, default_meta_table,
    default_topics_table,
};

/// Harness settings resolved from every configuration layer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "HISTORIAN_HARNESS")]
pub struct Config {
    /// `tracing` filter directive.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Log output format.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Full `postgresql://` URL; overrides the discrete `db_*` settings.
    pub database_url: Option<String>,
    /// Administrative host.
    #[ortho_config(default = default_db_host())]
    pub db_host: String,
    /// Administrative port.
    #[ortho_config(default = DEFAULT_DB_PORT)]
    pub db_port: u16,
    /// Administrative role.
    #[ortho_config(default = default_db_user())]
    pub db_user: String,
    /// Password for the administrative role.
    #[ortho_config(default = default_db_password())]
    pub db_password: String,
    /// Database staged for the historian.
    #[ortho_config(default = default_db_name())]
    pub db_name: String,
    /// Namespace searched during table discovery.
    #[ortho_config(default = default_db_schema())]
    pub db_schema: String,
    /// Prefix joined to every table name.
    #[ortho_config(default = String::new())]
    pub table_prefix: String,
    /// Data table name.
    #[ortho_config(default = default_data_table())]
    pub data_table: String,
    /// Topic registry name.
    #[ortho_config(default = default_topics_table())]
    pub topics_table: String,
    /// Metadata table name.
    #[ortho_config(default = default_meta_table())]
    pub meta_table: String,
    /// Version constraint of the historian under test, e.g. `<4.0.0`.
    #[ortho_config(default = default_historian_version())]
    pub historian_version: String,
    /// Operation for `historian-prep`.
    #[ortho_config(default = default_action())]
    pub action: PrepAction,
    /// Budget for freshly created tables to appear in the catalog.
    #[ortho_config(default = DEFAULT_SCHEMA_WAIT_MS)]
    pub schema_wait_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            database_url: None,
            db_host: default_db_host(),
            db_port: DEFAULT_DB_PORT,
            db_user: default_db_user(),
            db_password: default_db_password(),
            db_name: default_db_name(),
            db_schema: default_db_schema(),
            table_prefix: String::new(),
            data_table: default_data_table(),
            topics_table: default_topics_table(),
            meta_table: default_meta_table(),
            historian_version: default_historian_version(),
            action: default_action(),
            schema_wait_ms: DEFAULT_SCHEMA_WAIT_MS,
        }
    }
}

impl Config {
    /// Configured log filter.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Configured log format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Operation requested of the preparation binary.
    #[must_use]
    pub const fn action(&self) -> PrepAction {
        self.action
    }

    /// Version constraint of the historian under test.
    #[must_use]
    pub fn historian_version(&self) -> &str {
        &self.historian_version
    }

    /// Namespace searched during table discovery.
    #[must_use]
    pub fn db_schema(&self) -> &str {
        &self.db_schema
    }

    /// Budget for freshly created tables to appear in the catalog.
    #[must_use]
    pub const fn schema_wait(&self) -> Duration {
        Duration::from_millis(self.schema_wait_ms)
    }

    /// Administrative session parameters.
    ///
    /// `database_url` wins over the discrete `db_*` fields when present.
    pub fn connection_params(&self) -> Result<ConnectionParams, ConnectionParseError> {
        match self.database_url.as_deref() {
            Some(url) => url.parse(),
            None => Ok(ConnectionParams::new(
                self.db_host.clone(),
                self.db_port,
                self.db_user.clone(),
                self.db_password.clone(),
                self.db_name.clone(),
            )),
        }
    }

    /// Table-name mapping block.
    #[must_use]
    pub fn table_names(&self) -> TableNames {
        TableNames {
            table_prefix: self.table_prefix.clone(),
            data_table: self.data_table.clone(),
            topics_table: self.topics_table.clone(),
            meta_table: self.meta_table.clone(),
        }
    }

    /// Document installed alongside the historian.
    pub fn historian_config(&self) -> Result<HistorianConfig, ConnectionParseError> {
        Ok(HistorianConfig::postgresql(
            self.connection_params()?,
            self.table_names(),
        ))
    }
}
