//! The configuration document handed to the historian under test.

use serde::{Deserialize, Serialize};

use crate::connection::{ConnectionConfig, ConnectionParams};
use crate::tables::TableNames;

/// Configuration installed alongside the historian service.
///
/// Serialises to the layout the historian reads on boot:
///
/// ```json
/// {
///   "connection": {"type": "postgresql", "params": {"dbname": "...", ...}},
///   "tables_def": {"table_prefix": "", "data_table": "data", ...}
/// }
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct HistorianConfig {
    /// Backend and session parameters.
    pub connection: ConnectionConfig,
    /// Physical table names the historian should use.
    #[serde(default)]
    pub tables_def: TableNames,
}

impl HistorianConfig {
    /// Builds a PostgreSQL configuration document.
    #[must_use]
    pub const fn postgresql(params: ConnectionParams, tables_def: TableNames) -> Self {
        Self {
            connection: ConnectionConfig::postgresql(params),
            tables_def,
        }
    }

    /// Session parameters the historian will use.
    #[must_use]
    pub const fn params(&self) -> &ConnectionParams {
        &self.connection.params
    }
}
