use std::time::Duration;

use crate::modes::{LogFormat, PrepAction};

/// Default PostgreSQL port.
pub const DEFAULT_DB_PORT: u16 = 5432;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Namespace searched when discovering tables.
pub const DEFAULT_DB_SCHEMA: &str = "public";

/// Database the conformance suite stages by default.
pub const DEFAULT_DB_NAME: &str = "test_historian";

/// Version constraint selecting the modern layout.
pub const DEFAULT_HISTORIAN_VERSION: &str = ">=4.0.0";

/// Identity the service under test is addressed by.
pub const DEFAULT_SERVICE_IDENTITY: &str = "platform.historian";

/// Revision of the shared conformance suite run against the service.
pub const DEFAULT_INTERFACE_VERSION: u32 = 6;

/// Upper bound on waiting for freshly created legacy tables to become visible.
pub const DEFAULT_SCHEMA_WAIT_MS: u64 = 5_000;

/// Default log filter expression used by the binaries.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default action for the preparation binary.
#[must_use]
pub fn default_action() -> PrepAction {
    PrepAction::Prepare
}

/// Default administrative host.
#[must_use]
pub fn default_db_host() -> String {
    "localhost".to_owned()
}

/// Default administrative role.
#[must_use]
pub fn default_db_user() -> String {
    "postgres".to_owned()
}

/// Default administrative password.
#[must_use]
pub fn default_db_password() -> String {
    "postgres".to_owned()
}

/// Default database name.
#[must_use]
pub fn default_db_name() -> String {
    DEFAULT_DB_NAME.to_owned()
}

/// Default catalog namespace.
#[must_use]
pub fn default_db_schema() -> String {
    DEFAULT_DB_SCHEMA.to_owned()
}

/// Default physical name of the time-series data table.
#[must_use]
pub fn default_data_table() -> String {
    "data".to_owned()
}

/// Default physical name of the topic registry.
#[must_use]
pub fn default_topics_table() -> String {
    "topics".to_owned()
}

/// Default physical name of the per-topic metadata table.
#[must_use]
pub fn default_meta_table() -> String {
    "meta".to_owned()
}

/// Default historian version constraint.
#[must_use]
pub fn default_historian_version() -> String {
    DEFAULT_HISTORIAN_VERSION.to_owned()
}

/// Default schema visibility budget.
#[must_use]
pub const fn default_schema_wait() -> Duration {
    Duration::from_millis(DEFAULT_SCHEMA_WAIT_MS)
}
