//! Worlds and helpers shared by the behavioural suites.

mod fixture_world;
mod preparer_world;

use historian_config::ConnectionParams;

use crate::database::CatalogScope;

pub use fixture_world::FixtureWorld;
pub use preparer_world::PreparerWorld;

pub const DATABASE: &str = "test_historian";

/// Catalog scope every world prepares.
pub fn scope() -> CatalogScope {
    CatalogScope::new(DATABASE, "public")
}

/// Connection parameters written into installed historian configurations.
pub fn params() -> ConnectionParams {
    ConnectionParams::new("localhost", 5432, "postgres", "postgres", DATABASE)
}

/// Splits a feature-file list such as `data, meta, topics`.
pub fn table_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect()
}
