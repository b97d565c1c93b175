//! Logical table roles and their physical names.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::defaults::{default_data_table, default_meta_table, default_topics_table};

/// Logical role a historian table plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TableRole {
    /// Time-series values.
    Data,
    /// Topic name registry.
    Topics,
    /// Per-topic metadata.
    Meta,
}

impl TableRole {
    /// All roles in staging order.
    pub const ALL: [Self; 3] = [Self::Data, Self::Topics, Self::Meta];
}

impl fmt::Display for TableRole {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data => formatter.write_str("data_table"),
            Self::Topics => formatter.write_str("topics_table"),
            Self::Meta => formatter.write_str("meta_table"),
        }
    }
}

/// The table-name mapping block (`tables_def`) of a historian configuration.
///
/// A non-empty `table_prefix` is joined to every configured name with an
/// underscore, so `{prefix: "site1", data_table: "data"}` addresses
/// `site1_data`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TableNames {
    /// Prefix applied to every physical name; empty for none.
    #[serde(default)]
    pub table_prefix: String,
    /// Name of the time-series data table.
    #[serde(default = "default_data_table")]
    pub data_table: String,
    /// Name of the topic registry.
    #[serde(default = "default_topics_table")]
    pub topics_table: String,
    /// Name of the metadata table.
    #[serde(default = "default_meta_table")]
    pub meta_table: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            table_prefix: String::new(),
            data_table: default_data_table(),
            topics_table: default_topics_table(),
            meta_table: default_meta_table(),
        }
    }
}

impl TableNames {
    /// Configured (unprefixed) name for a role.
    #[must_use]
    pub fn configured(&self, role: TableRole) -> &str {
        match role {
            TableRole::Data => &self.data_table,
            TableRole::Topics => &self.topics_table,
            TableRole::Meta => &self.meta_table,
        }
    }

    /// Physical name for a role with the prefix applied.
    ///
    /// Returns an empty string when the role is unset, which callers treat as
    /// "no table".
    #[must_use]
    pub fn physical(&self, role: TableRole) -> String {
        let name = self.configured(role);
        if name.is_empty() || self.table_prefix.is_empty() {
            name.to_owned()
        } else {
            format!("{}_{name}", self.table_prefix)
        }
    }

    /// Physical names in role order: data, topics, meta.
    #[must_use]
    pub fn physical_names(&self) -> Vec<String> {
        TableRole::ALL
            .iter()
            .map(|role| self.physical(*role))
            .collect()
    }
}
