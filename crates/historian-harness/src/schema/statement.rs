//! Statements the preparer issues against the administrative session.

use std::collections::BTreeSet;
use std::fmt;

use historian_config::{TableNames, TableRole};

use super::identifier::{Identifier, IdentifierError, QualifiedName};

/// A single schema statement with its target identifiers already quoted.
///
/// Every table is namespace-qualified. An index always lives in its table's
/// namespace, so its own name stays bare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaStatement {
    /// `DROP TABLE IF EXISTS`.
    DropTable {
        /// Table to drop.
        table: QualifiedName,
    },
    /// `TRUNCATE TABLE`, keeping the structure.
    TruncateTable {
        /// Table to empty.
        table: QualifiedName,
    },
    /// Legacy time-series table, unique on `(topic_id, ts)`.
    CreateDataTable {
        /// Table to create.
        table: QualifiedName,
    },
    /// Ascending index on the data table's `ts` column.
    CreateTimestampIndex {
        /// Index name.
        index: Identifier,
        /// Indexed table.
        table: QualifiedName,
    },
    /// Legacy topic registry, unique on `topic_name`.
    CreateTopicsTable {
        /// Table to create.
        table: QualifiedName,
    },
    /// Legacy metadata table keyed by `topic_id`.
    CreateMetaTable {
        /// Table to create.
        table: QualifiedName,
    },
}

impl SchemaStatement {
    /// Table the statement acts on.
    #[must_use]
    pub const fn table(&self) -> &QualifiedName {
        match self {
            Self::DropTable { table }
            | Self::TruncateTable { table }
            | Self::CreateDataTable { table }
            | Self::CreateTimestampIndex { table, .. }
            | Self::CreateTopicsTable { table }
            | Self::CreateMetaTable { table } => table,
        }
    }

    /// Short name of the operation, used in diagnostics.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::DropTable { .. } => "drop",
            Self::TruncateTable { .. } => "truncate",
            Self::CreateTimestampIndex { .. } => "create index",
            Self::CreateDataTable { .. }
            | Self::CreateTopicsTable { .. }
            | Self::CreateMetaTable { .. } => "create table",
        }
    }

    /// Renders the statement as SQL.
    #[must_use]
    pub fn sql(&self) -> String {
        match self {
            Self::DropTable { table } => format!("DROP TABLE IF EXISTS {table}"),
            Self::TruncateTable { table } => format!("TRUNCATE TABLE {table}"),
            Self::CreateDataTable { table } => format!(
                "CREATE TABLE IF NOT EXISTS {table} (\
                 ts TIMESTAMP NOT NULL, \
                 topic_id INTEGER NOT NULL, \
                 value_string TEXT NOT NULL, \
                 UNIQUE (topic_id, ts))"
            ),
            Self::CreateTimestampIndex { index, table } => {
                format!("CREATE INDEX IF NOT EXISTS {index} ON {table} (ts ASC)")
            }
            Self::CreateTopicsTable { table } => format!(
                "CREATE TABLE IF NOT EXISTS {table} (\
                 topic_id SERIAL PRIMARY KEY NOT NULL, \
                 topic_name VARCHAR(512) NOT NULL, \
                 UNIQUE (topic_name))"
            ),
            Self::CreateMetaTable { table } => format!(
                "CREATE TABLE IF NOT EXISTS {table} (\
                 topic_id INTEGER PRIMARY KEY NOT NULL, \
                 metadata TEXT NOT NULL)"
            ),
        }
    }
}

impl fmt::Display for SchemaStatement {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.sql())
    }
}

/// The pre-4.0.0 table layout for one table set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyLayout {
    data: Identifier,
    index: Identifier,
    topics: Identifier,
    meta: Identifier,
}

impl LegacyLayout {
    /// Resolves the physical names of all three roles.
    ///
    /// Every role must be named: the legacy layout always has three tables.
    pub fn from_tables(tables: &TableNames) -> Result<Self, LegacyLayoutError> {
        let resolve = |role: TableRole| {
            Identifier::new(tables.physical(role))
                .map_err(|source| LegacyLayoutError { role, source })
        };
        let data = resolve(TableRole::Data)?;
        let index = Identifier::new(format!("idx_{}", data.as_str())).map_err(|source| {
            LegacyLayoutError {
                role: TableRole::Data,
                source,
            }
        })?;
        Ok(Self {
            index,
            topics: resolve(TableRole::Topics)?,
            meta: resolve(TableRole::Meta)?,
            data,
        })
    }

    /// DDL in execution order: data table, its index, topics, meta.
    ///
    /// Every table is created in `namespace`.
    #[must_use]
    pub fn statements(&self, namespace: &Identifier) -> Vec<SchemaStatement> {
        let within = |table: &Identifier| QualifiedName::new(namespace.clone(), table.clone());
        vec![
            SchemaStatement::CreateDataTable {
                table: within(&self.data),
            },
            SchemaStatement::CreateTimestampIndex {
                index: self.index.clone(),
                table: within(&self.data),
            },
            SchemaStatement::CreateTopicsTable {
                table: within(&self.topics),
            },
            SchemaStatement::CreateMetaTable {
                table: within(&self.meta),
            },
        ]
    }

    /// Names of the tables the layout creates.
    #[must_use]
    pub fn table_names(&self) -> BTreeSet<String> {
        [&self.data, &self.topics, &self.meta]
            .into_iter()
            .map(|table| table.as_str().to_owned())
            .collect()
    }
}

/// A table role could not be turned into an identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {role} name: {source}")]
pub struct LegacyLayoutError {
    /// Role whose name was rejected.
    pub role: TableRole,
    /// Underlying identifier error.
    #[source]
    pub source: IdentifierError,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn namespace(name: &str) -> Identifier {
        Identifier::new(name).expect("valid namespace")
    }

    fn layout(prefix: &str) -> LegacyLayout {
        let tables = TableNames {
            table_prefix: prefix.to_owned(),
            ..TableNames::default()
        };
        LegacyLayout::from_tables(&tables).expect("layout should resolve")
    }

    #[test]
    fn legacy_ddl_matches_pre_migration_layout() {
        let sql = layout("")
            .statements(&namespace("public"))
            .iter()
            .map(SchemaStatement::sql)
            .collect::<Vec<_>>()
            .join(";\n");
        insta::assert_snapshot!(sql, @r#"
        CREATE TABLE IF NOT EXISTS "public"."data" (ts TIMESTAMP NOT NULL, topic_id INTEGER NOT NULL, value_string TEXT NOT NULL, UNIQUE (topic_id, ts));
        CREATE INDEX IF NOT EXISTS "idx_data" ON "public"."data" (ts ASC);
        CREATE TABLE IF NOT EXISTS "public"."topics" (topic_id SERIAL PRIMARY KEY NOT NULL, topic_name VARCHAR(512) NOT NULL, UNIQUE (topic_name));
        CREATE TABLE IF NOT EXISTS "public"."meta" (topic_id INTEGER PRIMARY KEY NOT NULL, metadata TEXT NOT NULL)
        "#);
    }

    #[test]
    fn prefix_reaches_tables_and_index() {
        let prefixed = layout("site1");
        let statements = prefixed.statements(&namespace("staging"));
        assert_eq!(
            statements.first().map(SchemaStatement::sql).as_deref(),
            Some(
                "CREATE TABLE IF NOT EXISTS \"staging\".\"site1_data\" (ts TIMESTAMP NOT NULL, topic_id INTEGER NOT NULL, value_string TEXT NOT NULL, UNIQUE (topic_id, ts))"
            )
        );
        assert_eq!(
            statements.get(1).map(SchemaStatement::sql).as_deref(),
            Some(
                "CREATE INDEX IF NOT EXISTS \"idx_site1_data\" ON \"staging\".\"site1_data\" (ts ASC)"
            )
        );
        assert_eq!(
            prefixed.table_names().into_iter().collect::<Vec<_>>(),
            vec!["site1_data", "site1_meta", "site1_topics"]
        );
    }

    #[test]
    fn unnamed_role_is_rejected() {
        let tables = TableNames {
            topics_table: String::new(),
            ..TableNames::default()
        };
        let error = LegacyLayout::from_tables(&tables).expect_err("topics role is required");
        assert_eq!(error.role, TableRole::Topics);
        assert_eq!(error.source, IdentifierError::Empty);
    }

    #[test]
    fn long_data_name_leaves_no_room_for_its_index() {
        let tables = TableNames {
            data_table: "d".repeat(60),
            ..TableNames::default()
        };
        let error = LegacyLayout::from_tables(&tables).expect_err("idx_ name exceeds the limit");
        assert_eq!(error.role, TableRole::Data);
        assert_eq!(
            error.source,
            IdentifierError::TooLong {
                name: format!("idx_{}", "d".repeat(60))
            }
        );
    }

    #[test]
    fn long_prefix_is_rejected_rather_than_truncated() {
        let tables = TableNames {
            table_prefix: "p".repeat(60),
            ..TableNames::default()
        };
        let error = LegacyLayout::from_tables(&tables).expect_err("prefixed names are too long");
        assert!(matches!(error.source, IdentifierError::TooLong { .. }));
    }

    #[test]
    fn cleanup_statements_quote_targets() {
        let table = QualifiedName::new(
            namespace("Site 1"),
            Identifier::new("Data").expect("valid name"),
        );
        assert_eq!(
            SchemaStatement::DropTable {
                table: table.clone()
            }
            .sql(),
            "DROP TABLE IF EXISTS \"Site 1\".\"Data\""
        );
        assert_eq!(
            SchemaStatement::TruncateTable { table }.to_string(),
            "TRUNCATE TABLE \"Site 1\".\"Data\""
        );
    }
}
