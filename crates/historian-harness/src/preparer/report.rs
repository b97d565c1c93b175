//! Results of cleanup and preparation.

use std::collections::BTreeSet;
use std::fmt;

use crate::schema::{QualifiedName, SchemaGeneration, SchemaStatement};

/// How [`Preparer::reset`](super::Preparer::reset) clears a table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ResetMode {
    /// `DROP TABLE IF EXISTS`; missing tables are skipped silently.
    #[default]
    Drop,
    /// `TRUNCATE TABLE`; keeps the structure, fails on missing tables.
    Truncate,
}

impl ResetMode {
    pub(crate) fn statement(self, table: QualifiedName) -> SchemaStatement {
        match self {
            Self::Drop => SchemaStatement::DropTable { table },
            Self::Truncate => SchemaStatement::TruncateTable { table },
        }
    }
}

impl fmt::Display for ResetMode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drop => formatter.write_str("drop"),
            Self::Truncate => formatter.write_str("truncate"),
        }
    }
}

/// What a reset did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    mode: ResetMode,
    tables: Vec<String>,
    skipped: usize,
    discovered: bool,
}

impl CleanupReport {
    pub(crate) const fn new(mode: ResetMode, discovered: bool) -> Self {
        Self {
            mode,
            tables: Vec::new(),
            skipped: 0,
            discovered,
        }
    }

    pub(crate) fn record(&mut self, table: &str) {
        self.tables.push(table.to_owned());
    }

    pub(crate) const fn skip(&mut self) {
        self.skipped += 1;
    }

    /// Mode the reset ran in.
    #[must_use]
    pub const fn mode(&self) -> ResetMode {
        self.mode
    }

    /// Tables a statement was issued for, in order.
    #[must_use]
    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    /// Number of empty names that were skipped.
    #[must_use]
    pub const fn skipped(&self) -> usize {
        self.skipped
    }

    /// Whether the table list came from the catalog.
    #[must_use]
    pub const fn discovered(&self) -> bool {
        self.discovered
    }
}

/// What [`Preparer::prepare`](super::Preparer::prepare) left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparationOutcome {
    generation: SchemaGeneration,
    created: BTreeSet<String>,
    cleanup: Option<CleanupReport>,
}

impl PreparationOutcome {
    pub(crate) const fn new(
        generation: SchemaGeneration,
        created: BTreeSet<String>,
        cleanup: Option<CleanupReport>,
    ) -> Self {
        Self {
            generation,
            created,
            cleanup,
        }
    }

    /// Layout the historian under test expects.
    #[must_use]
    pub const fn generation(&self) -> SchemaGeneration {
        self.generation
    }

    /// Tables the preparer created; empty for the modern generation.
    #[must_use]
    pub const fn created(&self) -> &BTreeSet<String> {
        &self.created
    }

    /// The reset that preceded creation, or `None` when it failed.
    #[must_use]
    pub const fn cleanup(&self) -> Option<&CleanupReport> {
        self.cleanup.as_ref()
    }
}

impl fmt::Display for PreparationOutcome {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.created.is_empty() {
            return write!(formatter, "{} schema: no tables created", self.generation);
        }
        let names: Vec<&str> = self.created.iter().map(String::as_str).collect();
        write!(
            formatter,
            "{} schema: created {}",
            self.generation,
            names.join(", ")
        )
    }
}
