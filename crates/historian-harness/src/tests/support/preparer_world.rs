//! State shared by the preparer scenarios.

use std::sync::Arc;

use historian_config::TableNames;

use crate::preparer::{
    CleanupError, CleanupReport, PrepareError, PreparationOutcome, Preparer, ResetMode,
};
use crate::schema::SchemaVersion;
use crate::testing::{MemoryDatabase, PreparationEvent, RecordingReporter};

use super::scope;

pub struct PreparerWorld {
    pub database: MemoryDatabase,
    pub reporter: Arc<RecordingReporter>,
    pub tables: TableNames,
    preparer: Preparer<MemoryDatabase>,
    outcome: Option<Result<PreparationOutcome, PrepareError>>,
    cleanup: Option<Result<CleanupReport, CleanupError>>,
}

impl PreparerWorld {
    pub fn new() -> Self {
        let database = MemoryDatabase::new(scope());
        let reporter = Arc::new(RecordingReporter::default());
        let preparer = Preparer::new(database.clone(), scope(), reporter.clone());
        Self {
            database,
            reporter,
            tables: TableNames::default(),
            preparer,
            outcome: None,
            cleanup: None,
        }
    }

    pub fn prepare(&mut self, constraint: &str) {
        let version: SchemaVersion = constraint.parse().expect("valid version constraint");
        self.outcome = Some(self.preparer.prepare(&self.tables, &version));
    }

    pub fn reset(&mut self, mode: ResetMode) {
        let names = self.tables.physical_names();
        self.cleanup = Some(self.preparer.reset(Some(names.as_slice()), mode));
    }

    pub fn reset_discovered(&mut self) {
        self.cleanup = Some(self.preparer.reset(None, ResetMode::Drop));
    }

    pub fn outcome(&self) -> &Result<PreparationOutcome, PrepareError> {
        self.outcome.as_ref().expect("preparation should have run")
    }

    pub fn cleanup(&self) -> &Result<CleanupReport, CleanupError> {
        self.cleanup.as_ref().expect("reset should have run")
    }

    pub fn events(&self) -> Vec<PreparationEvent> {
        self.reporter.events()
    }
}
