//! State shared by the fixture scenarios.

use std::sync::Arc;

use historian_config::{HistorianConfig, TableNames};

use crate::fixture::{FixtureError, FixtureRequest, HistorianFixture};
use crate::preparer::Preparer;
use crate::readiness::{CatalogProbe, PollPolicy};
use crate::schema::SchemaVersion;
use crate::testing::{MemoryDatabase, RecordingReporter, ScriptedService};

use super::{params, scope};

pub struct FixtureWorld {
    pub database: MemoryDatabase,
    pub service: ScriptedService,
    pub fixture: Option<HistorianFixture<MemoryDatabase, ScriptedService>>,
    pub setup_error: Option<FixtureError>,
    pub teardown: Option<Result<(), FixtureError>>,
}

impl FixtureWorld {
    pub fn new() -> Self {
        Self {
            database: MemoryDatabase::new(scope()),
            service: ScriptedService::new(),
            fixture: None,
            setup_error: None,
            teardown: None,
        }
    }

    pub fn set_up(&mut self, constraint: &str) {
        let version: SchemaVersion = constraint.parse().expect("valid version constraint");
        let tables = TableNames::default();
        let mut probe = CatalogProbe::new(tables.physical_names());
        let request = FixtureRequest::new(HistorianConfig::postgresql(params(), tables), version)
            .with_startup(PollPolicy::immediate())
            .with_shutdown(PollPolicy::immediate());
        let preparer = Preparer::new(
            self.database.clone(),
            scope(),
            Arc::new(RecordingReporter::default()),
        );
        match HistorianFixture::setup(preparer, self.service.clone(), request, &mut probe) {
            Ok(fixture) => self.fixture = Some(fixture),
            Err(error) => self.setup_error = Some(error),
        }
    }

    pub fn tear_down(&mut self) {
        let fixture = self.fixture.take().expect("fixture should be set up");
        self.teardown = Some(fixture.teardown());
    }

    pub fn drop_fixture(&mut self) {
        drop(self.fixture.take());
    }

    pub fn fixture(&self) -> &HistorianFixture<MemoryDatabase, ScriptedService> {
        match (&self.fixture, &self.setup_error) {
            (Some(fixture), _) => fixture,
            (None, Some(error)) => panic!("fixture setup failed: {error}"),
            (None, None) => panic!("fixture was not set up"),
        }
    }
}
