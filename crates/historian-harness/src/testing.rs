//! In-memory doubles for exercising preparation and fixture flows without a
//! database server or a historian binary.
//!
//! [`MemoryDatabase`] interprets [`SchemaStatement`]s against an in-memory
//! catalog with PostgreSQL's autocommit semantics, and can be scripted to
//! reject individual statements. [`ScriptedService`] stands in for a
//! historian install and can bootstrap tables into a shared
//! [`MemoryDatabase`] when started. Both are cheap handles over shared state,
//! so a clone kept by the test observes everything the code under test did.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::sync::{Mutex, PoisonError};

use crate::database::{AdminConnection, CatalogScope, DatabaseError};
use crate::preparer::{CleanupError, CleanupReport, PrepareError, ResetMode};
use crate::reporter::PreparationReporter;
use crate::schema::{SchemaGeneration, SchemaStatement, SchemaVersion};
use crate::service::{ServiceController, ServiceError, ServiceHandle, ServiceSpec};

#[derive(Debug)]
struct ScriptedFailure {
    verb: &'static str,
    table: String,
    message: String,
}

#[derive(Debug)]
struct MemoryState {
    scope: CatalogScope,
    namespaces: BTreeMap<String, Namespace>,
    executed: Vec<SchemaStatement>,
    failures: Vec<ScriptedFailure>,
    catalog_failure: Option<String>,
    commits: usize,
}

#[derive(Debug, Default)]
struct Namespace {
    tables: BTreeMap<String, Vec<String>>,
    indexes: BTreeMap<String, String>,
}

impl MemoryState {
    fn home(&mut self) -> &mut Namespace {
        let schema = self.scope.schema().to_owned();
        self.namespaces.entry(schema).or_default()
    }

    fn take_failure(&mut self, statement: &SchemaStatement) -> Option<String> {
        let table = statement.table().name().as_str();
        let position = self
            .failures
            .iter()
            .position(|failure| failure.verb == statement.verb() && failure.table == table)?;
        Some(self.failures.remove(position).message)
    }

    fn apply(&mut self, statement: &SchemaStatement) -> Result<(), DatabaseError> {
        let target = statement.table();
        let table = target.name().as_str().to_owned();
        let Some(namespace) = self.namespaces.get_mut(target.namespace().as_str()) else {
            return Err(DatabaseError::rejected(format!(
                "schema \"{}\" does not exist",
                target.namespace().as_str()
            )));
        };
        match statement {
            SchemaStatement::DropTable { .. } => {
                namespace.tables.remove(&table);
                namespace.indexes.retain(|_, indexed| *indexed != table);
            }
            SchemaStatement::TruncateTable { .. } => namespace
                .tables
                .get_mut(&table)
                .ok_or_else(|| missing_relation(&table))?
                .clear(),
            SchemaStatement::CreateDataTable { .. }
            | SchemaStatement::CreateTopicsTable { .. }
            | SchemaStatement::CreateMetaTable { .. } => {
                namespace.tables.entry(table).or_default();
            }
            SchemaStatement::CreateTimestampIndex { index, .. } => {
                if !namespace.tables.contains_key(&table) {
                    return Err(missing_relation(&table));
                }
                namespace
                    .indexes
                    .entry(index.as_str().to_owned())
                    .or_insert(table);
            }
        }
        Ok(())
    }
}

fn missing_relation(table: &str) -> DatabaseError {
    DatabaseError::rejected(format!("relation \"{table}\" does not exist"))
}

/// In-memory catalog implementing [`AdminConnection`].
///
/// Tables live in namespaces. The scope's namespace always exists, others
/// appear once [`MemoryDatabase::create_table_in`] first names them, and a
/// statement only ever touches the namespace its target is qualified with.
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    state: Rc<RefCell<MemoryState>>,
}

impl MemoryDatabase {
    /// Creates an empty database whose catalog answers for `scope`.
    #[must_use]
    pub fn new(scope: CatalogScope) -> Self {
        let namespaces = BTreeMap::from([(scope.schema().to_owned(), Namespace::default())]);
        Self {
            state: Rc::new(RefCell::new(MemoryState {
                scope,
                namespaces,
                executed: Vec::new(),
                failures: Vec::new(),
                catalog_failure: None,
                commits: 0,
            })),
        }
    }

    /// Creates a table in the scope's namespace, bypassing statement
    /// recording.
    pub fn create_table(&self, table: &str) {
        self.state
            .borrow_mut()
            .home()
            .tables
            .entry(table.to_owned())
            .or_default();
    }

    /// Creates a table in another namespace, bypassing statement recording.
    pub fn create_table_in(&self, namespace: &str, table: &str) {
        self.state
            .borrow_mut()
            .namespaces
            .entry(namespace.to_owned())
            .or_default()
            .tables
            .entry(table.to_owned())
            .or_default();
    }

    /// Appends a row to an existing table in the scope's namespace.
    pub fn insert_row(&self, table: &str, row: impl Into<String>) -> Result<(), DatabaseError> {
        self.state
            .borrow_mut()
            .home()
            .tables
            .get_mut(table)
            .ok_or_else(|| missing_relation(table))?
            .push(row.into());
        Ok(())
    }

    /// Rows held by `table`, or `None` when it does not exist.
    #[must_use]
    pub fn row_count(&self, table: &str) -> Option<usize> {
        self.state.borrow_mut().home().tables.get(table).map(Vec::len)
    }

    /// Tables that currently exist in the scope's namespace.
    #[must_use]
    pub fn tables(&self) -> BTreeSet<String> {
        self.tables_in(self.state.borrow().scope.schema())
    }

    /// Tables that currently exist in `namespace`.
    #[must_use]
    pub fn tables_in(&self, namespace: &str) -> BTreeSet<String> {
        self.state
            .borrow()
            .namespaces
            .get(namespace)
            .map(|namespace| namespace.tables.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether the named index exists in the scope's namespace.
    #[must_use]
    pub fn has_index(&self, index: &str) -> bool {
        self.state.borrow_mut().home().indexes.contains_key(index)
    }

    /// Every statement submitted so far, including rejected ones.
    #[must_use]
    pub fn executed(&self) -> Vec<SchemaStatement> {
        self.state.borrow().executed.clone()
    }

    /// Number of completed commits.
    #[must_use]
    pub fn commits(&self) -> usize {
        self.state.borrow().commits
    }

    /// Rejects the next `verb` statement aimed at `table` with `message`.
    ///
    /// `verb` is a [`SchemaStatement::verb`] value such as `"create table"`.
    pub fn fail_once(&self, verb: &'static str, table: &str, message: impl Into<String>) {
        self.state.borrow_mut().failures.push(ScriptedFailure {
            verb,
            table: table.to_owned(),
            message: message.into(),
        });
    }

    /// Makes catalog queries fail with `message` until restored.
    pub fn fail_catalog(&self, message: impl Into<String>) {
        self.state.borrow_mut().catalog_failure = Some(message.into());
    }

    /// Lets catalog queries succeed again.
    pub fn restore_catalog(&self) {
        self.state.borrow_mut().catalog_failure = None;
    }
}

impl AdminConnection for MemoryDatabase {
    fn execute(&mut self, statement: &SchemaStatement) -> Result<(), DatabaseError> {
        let mut state = self.state.borrow_mut();
        state.executed.push(statement.clone());
        if let Some(message) = state.take_failure(statement) {
            return Err(DatabaseError::rejected(message));
        }
        state.apply(statement)
    }

    fn table_names(&mut self, scope: &CatalogScope) -> Result<Vec<String>, DatabaseError> {
        let state = self.state.borrow();
        if let Some(message) = &state.catalog_failure {
            return Err(DatabaseError::rejected(message.clone()));
        }
        if scope.database() != state.scope.database() {
            return Ok(Vec::new());
        }
        Ok(state
            .namespaces
            .get(scope.schema())
            .map(|namespace| namespace.tables.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn commit(&mut self) -> Result<(), DatabaseError> {
        self.state.borrow_mut().commits += 1;
        Ok(())
    }
}

/// Preparation events captured by [`RecordingReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreparationEvent {
    /// Preparation began for a generation.
    Starting(SchemaGeneration),
    /// Tables were reset.
    TablesReset {
        /// Reset mode.
        mode: ResetMode,
        /// Tables acted on.
        tables: Vec<String>,
    },
    /// The reset failed.
    CleanupFailed(String),
    /// Discovery failed.
    DiscoveryFailed(String),
    /// Legacy tables were created.
    LegacyCreated(BTreeSet<String>),
    /// Creation was left to the historian.
    BootstrapDeferred,
    /// Preparation failed.
    SchemaFailed(String),
}

/// [`PreparationReporter`] that records events for assertions.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<PreparationEvent>>,
}

impl RecordingReporter {
    /// Captures a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<PreparationEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, event: PreparationEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl PreparationReporter for RecordingReporter {
    fn preparation_starting(&self, _scope: &CatalogScope, version: &SchemaVersion) {
        self.record(PreparationEvent::Starting(version.generation()));
    }

    fn tables_reset(&self, report: &CleanupReport) {
        self.record(PreparationEvent::TablesReset {
            mode: report.mode(),
            tables: report.tables().to_vec(),
        });
    }

    fn cleanup_failed(&self, error: &CleanupError) {
        self.record(PreparationEvent::CleanupFailed(error.to_string()));
    }

    fn discovery_failed(&self, _scope: &CatalogScope, error: &DatabaseError) {
        self.record(PreparationEvent::DiscoveryFailed(error.to_string()));
    }

    fn legacy_schema_created(&self, tables: &BTreeSet<String>) {
        self.record(PreparationEvent::LegacyCreated(tables.clone()));
    }

    fn bootstrap_deferred(&self, _version: &SchemaVersion) {
        self.record(PreparationEvent::BootstrapDeferred);
    }

    fn schema_failed(&self, error: &PrepareError) {
        self.record(PreparationEvent::SchemaFailed(error.to_string()));
    }
}

/// Calls received by a [`ScriptedService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    /// `install` for an identity.
    Install(String),
    /// `start` for an instance id.
    Start(String),
    /// `stop` for an instance id.
    Stop(String),
    /// `remove` for an instance id.
    Remove(String),
}

#[derive(Debug, Default)]
struct ServiceScript {
    calls: Vec<ServiceCall>,
    specs: Vec<ServiceSpec>,
    running: BTreeMap<String, bool>,
    next_id: u64,
    bootstrap: Option<(MemoryDatabase, Vec<String>)>,
    exits_on_start: bool,
    ignores_stop: bool,
    install_failure: Option<String>,
    start_failure: Option<String>,
}

/// [`ServiceController`] double with scripted behaviour.
#[derive(Debug, Clone, Default)]
pub struct ScriptedService {
    script: Rc<RefCell<ServiceScript>>,
}

impl ScriptedService {
    /// A service that starts and stops cleanly.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `tables` in `database` when started, like a modern historian.
    pub fn bootstraps(&self, database: &MemoryDatabase, tables: &[&str]) {
        self.script.borrow_mut().bootstrap = Some((
            database.clone(),
            tables.iter().map(|table| (*table).to_owned()).collect(),
        ));
    }

    /// Exits immediately after starting.
    pub fn exits_on_start(&self) {
        self.script.borrow_mut().exits_on_start = true;
    }

    /// Keeps running after a stop request.
    pub fn ignores_stop(&self) {
        self.script.borrow_mut().ignores_stop = true;
    }

    /// Rejects installation with `message`.
    pub fn fail_install(&self, message: impl Into<String>) {
        self.script.borrow_mut().install_failure = Some(message.into());
    }

    /// Rejects start with `message`.
    pub fn fail_start(&self, message: impl Into<String>) {
        self.script.borrow_mut().start_failure = Some(message.into());
    }

    /// Calls received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.script.borrow().calls.clone()
    }

    /// Specs passed to `install`.
    #[must_use]
    pub fn specs(&self) -> Vec<ServiceSpec> {
        self.script.borrow().specs.clone()
    }

    /// Number of installed instances that are running.
    #[must_use]
    pub fn running(&self) -> usize {
        self.script
            .borrow()
            .running
            .values()
            .filter(|running| **running)
            .count()
    }

    /// Number of instances still installed.
    #[must_use]
    pub fn installed(&self) -> usize {
        self.script.borrow().running.len()
    }
}

impl ServiceScript {
    fn state(&mut self, handle: &ServiceHandle) -> Result<&mut bool, ServiceError> {
        self.running
            .get_mut(handle.id())
            .ok_or_else(|| ServiceError::UnknownInstance {
                id: handle.id().to_owned(),
            })
    }
}

impl ServiceController for ScriptedService {
    fn install(&mut self, spec: &ServiceSpec) -> Result<ServiceHandle, ServiceError> {
        let mut script = self.script.borrow_mut();
        script.calls.push(ServiceCall::Install(spec.identity.clone()));
        if let Some(message) = script.install_failure.clone() {
            return Err(ServiceError::rejected(message));
        }
        script.specs.push(spec.clone());
        script.next_id += 1;
        let id = format!("{}-{}", spec.identity, script.next_id);
        script.running.insert(id.clone(), false);
        Ok(ServiceHandle::new(id, spec.identity.as_str()))
    }

    fn start(&mut self, handle: &ServiceHandle) -> Result<(), ServiceError> {
        let mut script = self.script.borrow_mut();
        script.calls.push(ServiceCall::Start(handle.id().to_owned()));
        if let Some(message) = script.start_failure.clone() {
            return Err(ServiceError::rejected(message));
        }
        let exits = script.exits_on_start;
        *script.state(handle)? = !exits;
        if exits {
            return Ok(());
        }
        if let Some((database, tables)) = &script.bootstrap {
            for table in tables {
                database.create_table(table);
            }
        }
        Ok(())
    }

    fn is_running(&mut self, handle: &ServiceHandle) -> Result<bool, ServiceError> {
        Ok(*self.script.borrow_mut().state(handle)?)
    }

    fn stop(&mut self, handle: &ServiceHandle) -> Result<(), ServiceError> {
        let mut script = self.script.borrow_mut();
        script.calls.push(ServiceCall::Stop(handle.id().to_owned()));
        let ignores = script.ignores_stop;
        let running = script.state(handle)?;
        if !ignores {
            *running = false;
        }
        Ok(())
    }

    fn remove(&mut self, handle: &ServiceHandle) -> Result<(), ServiceError> {
        let mut script = self.script.borrow_mut();
        script
            .calls
            .push(ServiceCall::Remove(handle.id().to_owned()));
        script
            .running
            .remove(handle.id())
            .map(|_| ())
            .ok_or_else(|| ServiceError::UnknownInstance {
                id: handle.id().to_owned(),
            })
    }
}
