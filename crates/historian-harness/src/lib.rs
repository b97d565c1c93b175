//! Conformance harness for historian services backed by PostgreSQL.
//!
//! Before every conformance run the target database must hold exactly the
//! schema the historian release under test expects. Releases older than
//! 4.0.0 need their three legacy tables created up front; newer releases
//! create their own schema on first boot and must find none of the
//! configured tables present. The [`preparer`] module stages the database
//! accordingly and the [`fixture`] module wraps preparation, service
//! installation, readiness and teardown into one value the conformance suite
//! can hold for the duration of a run.
//!
//! The `historian-prep` binary exposes preparation, reset and table listing
//! on the command line using the layered configuration from
//! [`historian_config`].

pub mod cli;
pub mod database;
pub mod fixture;
pub mod lifecycle;
pub mod preparer;
pub mod readiness;
pub mod reporter;
pub mod schema;
pub mod service;
pub mod telemetry;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use database::{AdminConnection, CatalogScope, ConnectError, DatabaseError, PostgresAdmin};
pub use fixture::{ConformanceTarget, FixtureError, FixtureRequest, HistorianFixture};
pub use lifecycle::{LifecycleError, LifecycleEvent, SchemaLifecycle};
pub use preparer::{
    CleanupError, CleanupReport, PrepareError, PreparationOutcome, Preparer, ResetMode,
    prepare_database,
};
pub use readiness::{
    CatalogProbe, CatalogView, HealthFileProbe, PollPolicy, ProbeError, Readiness, ReadinessProbe,
    poll_until,
};
pub use reporter::{PreparationReporter, StructuredPreparationReporter};
pub use schema::{SchemaGeneration, SchemaVersion, VersionError};
pub use service::{
    ProcessServiceController, ServiceController, ServiceError, ServiceHandle, ServiceSpec,
};

#[cfg(test)]
mod tests;
