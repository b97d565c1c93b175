//! The historian fixture handed to the conformance suite.
//!
//! [`HistorianFixture::setup`] prepares the database, installs and starts the
//! historian, and waits until a [`ReadinessProbe`] reports it ready. The
//! suite then talks to the service through the returned
//! [`ConformanceTarget`]. Teardown stops and removes the service and waits
//! for it to release its resources; dropping a fixture without calling
//! [`HistorianFixture::teardown`] performs the same steps on a best-effort
//! basis.

use std::time::Duration;

use historian_config::HistorianConfig;
use historian_config::defaults::{DEFAULT_INTERFACE_VERSION, DEFAULT_SERVICE_IDENTITY};
use thiserror::Error;
use tracing::{info, warn};

use crate::database::AdminConnection;
use crate::lifecycle::{LifecycleError, LifecycleEvent};
use crate::preparer::{PrepareError, PreparationOutcome, Preparer};
use crate::readiness::{PollPolicy, ProbeError, Readiness, ReadinessProbe, poll_until};
use crate::schema::SchemaVersion;
use crate::service::{ServiceController, ServiceError, ServiceHandle, ServiceSpec};

const FIXTURE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::fixture");
const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Service identity and interface version the conformance suite addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConformanceTarget {
    identity: String,
    interface_version: u32,
}

impl ConformanceTarget {
    /// Builds a target.
    #[must_use]
    pub fn new(identity: impl Into<String>, interface_version: u32) -> Self {
        Self {
            identity: identity.into(),
            interface_version,
        }
    }

    /// Service identity.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Interface version the suite exercises.
    #[must_use]
    pub const fn interface_version(&self) -> u32 {
        self.interface_version
    }
}

impl Default for ConformanceTarget {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE_IDENTITY, DEFAULT_INTERFACE_VERSION)
    }
}

/// Everything [`HistorianFixture::setup`] needs besides its collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureRequest {
    /// Configuration installed with the historian; its `tables_def` is also
    /// the table set the preparer resets.
    pub historian: HistorianConfig,
    /// Version constraint of the historian under test.
    pub version: SchemaVersion,
    /// Identity and interface version exposed to the suite.
    pub target: ConformanceTarget,
    /// Budget for the historian to report ready.
    pub startup: PollPolicy,
    /// Budget for the historian to exit after a stop request.
    pub shutdown: PollPolicy,
}

impl FixtureRequest {
    /// Builds a request with the default target and time budgets.
    #[must_use]
    pub fn new(historian: HistorianConfig, version: SchemaVersion) -> Self {
        Self {
            historian,
            version,
            target: ConformanceTarget::default(),
            startup: PollPolicy::with_timeout(STARTUP_TIMEOUT),
            shutdown: PollPolicy::with_timeout(SHUTDOWN_TIMEOUT),
        }
    }

    /// Replaces the conformance target.
    #[must_use]
    pub fn with_target(mut self, target: ConformanceTarget) -> Self {
        self.target = target;
        self
    }

    /// Replaces the startup budget.
    #[must_use]
    pub fn with_startup(mut self, policy: PollPolicy) -> Self {
        self.startup = policy;
        self
    }

    /// Replaces the shutdown budget.
    #[must_use]
    pub fn with_shutdown(mut self, policy: PollPolicy) -> Self {
        self.shutdown = policy;
        self
    }
}

/// A prepared database with a running historian.
pub struct HistorianFixture<C, S>
where
    C: AdminConnection,
    S: ServiceController,
{
    preparer: Preparer<C>,
    controller: S,
    handle: Option<ServiceHandle>,
    target: ConformanceTarget,
    outcome: PreparationOutcome,
    shutdown: PollPolicy,
}

impl<C, S> HistorianFixture<C, S>
where
    C: AdminConnection,
    S: ServiceController,
{
    /// Prepares the database and brings the historian up.
    ///
    /// If the historian fails to become ready it is stopped, when still
    /// running, and removed before the error is returned.
    pub fn setup<P>(
        mut preparer: Preparer<C>,
        mut controller: S,
        request: FixtureRequest,
        probe: &mut P,
    ) -> Result<Self, FixtureError>
    where
        P: ReadinessProbe + ?Sized,
    {
        let FixtureRequest {
            historian,
            version,
            target,
            startup,
            shutdown,
        } = request;
        let outcome = preparer.prepare(&historian.tables_def, &version)?;
        let spec = ServiceSpec::new(target.identity(), historian);
        let handle = controller.install(&spec)?;

        if let Err(error) = start_and_wait(&mut preparer, &mut controller, &handle, startup, probe)
        {
            warn!(
                target: FIXTURE_TARGET,
                id = handle.id(),
                error = %error,
                "historian failed to start; removing"
            );
            discard(&mut controller, &handle);
            return Err(error);
        }
        preparer.record(LifecycleEvent::ServiceStarted)?;
        info!(
            target: FIXTURE_TARGET,
            identity = target.identity(),
            interface_version = target.interface_version(),
            generation = %outcome.generation(),
            "historian ready for conformance run"
        );
        Ok(Self {
            preparer,
            controller,
            handle: Some(handle),
            target,
            outcome,
            shutdown,
        })
    }

    /// Identity and interface version for the suite.
    #[must_use]
    pub const fn target(&self) -> &ConformanceTarget {
        &self.target
    }

    /// What preparation staged.
    #[must_use]
    pub const fn outcome(&self) -> &PreparationOutcome {
        &self.outcome
    }

    /// Handle of the running instance, until teardown.
    #[must_use]
    pub const fn handle(&self) -> Option<&ServiceHandle> {
        self.handle.as_ref()
    }

    /// The preparer, for inspecting the staged database.
    pub fn preparer(&mut self) -> &mut Preparer<C> {
        &mut self.preparer
    }

    /// Stops and removes the historian and waits for it to exit.
    pub fn teardown(mut self) -> Result<(), FixtureError> {
        self.shut_down()
    }

    /// Removal is attempted whichever step fails, since the handle is
    /// gone once this returns.
    fn shut_down(&mut self) -> Result<(), FixtureError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        if let Err(error) = stop_and_wait(&mut self.controller, &handle, self.shutdown) {
            discard(&mut self.controller, &handle);
            return Err(error);
        }
        self.controller.remove(&handle)?;
        self.preparer.record(LifecycleEvent::ServiceStopped)?;
        info!(target: FIXTURE_TARGET, id = handle.id(), "historian torn down");
        Ok(())
    }
}

impl<C, S> Drop for HistorianFixture<C, S>
where
    C: AdminConnection,
    S: ServiceController,
{
    fn drop(&mut self) {
        if let Err(error) = self.shut_down() {
            warn!(
                target: FIXTURE_TARGET,
                error = %error,
                "historian teardown failed"
            );
        }
    }
}

fn start_and_wait<C, S, P>(
    preparer: &mut Preparer<C>,
    controller: &mut S,
    handle: &ServiceHandle,
    startup: PollPolicy,
    probe: &mut P,
) -> Result<(), FixtureError>
where
    C: AdminConnection,
    S: ServiceController,
    P: ReadinessProbe + ?Sized,
{
    controller.start(handle)?;
    let ready = poll_until(startup, || {
        if !controller.is_running(handle)? {
            return Err(FixtureError::ServiceExited {
                identity: handle.identity().to_owned(),
            });
        }
        match probe.probe(&mut *preparer)? {
            Readiness::Ready => Ok(Some(())),
            Readiness::Pending => Ok(None),
            Readiness::Aborted { reason } => Err(FixtureError::StartupAborted {
                identity: handle.identity().to_owned(),
                reason,
            }),
        }
    })?;
    ready.ok_or_else(|| FixtureError::StartupTimeout {
        identity: handle.identity().to_owned(),
        timeout: startup.timeout(),
    })
}

fn stop_and_wait<S>(
    controller: &mut S,
    handle: &ServiceHandle,
    shutdown: PollPolicy,
) -> Result<(), FixtureError>
where
    S: ServiceController,
{
    if controller.is_running(handle)? {
        controller.stop(handle)?;
    }
    let exited = poll_until(shutdown, || {
        Ok::<_, ServiceError>((!controller.is_running(handle)?).then_some(()))
    })?;
    exited.ok_or_else(|| FixtureError::ShutdownTimeout {
        identity: handle.identity().to_owned(),
        timeout: shutdown.timeout(),
    })
}

/// Best-effort cleanup once the orderly path has failed: stop whatever is
/// still running, then remove the install. Failures are only logged.
fn discard<S>(controller: &mut S, handle: &ServiceHandle)
where
    S: ServiceController,
{
    let stopped = match controller.is_running(handle) {
        Ok(false) => Ok(()),
        Ok(true) => controller.stop(handle),
        Err(error) => Err(error),
    };
    if let Err(error) = stopped {
        warn!(
            target: FIXTURE_TARGET,
            id = handle.id(),
            error = %error,
            "failed to stop historian"
        );
    }
    if let Err(error) = controller.remove(handle) {
        warn!(
            target: FIXTURE_TARGET,
            id = handle.id(),
            error = %error,
            "failed to remove historian"
        );
    }
}

/// The fixture could not be set up or torn down.
#[derive(Debug, Error)]
pub enum FixtureError {
    /// Database preparation failed.
    #[error("database preparation failed: {0}")]
    Prepare(#[from] PrepareError),
    /// The service controller failed.
    #[error("service control failed: {0}")]
    Service(#[from] ServiceError),
    /// Readiness could not be evaluated.
    #[error("readiness check failed: {0}")]
    Probe(#[from] ProbeError),
    /// The historian exited before reporting ready.
    #[error("historian '{identity}' exited before becoming ready")]
    ServiceExited {
        /// Service identity.
        identity: String,
    },
    /// The historian reported that it is shutting down during startup.
    #[error("historian '{identity}' aborted startup: {reason}")]
    StartupAborted {
        /// Service identity.
        identity: String,
        /// Reason reported by the probe.
        reason: String,
    },
    /// The historian did not report ready in time.
    #[error("historian '{identity}' not ready after {timeout:?}")]
    StartupTimeout {
        /// Service identity.
        identity: String,
        /// Startup budget.
        timeout: Duration,
    },
    /// The historian did not exit in time.
    #[error("historian '{identity}' still running after {timeout:?}")]
    ShutdownTimeout {
        /// Service identity.
        identity: String,
        /// Shutdown budget.
        timeout: Duration,
    },
    /// The schema lifecycle rejected a transition.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}
