//! Schema lifecycle tracked across one preparation and service run.
//!
//! ```text
//! Unprepared -> TablesDropped -> LegacyCreated ----------> ServiceRunning -> ServiceStopped
//!                             \-> AwaitingServiceBootstrap -/
//! ```
//!
//! Re-preparing is allowed from every state except [`SchemaLifecycle::ServiceRunning`];
//! tables are never dropped underneath a live historian.

use std::fmt;

use thiserror::Error;

/// Where the staged database currently stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SchemaLifecycle {
    /// Nothing has been touched yet.
    #[default]
    Unprepared,
    /// The configured tables were reset.
    TablesDropped,
    /// The legacy tables were created by the preparer.
    LegacyCreated,
    /// The historian will create its own tables on first boot.
    AwaitingServiceBootstrap,
    /// The historian is installed and ready.
    ServiceRunning,
    /// The historian was stopped and removed.
    ServiceStopped,
}

/// Transitions of [`SchemaLifecycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// Configured tables were dropped.
    TablesDropped,
    /// Legacy DDL completed.
    LegacyCreated,
    /// Schema creation was left to the historian.
    BootstrapDeferred,
    /// The historian reported ready.
    ServiceStarted,
    /// The historian shut down.
    ServiceStopped,
}

impl SchemaLifecycle {
    /// Returns the state reached by applying `event`.
    pub fn advance(self, event: LifecycleEvent) -> Result<Self, LifecycleError> {
        match (self, event) {
            (Self::ServiceRunning, LifecycleEvent::TablesDropped) => {
                Err(LifecycleError::InvalidTransition { state: self, event })
            }
            (_, LifecycleEvent::TablesDropped) => Ok(Self::TablesDropped),
            (Self::TablesDropped, LifecycleEvent::LegacyCreated) => Ok(Self::LegacyCreated),
            (Self::TablesDropped, LifecycleEvent::BootstrapDeferred) => {
                Ok(Self::AwaitingServiceBootstrap)
            }
            (
                Self::LegacyCreated | Self::AwaitingServiceBootstrap,
                LifecycleEvent::ServiceStarted,
            ) => Ok(Self::ServiceRunning),
            (Self::ServiceRunning, LifecycleEvent::ServiceStopped) => Ok(Self::ServiceStopped),
            (state, event) => Err(LifecycleError::InvalidTransition { state, event }),
        }
    }

    /// Whether the schema is staged and a historian may be started.
    #[must_use]
    pub const fn is_prepared(self) -> bool {
        matches!(self, Self::LegacyCreated | Self::AwaitingServiceBootstrap)
    }
}

impl fmt::Display for SchemaLifecycle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unprepared => "unprepared",
            Self::TablesDropped => "tables dropped",
            Self::LegacyCreated => "legacy created",
            Self::AwaitingServiceBootstrap => "awaiting service bootstrap",
            Self::ServiceRunning => "service running",
            Self::ServiceStopped => "service stopped",
        };
        formatter.write_str(label)
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::TablesDropped => "tables dropped",
            Self::LegacyCreated => "legacy created",
            Self::BootstrapDeferred => "bootstrap deferred",
            Self::ServiceStarted => "service started",
            Self::ServiceStopped => "service stopped",
        };
        formatter.write_str(label)
    }
}

/// An event arrived in a state that does not accept it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// The transition is not part of the lifecycle.
    #[error("cannot apply '{event}' while {state}")]
    InvalidTransition {
        /// State at the time of the event.
        state: SchemaLifecycle,
        /// Rejected event.
        event: LifecycleEvent,
    },
}
