//! Control of the historian service under test.
//!
//! The harness never links against the historian. It drives an installed
//! instance through [`ServiceController`]: install with a configuration,
//! start, observe, stop and remove.

mod process;

use std::ffi::OsString;
use std::io;

use camino::Utf8PathBuf;
use historian_config::HistorianConfig;
use thiserror::Error;

pub use process::ProcessServiceController;

/// What to install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    /// Identity the historian registers under.
    pub identity: String,
    /// Configuration handed to the historian.
    pub config: HistorianConfig,
}

impl ServiceSpec {
    /// Builds a spec.
    #[must_use]
    pub fn new(identity: impl Into<String>, config: HistorianConfig) -> Self {
        Self {
            identity: identity.into(),
            config,
        }
    }
}

/// Token for one installed service instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceHandle {
    id: String,
    identity: String,
}

impl ServiceHandle {
    /// Builds a handle.
    #[must_use]
    pub fn new(id: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            identity: identity.into(),
        }
    }

    /// Controller-assigned instance id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identity from the [`ServiceSpec`].
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }
}

/// Installs and drives a historian service.
#[cfg_attr(test, mockall::automock)]
pub trait ServiceController {
    /// Installs an instance configured by `spec` without starting it.
    fn install(&mut self, spec: &ServiceSpec) -> Result<ServiceHandle, ServiceError>;

    /// Starts an installed instance.
    fn start(&mut self, handle: &ServiceHandle) -> Result<(), ServiceError>;

    /// Whether the instance is currently running.
    fn is_running(&mut self, handle: &ServiceHandle) -> Result<bool, ServiceError>;

    /// Requests a stop and returns once the request has been delivered.
    fn stop(&mut self, handle: &ServiceHandle) -> Result<(), ServiceError>;

    /// Removes an installed instance, stopping it first if needed.
    fn remove(&mut self, handle: &ServiceHandle) -> Result<(), ServiceError>;
}

/// Errors raised while controlling a service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The working directory for the instance could not be created.
    #[error("failed to create service workspace: {source}")]
    Workspace {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The working directory is not valid UTF-8.
    #[error("service workspace path is not UTF-8: {path:?}")]
    NonUtf8Workspace {
        /// Offending path.
        path: std::path::PathBuf,
    },
    /// The configuration could not be serialised.
    #[error("failed to serialise service configuration: {0}")]
    SerialiseConfig(#[from] serde_json::Error),
    /// The configuration could not be written.
    #[error("failed to write service configuration {path}: {source}")]
    WriteConfig {
        /// Configuration file location.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The service binary could not be launched.
    #[error("failed to launch historian binary {binary:?}: {source}")]
    Launch {
        /// Binary that was executed.
        binary: OsString,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The handle does not name an installed instance.
    #[error("unknown service instance '{id}'")]
    UnknownInstance {
        /// Handle id.
        id: String,
    },
    /// The instance is already running.
    #[error("service instance '{id}' is already running")]
    AlreadyRunning {
        /// Handle id.
        id: String,
    },
    /// The process state could not be queried.
    #[error("failed to query process {pid}: {source}")]
    Monitor {
        /// Process id.
        pid: u32,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A stop signal could not be delivered.
    #[error("failed to signal process {pid}: {source}")]
    Signal {
        /// Process id.
        pid: u32,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A controller without a native error type refused the request.
    #[error("{message}")]
    Rejected {
        /// Controller's message.
        message: String,
    },
}

impl ServiceError {
    /// Builds a [`ServiceError::Rejected`].
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }
}
