//! Bounded polling and the probes that decide when staged state is usable.
//!
//! Nothing in the harness sleeps for a fixed period. Schema visibility after
//! legacy DDL, historian readiness after start and release after stop are all
//! observed through [`poll_until`] under an explicit [`PollPolicy`].

use std::collections::BTreeSet;
use std::io;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs::Dir;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::database::DatabaseError;

const READINESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::readiness");

/// Interval between attempts unless a policy says otherwise.
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How long, and how often, a condition is re-checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    timeout: Duration,
    interval: Duration,
}

impl PollPolicy {
    /// Builds a policy with an explicit interval.
    #[must_use]
    pub const fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    /// Builds a policy that polls every [`POLL_INTERVAL`].
    #[must_use]
    pub const fn with_timeout(timeout: Duration) -> Self {
        Self::new(timeout, POLL_INTERVAL)
    }

    /// A policy that checks exactly once.
    #[must_use]
    pub const fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Total time budget.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Delay between attempts.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }
}

/// Repeats `attempt` until it yields a value or the policy's deadline passes.
///
/// The first attempt always runs, even with a zero timeout. Returns
/// `Ok(None)` when the deadline passes without a value; errors from
/// `attempt` end polling immediately.
pub fn poll_until<T, E, F>(policy: PollPolicy, mut attempt: F) -> Result<Option<T>, E>
where
    F: FnMut() -> Result<Option<T>, E>,
{
    let deadline = Instant::now() + policy.timeout;
    loop {
        if let Some(value) = attempt()? {
            return Ok(Some(value));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep(policy.interval.min(deadline - now));
    }
}

/// Read access to the catalog of the staged database.
pub trait CatalogView {
    /// Tables currently present in the prepared namespace.
    fn list_tables(&mut self) -> Result<BTreeSet<String>, DatabaseError>;
}

/// Verdict of a single readiness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Not ready yet; keep polling.
    Pending,
    /// Ready for the conformance suite.
    Ready,
    /// The service gave up starting.
    Aborted {
        /// Why the service gave up.
        reason: String,
    },
}

/// Decides whether a started historian is ready.
pub trait ReadinessProbe {
    /// Performs one check.
    fn probe(&mut self, catalog: &mut dyn CatalogView) -> Result<Readiness, ProbeError>;
}

/// Ready once every expected table is visible in the catalog.
///
/// Suits modern releases, which signal a finished bootstrap by creating their
/// tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogProbe {
    expected: BTreeSet<String>,
}

impl CatalogProbe {
    /// Builds a probe waiting for `expected`.
    #[must_use]
    pub fn new<I, S>(expected: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            expected: expected.into_iter().map(Into::into).collect(),
        }
    }
}

impl ReadinessProbe for CatalogProbe {
    fn probe(&mut self, catalog: &mut dyn CatalogView) -> Result<Readiness, ProbeError> {
        let present = catalog.list_tables()?;
        let missing: Vec<&String> = self.expected.difference(&present).collect();
        if missing.is_empty() {
            return Ok(Readiness::Ready);
        }
        debug!(target: READINESS_TARGET, ?missing, "waiting for historian tables");
        Ok(Readiness::Pending)
    }
}

/// Lifecycle status a historian writes to its health file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Still initialising.
    Starting,
    /// Accepting requests.
    Ready,
    /// Shutting down.
    Stopping,
}

/// JSON document `{"status", "pid", "timestamp"}` written by the historian.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthSnapshot {
    /// Reported status.
    pub status: HealthStatus,
    /// Process that wrote the snapshot.
    pub pid: u32,
    /// Seconds since the Unix epoch when the snapshot was written.
    pub timestamp: u64,
}

/// Ready once a fresh health snapshot reports `ready`.
///
/// Snapshots older than the probe's start time are left over from an earlier
/// run and ignored.
#[derive(Debug, Clone)]
pub struct HealthFileProbe {
    path: Utf8PathBuf,
    not_before: u64,
}

impl HealthFileProbe {
    /// Builds a probe for `path`, ignoring snapshots written before now.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self::since(path, SystemTime::now())
    }

    /// Builds a probe for `path`, ignoring snapshots written before `started_at`.
    #[must_use]
    pub fn since(path: impl Into<Utf8PathBuf>, started_at: SystemTime) -> Self {
        let not_before = started_at
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs());
        Self {
            path: path.into(),
            not_before,
        }
    }

    /// Path of the health file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn read_snapshot(&self) -> Result<Option<HealthSnapshot>, ProbeError> {
        let read_error = |source| ProbeError::ReadHealth {
            path: self.path.clone(),
            source,
        };
        let (Some(parent), Some(filename)) = (self.path.parent(), self.path.file_name()) else {
            return Err(read_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "health file path has no file name",
            )));
        };
        let parent = if parent.as_str().is_empty() {
            Utf8Path::new(".")
        } else {
            parent
        };
        let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
            Ok(dir) => dir,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(read_error(error)),
        };
        let content = match dir.read_to_string(filename) {
            Ok(content) => content,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(read_error(error)),
        };
        // A snapshot caught mid-write is retried on the next poll.
        if content.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| ProbeError::ParseHealth {
                path: self.path.clone(),
                source,
            })
    }
}

impl ReadinessProbe for HealthFileProbe {
    fn probe(&mut self, _catalog: &mut dyn CatalogView) -> Result<Readiness, ProbeError> {
        let Some(snapshot) = self.read_snapshot()? else {
            return Ok(Readiness::Pending);
        };
        if snapshot.timestamp < self.not_before {
            debug!(
                target: READINESS_TARGET,
                path = %self.path,
                timestamp = snapshot.timestamp,
                "ignoring stale health snapshot"
            );
            return Ok(Readiness::Pending);
        }
        Ok(match snapshot.status {
            HealthStatus::Starting => Readiness::Pending,
            HealthStatus::Ready => Readiness::Ready,
            HealthStatus::Stopping => Readiness::Aborted {
                reason: format!("process {} reported stopping in {}", snapshot.pid, self.path),
            },
        })
    }
}

/// A readiness check could not be evaluated.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The health file exists but could not be read.
    #[error("failed to read health file {path}: {source}")]
    ReadHealth {
        /// Health file location.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The health file did not hold a snapshot.
    #[error("failed to parse health file {path}: {source}")]
    ParseHealth {
        /// Health file location.
        path: Utf8PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
    /// The catalog could not be read.
    #[error("failed to inspect catalog: {0}")]
    Catalog(#[from] DatabaseError),
}
