//! Structured logging for the harness.
//!
//! The harness logs to one of two sinks. The `historian-prep` command writes
//! its results to standard output, so its logs go to standard error. A
//! conformance suite embedding [`crate::HistorianFixture`] runs under
//! libtest, so its logs go through libtest's capture and only show up for
//! failing tests. Whichever sink is installed first wins for the process.

use std::io::{self, IsTerminal};

use historian_config::{Config, LogFormat};
use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, MakeWriter, TestWriter};

static INSTALLED_SINK: OnceCell<LogSink> = OnceCell::new();

/// Where harness logs are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogSink {
    /// Standard error, leaving standard output to command results.
    Stderr,
    /// libtest's per-test output capture.
    Captured,
}

/// Handle returned once logging is set up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryHandle {
    sink: LogSink,
}

impl TelemetryHandle {
    /// Sink the process actually logs to.
    #[must_use]
    pub const fn sink(self) -> LogSink {
        self.sink
    }
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured log filter is not a valid directive list.
    #[error("invalid log filter '{filter}': {reason}")]
    Filter {
        /// Filter as configured.
        filter: String,
        /// Parser message.
        reason: String,
    },
    /// Another subscriber already owns the process.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Sends harness logs to standard error.
///
/// Used by the `historian-prep` command. Only the first call in a process
/// installs a subscriber; later calls report the sink already in place.
///
/// # Examples
///
/// ```rust
/// use historian_config::Config;
/// use historian_harness::telemetry::{self, LogSink};
///
/// # fn main() -> Result<(), historian_harness::telemetry::TelemetryError> {
/// let config = Config::default();
/// let handle = telemetry::initialise(&config)?;
/// assert_eq!(handle.sink(), LogSink::Stderr);
/// assert_eq!(telemetry::initialise_for_suite(&config)?.sink(), LogSink::Stderr);
/// # Ok(())
/// # }
/// ```
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    install(config, LogSink::Stderr)
}

/// Sends harness logs through libtest's output capture.
///
/// For conformance suites that drive the fixture from `#[test]` functions.
pub fn initialise_for_suite(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    install(config, LogSink::Captured)
}

fn install(config: &Config, sink: LogSink) -> Result<TelemetryHandle, TelemetryError> {
    INSTALLED_SINK
        .get_or_try_init(|| {
            let subscriber = match sink {
                LogSink::Stderr => subscriber(config, io::stderr, io::stderr().is_terminal())?,
                LogSink::Captured => subscriber(config, TestWriter::default(), false)?,
            };
            tracing::subscriber::set_global_default(subscriber)
                .map_err(TelemetryError::Subscriber)?;
            Ok(sink)
        })
        .map(|sink| TelemetryHandle { sink: *sink })
}

/// Builds the subscriber for `config` writing to `writer`.
///
/// Colour codes are only emitted when `ansi` is set; JSON events carry their
/// fields at the top level next to the `target`.
fn subscriber<W>(
    config: &Config,
    writer: W,
    ansi: bool,
) -> Result<Box<dyn Subscriber + Send + Sync>, TelemetryError>
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_new(config.log_filter()).map_err(|error| TelemetryError::Filter {
        filter: config.log_filter().to_owned(),
        reason: error.to_string(),
    })?;
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    Ok(match config.log_format() {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    })
}
