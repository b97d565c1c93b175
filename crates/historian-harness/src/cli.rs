//! The `historian-prep` command.
//!
//! Loads layered configuration, initialises telemetry and performs one
//! [`PrepAction`] against the configured database. Results go to standard
//! output, one line per item; diagnostics go to standard error.

use std::ffi::OsString;
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use historian_config::{Config, ConnectionParseError, PrepAction};
use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use crate::database::{CatalogScope, ConnectError, DatabaseError, PostgresAdmin};
use crate::preparer::{CleanupError, PrepareError, Preparer, ResetMode};
use crate::readiness::PollPolicy;
use crate::reporter::StructuredPreparationReporter;
use crate::schema::{SchemaVersion, VersionError};
use crate::telemetry::{self, TelemetryError};

/// Errors surfaced by the command.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration could not be loaded.
    #[error("failed to load configuration: {0}")]
    Configuration(Arc<OrthoError>),
    /// Telemetry could not be initialised.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    /// The connection settings are invalid.
    #[error("invalid connection settings: {0}")]
    Connection(#[from] ConnectionParseError),
    /// The historian version constraint is invalid.
    #[error("invalid historian version: {0}")]
    Version(#[from] VersionError),
    /// The database could not be reached.
    #[error(transparent)]
    Connect(#[from] ConnectError),
    /// Preparation failed.
    #[error(transparent)]
    Prepare(#[from] PrepareError),
    /// The reset did not complete.
    #[error(transparent)]
    Cleanup(#[from] CleanupError),
    /// The catalog could not be read.
    #[error("failed to list tables: {0}")]
    Catalog(#[from] DatabaseError),
    /// Results could not be written.
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

/// Runs the command with the given arguments and output streams.
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let args: Vec<OsString> = args.into_iter().collect();
    match load_and_execute(&args, stdout) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let _ = writeln!(stderr, "historian-prep: {error}");
            ExitCode::FAILURE
        }
    }
}

fn load_and_execute<W>(args: &[OsString], stdout: &mut W) -> Result<(), CliError>
where
    W: Write,
{
    let config = Config::load_from_iter(args.iter().cloned()).map_err(CliError::Configuration)?;
    telemetry::initialise(&config)?;
    execute(&config, stdout)
}

/// Performs the configured action.
///
/// Inputs are validated before a connection is attempted, so malformed
/// settings fail without touching the database.
pub fn execute<W>(config: &Config, stdout: &mut W) -> Result<(), CliError>
where
    W: Write,
{
    let params = config.connection_params()?;
    let plan = match config.action() {
        PrepAction::Prepare => Plan::Prepare(config.historian_version().parse()?),
        PrepAction::Reset => Plan::Reset(ResetMode::Drop),
        PrepAction::Truncate => Plan::Reset(ResetMode::Truncate),
        PrepAction::List => Plan::List,
    };
    let tables = config.table_names();

    let connection = PostgresAdmin::connect(&params)?;
    let scope = CatalogScope::new(params.dbname.as_str(), config.db_schema());
    let mut preparer = Preparer::new(
        connection,
        scope,
        Arc::new(StructuredPreparationReporter::new()),
    )
    .with_schema_wait(PollPolicy::with_timeout(config.schema_wait()));

    match plan {
        Plan::Prepare(version) => {
            let outcome = preparer.prepare(&tables, &version)?;
            writeln!(stdout, "{outcome}")?;
        }
        Plan::Reset(mode) => {
            let names = tables.physical_names();
            let report = preparer.reset(Some(names.as_slice()), mode)?;
            for table in report.tables() {
                writeln!(stdout, "{} {table}", report.mode())?;
            }
        }
        Plan::List => {
            for table in preparer.list_tables()? {
                writeln!(stdout, "{table}")?;
            }
        }
    }
    Ok(())
}

enum Plan {
    Prepare(SchemaVersion),
    Reset(ResetMode),
    List,
}
