//! Connection settings shared by the preparer and the service under test.
//!
//! The preparer opens its own administrative session from these parameters; the
//! same values are forwarded verbatim to the historian so both sides address the
//! same database.

use std::fmt;
use std::str::FromStr;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;
use url::{Host, Url};

use crate::defaults::DEFAULT_DB_PORT;

/// Relational backend the historian stores its data in.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BackendKind {
    /// PostgreSQL, the only backend this harness stages.
    #[default]
    Postgresql,
}

/// Host, port, credentials and database name for one PostgreSQL session.
#[derive(Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ConnectionParams {
    /// Database name.
    pub dbname: String,
    /// TCP port.
    pub port: u16,
    /// Host name or address.
    pub host: String,
    /// Login role.
    pub user: String,
    /// Password for [`ConnectionParams::user`].
    pub password: String,
}

impl ConnectionParams {
    /// Builds parameters from their parts.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        dbname: impl Into<String>,
    ) -> Self {
        Self {
            dbname: dbname.into(),
            port,
            host: host.into(),
            user: user.into(),
            password: password.into(),
        }
    }
}

// Keep the password out of logs and panic messages.
impl fmt::Debug for ConnectionParams {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ConnectionParams")
            .field("dbname", &self.dbname)
            .field("port", &self.port)
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

impl fmt::Display for ConnectionParams {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (open, close) = if self.host.contains(':') {
            ("[", "]")
        } else {
            ("", "")
        };
        write!(
            formatter,
            "postgresql://{}:***@{open}{}{close}:{}/{}",
            self.user, self.host, self.port, self.dbname
        )
    }
}

impl FromStr for ConnectionParams {
    type Err = ConnectionParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(input)?;
        match url.scheme() {
            "postgresql" | "postgres" => {}
            other => return Err(ConnectionParseError::UnsupportedScheme(other.to_owned())),
        }
        // IPv6 literals lose their URL brackets; the client wants the bare address.
        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_owned(),
            Some(Host::Ipv4(address)) => address.to_string(),
            Some(Host::Ipv6(address)) => address.to_string(),
            None => return Err(ConnectionParseError::MissingHost(input.to_owned())),
        };
        let dbname = url.path().trim_start_matches('/');
        if dbname.is_empty() {
            return Err(ConnectionParseError::MissingDatabase(input.to_owned()));
        }
        Ok(Self::new(
            host,
            url.port().unwrap_or(DEFAULT_DB_PORT),
            decode(url.username())?,
            decode(url.password().unwrap_or_default())?,
            decode(dbname)?,
        ))
    }
}

fn decode(component: &str) -> Result<String, ConnectionParseError> {
    percent_decode_str(component)
        .decode_utf8()
        .map(|text| text.into_owned())
        .map_err(|_| ConnectionParseError::InvalidEncoding(component.to_owned()))
}

/// The `connection` block of a historian configuration document.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Backend selector, serialised as `type`.
    #[serde(rename = "type")]
    pub kind: BackendKind,
    /// Session parameters.
    pub params: ConnectionParams,
}

impl ConnectionConfig {
    /// Builds a PostgreSQL connection block.
    #[must_use]
    pub const fn postgresql(params: ConnectionParams) -> Self {
        Self {
            kind: BackendKind::Postgresql,
            params,
        }
    }
}

/// Errors encountered while parsing [`ConnectionParams`] from a URL.
#[derive(Debug, Error)]
pub enum ConnectionParseError {
    /// Scheme was not a PostgreSQL scheme.
    #[error("unsupported database scheme '{0}'")]
    UnsupportedScheme(String),
    /// Host name was missing.
    #[error("missing database host in '{0}'")]
    MissingHost(String),
    /// Database name was missing from the path.
    #[error("missing database name in '{0}'")]
    MissingDatabase(String),
    /// A component was not valid percent-encoded UTF-8.
    #[error("invalid percent-encoding in '{0}'")]
    InvalidEncoding(String),
    /// URL failed to parse.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}
