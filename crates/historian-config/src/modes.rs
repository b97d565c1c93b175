use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Supported logging output formats.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Structured JSON suitable for ingestion by logging stacks.
    #[default]
    Json,
    /// Human-readable single line output.
    Compact,
}

/// Errors encountered while parsing a [`LogFormat`] or [`PrepAction`] from text.
pub type ModeParseError = strum::ParseError;

/// Operation performed by the `historian-prep` binary.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum PrepAction {
    /// Drop the configured tables and stage the layout for the configured version.
    #[default]
    Prepare,
    /// Drop the configured tables without creating anything.
    Reset,
    /// Remove all rows from the configured tables, keeping their structure.
    Truncate,
    /// Print the tables currently present in the configured namespace.
    List,
}
