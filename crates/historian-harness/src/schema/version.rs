//! Historian version constraints and the schema generation they select.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Physical table layout a historian release expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaGeneration {
    /// Pre-4.0.0 layout: separate data, topics and meta tables.
    Legacy,
    /// Layout the historian creates for itself on first boot.
    Modern,
}

impl fmt::Display for SchemaGeneration {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => formatter.write_str("legacy"),
            Self::Modern => formatter.write_str("modern"),
        }
    }
}

/// A `major.minor.patch` release number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Release {
    major: u64,
    minor: u64,
    patch: u64,
}

impl Release {
    /// First release that migrated to the modern layout.
    pub const MODERN_SCHEMA: Self = Self::new(4, 0, 0);

    /// Builds a release number.
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for Release {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Release {
    type Err = VersionError;

    /// Parses `4`, `4.1` or `4.1.2`; omitted parts are zero.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionError::InvalidRelease(input.to_owned());
        let mut parts = input.trim().split('.');
        let mut next = |required: bool| -> Result<u64, VersionError> {
            match parts.next() {
                Some(part) => part.parse::<u64>().map_err(|_| invalid()),
                None if required => Err(invalid()),
                None => Ok(0),
            }
        };
        let major = next(true)?;
        let minor = next(false)?;
        let patch = next(false)?;
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self::new(major, minor, patch))
    }
}

/// Comparison operator of a version constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    /// `<`
    Less,
    /// `<=`
    LessOrEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterOrEqual,
    /// `=`, `==` or a bare release.
    Exact,
}

impl Comparator {
    fn split(input: &str) -> (Self, &str) {
        const OPERATORS: [(&str, Comparator); 6] = [
            ("<=", Comparator::LessOrEqual),
            (">=", Comparator::GreaterOrEqual),
            ("==", Comparator::Exact),
            ("<", Comparator::Less),
            (">", Comparator::Greater),
            ("=", Comparator::Exact),
        ];
        OPERATORS
            .iter()
            .find_map(|(symbol, comparator)| {
                input
                    .strip_prefix(symbol)
                    .map(|rest| (*comparator, rest))
            })
            .unwrap_or((Self::Exact, input))
    }

    const fn symbol(self) -> &'static str {
        match self {
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::Exact => "==",
        }
    }
}

/// A version constraint such as `<4.0.0` naming the historian under test.
///
/// Every release admitted by the constraint must fall on the same side of
/// [`Release::MODERN_SCHEMA`]; a constraint such as `<5.0.0` that admits both
/// layouts is rejected rather than guessed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaVersion {
    comparator: Comparator,
    release: Release,
    generation: SchemaGeneration,
}

impl SchemaVersion {
    /// Layout the constrained releases expect.
    #[must_use]
    pub const fn generation(&self) -> SchemaGeneration {
        self.generation
    }

    /// Whether the preparer must create the legacy tables itself.
    #[must_use]
    pub fn is_legacy(&self) -> bool {
        self.generation == SchemaGeneration::Legacy
    }

    /// The release bound of the constraint.
    #[must_use]
    pub const fn release(&self) -> Release {
        self.release
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}{}", self.comparator.symbol(), self.release)
    }
}

impl FromStr for SchemaVersion {
    type Err = VersionError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(VersionError::Empty);
        }
        let (comparator, rest) = Comparator::split(trimmed);
        let release: Release = rest.parse()?;
        let boundary = Release::MODERN_SCHEMA;
        let generation = match comparator {
            Comparator::Less if release <= boundary => Some(SchemaGeneration::Legacy),
            Comparator::LessOrEqual if release < boundary => Some(SchemaGeneration::Legacy),
            Comparator::Greater | Comparator::GreaterOrEqual if release >= boundary => {
                Some(SchemaGeneration::Modern)
            }
            Comparator::Exact if release < boundary => Some(SchemaGeneration::Legacy),
            Comparator::Exact => Some(SchemaGeneration::Modern),
            _ => None,
        };
        let generation = generation.ok_or_else(|| VersionError::Straddles {
            constraint: trimmed.to_owned(),
            boundary,
        })?;
        Ok(Self {
            comparator,
            release,
            generation,
        })
    }
}

/// Errors raised while interpreting a version constraint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    /// No constraint was supplied.
    #[error("historian version constraint must not be empty")]
    Empty,
    /// The release part was not `major[.minor[.patch]]`.
    #[error("invalid release number '{0}'")]
    InvalidRelease(String),
    /// The constraint admits releases on both sides of the schema migration.
    #[error("constraint '{constraint}' admits releases on both sides of {boundary}")]
    Straddles {
        /// Constraint as supplied.
        constraint: String,
        /// First modern release.
        boundary: Release,
    },
}
