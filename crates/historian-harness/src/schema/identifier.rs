//! Quoted SQL identifiers.

use std::fmt;

use thiserror::Error;

/// Longest identifier PostgreSQL keeps intact, in bytes (`NAMEDATALEN - 1`).
///
/// The server silently truncates longer names, so a table created under one
/// would not be the table the catalog is later searched for.
pub const MAX_IDENTIFIER_BYTES: usize = 63;

/// A table or index name rendered as a double-quoted PostgreSQL identifier.
///
/// Names are never spliced into SQL raw: [`fmt::Display`] wraps the name in
/// double quotes and doubles any embedded quote, so configured prefixes with
/// spaces, capitals or punctuation address exactly the table they name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier(String);

impl Identifier {
    /// Validates a raw name.
    pub fn new(name: impl Into<String>) -> Result<Self, IdentifierError> {
        let name = name.into();
        if name.is_empty() {
            return Err(IdentifierError::Empty);
        }
        if name.contains('\0') {
            return Err(IdentifierError::ContainsNul { name });
        }
        if name.len() > MAX_IDENTIFIER_BYTES {
            return Err(IdentifierError::TooLong { name });
        }
        Ok(Self(name))
    }

    /// The unquoted name as stored in the catalog.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "\"{}\"", self.0.replace('"', "\"\""))
    }
}

/// A relation pinned to a namespace, rendered as `"namespace"."name"`.
///
/// Statements built from a qualified name resolve to the same table whatever
/// the session's `search_path` holds.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QualifiedName {
    namespace: Identifier,
    name: Identifier,
}

impl QualifiedName {
    /// Places `name` in `namespace`.
    #[must_use]
    pub const fn new(namespace: Identifier, name: Identifier) -> Self {
        Self { namespace, name }
    }

    /// Namespace holding the relation.
    #[must_use]
    pub const fn namespace(&self) -> &Identifier {
        &self.namespace
    }

    /// Relation name within the namespace.
    #[must_use]
    pub const fn name(&self) -> &Identifier {
        &self.name
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}.{}", self.namespace, self.name)
    }
}

/// Errors raised for names that cannot be used as identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    /// The name was empty.
    #[error("identifier must not be empty")]
    Empty,
    /// PostgreSQL rejects NUL bytes in identifiers.
    #[error("identifier {name:?} contains a NUL byte")]
    ContainsNul {
        /// Offending name.
        name: String,
    },
    /// PostgreSQL would truncate the name.
    #[error(
        "identifier {name:?} is {len} bytes long; PostgreSQL keeps at most {max}",
        len = .name.len(),
        max = MAX_IDENTIFIER_BYTES
    )]
    TooLong {
        /// Offending name.
        name: String,
    },
}
