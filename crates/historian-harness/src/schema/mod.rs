//! Schema generations, identifiers and the DDL that stages them.
//!
//! The historian migrated its storage layout at release 4.0.0. Older releases
//! expect three separate tables (data, topics, meta) and would otherwise
//! bootstrap the modern layout themselves, so the preparer must create the
//! legacy tables explicitly before such a release starts. [`SchemaVersion`]
//! maps a version constraint onto the [`SchemaGeneration`] it selects and
//! [`LegacyLayout`] renders the exact pre-migration DDL.

mod identifier;
mod statement;
mod version;

pub use identifier::{Identifier, IdentifierError, MAX_IDENTIFIER_BYTES, QualifiedName};
pub use statement::{LegacyLayout, LegacyLayoutError, SchemaStatement};
pub use version::{Comparator, Release, SchemaGeneration, SchemaVersion, VersionError};
