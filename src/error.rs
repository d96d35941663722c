//! Error taxonomy for decoding, encoding and merging `file.db` trees.
//!
//! None of these are transient. They describe corrupt input or a caller
//! handing the library inconsistent data, so nothing is retried and no
//! partial output is produced.

use std::io;
use thiserror::Error;

use crate::filesystem::EntryKind;

/// Result type for every fallible `filedb` operation.
pub type Result<T> = std::result::Result<T, FileDbError>;

// ── Stream / tree structure ──────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("structure end at offset {offset} without an open structure")]
    UnbalancedStructureEnd { offset: u64 },

    #[error("stream truncated at offset {offset} ({open_structures} structure(s) still open)")]
    TruncatedStream { offset: u64, open_structures: usize },

    #[error("attribute {tag:#06x} at offset {offset} outside of any structure")]
    UnexpectedAttribute { offset: u64, tag: u16 },

    #[error("second root structure at offset {offset}")]
    MultipleRoots { offset: u64 },

    #[error("structure at offset {offset} nested deeper than {limit}")]
    DepthLimitExceeded { offset: u64, limit: usize },

    #[error("malformed tree: {0}")]
    MalformedTree(String),

    #[error("{structure} is missing required attribute {attribute}")]
    MissingAttribute { structure: String, attribute: &'static str },
}

// ── Catalog ──────────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("unknown tag {id:#06x}{}", at_offset(.offset))]
    UnknownTag { id: u16, offset: Option<u64> },

    #[error("unknown tag name '{0}'")]
    UnknownTagName(String),

    #[error("unsupported attribute tag {id:04X} ({name})")]
    UnsupportedAttributeTag { id: u16, name: String },

    #[error("invalid tag catalog: {0}")]
    InvalidCatalog(String),
}

fn at_offset(offset: &Option<u64>) -> String {
    offset.map(|o| format!(" at offset {o}")).unwrap_or_default()
}

// ── Archive / buffer references ──────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("'{path}' references archive #{token}, which is not in the archive file map")]
    UnresolvedArchiveReference { path: String, token: u32 },

    #[error("unknown archive token {0}")]
    UnknownToken(u32),

    #[error("'{path}' references resident buffer #{index}, which does not exist")]
    UnresolvedResidentBuffer { path: String, index: u32 },

    #[error("archive file map is full ({len} entries)")]
    ArchiveMapFull { len: usize },
}

// ── Merge ────────────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictError {
    #[error("cannot merge '{path}': existing {existing} collides with incoming {incoming}")]
    ConflictingEntryKind {
        path:     String,
        existing: EntryKind,
        incoming: EntryKind,
    },
}

// ── Top level ────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum FileDbError {
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("reference error: {0}")]
    Reference(#[from] ReferenceError),

    #[error("merge conflict: {0}")]
    Conflict(#[from] ConflictError),

    #[error("{what} too large to encode ({len})")]
    ValueTooLarge { what: &'static str, len: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<toml::de::Error> for FileDbError {
    fn from(err: toml::de::Error) -> Self {
        FileDbError::Config(err.to_string())
    }
}
