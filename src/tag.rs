//! Tag catalog: frozen numeric IDs, names and kinds.
//!
//! # Identity rules
//! Every node on the wire starts with a 16-bit tag ID.  The catalog maps that
//! ID to a name and a kind (attribute leaf, structure start, structure end).
//! Attribute tags additionally declare the value type, which fixes how the
//! value bytes are laid out on the wire and how they are interpreted.
//!
//! The IDs of the standard table below are permanent.  An ID is NEVER
//! reassigned, even if a tag is retired.
//!
//! The catalog is an ordinary immutable value.  Build it once (usually with
//! [`TagCatalog::standard`]) and pass it by reference to the reader, writer
//! and dump code.

use std::collections::HashMap;
use std::fmt;

use crate::error::SchemaError;

// ── Frozen tag IDs ──────────────────────────────────────────────────────────

pub const ID_END:               u16 = 0x0000;
pub const ID_FILE:              u16 = 0x0001;
pub const ID_DIRECTORY:         u16 = 0x0002;
pub const ID_FILE_SYSTEM:       u16 = 0x0003;
pub const ID_ARCHIVE_FILES:     u16 = 0x0004;
pub const ID_RESIDENT_BUFFERS:  u16 = 0x0005;
pub const ID_RESIDENT_BUFFER:   u16 = 0x0006;

pub const ID_STRING:                u16 = 0x8001;
pub const ID_FILE_NAME:             u16 = 0x8002;
pub const ID_ARCHIVE_FILE_INDEX:    u16 = 0x8003;
pub const ID_POSITION:              u16 = 0x8004;
pub const ID_COMPRESSED_SIZE:       u16 = 0x8005;
pub const ID_UNCOMPRESSED_SIZE:     u16 = 0x8006;
pub const ID_MODIFICATION_TIME:     u16 = 0x8007;
pub const ID_FLAGS:                 u16 = 0x8008;
pub const ID_RESIDENT_BUFFER_INDEX: u16 = 0x8009;
pub const ID_LAST_ARCHIVE_FILE:     u16 = 0x800A;
pub const ID_SIZE:                  u16 = 0x800B;
pub const ID_BUFFER:                u16 = 0x800C;

// ── Tag ──────────────────────────────────────────────────────────────────────

/// How an attribute's value bytes are laid out and interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// `u32` length prefix, then UTF-8 bytes.
    String,
    /// 4 bytes, little-endian.
    U32,
    /// 8 bytes, little-endian.
    U64,
    /// `u32` length prefix, then opaque bytes.
    Bytes,
}

impl ValueType {
    /// Width of the value on the wire, or `None` for length-prefixed types.
    #[inline]
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            ValueType::U32                      => Some(4),
            ValueType::U64                      => Some(8),
            ValueType::String | ValueType::Bytes => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    Attribute(ValueType),
    StructureStart,
    StructureEnd,
}

/// One catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag {
    pub id:   u16,
    pub name: &'static str,
    pub kind: TagKind,
}

impl Tag {
    pub const fn attribute(id: u16, name: &'static str, value_type: ValueType) -> Self {
        Self { id, name, kind: TagKind::Attribute(value_type) }
    }

    pub const fn structure(id: u16, name: &'static str) -> Self {
        Self { id, name, kind: TagKind::StructureStart }
    }

    pub const fn end(id: u16, name: &'static str) -> Self {
        Self { id, name, kind: TagKind::StructureEnd }
    }

    /// Declared value type, `None` for structure markers.
    pub fn value_type(&self) -> Option<ValueType> {
        match self.kind {
            TagKind::Attribute(vt) => Some(vt),
            _                      => None,
        }
    }

    pub fn is_attribute(&self) -> bool {
        matches!(self.kind, TagKind::Attribute(_))
    }

    pub fn is_structure(&self) -> bool {
        self.kind == TagKind::StructureStart
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X} {}", self.id, self.name)
    }
}

// ── Recognized attribute kinds ──────────────────────────────────────────────

/// The closed set of attribute tags this crate knows how to interpret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeTag {
    String,
    FileName,
    ArchiveFileIndex,
    Position,
    CompressedSize,
    UncompressedSize,
    ModificationTime,
    Flags,
    ResidentBufferIndex,
    LastArchiveFile,
    Size,
    Buffer,
}

impl AttributeTag {
    pub const ALL: [AttributeTag; 12] = [
        AttributeTag::String,
        AttributeTag::FileName,
        AttributeTag::ArchiveFileIndex,
        AttributeTag::Position,
        AttributeTag::CompressedSize,
        AttributeTag::UncompressedSize,
        AttributeTag::ModificationTime,
        AttributeTag::Flags,
        AttributeTag::ResidentBufferIndex,
        AttributeTag::LastArchiveFile,
        AttributeTag::Size,
        AttributeTag::Buffer,
    ];

    pub fn id(self) -> u16 {
        match self {
            AttributeTag::String              => ID_STRING,
            AttributeTag::FileName            => ID_FILE_NAME,
            AttributeTag::ArchiveFileIndex    => ID_ARCHIVE_FILE_INDEX,
            AttributeTag::Position            => ID_POSITION,
            AttributeTag::CompressedSize      => ID_COMPRESSED_SIZE,
            AttributeTag::UncompressedSize    => ID_UNCOMPRESSED_SIZE,
            AttributeTag::ModificationTime    => ID_MODIFICATION_TIME,
            AttributeTag::Flags               => ID_FLAGS,
            AttributeTag::ResidentBufferIndex => ID_RESIDENT_BUFFER_INDEX,
            AttributeTag::LastArchiveFile     => ID_LAST_ARCHIVE_FILE,
            AttributeTag::Size                => ID_SIZE,
            AttributeTag::Buffer              => ID_BUFFER,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AttributeTag::String              => "String",
            AttributeTag::FileName            => "FileName",
            AttributeTag::ArchiveFileIndex    => "ArchiveFileIndex",
            AttributeTag::Position            => "Position",
            AttributeTag::CompressedSize      => "CompressedSize",
            AttributeTag::UncompressedSize    => "UncompressedSize",
            AttributeTag::ModificationTime    => "ModificationTime",
            AttributeTag::Flags               => "Flags",
            AttributeTag::ResidentBufferIndex => "ResidentBufferIndex",
            AttributeTag::LastArchiveFile     => "LastArchiveFile",
            AttributeTag::Size                => "Size",
            AttributeTag::Buffer              => "Buffer",
        }
    }

    pub fn value_type(self) -> ValueType {
        match self {
            AttributeTag::String
            | AttributeTag::FileName
            | AttributeTag::LastArchiveFile     => ValueType::String,
            AttributeTag::ArchiveFileIndex
            | AttributeTag::Flags
            | AttributeTag::ResidentBufferIndex
            | AttributeTag::Size                => ValueType::U32,
            AttributeTag::Position
            | AttributeTag::CompressedSize
            | AttributeTag::UncompressedSize
            | AttributeTag::ModificationTime    => ValueType::U64,
            AttributeTag::Buffer                => ValueType::Bytes,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        AttributeTag::ALL.into_iter().find(|a| a.name() == name)
    }

    /// The standard catalog entry for this attribute.
    pub fn tag(self) -> Tag {
        Tag::attribute(self.id(), self.name(), self.value_type())
    }
}

// ── Recognized structure kinds ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructureTag {
    File,
    Directory,
    FileSystem,
    ArchiveFiles,
    ResidentBuffers,
    ResidentBuffer,
}

impl StructureTag {
    pub const ALL: [StructureTag; 6] = [
        StructureTag::File,
        StructureTag::Directory,
        StructureTag::FileSystem,
        StructureTag::ArchiveFiles,
        StructureTag::ResidentBuffers,
        StructureTag::ResidentBuffer,
    ];

    pub fn id(self) -> u16 {
        match self {
            StructureTag::File            => ID_FILE,
            StructureTag::Directory       => ID_DIRECTORY,
            StructureTag::FileSystem      => ID_FILE_SYSTEM,
            StructureTag::ArchiveFiles    => ID_ARCHIVE_FILES,
            StructureTag::ResidentBuffers => ID_RESIDENT_BUFFERS,
            StructureTag::ResidentBuffer  => ID_RESIDENT_BUFFER,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StructureTag::File            => "File",
            StructureTag::Directory       => "Directory",
            StructureTag::FileSystem      => "FileSystem",
            StructureTag::ArchiveFiles    => "ArchiveFiles",
            StructureTag::ResidentBuffers => "ResidentBuffers",
            StructureTag::ResidentBuffer  => "ResidentBuffer",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        StructureTag::ALL.into_iter().find(|s| s.name() == name)
    }

    pub fn tag(self) -> Tag {
        Tag::structure(self.id(), self.name())
    }
}

/// Standard structure-end marker.
pub const END_TAG: Tag = Tag::end(ID_END, "End");

/// The frozen standard tag table, in ID order.
pub fn standard_tags() -> Vec<Tag> {
    let mut tags = vec![END_TAG];
    tags.extend(StructureTag::ALL.into_iter().map(StructureTag::tag));
    tags.extend(AttributeTag::ALL.into_iter().map(AttributeTag::tag));
    tags
}

// ── Catalog ──────────────────────────────────────────────────────────────────

/// Immutable ID/name index over a tag table.
#[derive(Debug, Clone)]
pub struct TagCatalog {
    by_id:   HashMap<u16, Tag>,
    by_name: HashMap<&'static str, Tag>,
    end:     Tag,
}

impl TagCatalog {
    /// Build a catalog from an arbitrary tag table.
    ///
    /// IDs and names must be unique, exactly one tag must be a structure end,
    /// and any tag whose name is a recognized [`AttributeTag`] or
    /// [`StructureTag`] must agree with that kind.
    pub fn new<I: IntoIterator<Item = Tag>>(tags: I) -> Result<Self, SchemaError> {
        let mut by_id   = HashMap::new();
        let mut by_name = HashMap::new();
        let mut end     = None;

        for tag in tags {
            if let Some(attr) = AttributeTag::from_name(tag.name) {
                if tag.kind != TagKind::Attribute(attr.value_type()) {
                    return Err(SchemaError::InvalidCatalog(format!(
                        "tag {tag} must be an attribute of type {:?}", attr.value_type()
                    )));
                }
            }
            if StructureTag::from_name(tag.name).is_some() && !tag.is_structure() {
                return Err(SchemaError::InvalidCatalog(format!(
                    "tag {tag} must be a structure"
                )));
            }
            if tag.kind == TagKind::StructureEnd {
                if let Some(prev) = end.replace(tag) {
                    return Err(SchemaError::InvalidCatalog(format!(
                        "two structure end tags: {prev} and {tag}"
                    )));
                }
            }
            if by_name.insert(tag.name, tag).is_some() {
                return Err(SchemaError::InvalidCatalog(format!(
                    "duplicate tag name '{}'", tag.name
                )));
            }
            if let Some(prev) = by_id.insert(tag.id, tag) {
                return Err(SchemaError::InvalidCatalog(format!(
                    "duplicate tag id {:04X} ({} and {})", tag.id, prev.name, tag.name
                )));
            }
        }

        let end = end.ok_or_else(|| {
            SchemaError::InvalidCatalog("no structure end tag".to_string())
        })?;
        Ok(Self { by_id, by_name, end })
    }

    /// The frozen standard catalog.
    pub fn standard() -> Self {
        let tags = standard_tags();
        Self {
            by_id:   tags.iter().map(|t| (t.id, *t)).collect(),
            by_name: tags.iter().map(|t| (t.name, *t)).collect(),
            end:     END_TAG,
        }
    }

    pub fn lookup(&self, id: u16) -> Result<Tag, SchemaError> {
        self.by_id
            .get(&id)
            .copied()
            .ok_or(SchemaError::UnknownTag { id, offset: None })
    }

    pub fn lookup_by_name(&self, name: &str) -> Result<Tag, SchemaError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| SchemaError::UnknownTagName(name.to_string()))
    }

    #[inline]
    pub fn attribute(&self, attr: AttributeTag) -> Result<Tag, SchemaError> {
        self.lookup_by_name(attr.name())
    }

    #[inline]
    pub fn structure(&self, structure: StructureTag) -> Result<Tag, SchemaError> {
        self.lookup_by_name(structure.name())
    }

    /// The tag written to close a structure.
    pub fn structure_end(&self) -> Tag {
        self.end
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// All tags, ordered by ID.
    pub fn tags(&self) -> Vec<Tag> {
        let mut tags: Vec<Tag> = self.by_id.values().copied().collect();
        tags.sort_by_key(|t| t.id);
        tags
    }
}

impl Default for TagCatalog {
    fn default() -> Self {
        Self::standard()
    }
}
