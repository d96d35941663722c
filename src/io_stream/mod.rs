//! Wire codec — tree reader and tree writer.
//!
//! # Layout
//! A `file.db` stream is one root structure, fully closed, with nothing after
//! it.  Every node starts with its tag ID; what follows depends on the kind
//! the catalog declares for that ID.
//!
//! | Kind                 | Bytes after the `u16` tag ID             |
//! |----------------------|------------------------------------------|
//! | `StructureStart`     | none                                     |
//! | `StructureEnd`       | none                                     |
//! | Attribute `U32`      | 4-byte value                             |
//! | Attribute `U64`      | 8-byte value                             |
//! | Attribute `String`   | `u32` length, then UTF-8 bytes           |
//! | Attribute `Bytes`    | `u32` length, then opaque bytes          |
//!
//! # Reader
//! [`FileDbReader`] is a single forward pass with an explicit stack of open
//! structures.  Structural violations are reported with the byte offset of
//! the tag that caused them.  Declared lengths are never trusted for
//! allocation: value bytes are pulled through `Read::take`, so a corrupt
//! length prefix ends in `TruncatedStream` rather than a huge buffer.
//! Nesting is capped at [`MAX_DEPTH`] open structures; every consumer of a
//! [`Node`] tree recurses, so a deeper stream is refused up front.
//!
//! # Endianness
//! All integers are little-endian.  No runtime negotiation is ever performed.

use std::io::{self, Read, Write};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::debug;

use crate::error::{FileDbError, FormatError, Result, SchemaError};
use crate::node::Node;
use crate::tag::{Tag, TagCatalog, TagKind, ValueType};

/// Size of a tag ID on the wire.
pub const TAG_ID_SIZE:    usize = 2;
/// Size of the length prefix in front of string and byte values.
pub const LEN_PREFIX_SIZE: usize = 4;
/// Most structures that may be open at once while decoding.
pub const MAX_DEPTH:      usize = 256;

/// Decode a complete in-memory stream.
pub fn decode(bytes: &[u8], catalog: &TagCatalog) -> Result<Node> {
    FileDbReader::new(bytes, catalog).read_tree()
}

/// Encode a tree into a fresh buffer.
pub fn encode(root: &Node, catalog: &TagCatalog) -> Result<Vec<u8>> {
    let mut writer = FileDbWriter::new(Vec::new(), catalog);
    writer.write_tree(root)?;
    Ok(writer.into_inner())
}

// ── Reader ───────────────────────────────────────────────────────────────────

/// One open structure on the decode stack.
struct Frame {
    tag:      Tag,
    children: Vec<Node>,
}

pub struct FileDbReader<'c, R: Read> {
    reader:  R,
    catalog: &'c TagCatalog,
    offset:  u64,
}

impl<'c, R: Read> FileDbReader<'c, R> {
    pub fn new(reader: R, catalog: &'c TagCatalog) -> Self {
        Self { reader, catalog, offset: 0 }
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Read the whole stream and return its root.
    pub fn read_tree(&mut self) -> Result<Node> {
        let mut stack: Vec<Frame> = Vec::new();
        let mut root:  Option<Node> = None;

        loop {
            let tag_offset = self.offset;
            let id = match self.read_tag_id(stack.len())? {
                Some(id) => id,
                None     => break,
            };
            let tag = self.catalog.lookup(id).map_err(|_| SchemaError::UnknownTag {
                id,
                offset: Some(tag_offset),
            })?;

            match tag.kind {
                TagKind::StructureStart => {
                    if stack.is_empty() && root.is_some() {
                        return Err(FormatError::MultipleRoots { offset: tag_offset }.into());
                    }
                    if stack.len() >= MAX_DEPTH {
                        return Err(FormatError::DepthLimitExceeded {
                            offset: tag_offset,
                            limit:  MAX_DEPTH,
                        }.into());
                    }
                    stack.push(Frame { tag, children: Vec::new() });
                }
                TagKind::Attribute(value_type) => {
                    if stack.is_empty() {
                        return Err(FormatError::UnexpectedAttribute {
                            offset: tag_offset,
                            tag:    id,
                        }.into());
                    }
                    let value = self.read_value(value_type, stack.len())?;
                    let node  = Node::attribute(tag, value)?;
                    if let Some(top) = stack.last_mut() {
                        top.children.push(node);
                    }
                }
                TagKind::StructureEnd => {
                    let frame = stack
                        .pop()
                        .ok_or(FormatError::UnbalancedStructureEnd { offset: tag_offset })?;
                    let node = Node::with_children(frame.tag, frame.children)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None         => root = Some(node),
                    }
                }
            }
        }

        if !stack.is_empty() {
            return Err(self.truncated(self.offset, stack.len()));
        }
        let root = root.ok_or_else(|| self.truncated(self.offset, 0))?;
        debug!(bytes = self.offset, nodes = root.node_count(), "decoded tree");
        Ok(root)
    }

    // ── Primitives ──────────────────────────────────────────────────────────

    /// `None` on a clean end of stream between nodes.
    fn read_tag_id(&mut self, open: usize) -> Result<Option<u16>> {
        let mut buf    = [0u8; TAG_ID_SIZE];
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0)  => break,
                Ok(n)  => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        match filled {
            0 => Ok(None),
            TAG_ID_SIZE => {
                self.offset += TAG_ID_SIZE as u64;
                Ok(Some(LittleEndian::read_u16(&buf)))
            }
            partial => Err(self.truncated(self.offset + partial as u64, open)),
        }
    }

    fn read_value(&mut self, value_type: ValueType, open: usize) -> Result<Vec<u8>> {
        let len = match value_type.fixed_width() {
            Some(width) => width as u64,
            None => {
                let len = self.reader.read_u32::<LittleEndian>().map_err(|e| {
                    self.eof_as_truncated(e, open)
                })?;
                self.offset += LEN_PREFIX_SIZE as u64;
                u64::from(len)
            }
        };

        let mut value = Vec::new();
        let read = (&mut self.reader).take(len).read_to_end(&mut value)? as u64;
        self.offset += read;
        if read < len {
            return Err(self.truncated(self.offset, open));
        }
        Ok(value)
    }

    fn eof_as_truncated(&self, err: io::Error, open: usize) -> FileDbError {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            self.truncated(self.offset, open)
        } else {
            err.into()
        }
    }

    fn truncated(&self, offset: u64, open_structures: usize) -> FileDbError {
        FormatError::TruncatedStream { offset, open_structures }.into()
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct FileDbWriter<'c, W: Write> {
    writer:  W,
    catalog: &'c TagCatalog,
    written: u64,
}

impl<'c, W: Write> FileDbWriter<'c, W> {
    pub fn new(writer: W, catalog: &'c TagCatalog) -> Self {
        Self { writer, catalog, written: 0 }
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Serialize `root` depth-first and flush.  The root must be a structure.
    pub fn write_tree(&mut self, root: &Node) -> Result<()> {
        if !root.is_structure() {
            return Err(FormatError::MalformedTree(format!(
                "root {} is not a structure", root.tag()
            )).into());
        }
        self.write_node(root)?;
        self.writer.flush()?;
        debug!(bytes = self.written, nodes = root.node_count(), "encoded tree");
        Ok(())
    }

    fn write_node(&mut self, node: &Node) -> Result<()> {
        let tag   = node.tag();
        let known = self.catalog.lookup(tag.id)?;
        if known != tag {
            return Err(FormatError::MalformedTree(format!(
                "node tag {tag} disagrees with catalog entry {known}"
            )).into());
        }
        self.write_tag_id(tag.id)?;

        match tag.kind {
            TagKind::Attribute(value_type) => {
                let raw = node.raw_value().unwrap_or_default();
                if value_type.fixed_width().is_none() {
                    let len = u32::try_from(raw.len()).map_err(|_| FileDbError::ValueTooLarge {
                        what: tag.name,
                        len:  raw.len(),
                    })?;
                    self.writer.write_u32::<LittleEndian>(len)?;
                    self.written += LEN_PREFIX_SIZE as u64;
                }
                self.writer.write_all(raw)?;
                self.written += raw.len() as u64;
            }
            TagKind::StructureStart => {
                for child in node.children() {
                    self.write_node(child)?;
                }
                self.write_tag_id(self.catalog.structure_end().id)?;
            }
            TagKind::StructureEnd => {
                return Err(FormatError::MalformedTree(format!(
                    "structure end tag {tag} in tree"
                )).into());
            }
        }
        Ok(())
    }

    fn write_tag_id(&mut self, id: u16) -> io::Result<()> {
        self.writer.write_u16::<LittleEndian>(id)?;
        self.written += TAG_ID_SIZE as u64;
        Ok(())
    }
}
