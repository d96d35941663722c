//! In-memory node tree.
//!
//! A [`Node`] is either an attribute leaf (tag + raw value bytes) or a
//! structure (tag + ordered children).  The body always matches the tag's
//! kind: the constructors refuse structure-end tags, attribute bytes of the
//! wrong width, and typed values for a tag of a different value type.  Fields
//! are private so a tree that exists is a tree that can be written back.

use std::borrow::Cow;
use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::FormatError;
use crate::tag::{Tag, TagKind, ValueType};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Body {
    Value(Vec<u8>),
    Children(Vec<Node>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    tag:  Tag,
    body: Body,
}

/// An attribute value interpreted through its tag's declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue<'a> {
    Str(Cow<'a, str>),
    U32(u32),
    U64(u64),
    Bytes(&'a [u8]),
}

impl fmt::Display for AttributeValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Str(s)   => f.write_str(s),
            AttributeValue::U32(v)   => write!(f, "{v}"),
            AttributeValue::U64(v)   => write!(f, "{v}"),
            AttributeValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl Node {
    // ── Constructors ─────────────────────────────────────────────────────────

    /// An empty structure.
    pub fn structure(tag: Tag) -> Result<Self, FormatError> {
        Self::with_children(tag, Vec::new())
    }

    pub fn with_children(tag: Tag, children: Vec<Node>) -> Result<Self, FormatError> {
        match tag.kind {
            TagKind::StructureStart => Ok(Self { tag, body: Body::Children(children) }),
            TagKind::StructureEnd   => Err(end_tag_in_tree(tag)),
            TagKind::Attribute(_)   => Err(FormatError::MalformedTree(format!(
                "attribute tag {tag} used as a structure"
            ))),
        }
    }

    /// An attribute from raw wire bytes.  Integer types must be exactly their
    /// fixed width.
    pub fn attribute(tag: Tag, value: Vec<u8>) -> Result<Self, FormatError> {
        let value_type = match tag.kind {
            TagKind::Attribute(vt)  => vt,
            TagKind::StructureEnd   => return Err(end_tag_in_tree(tag)),
            TagKind::StructureStart => return Err(FormatError::MalformedTree(format!(
                "structure tag {tag} used as an attribute"
            ))),
        };
        if let Some(width) = value_type.fixed_width() {
            if value.len() != width {
                return Err(FormatError::MalformedTree(format!(
                    "{tag} needs a {width}-byte value, got {} bytes", value.len()
                )));
            }
        }
        Ok(Self { tag, body: Body::Value(value) })
    }

    pub fn string(tag: Tag, value: &str) -> Result<Self, FormatError> {
        expect_type(tag, ValueType::String)?;
        Self::attribute(tag, value.as_bytes().to_vec())
    }

    pub fn u32(tag: Tag, value: u32) -> Result<Self, FormatError> {
        expect_type(tag, ValueType::U32)?;
        Self::attribute(tag, value.to_le_bytes().to_vec())
    }

    pub fn u64(tag: Tag, value: u64) -> Result<Self, FormatError> {
        expect_type(tag, ValueType::U64)?;
        Self::attribute(tag, value.to_le_bytes().to_vec())
    }

    pub fn bytes(tag: Tag, value: Vec<u8>) -> Result<Self, FormatError> {
        expect_type(tag, ValueType::Bytes)?;
        Self::attribute(tag, value)
    }

    // ── Shape ────────────────────────────────────────────────────────────────

    #[inline]
    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn is_attribute(&self) -> bool {
        matches!(self.body, Body::Value(_))
    }

    pub fn is_structure(&self) -> bool {
        matches!(self.body, Body::Children(_))
    }

    /// Children of a structure; empty for attributes.
    pub fn children(&self) -> &[Node] {
        match &self.body {
            Body::Children(c) => c,
            Body::Value(_)    => &[],
        }
    }

    pub fn into_children(self) -> Vec<Node> {
        match self.body {
            Body::Children(c) => c,
            Body::Value(_)    => Vec::new(),
        }
    }

    /// Append a child.  Fails on attribute nodes.
    pub fn push(&mut self, child: Node) -> Result<(), FormatError> {
        match &mut self.body {
            Body::Children(c) => {
                c.push(child);
                Ok(())
            }
            Body::Value(_) => Err(FormatError::MalformedTree(format!(
                "cannot add child {} to attribute {}", child.tag, self.tag
            ))),
        }
    }

    /// Total number of nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        1 + self.children().iter().map(Node::node_count).sum::<usize>()
    }

    /// First attribute child whose tag has `name`.
    pub fn find_attribute(&self, name: &str) -> Option<&Node> {
        self.children()
            .iter()
            .find(|c| c.is_attribute() && c.tag.name == name)
    }

    // ── Values ───────────────────────────────────────────────────────────────

    /// Raw wire bytes of an attribute.
    pub fn raw_value(&self) -> Option<&[u8]> {
        match &self.body {
            Body::Value(v)    => Some(v),
            Body::Children(_) => None,
        }
    }

    /// The attribute value, interpreted through the tag's value type.
    pub fn value(&self) -> Option<AttributeValue<'_>> {
        let raw = self.raw_value()?;
        Some(match self.tag.value_type()? {
            ValueType::String => AttributeValue::Str(String::from_utf8_lossy(raw)),
            ValueType::U32    => AttributeValue::U32(LittleEndian::read_u32(raw)),
            ValueType::U64    => AttributeValue::U64(LittleEndian::read_u64(raw)),
            ValueType::Bytes  => AttributeValue::Bytes(raw),
        })
    }

    pub fn as_str(&self) -> Option<Cow<'_, str>> {
        match self.value()? {
            AttributeValue::Str(s) => Some(s),
            _                      => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self.value()? {
            AttributeValue::U32(v) => Some(v),
            _                      => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self.value()? {
            AttributeValue::U64(v) => Some(v),
            _                      => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self.value()? {
            AttributeValue::Bytes(b) => Some(b),
            _                        => None,
        }
    }
}

fn expect_type(tag: Tag, expected: ValueType) -> Result<(), FormatError> {
    match tag.value_type() {
        Some(vt) if vt == expected => Ok(()),
        other => Err(FormatError::MalformedTree(format!(
            "{tag} holds {other:?}, not {expected:?}"
        ))),
    }
}

fn end_tag_in_tree(tag: Tag) -> FormatError {
    FormatError::MalformedTree(format!("structure end tag {tag} cannot be a tree node"))
}
