//! Human-readable tree dump.
//!
//! ```text
//! 0003 FileSystem
//!   0004 ArchiveFiles
//!     8001 String: data0.rda
//!   0001 File
//!     8002 FileName: a.txt
//!     800B Size: 42
//! ```
//!
//! Attribute rendering dispatches on the tag name through [`AttributeTag`].
//! A name outside that set is refused with `UnsupportedAttributeTag` instead
//! of being printed in some generic form.

use std::io::Write;

use crate::error::{FormatError, Result, SchemaError};
use crate::node::{AttributeValue, Node};
use crate::tag::{AttributeTag, TagKind};

/// Bytes of a `Buffer` value shown before eliding the rest.
pub const BUFFER_PREVIEW_LEN: usize = 10;

/// Write `node` and its subtree to `out`, starting at nesting `level`.
pub fn dump<W: Write>(node: &Node, level: usize, out: &mut W) -> Result<()> {
    let tag = node.tag();
    match tag.kind {
        TagKind::Attribute(_) => {
            let value = render_attribute(node)?;
            writeln!(out, "{}{tag}: {value}", padding(level))?;
        }
        TagKind::StructureStart => {
            writeln!(out, "{}{tag}", padding(level))?;
            for child in node.children() {
                dump(child, level + 1, out)?;
            }
        }
        TagKind::StructureEnd => {
            return Err(FormatError::MalformedTree(format!(
                "unexpected structure end tag {tag} in tree"
            )).into());
        }
    }
    Ok(())
}

/// Dump into a `String`.
pub fn dump_to_string(node: &Node) -> Result<String> {
    let mut out = Vec::new();
    dump(node, 0, &mut out)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Text form of an attribute value, chosen by the attribute's name.
pub fn render_attribute(node: &Node) -> Result<String> {
    let tag  = node.tag();
    let attr = AttributeTag::from_name(tag.name).ok_or_else(|| {
        SchemaError::UnsupportedAttributeTag { id: tag.id, name: tag.name.to_string() }
    })?;
    if tag.value_type() != Some(attr.value_type()) {
        return Err(FormatError::MalformedTree(format!(
            "{tag} is declared {:?}, expected {:?}", tag.value_type(), attr.value_type()
        )).into());
    }
    let value = node.value().ok_or_else(|| {
        FormatError::MalformedTree(format!("{tag} carries no value"))
    })?;

    let text = match (attr, value) {
        (AttributeTag::String
        | AttributeTag::FileName
        | AttributeTag::LastArchiveFile, AttributeValue::Str(s)) => s.into_owned(),

        (AttributeTag::ArchiveFileIndex
        | AttributeTag::Flags
        | AttributeTag::ResidentBufferIndex
        | AttributeTag::Size, AttributeValue::U32(v)) => v.to_string(),

        (AttributeTag::Position
        | AttributeTag::CompressedSize
        | AttributeTag::UncompressedSize
        | AttributeTag::ModificationTime, AttributeValue::U64(v)) => v.to_string(),

        (AttributeTag::Buffer, AttributeValue::Bytes(b)) => buffer_preview(b),

        (attr, value) => {
            return Err(FormatError::MalformedTree(format!(
                "{} cannot hold {value:?}", attr.name()
            )).into());
        }
    };
    Ok(text)
}

/// `XX ` per byte for the first [`BUFFER_PREVIEW_LEN`] bytes, then `...`.
pub fn buffer_preview(bytes: &[u8]) -> String {
    let mut out: String = bytes
        .iter()
        .take(BUFFER_PREVIEW_LEN)
        .map(|b| format!("{b:02X} "))
        .collect();
    if bytes.len() > BUFFER_PREVIEW_LEN {
        out.push_str("...");
    }
    out
}

fn padding(level: usize) -> String {
    " ".repeat(level * 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FileDbError;
    use crate::tag::{StructureTag, Tag, ValueType};

    #[test]
    fn nested_padding() {
        let mut dir = Node::structure(StructureTag::Directory.tag()).unwrap();
        let mut file = Node::structure(StructureTag::File.tag()).unwrap();
        file.push(Node::u64(AttributeTag::Position.tag(), 9).unwrap()).unwrap();
        dir.push(file).unwrap();

        let text = dump_to_string(&dir).unwrap();
        assert_eq!(text, "0002 Directory\n  0001 File\n    8004 Position: 9\n");
    }

    #[test]
    fn buffer_preview_elides_after_ten_bytes() {
        assert_eq!(buffer_preview(&[0xAB, 0x01]), "AB 01 ");
        let long: Vec<u8> = (0..12).collect();
        assert_eq!(buffer_preview(&long), "00 01 02 03 04 05 06 07 08 09 ...");
    }

    #[test]
    fn unknown_attribute_name_is_refused() {
        let custom = Tag::attribute(0x9001, "Checksum", ValueType::U32);
        let node   = Node::u32(custom, 5).unwrap();
        assert!(matches!(
            render_attribute(&node),
            Err(FileDbError::Schema(SchemaError::UnsupportedAttributeTag { id: 0x9001, .. }))
        ));
    }

    #[test]
    fn recognized_name_with_wrong_type_is_malformed() {
        let odd  = Tag::attribute(0x9002, "Size", ValueType::U64);
        let node = Node::u64(odd, 5).unwrap();
        assert!(matches!(
            render_attribute(&node),
            Err(FileDbError::Format(FormatError::MalformedTree(_)))
        ));
    }
}
