//! Mapping between a [`FileSystem`] snapshot and a `file.db` node tree.
//!
//! ```text
//! FileSystem
//!   ArchiveFiles          String per ArchiveFileMap entry, token order
//!   ResidentBuffers
//!     ResidentBuffer      Size, Buffer   (one per resident file)
//!   Directory             FileName, entries...
//!   File                  FileName,
//!                         ArchiveFileIndex, LastArchiveFile, Position
//!                       | ResidentBufferIndex,
//!                         CompressedSize, UncompressedSize,
//!                         ModificationTime, Flags
//! ```
//!
//! Entries are written in snapshot iteration order.  Nothing here sorts;
//! call [`FileSystem::sort`] first for reproducible output.

use std::io::Write;

use tracing::debug;

use crate::error::{FileDbError, FormatError, ReferenceError, Result};
use crate::filesystem::{join, Directory, Entry, File, FileContents, FileSystem};
use crate::index::{ArchiveFileMap, ArchiveToken};
use crate::io_stream::FileDbWriter;
use crate::node::Node;
use crate::tag::{AttributeTag, StructureTag, TagCatalog};

// ── Snapshot → tree ──────────────────────────────────────────────────────────

pub struct FileSystemWriter<'c> {
    catalog: &'c TagCatalog,
}

impl<'c> FileSystemWriter<'c> {
    pub fn new(catalog: &'c TagCatalog) -> Self {
        Self { catalog }
    }

    /// Build the node tree for `fs`.  Every archive token in `fs` must
    /// resolve through `archives`.
    pub fn build_tree(&self, fs: &FileSystem, archives: &ArchiveFileMap) -> Result<Node> {
        let mut buffers: Vec<&[u8]> = Vec::new();
        let entries = self.entry_nodes(fs.root(), "", archives, &mut buffers)?;

        let mut root = self.structure(StructureTag::FileSystem)?;
        root.push(self.archive_files(archives)?)?;
        root.push(self.resident_buffers(&buffers)?)?;
        for entry in entries {
            root.push(entry)?;
        }
        debug!(
            archives = archives.len(),
            resident = buffers.len(),
            nodes    = root.node_count(),
            "built file system tree"
        );
        Ok(root)
    }

    /// Build and serialize in one go.  Returns the number of bytes written.
    pub fn write<W: Write>(
        &self,
        fs:       &FileSystem,
        archives: &ArchiveFileMap,
        writer:   W,
    ) -> Result<u64> {
        let tree = self.build_tree(fs, archives)?;
        let mut out = FileDbWriter::new(writer, self.catalog);
        out.write_tree(&tree)?;
        Ok(out.bytes_written())
    }

    fn archive_files(&self, archives: &ArchiveFileMap) -> Result<Node> {
        let mut node = self.structure(StructureTag::ArchiveFiles)?;
        let tag = self.catalog.attribute(AttributeTag::String)?;
        for (_, locator) in archives.iter() {
            node.push(Node::string(tag, locator)?)?;
        }
        Ok(node)
    }

    fn resident_buffers(&self, buffers: &[&[u8]]) -> Result<Node> {
        let mut node = self.structure(StructureTag::ResidentBuffers)?;
        for data in buffers {
            let size = u32::try_from(data.len()).map_err(|_| FileDbError::ValueTooLarge {
                what: "resident buffer",
                len:  data.len(),
            })?;
            let mut buffer = self.structure(StructureTag::ResidentBuffer)?;
            buffer.push(Node::u32(self.catalog.attribute(AttributeTag::Size)?, size)?)?;
            buffer.push(Node::bytes(self.catalog.attribute(AttributeTag::Buffer)?, data.to_vec())?)?;
            node.push(buffer)?;
        }
        Ok(node)
    }

    fn entry_nodes<'a>(
        &self,
        dir:      &'a Directory,
        path:     &str,
        archives: &ArchiveFileMap,
        buffers:  &mut Vec<&'a [u8]>,
    ) -> Result<Vec<Node>> {
        let mut nodes = Vec::with_capacity(dir.len());
        for entry in dir.entries() {
            let entry_path = join(path, entry.name());
            let node = match entry {
                Entry::Directory(d) => {
                    let mut node = self.structure(StructureTag::Directory)?;
                    node.push(self.string(AttributeTag::FileName, d.name())?)?;
                    for child in self.entry_nodes(d, &entry_path, archives, buffers)? {
                        node.push(child)?;
                    }
                    node
                }
                Entry::File(f) => self.file_node(f, &entry_path, archives, buffers)?,
            };
            nodes.push(node);
        }
        Ok(nodes)
    }

    fn file_node<'a>(
        &self,
        file:     &'a File,
        path:     &str,
        archives: &ArchiveFileMap,
        buffers:  &mut Vec<&'a [u8]>,
    ) -> Result<Node> {
        let mut node = self.structure(StructureTag::File)?;
        node.push(self.string(AttributeTag::FileName, &file.name)?)?;

        match &file.contents {
            FileContents::Archived { archive, position } => {
                let locator = archives.resolve(*archive).map_err(|_| {
                    ReferenceError::UnresolvedArchiveReference {
                        path:  path.to_string(),
                        token: archive.0,
                    }
                })?;
                node.push(self.u32(AttributeTag::ArchiveFileIndex, archive.0)?)?;
                node.push(self.string(AttributeTag::LastArchiveFile, locator)?)?;
                node.push(self.u64(AttributeTag::Position, *position)?)?;
            }
            FileContents::Resident(data) => {
                let index = u32::try_from(buffers.len()).map_err(|_| FileDbError::ValueTooLarge {
                    what: "resident buffer table",
                    len:  buffers.len(),
                })?;
                buffers.push(data);
                node.push(self.u32(AttributeTag::ResidentBufferIndex, index)?)?;
            }
        }

        node.push(self.u64(AttributeTag::CompressedSize, file.compressed_size)?)?;
        node.push(self.u64(AttributeTag::UncompressedSize, file.uncompressed_size)?)?;
        node.push(self.u64(AttributeTag::ModificationTime, file.modification_time)?)?;
        node.push(self.u32(AttributeTag::Flags, file.flags)?)?;
        Ok(node)
    }

    // ── Node helpers ─────────────────────────────────────────────────────────

    fn structure(&self, structure: StructureTag) -> Result<Node> {
        Ok(Node::structure(self.catalog.structure(structure)?)?)
    }

    fn string(&self, attr: AttributeTag, value: &str) -> Result<Node> {
        Ok(Node::string(self.catalog.attribute(attr)?, value)?)
    }

    fn u32(&self, attr: AttributeTag, value: u32) -> Result<Node> {
        Ok(Node::u32(self.catalog.attribute(attr)?, value)?)
    }

    fn u64(&self, attr: AttributeTag, value: u64) -> Result<Node> {
        Ok(Node::u64(self.catalog.attribute(attr)?, value)?)
    }
}

// ── Tree → snapshot ──────────────────────────────────────────────────────────

/// Tables collected from the root before entries are read.
struct Tables<'a> {
    /// The tree's own `ArchiveFiles`, indexed by `ArchiveFileIndex`.
    archives: ArchiveFileMap,
    buffers:  Vec<&'a [u8]>,
}

/// Rebuild a snapshot from a decoded `FileSystem` tree.
///
/// The tree's `ArchiveFiles` locators are interned into `archives`, and every
/// archive-backed file is remapped from its local index to the token it got
/// there.  Loading several trees into one map therefore yields snapshots that
/// can be merged and written back as one.  `archives` is only touched once
/// the whole tree has been read.
pub fn read_file_system(root: &Node, archives: &mut ArchiveFileMap) -> Result<FileSystem> {
    if structure_kind(root) != Some(StructureTag::FileSystem) {
        return Err(malformed(format!("root is {}, expected FileSystem", root.tag())));
    }

    let mut tables = Tables { archives: ArchiveFileMap::new(), buffers: Vec::new() };
    for child in root.children() {
        match structure_kind(child) {
            Some(StructureTag::ArchiveFiles)    => read_archive_files(child, &mut tables)?,
            Some(StructureTag::ResidentBuffers) => read_resident_buffers(child, &mut tables)?,
            _ => {}
        }
    }

    let mut fs = FileSystem::new();
    for child in root.children() {
        match structure_kind(child) {
            Some(StructureTag::ArchiveFiles) | Some(StructureTag::ResidentBuffers) => {}
            Some(StructureTag::Directory) | Some(StructureTag::File) => {
                let entry = read_entry(child, "", &tables)?;
                insert_unique(fs.root_mut(), entry, "")?;
            }
            _ => return Err(malformed(format!("unexpected {} in FileSystem", child.tag()))),
        }
    }
    fs.rebase_archives(&tables.archives, archives)?;
    debug!(files = fs.files().len(), archives = tables.archives.len(), "read file system");
    Ok(fs)
}

fn read_archive_files(node: &Node, tables: &mut Tables) -> Result<()> {
    for child in node.children() {
        if attribute_kind(child) != Some(AttributeTag::String) {
            return Err(malformed(format!("unexpected {} in ArchiveFiles", child.tag())));
        }
        tables.archives.add(string_of(child)?)?;
    }
    Ok(())
}

fn read_resident_buffers<'a>(node: &'a Node, tables: &mut Tables<'a>) -> Result<()> {
    for child in node.children() {
        if structure_kind(child) != Some(StructureTag::ResidentBuffer) {
            return Err(malformed(format!("unexpected {} in ResidentBuffers", child.tag())));
        }
        let label = format!("ResidentBuffer #{}", tables.buffers.len());
        let data = child
            .find_attribute(AttributeTag::Buffer.name())
            .and_then(Node::as_bytes)
            .ok_or_else(|| missing(&label, AttributeTag::Buffer))?;
        if let Some(size) = child.find_attribute(AttributeTag::Size.name()) {
            if u64::from(u32_of(size)?) != data.len() as u64 {
                return Err(malformed(format!(
                    "{label} declares {} bytes but holds {}", u32_of(size)?, data.len()
                )));
            }
        }
        tables.buffers.push(data);
    }
    Ok(())
}

fn read_entry(node: &Node, parent: &str, tables: &Tables) -> Result<Entry> {
    let kind = structure_kind(node);
    let name = node
        .find_attribute(AttributeTag::FileName.name())
        .map(string_of)
        .transpose()?
        .ok_or_else(|| {
            let at = if parent.is_empty() { "at the root".to_string() } else { format!("in '{parent}'") };
            missing(&format!("{} {at}", node.tag().name), AttributeTag::FileName)
        })?;
    let path = join(parent, &name);

    match kind {
        Some(StructureTag::Directory) => {
            let mut dir = Directory::new(name);
            for child in node.children() {
                match (attribute_kind(child), structure_kind(child)) {
                    (Some(AttributeTag::FileName), _) => {}
                    (_, Some(StructureTag::Directory) | Some(StructureTag::File)) => {
                        let entry = read_entry(child, &path, tables)?;
                        insert_unique(&mut dir, entry, &path)?;
                    }
                    _ => return Err(malformed(format!("unexpected {} in directory '{path}'", child.tag()))),
                }
            }
            Ok(Entry::Directory(dir))
        }
        Some(StructureTag::File) => Ok(Entry::File(read_file(node, name, &path, tables)?)),
        _ => Err(malformed(format!("{} is not a file system entry", node.tag()))),
    }
}

fn read_file(node: &Node, name: String, path: &str, tables: &Tables) -> Result<File> {
    let mut archive_index     = None;
    let mut resident_index    = None;
    let mut position          = None;
    let mut compressed_size   = None;
    let mut uncompressed_size = None;
    let mut modification_time = 0;
    let mut flags             = 0;

    for child in node.children() {
        let Some(attr) = attribute_kind(child) else {
            return Err(malformed(format!("unexpected {} in file '{path}'", child.tag())));
        };
        match attr {
            AttributeTag::FileName | AttributeTag::LastArchiveFile => {}
            AttributeTag::ArchiveFileIndex    => archive_index     = Some(u32_of(child)?),
            AttributeTag::ResidentBufferIndex => resident_index    = Some(u32_of(child)?),
            AttributeTag::Position            => position          = Some(u64_of(child)?),
            AttributeTag::CompressedSize      => compressed_size   = Some(u64_of(child)?),
            AttributeTag::UncompressedSize    => uncompressed_size = Some(u64_of(child)?),
            AttributeTag::ModificationTime    => modification_time = u64_of(child)?,
            AttributeTag::Flags               => flags             = u32_of(child)?,
            other => {
                return Err(malformed(format!("unexpected {} in file '{path}'", other.name())));
            }
        }
    }

    let label = format!("file '{path}'");
    let contents = match (resident_index, archive_index) {
        (Some(_), Some(_)) => {
            return Err(malformed(format!(
                "{label} has both ResidentBufferIndex and ArchiveFileIndex"
            )));
        }
        (Some(index), None) => {
            let data = tables.buffers.get(index as usize).ok_or_else(|| {
                ReferenceError::UnresolvedResidentBuffer { path: path.to_string(), index }
            })?;
            FileContents::Resident(data.to_vec())
        }
        (None, Some(index)) => {
            let archive = ArchiveToken(index);
            tables.archives.resolve(archive)?;
            let position = position.ok_or_else(|| missing(&label, AttributeTag::Position))?;
            FileContents::Archived { archive, position }
        }
        (None, None) => return Err(missing(&label, AttributeTag::ArchiveFileIndex)),
    };

    Ok(File {
        name,
        uncompressed_size: uncompressed_size
            .ok_or_else(|| missing(&label, AttributeTag::UncompressedSize))?,
        compressed_size: compressed_size
            .ok_or_else(|| missing(&label, AttributeTag::CompressedSize))?,
        modification_time,
        flags,
        contents,
    })
}

fn insert_unique(dir: &mut Directory, entry: Entry, path: &str) -> Result<()> {
    if dir.get(entry.name()).is_some() {
        return Err(malformed(format!(
            "duplicate entry '{}'", join(path, entry.name())
        )));
    }
    dir.insert(entry);
    Ok(())
}

// ── Typed access ─────────────────────────────────────────────────────────────

fn structure_kind(node: &Node) -> Option<StructureTag> {
    if node.is_structure() { StructureTag::from_name(node.tag().name) } else { None }
}

fn attribute_kind(node: &Node) -> Option<AttributeTag> {
    if node.is_attribute() { AttributeTag::from_name(node.tag().name) } else { None }
}

fn string_of(node: &Node) -> Result<String> {
    node.as_str()
        .map(|s| s.into_owned())
        .ok_or_else(|| malformed(format!("{} is not a string", node.tag())))
}

fn u32_of(node: &Node) -> Result<u32> {
    node.as_u32().ok_or_else(|| malformed(format!("{} is not a u32", node.tag())))
}

fn u64_of(node: &Node) -> Result<u64> {
    node.as_u64().ok_or_else(|| malformed(format!("{} is not a u64", node.tag())))
}

fn malformed(msg: String) -> FileDbError {
    FormatError::MalformedTree(msg).into()
}

fn missing(structure: &str, attribute: AttributeTag) -> FileDbError {
    FormatError::MissingAttribute {
        structure: structure.to_string(),
        attribute: attribute.name(),
    }.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::dump_to_string;

    fn sample() -> (FileSystem, ArchiveFileMap) {
        let mut archives = ArchiveFileMap::new();
        let data0 = archives.add("maindata/data0.rda").unwrap();
        let mut fs = FileSystem::new();
        fs.insert_file(
            "data/config/game.xml",
            File::archived("", data0, 1024, 10, 20).with_modification_time(1_500_000_000),
        ).unwrap();
        fs.insert_file("readme.txt", File::resident("", b"hello".to_vec()).with_flags(1)).unwrap();
        (fs, archives)
    }

    #[test]
    fn tree_shape() {
        let catalog = TagCatalog::standard();
        let (fs, archives) = sample();
        let tree = FileSystemWriter::new(&catalog).build_tree(&fs, &archives).unwrap();
        let text = dump_to_string(&tree).unwrap();

        assert!(text.starts_with("0003 FileSystem\n  0004 ArchiveFiles\n    8001 String: maindata/data0.rda\n"));
        assert!(text.contains("  0005 ResidentBuffers\n    0006 ResidentBuffer\n      800B Size: 5\n"));
        assert!(text.contains("      800C Buffer: 68 65 6C 6C 6F \n"));
        assert!(text.contains("  0002 Directory\n    8002 FileName: data\n"));
        assert!(text.contains("        800A LastArchiveFile: maindata/data0.rda\n"));
        assert!(text.contains("    8009 ResidentBufferIndex: 0\n"));
    }

    #[test]
    fn read_back_matches() {
        let catalog = TagCatalog::standard();
        let (fs, archives) = sample();
        let tree = FileSystemWriter::new(&catalog).build_tree(&fs, &archives).unwrap();

        let mut reloaded = ArchiveFileMap::new();
        let back = read_file_system(&tree, &mut reloaded).unwrap();
        assert_eq!(back, fs);
        assert_eq!(reloaded, archives);
    }

    #[test]
    fn unresolved_token_is_reported_with_path() {
        let catalog = TagCatalog::standard();
        let mut fs = FileSystem::new();
        fs.insert_file("a/b.dds", File::archived("", ArchiveToken(7), 0, 1, 1)).unwrap();

        let err = FileSystemWriter::new(&catalog)
            .build_tree(&fs, &ArchiveFileMap::new())
            .unwrap_err();
        assert!(matches!(
            err,
            FileDbError::Reference(ReferenceError::UnresolvedArchiveReference { ref path, token: 7 })
                if path == "a/b.dds"
        ));
    }

    #[test]
    fn dangling_resident_index_is_reported() {
        let catalog = TagCatalog::standard();
        let (fs, archives) = sample();
        let tree = FileSystemWriter::new(&catalog).build_tree(&fs, &archives).unwrap();

        // Drop the ResidentBuffers table but keep the file referencing it.
        let mut stripped = Node::structure(StructureTag::FileSystem.tag()).unwrap();
        for child in tree.children() {
            if child.tag().name != "ResidentBuffers" {
                stripped.push(child.clone()).unwrap();
            }
        }
        let err = read_file_system(&stripped, &mut ArchiveFileMap::new()).unwrap_err();
        assert!(matches!(
            err,
            FileDbError::Reference(ReferenceError::UnresolvedResidentBuffer { index: 0, .. })
        ));
    }

    fn file_entry(attrs: Vec<Node>) -> Node {
        Node::with_children(StructureTag::File.tag(), attrs).unwrap()
    }

    fn root_with(archive: &str, entries: Vec<Node>) -> Node {
        let mut table = Node::structure(StructureTag::ArchiveFiles.tag()).unwrap();
        table.push(Node::string(AttributeTag::String.tag(), archive).unwrap()).unwrap();
        let mut root = Node::structure(StructureTag::FileSystem.tag()).unwrap();
        root.push(table).unwrap();
        for entry in entries {
            root.push(entry).unwrap();
        }
        root
    }

    #[test]
    fn failed_read_leaves_archive_map_untouched() {
        let nameless = file_entry(vec![
            Node::u32(AttributeTag::ArchiveFileIndex.tag(), 0).unwrap(),
            Node::u64(AttributeTag::Position.tag(), 0).unwrap(),
        ]);
        let root = root_with("data9.rda", vec![nameless]);

        let mut archives = ArchiveFileMap::new();
        archives.add("data0.rda").unwrap();
        let before = archives.clone();

        let err = read_file_system(&root, &mut archives).unwrap_err();
        assert!(matches!(
            err,
            FileDbError::Format(FormatError::MissingAttribute { attribute: "FileName", .. })
        ));
        assert_eq!(archives, before);
    }

    #[test]
    fn missing_name_at_top_level_says_root() {
        let root = root_with("data0.rda", vec![file_entry(Vec::new())]);
        match read_file_system(&root, &mut ArchiveFileMap::new()) {
            Err(FileDbError::Format(FormatError::MissingAttribute { structure, .. })) => {
                assert_eq!(structure, "File at the root");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn file_with_both_backings_is_malformed() {
        let catalog = TagCatalog::standard();
        let (fs, archives) = sample();
        let tree = FileSystemWriter::new(&catalog).build_tree(&fs, &archives).unwrap();

        // Give the resident readme.txt an archive index as well.
        let mut doubled = Node::structure(StructureTag::FileSystem.tag()).unwrap();
        for child in tree.children() {
            let is_readme = child.find_attribute(AttributeTag::FileName.name())
                .and_then(Node::as_str)
                .map_or(false, |n| n == "readme.txt");
            let mut child = child.clone();
            if is_readme {
                child.push(Node::u32(AttributeTag::ArchiveFileIndex.tag(), 0).unwrap()).unwrap();
            }
            doubled.push(child).unwrap();
        }

        let mut reloaded = ArchiveFileMap::new();
        let err = read_file_system(&doubled, &mut reloaded).unwrap_err();
        assert!(matches!(err, FileDbError::Format(FormatError::MalformedTree(ref m)) if m.contains("readme.txt")));
        assert!(reloaded.is_empty());
    }
}
