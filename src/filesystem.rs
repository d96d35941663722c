//! Virtual file-system snapshot and the merge used to combine sources.
//!
//! Directories keep their entries in insertion order; names are unique per
//! directory.  Merging is last-writer-wins on files, recursive on
//! directories, and fatal on a file/directory collision.  Sources must be
//! merged one at a time in the order they were given: the result depends on
//! that order.

use std::collections::HashMap;
use std::fmt;
use std::mem;

use tracing::{debug, trace};

use crate::error::{ConflictError, FileDbError, FormatError, ReferenceError, Result};
use crate::index::{ArchiveFileMap, ArchiveToken};

// ── Entries ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::File      => f.write_str("file"),
            EntryKind::Directory => f.write_str("directory"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    File(File),
    Directory(Directory),
}

impl Entry {
    pub fn name(&self) -> &str {
        match self {
            Entry::File(f)      => &f.name,
            Entry::Directory(d) => &d.name,
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            Entry::File(_)      => EntryKind::File,
            Entry::Directory(_) => EntryKind::Directory,
        }
    }
}

/// Where a file's bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContents {
    /// Held in memory and written into the `ResidentBuffers` table.
    Resident(Vec<u8>),
    /// Stored at `position` inside the data archive identified by `archive`.
    Archived { archive: ArchiveToken, position: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub name:              String,
    pub uncompressed_size: u64,
    pub compressed_size:   u64,
    /// Unix seconds.
    pub modification_time: u64,
    pub flags:             u32,
    pub contents:          FileContents,
}

impl File {
    /// A resident file stored raw: both sizes equal the buffer length.
    pub fn resident(name: impl Into<String>, data: Vec<u8>) -> Self {
        let len = data.len() as u64;
        Self {
            name:              name.into(),
            uncompressed_size: len,
            compressed_size:   len,
            modification_time: 0,
            flags:             0,
            contents:          FileContents::Resident(data),
        }
    }

    pub fn archived(
        name:              impl Into<String>,
        archive:           ArchiveToken,
        position:          u64,
        compressed_size:   u64,
        uncompressed_size: u64,
    ) -> Self {
        Self {
            name: name.into(),
            uncompressed_size,
            compressed_size,
            modification_time: 0,
            flags:             0,
            contents:          FileContents::Archived { archive, position },
        }
    }

    pub fn with_modification_time(mut self, modification_time: u64) -> Self {
        self.modification_time = modification_time;
        self
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn is_resident(&self) -> bool {
        matches!(self.contents, FileContents::Resident(_))
    }
}

// ── Directory ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Directory {
    name:    String,
    entries: Vec<Entry>,
    index:   HashMap<String, usize>,
}

impl Directory {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), entries: Vec::new(), index: HashMap::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in iteration (and encoding) order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    /// Insert `entry`, replacing any entry of the same name in place.
    /// Returns the replaced entry.
    pub fn insert(&mut self, entry: Entry) -> Option<Entry> {
        match self.index.get(entry.name()).copied() {
            Some(i) => Some(mem::replace(&mut self.entries[i], entry)),
            None => {
                self.index.insert(entry.name().to_string(), self.entries.len());
                self.entries.push(entry);
                None
            }
        }
    }

    /// Sort entries by name, recursively.
    pub fn sort(&mut self) {
        self.entries.sort_by(|a, b| a.name().cmp(b.name()));
        self.rebuild_index();
        for entry in &mut self.entries {
            if let Entry::Directory(d) = entry {
                d.sort();
            }
        }
    }

    fn rebuild_index(&mut self) {
        self.index = self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name().to_string(), i))
            .collect();
    }

    fn for_each_file_mut<F>(&mut self, f: &mut F) -> std::result::Result<(), ReferenceError>
    where
        F: FnMut(&mut File) -> std::result::Result<(), ReferenceError>,
    {
        for entry in &mut self.entries {
            match entry {
                Entry::File(file)   => f(file)?,
                Entry::Directory(d) => d.for_each_file_mut(f)?,
            }
        }
        Ok(())
    }

    fn collect_files<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a File)>) {
        for entry in &self.entries {
            let path = join(prefix, entry.name());
            match entry {
                Entry::File(f)      => out.push((path, f)),
                Entry::Directory(d) => d.collect_files(&path, out),
            }
        }
    }
}

// ── FileSystem ───────────────────────────────────────────────────────────────

/// A snapshot of a virtual file system.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileSystem {
    root: Directory,
}

impl FileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> &Directory {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Directory {
        &mut self.root
    }

    /// Insert a file at a `/`-separated path, creating parent directories.
    /// The file takes the last path component as its name.
    pub fn insert_file(&mut self, path: &str, mut file: File) -> Result<()> {
        let mut components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        let name = components.pop().ok_or_else(|| {
            FormatError::MalformedTree(format!("empty file path '{path}'"))
        })?;

        let mut dir    = &mut self.root;
        let mut walked = String::new();
        for component in components {
            walked = join(&walked, component);
            let idx = match dir.index.get(component).copied() {
                Some(i) => i,
                None => {
                    dir.insert(Entry::Directory(Directory::new(component)));
                    dir.entries.len() - 1
                }
            };
            dir = match &mut dir.entries[idx] {
                Entry::Directory(d) => d,
                Entry::File(_) => return Err(conflict(walked, EntryKind::File, EntryKind::Directory)),
            };
        }

        if let Some(Entry::Directory(_)) = dir.get(name) {
            return Err(conflict(join(&walked, name), EntryKind::Directory, EntryKind::File));
        }
        file.name = name.to_string();
        dir.insert(Entry::File(file));
        Ok(())
    }

    /// Look up an entry by `/`-separated path.
    pub fn entry(&self, path: &str) -> Option<&Entry> {
        let mut components = path.split('/').filter(|c| !c.is_empty()).peekable();
        let mut dir = &self.root;
        while let Some(component) = components.next() {
            let entry = dir.get(component)?;
            if components.peek().is_none() {
                return Some(entry);
            }
            match entry {
                Entry::Directory(d) => dir = d,
                Entry::File(_)      => return None,
            }
        }
        None
    }

    pub fn file(&self, path: &str) -> Option<&File> {
        match self.entry(path)? {
            Entry::File(f)      => Some(f),
            Entry::Directory(_) => None,
        }
    }

    /// Every file with its full path, depth-first in iteration order.
    pub fn files(&self) -> Vec<(String, &File)> {
        let mut out = Vec::new();
        self.root.collect_files("", &mut out);
        out
    }

    /// Sort every directory by name.  Encoding follows iteration order, so
    /// this is how callers get byte-for-byte reproducible output.
    pub fn sort(&mut self) {
        self.root.sort();
    }

    /// Move archive references from the token space of `from` into `into`.
    ///
    /// Every locator of `from` is interned into `into` in token order, so the
    /// tokens `into` hands out do not depend on file iteration order.  Tokens
    /// are checked against `from` before `into` is touched.
    pub fn rebase_archives(
        &mut self,
        from: &ArchiveFileMap,
        into: &mut ArchiveFileMap,
    ) -> std::result::Result<(), ReferenceError> {
        for (_, file) in self.files() {
            if let FileContents::Archived { archive, .. } = file.contents {
                from.resolve(archive)?;
            }
        }
        let mapping = from
            .iter()
            .map(|(_, l)| into.intern(l))
            .collect::<std::result::Result<Vec<ArchiveToken>, _>>()?;
        self.root.for_each_file_mut(&mut |file| {
            if let FileContents::Archived { archive, .. } = &mut file.contents {
                *archive = mapping
                    .get(archive.0 as usize)
                    .copied()
                    .ok_or(ReferenceError::UnknownToken(archive.0))?;
            }
            Ok(())
        })
    }

    /// Apply `incoming` on top of `self` and return the result.
    ///
    /// New names are appended, files of the same name are replaced whole,
    /// directories of the same name are merged recursively.  A name that is
    /// a file on one side and a directory on the other fails with
    /// `ConflictingEntryKind`; the partially merged snapshot is dropped.
    pub fn merge(mut self, incoming: FileSystem) -> std::result::Result<Self, ConflictError> {
        merge_directory(&mut self.root, incoming.root, "")?;
        debug!(files = self.files().len(), "merged file system");
        Ok(self)
    }
}

/// `merge(base, incoming)`; see [`FileSystem::merge`].
pub fn merge(base: FileSystem, incoming: FileSystem) -> std::result::Result<FileSystem, ConflictError> {
    base.merge(incoming)
}

fn merge_directory(
    base:     &mut Directory,
    incoming: Directory,
    path:     &str,
) -> std::result::Result<(), ConflictError> {
    for entry in incoming.entries {
        let entry_path = join(path, entry.name());
        let existing   = base.index.get(entry.name()).copied();
        let Some(i) = existing else {
            trace!(path = %entry_path, "add");
            base.insert(entry);
            continue;
        };
        match (&mut base.entries[i], entry) {
            (Entry::File(old), Entry::File(new)) => {
                trace!(path = %entry_path, "overwrite");
                *old = new;
            }
            (Entry::Directory(old), Entry::Directory(new)) => {
                merge_directory(old, new, &entry_path)?;
            }
            (old, new) => {
                return Err(ConflictError::ConflictingEntryKind {
                    path:     entry_path,
                    existing: old.kind(),
                    incoming: new.kind(),
                });
            }
        }
    }
    Ok(())
}

fn conflict(path: String, existing: EntryKind, incoming: EntryKind) -> FileDbError {
    ConflictError::ConflictingEntryKind { path, existing, incoming }.into()
}

pub(crate) fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fs_with(files: &[(&str, &[u8])]) -> FileSystem {
        let mut fs = FileSystem::new();
        for (path, data) in files {
            fs.insert_file(path, File::resident("", data.to_vec())).unwrap();
        }
        fs
    }

    #[test]
    fn insert_creates_parents() {
        let fs = fs_with(&[("data/config/a.xml", b"1"), ("data/b.xml", b"2")]);
        assert!(matches!(fs.entry("data/config"), Some(Entry::Directory(_))));
        assert_eq!(fs.file("data/config/a.xml").unwrap().name, "a.xml");
        assert_eq!(fs.files().len(), 2);
        assert!(fs.file("data").is_none());
        assert!(fs.entry("data/b.xml/x").is_none());
    }

    #[test]
    fn insert_through_a_file_conflicts() {
        let mut fs = fs_with(&[("a", b"1")]);
        let err = fs.insert_file("a/b", File::resident("", vec![])).unwrap_err();
        assert!(matches!(
            err,
            FileDbError::Conflict(ConflictError::ConflictingEntryKind { ref path, .. }) if path == "a"
        ));
    }

    #[test]
    fn merge_preserves_position_of_overwritten_entries() {
        let base     = fs_with(&[("a", b"1"), ("b", b"1"), ("c", b"1")]);
        let incoming = fs_with(&[("d", b"2"), ("b", b"2")]);
        let merged   = base.merge(incoming).unwrap();

        let names: Vec<&str> = merged.root().entries().iter().map(Entry::name).collect();
        assert_eq!(names, ["a", "b", "c", "d"]);
        assert_eq!(merged.file("b").unwrap().contents, FileContents::Resident(b"2".to_vec()));
    }

    #[test]
    fn merge_recurses_into_directories() {
        let base     = fs_with(&[("x/a", b"1"), ("x/keep", b"k")]);
        let incoming = fs_with(&[("x/a", b"2"), ("x/y/new", b"n")]);
        let merged   = merge(base, incoming).unwrap();

        assert_eq!(merged.file("x/a").unwrap().contents, FileContents::Resident(b"2".to_vec()));
        assert!(merged.file("x/keep").is_some());
        assert!(merged.file("x/y/new").is_some());
    }

    #[test]
    fn nested_conflict_names_full_path() {
        let base     = fs_with(&[("x/a/inner", b"1")]);
        let incoming = fs_with(&[("x/a", b"2")]);
        assert_eq!(
            merge(base, incoming).unwrap_err(),
            ConflictError::ConflictingEntryKind {
                path:     "x/a".into(),
                existing: EntryKind::Directory,
                incoming: EntryKind::File,
            }
        );
    }

    #[test]
    fn rebase_moves_tokens_into_shared_map() {
        let mut local = ArchiveFileMap::new();
        let a = local.add("a.rda").unwrap();
        let b = local.add("b.rda").unwrap();
        let mut fs = FileSystem::new();
        fs.insert_file("x", File::archived("", b, 0, 1, 1)).unwrap();
        fs.insert_file("y", File::archived("", a, 0, 1, 1)).unwrap();

        let mut shared = ArchiveFileMap::new();
        shared.add("b.rda").unwrap();
        fs.rebase_archives(&local, &mut shared).unwrap();

        assert_eq!(shared.len(), 2);
        let token_of = |path: &str| match fs.file(path).unwrap().contents {
            FileContents::Archived { archive, .. } => archive,
            FileContents::Resident(_)             => unreachable!(),
        };
        assert_eq!(shared.resolve(token_of("x")).unwrap(), "b.rda");
        assert_eq!(shared.resolve(token_of("y")).unwrap(), "a.rda");
    }

    #[test]
    fn rebase_rejects_tokens_outside_source_map() {
        let mut local = ArchiveFileMap::new();
        local.add("a.rda").unwrap();
        let mut fs = FileSystem::new();
        fs.insert_file("x", File::archived("", ArchiveToken(3), 0, 1, 1)).unwrap();

        let mut shared = ArchiveFileMap::new();
        assert_eq!(
            fs.rebase_archives(&local, &mut shared),
            Err(ReferenceError::UnknownToken(3))
        );
        assert!(shared.is_empty());
    }

    #[test]
    fn sort_orders_recursively() {
        let mut fs = fs_with(&[("z/b", b""), ("z/a", b""), ("m", b"")]);
        fs.sort();
        let paths: Vec<String> = fs.files().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, ["m", "z/a", "z/b"]);
        assert!(fs.file("z/a").is_some());
    }
}
