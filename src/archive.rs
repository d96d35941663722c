//! High-level `file.db` API: the primary embedding surface.
//!
//! ```no_run
//! use filedb::archive::{self, GenOptions, Generator};
//! use filedb::tag::TagCatalog;
//!
//! let catalog = TagCatalog::standard();
//!
//! // Merge two existing databases, later ones winning.
//! let gen = Generator::new(&catalog, GenOptions::default());
//! gen.generate_to(&["base/file.db".into(), "dlc1/file.db".into()], "out/file.db".as_ref())?;
//!
//! // Read the result back.
//! let tree = archive::read_tree("out/file.db".as_ref(), &catalog)?;
//! print!("{}", filedb::dump::dump_to_string(&tree)?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::error::Result;
use crate::filesystem::FileSystem;
use crate::index::ArchiveFileMap;
use crate::io_stream::{self, FileDbReader};
use crate::layout::{self, FileSystemWriter};
use crate::loader::{self, DirectoryLoader, FileDbLoader};
use crate::node::Node;
use crate::tag::TagCatalog;

// ── Files ────────────────────────────────────────────────────────────────────

/// Decode the tree stored at `path`.
pub fn read_tree(path: &Path, catalog: &TagCatalog) -> Result<Node> {
    let file = fs::File::open(path)?;
    FileDbReader::new(BufReader::new(file), catalog).read_tree()
}

/// Decode `path` into a snapshot, registering its archive table in
/// `archives`.
pub fn read_file_system(
    path:     &Path,
    catalog:  &TagCatalog,
    archives: &mut ArchiveFileMap,
) -> Result<FileSystem> {
    let tree = read_tree(path, catalog)?;
    layout::read_file_system(&tree, archives)
}

/// Encode `file_system` and write it to `path`.  The whole stream is built
/// in memory first, so a failed encode leaves no partial file behind.
pub fn write_file_system(
    path:        &Path,
    catalog:     &TagCatalog,
    file_system: &FileSystem,
    archives:    &ArchiveFileMap,
) -> Result<u64> {
    let tree  = FileSystemWriter::new(catalog).build_tree(file_system, archives)?;
    let bytes = io_stream::encode(&tree, catalog)?;
    fs::write(path, &bytes)?;
    info!(path = %path.display(), bytes = bytes.len(), "wrote file.db");
    Ok(bytes.len() as u64)
}

// ── GenOptions ───────────────────────────────────────────────────────────────

/// Knobs for [`Generator`].  Also the `[gen]` table of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GenOptions {
    /// Sort every directory by name before writing.
    pub sort_entries:         bool,
    /// Extensions picked up when an input is a directory.
    pub container_extensions: Vec<String>,
}

impl Default for GenOptions {
    fn default() -> Self {
        Self {
            sort_entries:         false,
            container_extensions: vec!["db".to_string()],
        }
    }
}

// ── Generator ────────────────────────────────────────────────────────────────

/// Output of [`Generator::generate`].
#[derive(Debug, Clone)]
pub struct Generated {
    pub file_system:     FileSystem,
    pub archives:        ArchiveFileMap,
    /// Containers merged, in merge order.
    pub container_paths: Vec<PathBuf>,
}

/// Merges many sources into one snapshot.
pub struct Generator<'c> {
    catalog: &'c TagCatalog,
    options: GenOptions,
    cancel:  Arc<AtomicBool>,
}

impl<'c> Generator<'c> {
    pub fn new(catalog: &'c TagCatalog, options: GenOptions) -> Self {
        Self { catalog, options, cancel: Arc::new(AtomicBool::new(false)) }
    }

    /// Setting this flag makes a running [`generate`](Self::generate) stop
    /// with `Cancelled` before its next merge step.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// A single directory input is walked for containers; otherwise every
    /// input is a `file.db`, merged in the order given.
    pub fn generate(&self, inputs: &[PathBuf]) -> Result<Generated> {
        let loader       = FileDbLoader::new(self.catalog);
        let mut archives = ArchiveFileMap::new();

        let (mut file_system, container_paths) = match inputs {
            [dir] if dir.is_dir() => {
                let walker = DirectoryLoader::new(loader, self.options.container_extensions.clone());
                let result = walker.load(dir, &mut archives, &self.cancel)?;
                (result.file_system, result.container_paths)
            }
            _ => {
                let fs = loader::load_and_merge(&loader, inputs, &mut archives, &self.cancel)?;
                (fs, inputs.to_vec())
            }
        };

        if self.options.sort_entries {
            file_system.sort();
        }
        info!(
            sources  = container_paths.len(),
            archives = archives.len(),
            files    = file_system.files().len(),
            "generated file system"
        );
        Ok(Generated { file_system, archives, container_paths })
    }

    /// [`generate`](Self::generate), then write the result to `output`.
    pub fn generate_to(&self, inputs: &[PathBuf], output: &Path) -> Result<Generated> {
        let generated = self.generate(inputs)?;
        write_file_system(output, self.catalog, &generated.file_system, &generated.archives)?;
        Ok(generated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FileDbError;
    use crate::filesystem::File;
    use std::sync::atomic::Ordering;

    fn write_db(path: &Path, catalog: &TagCatalog, files: &[(&str, &str)]) {
        let mut archives = ArchiveFileMap::new();
        let mut fs = FileSystem::new();
        for (i, (p, locator)) in files.iter().enumerate() {
            let token = archives.intern(locator).unwrap();
            fs.insert_file(p, File::archived("", token, i as u64 * 100, 10, 20)).unwrap();
        }
        write_file_system(path, catalog, &fs, &archives).unwrap();
    }

    #[test]
    fn write_then_read_back() {
        let catalog = TagCatalog::standard();
        let dir     = tempfile::tempdir().unwrap();
        let path    = dir.path().join("file.db");

        let mut archives = ArchiveFileMap::new();
        let mut fs = FileSystem::new();
        fs.insert_file("gfx/a.dds", File::resident("", b"hello".to_vec())).unwrap();
        let written = write_file_system(&path, &catalog, &fs, &archives).unwrap();
        assert_eq!(written, std::fs::metadata(&path).unwrap().len());

        let back = read_file_system(&path, &catalog, &mut archives).unwrap();
        assert_eq!(back, fs);
    }

    #[test]
    fn generate_remaps_archive_tokens() {
        let catalog = TagCatalog::standard();
        let dir     = tempfile::tempdir().unwrap();
        let one     = dir.path().join("one.db");
        let two     = dir.path().join("two.db");
        write_db(&one, &catalog, &[("a", "data0.rda")]);
        write_db(&two, &catalog, &[("b", "data1.rda"), ("c", "data0.rda")]);

        let gen = Generator::new(&catalog, GenOptions::default());
        let out = gen.generate(&[one, two]).unwrap();

        let locators: Vec<&str> = out.archives.iter().map(|(_, l)| l).collect();
        assert_eq!(locators, ["data0.rda", "data1.rda"]);
        let resolve = |p: &str| match out.file_system.file(p).unwrap().contents {
            crate::filesystem::FileContents::Archived { archive, .. } => {
                out.archives.resolve(archive).unwrap().to_string()
            }
            _ => unreachable!(),
        };
        assert_eq!(resolve("a"), "data0.rda");
        assert_eq!(resolve("b"), "data1.rda");
        assert_eq!(resolve("c"), "data0.rda");
    }

    #[test]
    fn cancelled_generator_stops() {
        let catalog = TagCatalog::standard();
        let dir     = tempfile::tempdir().unwrap();
        let one     = dir.path().join("one.db");
        write_db(&one, &catalog, &[("a", "data0.rda")]);

        let gen = Generator::new(&catalog, GenOptions::default());
        gen.cancel_flag().store(true, Ordering::Relaxed);
        assert!(matches!(gen.generate(&[one]), Err(FileDbError::Cancelled)));
    }

    #[test]
    fn failed_generate_writes_nothing() {
        let catalog = TagCatalog::standard();
        let dir     = tempfile::tempdir().unwrap();
        let out     = dir.path().join("out.db");

        let gen = Generator::new(&catalog, GenOptions::default());
        assert!(gen.generate_to(&[dir.path().join("missing.db")], &out).is_err());
        assert!(!out.exists());
    }
}
