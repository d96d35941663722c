//! Source loaders: turn containers on disk into [`FileSystem`] snapshots.
//!
//! # Loading vs. merging
//! Loading independent sources is embarrassingly parallel; merging is not.
//! Each source is loaded against a private [`ArchiveFileMap`], then sources
//! are rebased into the shared map and merged strictly in the order given.
//! With the `parallel` feature the loads run on the Rayon pool; the merge
//! loop is the same either way, so output does not depend on the feature.
//!
//! # Cancellation
//! The cancel flag is checked between whole-source merge steps, never in the
//! middle of one.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::archive;
use crate::error::{FileDbError, Result};
use crate::filesystem::FileSystem;
use crate::index::ArchiveFileMap;
use crate::tag::TagCatalog;

/// Produces a snapshot from one source container.
pub trait ContainerLoader: Send + Sync {
    /// Load `path`.  Every archive locator the container references is
    /// registered in `archives` and the returned snapshot's tokens point into
    /// it.
    fn load(&self, path: &Path, archives: &mut ArchiveFileMap) -> Result<FileSystem>;
}

// ── file.db loader ───────────────────────────────────────────────────────────

/// Loads an existing `file.db`.
pub struct FileDbLoader<'c> {
    catalog: &'c TagCatalog,
}

impl<'c> FileDbLoader<'c> {
    pub fn new(catalog: &'c TagCatalog) -> Self {
        Self { catalog }
    }
}

impl ContainerLoader for FileDbLoader<'_> {
    fn load(&self, path: &Path, archives: &mut ArchiveFileMap) -> Result<FileSystem> {
        debug!(path = %path.display(), "loading file.db");
        archive::read_file_system(path, self.catalog, archives)
    }
}

// ── Sequential merge of many sources ─────────────────────────────────────────

/// Load every path with `loader` and merge the results in order.
pub fn load_and_merge<L: ContainerLoader + ?Sized>(
    loader:   &L,
    paths:    &[PathBuf],
    archives: &mut ArchiveFileMap,
    cancel:   &AtomicBool,
) -> Result<FileSystem> {
    let mut merged = FileSystem::new();
    for (path, loaded) in paths.iter().zip(load_sources(loader, paths)) {
        if cancel.load(Ordering::Relaxed) {
            return Err(FileDbError::Cancelled);
        }
        let (mut source, local) = loaded?;
        source.rebase_archives(&local, archives)?;
        merged = merged.merge(source)?;
        info!(path = %path.display(), archives = archives.len(), "merged source");
    }
    Ok(merged)
}

fn load_one<L: ContainerLoader + ?Sized>(
    loader: &L,
    path:   &Path,
) -> Result<(FileSystem, ArchiveFileMap)> {
    let mut local = ArchiveFileMap::new();
    let fs = loader.load(path, &mut local)?;
    Ok((fs, local))
}

#[cfg(feature = "parallel")]
fn load_sources<'a, L: ContainerLoader + ?Sized>(
    loader: &'a L,
    paths:  &'a [PathBuf],
) -> impl Iterator<Item = Result<(FileSystem, ArchiveFileMap)>> + 'a {
    use rayon::prelude::*;

    let loaded: Vec<_> = paths.par_iter().map(|p| load_one(loader, p)).collect();
    loaded.into_iter()
}

#[cfg(not(feature = "parallel"))]
fn load_sources<'a, L: ContainerLoader + ?Sized>(
    loader: &'a L,
    paths:  &'a [PathBuf],
) -> impl Iterator<Item = Result<(FileSystem, ArchiveFileMap)>> + 'a {
    paths.iter().map(move |p| load_one(loader, p))
}

// ── Directory loader ─────────────────────────────────────────────────────────

/// Snapshot plus the containers it was built from, in merge order.
#[derive(Debug, Clone)]
pub struct LoadResult {
    pub file_system:     FileSystem,
    pub container_paths: Vec<PathBuf>,
}

/// Walks a directory, loading every container it finds.
pub struct DirectoryLoader<L> {
    loader:     L,
    extensions: Vec<String>,
}

impl<L: ContainerLoader> DirectoryLoader<L> {
    /// `extensions` are matched case-insensitively, without the dot.
    pub fn new(loader: L, extensions: Vec<String>) -> Self {
        let extensions = extensions
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .collect();
        Self { loader, extensions }
    }

    /// Container paths under `root`, sorted.  Unreadable subdirectories are
    /// skipped with a warning; an unreadable `root` is an error.
    pub fn discover(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        for entry in WalkDir::new(root).follow_links(true) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) if e.depth() == 0 => return Err(std::io::Error::from(e).into()),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable path");
                    continue;
                }
            };
            if entry.file_type().is_file() && self.matches(entry.path()) {
                found.push(entry.into_path());
            }
        }
        found.sort();
        Ok(found)
    }

    pub fn load(
        &self,
        root:     &Path,
        archives: &mut ArchiveFileMap,
        cancel:   &AtomicBool,
    ) -> Result<LoadResult> {
        let container_paths = self.discover(root)?;
        info!(root = %root.display(), containers = container_paths.len(), "discovered containers");
        let file_system = load_and_merge(&self.loader, &container_paths, archives, cancel)?;
        Ok(LoadResult { file_system, container_paths })
    }

    fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::File;
    use std::collections::HashMap;

    /// Serves canned snapshots keyed by file name.
    struct Canned(HashMap<String, (Vec<(&'static str, &'static [u8])>, Vec<&'static str>)>);

    impl ContainerLoader for Canned {
        fn load(&self, path: &Path, archives: &mut ArchiveFileMap) -> Result<FileSystem> {
            let key = path.file_name().unwrap().to_string_lossy().into_owned();
            let (files, locators) = &self.0[&key];
            for l in locators {
                archives.add(*l).unwrap();
            }
            let mut fs = FileSystem::new();
            for (p, data) in files {
                fs.insert_file(p, File::resident("", data.to_vec())).unwrap();
            }
            Ok(fs)
        }
    }

    fn canned() -> Canned {
        let mut m = HashMap::new();
        m.insert("one.db".to_string(), (vec![("a", &b"1"[..])], vec!["x.rda"]));
        m.insert("two.db".to_string(), (vec![("a", &b"2"[..])], vec!["y.rda", "x.rda"]));
        Canned(m)
    }

    #[test]
    fn later_sources_win_and_archives_are_shared() {
        let paths = vec![PathBuf::from("one.db"), PathBuf::from("two.db")];
        let mut archives = ArchiveFileMap::new();
        let fs = load_and_merge(&canned(), &paths, &mut archives, &AtomicBool::new(false)).unwrap();

        assert_eq!(fs.file("a").unwrap().contents, crate::filesystem::FileContents::Resident(b"2".to_vec()));
        let locators: Vec<&str> = archives.iter().map(|(_, l)| l).collect();
        assert_eq!(locators, ["x.rda", "y.rda"]);
    }

    #[test]
    fn cancellation_stops_between_sources() {
        let paths = vec![PathBuf::from("one.db")];
        let err = load_and_merge(&canned(), &paths, &mut ArchiveFileMap::new(), &AtomicBool::new(true))
            .unwrap_err();
        assert!(matches!(err, FileDbError::Cancelled));
    }

    #[test]
    fn discovery_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("dlc")).unwrap();
        std::fs::write(dir.path().join("dlc/two.DB"), b"").unwrap();
        std::fs::write(dir.path().join("one.db"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let loader = DirectoryLoader::new(canned(), vec![".db".into()]);
        let found  = loader.discover(dir.path()).unwrap();
        assert_eq!(found, vec![dir.path().join("dlc/two.DB"), dir.path().join("one.db")]);
    }

    #[test]
    fn missing_root_is_an_error() {
        let loader = DirectoryLoader::new(canned(), vec!["db".into()]);
        assert!(loader.discover(Path::new("/nonexistent/filedb/root")).is_err());
    }
}
