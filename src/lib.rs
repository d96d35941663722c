pub mod tag;
pub mod node;
pub mod error;
pub mod io_stream;
pub mod dump;
pub mod index;
pub mod filesystem;
pub mod layout;
pub mod loader;
pub mod archive;
pub mod config;
pub mod logging;

pub use tag::{AttributeTag, StructureTag, Tag, TagCatalog, TagKind, ValueType};
pub use node::{AttributeValue, Node};
pub use error::{FileDbError, Result};
pub use io_stream::{decode, encode, FileDbReader, FileDbWriter};
pub use index::{ArchiveFileMap, ArchiveToken};
pub use filesystem::{merge, Directory, Entry, EntryKind, File, FileContents, FileSystem};
pub use loader::{ContainerLoader, DirectoryLoader, FileDbLoader, LoadResult};
