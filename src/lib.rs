//! arcvfs - read-only filesystem view over archives
//!
//! Opens zip, 7z and rar containers through one interface: stat entries,
//! list directories page by page, and stream member contents without caring
//! which format is underneath.

pub mod archive;
pub mod config;
pub mod dir_index;
pub mod entry;
pub mod error;
pub mod fs;
pub mod paths;
pub mod registry;
pub mod tree;

pub use config::{Config, ConfigError};
pub use entry::{Entry, EntryId, FileInfo};
pub use error::{Result, VfsError};
pub use fs::{ArchiveFs, DirectoryLister};
pub use registry::Registry;
pub use tree::{DirectoryLayout, TreeOptions};
