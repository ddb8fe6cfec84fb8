//! Read-only filesystem view of one open archive.
//!
//! Every lookup is answered from the indices built once at open time; the
//! codec is only consulted when a file's content is first opened. The
//! instance exclusively owns the codec handle and every stream it hands out.
//! Nothing here is synchronized: use one instance per thread.

use crate::archive::{ArchiveReader, ArchiverFile};
use crate::dir_index::DirIndex;
use crate::entry::{Entry, EntryId, FileInfo};
use crate::error::{Result, VfsError};
use crate::paths;
use crate::tree::{Tree, TreeBuilder};
use chrono::{DateTime, Utc};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::io::{self, Read};
use tracing::{debug, info, warn};

/// Paginated directory enumeration.
pub trait DirectoryLister {
    /// Up to `n` children of `path` not returned by earlier calls; all of
    /// them when `n == 0`. `EndOfListing` once nothing remains.
    fn list(&mut self, path: &str, n: usize) -> Result<Vec<FileInfo>>;
}

/// Drain a listing page by page until `EndOfListing`.
pub fn list_all<L: DirectoryLister + ?Sized>(
    lister: &mut L,
    path: &str,
    page: usize,
) -> Result<Vec<FileInfo>> {
    let mut all = Vec::new();
    loop {
        match lister.list(path, page) {
            Ok(batch) => all.extend(batch),
            Err(e) if e.is_end_of_listing() => return Ok(all),
            Err(e) => return Err(e),
        }
    }
}

pub struct ArchiveFs {
    tree: Tree,
    /// `None` once closed
    reader: Option<Box<dyn ArchiveReader>>,
    format: &'static str,
}

impl ArchiveFs {
    /// Index the members of an opened container.
    pub fn new(mut reader: Box<dyn ArchiveReader>, builder: &TreeBuilder) -> Result<Self> {
        let tree = match builder.build(reader.entries()) {
            Ok(tree) => tree,
            Err(e) => {
                if let Err(close_err) = reader.close() {
                    warn!("Failed to close {} archive: {}", reader.name(), close_err);
                }
                return Err(e);
            }
        };
        let format = reader.name();
        info!("Opened {} archive with {} entries", format, tree.len());
        Ok(Self {
            tree,
            reader: Some(reader),
            format,
        })
    }

    /// An instance with no archive behind it.
    pub fn empty() -> Self {
        Self {
            tree: Tree::default(),
            reader: None,
            format: "",
        }
    }

    /// Name of the codec that opened the archive.
    pub fn format(&self) -> &'static str {
        self.format
    }

    /// Entry count, including the root and synthesized directories.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_none()
    }

    fn lookup(&self, name: &str) -> Result<EntryId> {
        if !paths::is_valid_path(name) {
            return Err(VfsError::InvalidPath(name.to_string()));
        }
        self.tree
            .dir_id(name)
            .or_else(|| self.tree.file_id(name))
            .ok_or_else(|| VfsError::NotFound(name.to_string()))
    }

    /// Open `name`. File content is opened on first use; directories are
    /// returned as they are.
    pub fn open(&mut self, name: &str) -> Result<&mut Entry> {
        let id = self.lookup(name)?;
        let entry = &mut self.tree.entries[id];
        if !entry.is_dir() {
            let reader = self
                .reader
                .as_deref_mut()
                .ok_or_else(|| VfsError::EntryClosed(name.to_string()))?;
            entry.ensure_open(reader)?;
        }
        Ok(entry)
    }

    /// Metadata of `name` without opening its content.
    pub fn stat(&self, name: &str) -> Result<FileInfo> {
        let id = self.lookup(name)?;
        Ok(self.tree.entries[id].stat())
    }

    /// List the directory at `path`; see [`DirectoryLister::list`].
    pub fn read_dir(&mut self, path: &str, n: usize) -> Result<Vec<FileInfo>> {
        let dir_id = self
            .tree
            .dir_id(path)
            .ok_or_else(|| VfsError::NotFound(path.to_string()))?;

        let children = self.tree.children(path);
        let start = self.tree.entries[dir_id].cursor().min(children.len());
        let remaining = children.len() - start;
        let take = if n == 0 { remaining } else { n.min(remaining) };
        if take == 0 {
            return Err(VfsError::EndOfListing(path.to_string()));
        }

        let batch = children[start..start + take]
            .iter()
            .map(|&id| self.tree.entries[id].stat())
            .collect();
        self.tree.entries[dir_id].set_cursor(start + take);
        Ok(batch)
    }

    /// Every indexed entry, breadth first from the root, each exactly once.
    /// Buckets of parents that have no directory record of their own are
    /// walked afterwards in path order. Records shadowed by a later
    /// duplicate are skipped. Pagination cursors are left untouched.
    pub fn walk(&self) -> Result<Vec<FileInfo>> {
        let mut found = Vec::new();
        if self.tree.is_empty() {
            return Ok(found);
        }

        let mut visited = HashSet::new();
        self.walk_from(paths::ROOT, &mut visited, &mut found)?;

        let mut orphans: Vec<&str> = self
            .tree
            .children
            .keys()
            .map(String::as_str)
            .filter(|path| !visited.contains(path))
            .collect();
        orphans.sort_unstable();
        for path in orphans {
            self.walk_from(path, &mut visited, &mut found)?;
        }
        Ok(found)
    }

    fn walk_from<'a>(
        &'a self,
        start: &'a str,
        visited: &mut HashSet<&'a str>,
        found: &mut Vec<FileInfo>,
    ) -> Result<()> {
        let mut pending = DirIndex::new();
        let mut bucket = Some(start);
        while let Some(path) = bucket {
            if visited.insert(path) {
                for &child in self.tree.children(path) {
                    if !self.tree.is_indexed(child) {
                        continue;
                    }
                    let entry = &self.tree.entries[child];
                    if entry.is_dir() {
                        pending.add(child)?;
                    }
                    found.push(entry.stat());
                }
            }
            bucket = pending.pop_front().map(|id| self.tree.entries[id].path());
        }
        Ok(())
    }

    /// Resolve `names`, rejecting any entry named twice.
    fn lookup_unique(&self, names: &[String]) -> Result<Vec<EntryId>> {
        let mut seen = HashSet::new();
        names
            .iter()
            .map(|name| {
                let id = self.lookup(name)?;
                if !seen.insert(id) {
                    return Err(VfsError::InvalidPath(format!("{} listed twice", name)));
                }
                Ok(id)
            })
            .collect()
    }

    /// Open several entries at once, in the order given. Naming the same
    /// entry twice is an error, reported before anything is opened.
    pub fn open_many(&mut self, names: &[String]) -> Result<Vec<&mut Entry>> {
        let ids = self.lookup_unique(names)?;

        if let Some(reader) = self.reader.as_deref_mut() {
            for (&id, name) in ids.iter().zip(names) {
                let entry = &mut self.tree.entries[id];
                if !entry.is_dir() {
                    entry.ensure_open(reader).map_err(|e| {
                        debug!("Failed to open {}: {}", name, e);
                        e
                    })?;
                }
            }
        } else if !ids.is_empty() {
            return Err(VfsError::EntryClosed(names[0].clone()));
        }

        let mut slots: HashMap<EntryId, &mut Entry> = self
            .tree
            .entries
            .iter_mut()
            .enumerate()
            .collect();
        Ok(ids.iter().filter_map(|id| slots.remove(id)).collect())
    }

    /// Read from entry `id`, opening its content first if needed. The
    /// content is released as soon as the stream is exhausted.
    fn read_entry(&mut self, id: EntryId, buf: &mut [u8]) -> io::Result<usize> {
        let entry = &mut self.tree.entries[id];
        if entry.is_dir() {
            return Ok(0);
        }
        if !entry.is_open() {
            let reader = self
                .reader
                .as_deref_mut()
                .ok_or_else(|| VfsError::EntryClosed(entry.path().to_string()))?;
            entry.ensure_open(reader)?;
        }
        let n = entry.read(buf)?;
        if n == 0 && !buf.is_empty() {
            entry.close();
        }
        Ok(n)
    }

    /// Close every open entry stream, then the codec handle. Later calls
    /// are no-ops.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut reader) = self.reader.take() else {
            return Ok(());
        };

        let mut open_streams = 0;
        for entry in &mut self.tree.entries {
            if entry.is_open() {
                open_streams += 1;
            }
            entry.close();
        }
        self.tree = Tree::default();

        debug!(
            "Closing {} archive ({} open streams)",
            reader.name(),
            open_streams
        );
        reader.close()
    }

    /// Drop all state, leaving an empty instance ready for reuse.
    pub fn reset(&mut self) {
        *self = Self::empty();
    }
}

impl DirectoryLister for ArchiveFs {
    fn list(&mut self, path: &str, n: usize) -> Result<Vec<FileInfo>> {
        self.read_dir(path, n)
    }
}

/// An entry handed to an encoder without opening it up front. Content is
/// opened on first read and released once fully read, so only one member is
/// held in memory at a time while converting.
pub struct EntrySource<'a> {
    fs: &'a RefCell<ArchiveFs>,
    info: FileInfo,
    done: bool,
}

impl<'a> EntrySource<'a> {
    /// Sources for `names`, in order. Nothing is opened yet.
    pub fn collect(fs: &'a RefCell<ArchiveFs>, names: &[String]) -> Result<Vec<Self>> {
        let archive = fs.borrow();
        let ids = archive.lookup_unique(names)?;
        Ok(ids
            .into_iter()
            .map(|id| EntrySource {
                fs,
                info: archive.tree.entries[id].stat(),
                done: false,
            })
            .collect())
    }

    pub fn info(&self) -> &FileInfo {
        &self.info
    }
}

impl Read for EntrySource<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.done {
            return Ok(0);
        }
        let n = self.fs.borrow_mut().read_entry(self.info.id, buf)?;
        if n == 0 && !buf.is_empty() {
            self.done = true;
        }
        Ok(n)
    }
}

impl ArchiverFile for EntrySource<'_> {
    fn root(&self) -> &str {
        &self.info.path
    }

    fn is_dir(&self) -> bool {
        self.info.is_dir
    }

    fn size(&self) -> u64 {
        self.info.size
    }

    fn mode(&self) -> u32 {
        self.info.mode
    }

    fn modified(&self) -> Option<DateTime<Utc>> {
        self.info.modified
    }
}

impl Drop for ArchiveFs {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close {} archive: {}", self.format, e);
        }
    }
}
