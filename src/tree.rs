//! Builds a navigable directory tree from a codec's flat member listing.
//!
//! One linear pass assigns each member the next sequential id. File members
//! are filed under their parent directory; directory members are filed under
//! the root bucket, mirroring how codecs enumerate them. Child buffers are
//! created on first use, so a directory record may arrive before or after
//! the files it contains. A synthetic root entry with id `member_count`
//! closes the pass.

use crate::archive::{host_mode, RawEntry};
use crate::dir_index::DirIndex;
use crate::entry::{Entry, EntryId};
use crate::error::Result;
use crate::paths::{self, ROOT};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Where directory records are filed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryLayout {
    /// Every directory record is a child of the root, whatever its depth.
    #[default]
    RootBucket,
    /// Directory records are filed under their parent directory.
    Nested,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeOptions {
    pub layout: DirectoryLayout,
    /// Create directory entries for parents that only appear in member paths.
    pub implicit_dirs: bool,
}

/// Metadata of the container file, used for the synthetic root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootInfo {
    pub mode: u32,
    pub modified: Option<DateTime<Utc>>,
}

impl RootInfo {
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        Self {
            mode: host_mode(meta),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
        }
    }
}

impl Default for RootInfo {
    fn default() -> Self {
        Self {
            mode: 0o755,
            modified: None,
        }
    }
}

/// Indices produced by [`TreeBuilder::build`].
#[derive(Debug, Default)]
pub struct Tree {
    /// Indexed by id
    pub(crate) entries: Vec<Entry>,
    pub(crate) dirs: HashMap<String, EntryId>,
    pub(crate) files: HashMap<String, EntryId>,
    /// Directory path -> ids of its children, in encounter order
    pub(crate) children: HashMap<String, DirIndex>,
    pub(crate) root: EntryId,
}

impl Tree {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn root(&self) -> EntryId {
        self.root
    }

    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        self.entries.get(id)
    }

    pub fn dir_id(&self, path: &str) -> Option<EntryId> {
        self.dirs.get(path).copied()
    }

    pub fn file_id(&self, path: &str) -> Option<EntryId> {
        self.files.get(path).copied()
    }

    /// Child ids of the directory at `path`, empty if it has none.
    pub fn children(&self, path: &str) -> &[EntryId] {
        self.children
            .get(path)
            .map(|index| index.entries())
            .unwrap_or(&[])
    }

    /// Whether `id` is the entry its path resolves to. False for records
    /// shadowed by a later duplicate and for ignored root records.
    pub fn is_indexed(&self, id: EntryId) -> bool {
        let Some(entry) = self.entries.get(id) else {
            return false;
        };
        let map = if entry.is_dir() { &self.dirs } else { &self.files };
        map.get(entry.path()) == Some(&id)
    }

    fn child_index(&mut self, path: &str) -> &mut DirIndex {
        self.children.entry(path.to_string()).or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TreeBuilder {
    root: RootInfo,
    options: TreeOptions,
}

impl TreeBuilder {
    pub fn new(root: RootInfo) -> Self {
        Self {
            root,
            options: TreeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TreeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(&self, members: &[RawEntry]) -> Result<Tree> {
        let count = members.len();
        let mut tree = Tree {
            entries: Vec::with_capacity(count + 1),
            root: count,
            ..Tree::default()
        };
        tree.children.insert(ROOT.to_string(), DirIndex::new());

        for (id, member) in members.iter().enumerate() {
            if member.is_dir {
                let name = paths::trim_dir_name(&member.path);
                if name == ROOT {
                    // "./" or "/" records describe the root itself. The id
                    // keeps a slot under a path no lookup can resolve.
                    debug!("Ignoring root directory record #{}", id);
                    tree.entries.push(Entry::directory(
                        id,
                        String::new(),
                        member.mode,
                        member.modified,
                        Some(id),
                    ));
                    continue;
                }
                tree.entries.push(Entry::directory(
                    id,
                    name.to_string(),
                    member.mode,
                    member.modified,
                    Some(id),
                ));
                if tree.dirs.insert(name.to_string(), id).is_some() {
                    debug!("Duplicate directory record {}, keeping #{}", name, id);
                }
                let bucket = match self.options.layout {
                    DirectoryLayout::RootBucket => {
                        if name.contains('/') {
                            trace!("Filing nested directory {} under the root", name);
                        }
                        ROOT
                    }
                    DirectoryLayout::Nested => paths::parent_dir(name),
                };
                tree.child_index(bucket).add(id)?;
            } else {
                let name = member.path.clone();
                let parent = paths::parent_dir(&name).to_string();
                if tree.files.insert(name.clone(), id).is_some() {
                    debug!("Duplicate file record {}, keeping #{}", name, id);
                }
                tree.child_index(&parent).add(id)?;
                tree.entries.push(Entry::file(
                    id,
                    name,
                    member.size,
                    member.mode,
                    member.modified,
                ));
            }
        }

        tree.dirs.insert(ROOT.to_string(), count);
        tree.entries.push(Entry::directory(
            count,
            ROOT.to_string(),
            self.root.mode,
            self.root.modified,
            None,
        ));

        if self.options.implicit_dirs {
            self.add_implicit_dirs(&mut tree)?;
        }

        debug!(
            "Indexed {} members ({} directories, {} files)",
            count,
            tree.dirs.len() - 1,
            tree.files.len()
        );
        Ok(tree)
    }

    /// Synthesize directory entries for parents that have children but no
    /// record of their own. With the nested layout their ancestors are
    /// created too so every directory is reachable from the root.
    fn add_implicit_dirs(&self, tree: &mut Tree) -> Result<()> {
        let mut missing: Vec<String> = tree
            .children
            .keys()
            .filter(|path| !tree.dirs.contains_key(path.as_str()))
            .cloned()
            .collect();
        missing.sort();

        for path in missing {
            let mut chain = vec![path.as_str()];
            if self.options.layout == DirectoryLayout::Nested {
                let mut parent = paths::parent_dir(&path);
                while parent != ROOT {
                    chain.push(parent);
                    parent = paths::parent_dir(parent);
                }
            }

            for dir in chain.into_iter().rev() {
                if tree.dirs.contains_key(dir) {
                    continue;
                }
                let id = tree.entries.len();
                trace!("Synthesizing directory {} as #{}", dir, id);
                tree.entries.push(Entry::directory(
                    id,
                    dir.to_string(),
                    self.root.mode,
                    self.root.modified,
                    None,
                ));
                tree.dirs.insert(dir.to_string(), id);
                let bucket = match self.options.layout {
                    DirectoryLayout::RootBucket => ROOT,
                    DirectoryLayout::Nested => paths::parent_dir(dir),
                };
                tree.child_index(bucket).add(id)?;
            }
        }
        Ok(())
    }
}
