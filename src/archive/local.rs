//! Files on the host filesystem as encoder input.

use super::{host_mode, ArchiverFile};
use crate::error::Result;
use crate::paths;
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A file or directory on disk, opened lazily on first read.
#[derive(Debug)]
pub struct LocalFile {
    root: String,
    path: PathBuf,
    is_dir: bool,
    size: u64,
    mode: u32,
    modified: Option<DateTime<Utc>>,
    file: Option<File>,
}

impl LocalFile {
    /// Describe `path`, storing it under `root` in the archive.
    pub fn new(path: &Path, root: &str) -> Result<Self> {
        let meta = fs::metadata(path)?;
        let is_dir = meta.is_dir();
        Ok(Self {
            root: paths::to_member_path(root),
            path: path.to_path_buf(),
            is_dir,
            size: if is_dir { 0 } else { meta.len() },
            mode: host_mode(&meta),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            file: None,
        })
    }

    /// Every file and directory below `dir`, in sorted walk order, rooted
    /// relative to `dir`.
    pub fn collect(dir: &Path) -> Result<Vec<LocalFile>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
            let root = relative.to_string_lossy();
            files.push(LocalFile::new(entry.path(), &root)?);
        }
        Ok(files)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Read for LocalFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.is_dir {
            return Ok(0);
        }
        if self.file.is_none() {
            self.file = Some(File::open(&self.path)?);
        }
        match self.file.as_mut() {
            Some(file) => file.read(buf),
            None => Ok(0),
        }
    }
}

impl ArchiverFile for LocalFile {
    fn root(&self) -> &str {
        &self.root
    }

    fn is_dir(&self) -> bool {
        self.is_dir
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn mode(&self) -> u32 {
        self.mode
    }

    fn modified(&self) -> Option<DateTime<Utc>> {
        self.modified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    #[test]
    fn test_collect_sorted_relative_roots() -> Result<()> {
        let dir = tempdir()?;
        fs::create_dir_all(dir.path().join("b/nested"))?;
        fs::write(dir.path().join("a.txt"), b"hello")?;
        fs::write(dir.path().join("b/nested/c.bin"), b"\x00\x01")?;

        let files = LocalFile::collect(dir.path())?;
        let roots: Vec<&str> = files.iter().map(|f| f.root()).collect();
        assert_eq!(roots, vec!["a.txt", "b", "b/nested", "b/nested/c.bin"]);

        assert!(!files[0].is_dir());
        assert_eq!(files[0].size(), 5);
        assert!(files[1].is_dir());
        assert_eq!(files[1].size(), 0);
        Ok(())
    }

    #[test]
    fn test_read_opens_lazily() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("data.txt");
        fs::write(&path, b"payload")?;

        let mut file = LocalFile::new(&path, "data.txt")?;
        assert!(file.file.is_none());

        let mut data = String::new();
        file.read_to_string(&mut data)?;
        assert_eq!(data, "payload");
        assert!(file.file.is_some());
        Ok(())
    }
}
