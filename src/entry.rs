//! Archive members as filesystem entries.
//!
//! An [`Entry`] carries cached metadata plus a content state machine:
//! `Unopened -> Open(stream) -> Closed`. Content is only opened for files,
//! at most once, and closing drops the stream handed out by the codec.

use crate::archive::{ArchiveReader, ArchiverFile};
use crate::error::{Result, VfsError};
use chrono::{DateTime, Utc};
use std::fmt;
use std::io::{self, Read, Write};

/// Identifier of an entry, unique within one open archive.
pub type EntryId = usize;

/// Directory bit in `mode`, matching `S_IFDIR`.
pub const MODE_DIR: u32 = 0o040000;

/// Permission bits (including setuid/setgid/sticky).
pub const MODE_PERM: u32 = 0o7777;

/// Cached metadata of one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub id: EntryId,
    /// Full member path, `"."` for the root
    pub path: String,
    /// Basename for files, full relative path for directories
    pub name: String,
    pub is_dir: bool,
    /// Uncompressed size, 0 for directories
    pub size: u64,
    pub mode: u32,
    pub modified: Option<DateTime<Utc>>,
}

impl FileInfo {
    pub fn permissions(&self) -> u32 {
        self.mode & MODE_PERM
    }
}

enum Content {
    Unopened,
    Open(Box<dyn Read>),
    Closed,
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Unopened => write!(f, "Unopened"),
            Content::Open(_) => write!(f, "Open"),
            Content::Closed => write!(f, "Closed"),
        }
    }
}

#[derive(Debug)]
pub struct Entry {
    info: FileInfo,
    /// Position of the member in the codec's listing; `None` for synthetic dirs.
    member: Option<usize>,
    content: Content,
    /// Number of children already returned by paginated listing.
    cursor: usize,
}

impl Entry {
    pub(crate) fn file(
        id: EntryId,
        path: String,
        size: u64,
        mode: u32,
        modified: Option<DateTime<Utc>>,
    ) -> Self {
        let name = crate::paths::base_name(&path).to_string();
        Self {
            info: FileInfo {
                id,
                path,
                name,
                is_dir: false,
                size,
                mode: mode & !MODE_DIR,
                modified,
            },
            member: Some(id),
            content: Content::Unopened,
            cursor: 0,
        }
    }

    pub(crate) fn directory(
        id: EntryId,
        path: String,
        mode: u32,
        modified: Option<DateTime<Utc>>,
        member: Option<usize>,
    ) -> Self {
        Self {
            info: FileInfo {
                id,
                name: path.clone(),
                path,
                is_dir: true,
                size: 0,
                mode: mode | MODE_DIR,
                modified,
            },
            member,
            content: Content::Unopened,
            cursor: 0,
        }
    }

    pub fn id(&self) -> EntryId {
        self.info.id
    }

    pub fn path(&self) -> &str {
        &self.info.path
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn is_dir(&self) -> bool {
        self.info.is_dir
    }

    pub fn size(&self) -> u64 {
        self.info.size
    }

    pub fn mode(&self) -> u32 {
        self.info.mode
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.info.modified
    }

    pub fn info(&self) -> &FileInfo {
        &self.info
    }

    /// Metadata snapshot; never touches the content stream.
    pub fn stat(&self) -> FileInfo {
        self.info.clone()
    }

    pub fn is_open(&self) -> bool {
        matches!(self.content, Content::Open(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.content, Content::Closed)
    }

    /// Open the content stream on first use. Directories are never opened.
    pub(crate) fn ensure_open(&mut self, reader: &mut dyn ArchiveReader) -> Result<()> {
        if self.info.is_dir {
            return Ok(());
        }
        match self.content {
            Content::Open(_) => Ok(()),
            Content::Closed => Err(VfsError::EntryClosed(self.info.path.clone())),
            Content::Unopened => {
                let member = self
                    .member
                    .ok_or_else(|| VfsError::NotFound(self.info.path.clone()))?;
                match reader.open_stream(member) {
                    Ok(stream) => {
                        self.content = Content::Open(stream);
                        Ok(())
                    }
                    Err(e) => {
                        self.content = Content::Closed;
                        Err(e)
                    }
                }
            }
        }
    }

    /// Release the content stream. Closing twice is a no-op.
    pub fn close(&mut self) {
        if !self.info.is_dir {
            self.content = Content::Closed;
        }
    }

    pub(crate) fn cursor(&self) -> usize {
        self.cursor
    }

    pub(crate) fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor;
    }
}

impl Read for Entry {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let result = match &mut self.content {
            Content::Open(stream) => stream.read(buf),
            _ if self.info.is_dir => {
                return Err(VfsError::UnsupportedOperation("read on a directory").into())
            }
            Content::Unopened => {
                return Err(VfsError::UnsupportedOperation("read before open").into())
            }
            Content::Closed => return Err(VfsError::EntryClosed(self.info.path.clone()).into()),
        };
        if result.is_err() {
            // A failed codec stream cannot be resumed.
            self.content = Content::Closed;
        }
        result
    }
}

impl Write for Entry {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(VfsError::UnsupportedOperation("write").into())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ArchiverFile for Entry {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::RawEntry;
    use std::io::Cursor;

    struct OneFile {
        raw: Vec<RawEntry>,
        opens: usize,
        fail: bool,
    }

    impl ArchiveReader for OneFile {
        fn name(&self) -> &'static str {
            "test"
        }

        fn entries(&self) -> &[RawEntry] {
            &self.raw
        }

        fn open_stream(&mut self, _index: usize) -> Result<Box<dyn Read>> {
            self.opens += 1;
            if self.fail {
                return Err(VfsError::codec("test", "corrupt stream"));
            }
            Ok(Box::new(Cursor::new(b"abc".to_vec())))
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn reader(fail: bool) -> OneFile {
        OneFile {
            raw: Vec::new(),
            opens: 0,
            fail,
        }
    }

    #[test]
    fn test_file_lifecycle() {
        let mut source = reader(false);
        let mut entry = Entry::file(0, "a/b.txt".into(), 3, 0o644, None);
        assert_eq!(entry.name(), "b.txt");
        assert!(!entry.is_open());

        entry.ensure_open(&mut source).unwrap();
        entry.ensure_open(&mut source).unwrap();
        assert_eq!(source.opens, 1);

        let mut data = String::new();
        entry.read_to_string(&mut data).unwrap();
        assert_eq!(data, "abc");

        entry.close();
        entry.close();
        assert!(entry.is_closed());
        assert!(entry.read(&mut [0u8; 4]).is_err());
        assert!(matches!(
            entry.ensure_open(&mut source),
            Err(VfsError::EntryClosed(_))
        ));
    }

    #[test]
    fn test_failed_open_leaves_entry_unusable() {
        let mut source = reader(true);
        let mut entry = Entry::file(0, "x.bin".into(), 10, 0o644, None);
        assert!(entry.ensure_open(&mut source).is_err());
        assert!(entry.is_closed());
    }

    #[test]
    fn test_directory_is_never_opened() {
        let mut source = reader(false);
        let mut dir = Entry::directory(1, "a/b".into(), 0o755, None, Some(1));
        dir.ensure_open(&mut source).unwrap();
        assert_eq!(source.opens, 0);
        assert_eq!(dir.name(), "a/b");
        assert_eq!(dir.mode() & MODE_DIR, MODE_DIR);
        assert_eq!(dir.size(), 0);

        let err = dir.read(&mut [0u8; 1]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[test]
    fn test_write_is_unsupported() {
        let mut entry = Entry::file(0, "c.txt".into(), 0, 0o644, None);
        let err = entry.write(b"nope").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }
}
