//! RAR support via the unrar crate (FFI to the unrar library).
//!
//! unrar only walks an archive forward, header by header. The listing pass
//! records members in order. Opening a member continues from the processing
//! cursor left by the previous open when it is still ahead of the member,
//! and reopens the archive otherwise, so reading members in archive order
//! decompresses the archive once.

use super::{default_mode, dos_datetime, windows_attr_mode, ArchiveReader, Decoder, RawEntry};
use crate::entry::MODE_PERM;
use crate::error::{Result, VfsError};
use crate::paths;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use tracing::debug;
use unrar::{Archive, CursorBeforeHeader, OpenArchive, Process};

pub const RAR_NAME: &str = "rar";

/// File type bits of a Unix `st_mode`.
const UNIX_FILE_TYPE: u32 = 0o170000;

/// Opens `.rar` containers (RAR4 and RAR5).
#[derive(Debug, Clone, Copy, Default)]
pub struct RarDecoder;

impl RarDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for RarDecoder {
    fn name(&self) -> &'static str {
        RAR_NAME
    }

    fn open(&self, path: &Path, password: Option<&str>) -> Result<Box<dyn ArchiveReader>> {
        let listing = archive(path, password)
            .open_for_listing()
            .map_err(rar_error)?;

        let mut entries = Vec::new();
        for header in listing {
            let header = header.map_err(rar_error)?;
            let is_dir = header.is_directory();
            let name = header.filename.to_string_lossy();

            entries.push(RawEntry {
                path: paths::to_member_path(&name),
                is_dir,
                size: if is_dir { 0 } else { header.unpacked_size },
                mode: attributes_to_mode(header.file_attr, is_dir),
                modified: dos_datetime(header.file_time),
            });
        }

        debug!("Listed {} members in RAR {}", entries.len(), path.display());
        Ok(Box::new(RarReader {
            path: Some(path.to_path_buf()),
            password: password.map(str::to_owned),
            entries,
            cursor: None,
        }))
    }
}

fn archive<'a>(path: &'a Path, password: Option<&'a str>) -> Archive<'a> {
    match password {
        Some(password) => Archive::with_password(path, password),
        None => Archive::new(path),
    }
}

struct RarReader {
    /// `None` once closed
    path: Option<PathBuf>,
    password: Option<String>,
    entries: Vec<RawEntry>,
    /// Processing cursor positioned before the member at `.0`
    cursor: Option<(usize, OpenArchive<Process, CursorBeforeHeader>)>,
}

impl ArchiveReader for RarReader {
    fn name(&self) -> &'static str {
        RAR_NAME
    }

    fn entries(&self) -> &[RawEntry] {
        &self.entries
    }

    fn open_stream(&mut self, index: usize) -> Result<Box<dyn Read>> {
        let member = self
            .entries
            .get(index)
            .map(|e| e.path.clone())
            .ok_or_else(|| VfsError::NotFound(format!("rar member #{}", index)))?;
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| VfsError::EntryClosed(member.clone()))?;

        let (mut position, mut cursor) = match self.cursor.take() {
            Some((position, cursor)) if position <= index => (position, cursor),
            _ => {
                debug!("Reopening RAR to reach member #{}", index);
                let cursor = archive(path, self.password.as_deref())
                    .open_for_processing()
                    .map_err(rar_error)?;
                (0, cursor)
            }
        };
        while let Some(header) = cursor.read_header().map_err(rar_error)? {
            if position == index {
                let (data, next) = header.read().map_err(rar_error)?;
                self.cursor = Some((position + 1, next));
                return Ok(Box::new(Cursor::new(data)));
            }
            cursor = header.skip().map_err(rar_error)?;
            position += 1;
        }

        Err(VfsError::NotFound(member))
    }

    fn close(&mut self) -> Result<()> {
        self.path = None;
        self.cursor = None;
        Ok(())
    }
}

fn attributes_to_mode(attributes: u32, is_dir: bool) -> u32 {
    // Archives created on Unix carry st_mode instead of DOS attributes.
    if attributes & UNIX_FILE_TYPE != 0 {
        let mode = attributes & MODE_PERM;
        if mode != 0 {
            return mode;
        }
        return default_mode(is_dir);
    }
    windows_attr_mode(attributes, is_dir)
}

fn rar_error(err: unrar::error::UnrarError) -> VfsError {
    VfsError::codec(RAR_NAME, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    #[test]
    fn test_attributes_to_mode() {
        assert_eq!(attributes_to_mode(0o100750, false), 0o750);
        assert_eq!(attributes_to_mode(0o040700, true), 0o700);
        assert_eq!(attributes_to_mode(0x20, false), 0o644);
        assert_eq!(attributes_to_mode(0x21, false), 0o444);
        assert_eq!(attributes_to_mode(0x10, true), 0o755);
    }

    #[test]
    fn test_not_a_rar() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("fake.rar");
        std::fs::write(&path, b"Rar? no, just bytes")?;

        assert!(RarDecoder::new().open(&path, None).is_err());
        Ok(())
    }
}
