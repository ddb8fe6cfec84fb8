//! 7z support via sevenz-rust2.
//!
//! Solid 7z archives compress many members as one stream, so a member can
//! only be reached by decoding its block. Member content is therefore read
//! into memory when first opened rather than streamed.
//!
//! Mode bits come from the Windows attribute word: archives written on Unix
//! set `FILE_ATTRIBUTE_UNIX_EXTENSION` (0x8000) and keep `st_mode` in the
//! high 16 bits.

use super::{default_mode, filetime_datetime, windows_attr_mode, ArchiveReader, Decoder, RawEntry};
use crate::entry::MODE_PERM;
use crate::error::{Result, VfsError};
use crate::paths;
use sevenz_rust2::Password;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::debug;

pub const SEVENZIP_NAME: &str = "7zip";

const FILE_ATTRIBUTE_UNIX_EXTENSION: u32 = 0x8000;

/// Opens `.7z` containers, including encrypted ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct SevenZipDecoder;

impl SevenZipDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for SevenZipDecoder {
    fn name(&self) -> &'static str {
        SEVENZIP_NAME
    }

    fn open(&self, path: &Path, password: Option<&str>) -> Result<Box<dyn ArchiveReader>> {
        let password = password.map(Password::from).unwrap_or_else(Password::empty);
        let reader = sevenz_rust2::ArchiveReader::open(path, password).map_err(sevenz_error)?;

        let mut names = Vec::new();
        let mut entries = Vec::new();
        for member in &reader.archive().files {
            let mode = if member.has_windows_attributes {
                attributes_to_mode(member.windows_attributes, member.is_directory)
            } else {
                default_mode(member.is_directory)
            };
            let modified = if member.has_last_modified_date {
                filetime_datetime(u64::from(member.last_modified_date))
            } else {
                None
            };

            names.push(member.name.clone());
            entries.push(RawEntry {
                path: paths::to_member_path(&member.name),
                is_dir: member.is_directory,
                size: if member.is_directory { 0 } else { member.size },
                mode,
                modified,
            });
        }

        debug!("Listed {} members in 7z {}", entries.len(), path.display());
        Ok(Box::new(SevenZipReader {
            reader: Some(reader),
            names,
            entries,
        }))
    }
}

struct SevenZipReader {
    reader: Option<sevenz_rust2::ArchiveReader<File>>,
    /// Member names exactly as stored, used for lookups in the codec
    names: Vec<String>,
    entries: Vec<RawEntry>,
}

impl ArchiveReader for SevenZipReader {
    fn name(&self) -> &'static str {
        SEVENZIP_NAME
    }

    fn entries(&self) -> &[RawEntry] {
        &self.entries
    }

    fn open_stream(&mut self, index: usize) -> Result<Box<dyn Read>> {
        let name = self
            .names
            .get(index)
            .ok_or_else(|| VfsError::NotFound(format!("7z member #{}", index)))?;
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| VfsError::EntryClosed(name.clone()))?;

        let data = reader.read_file(name).map_err(sevenz_error)?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn close(&mut self) -> Result<()> {
        self.reader = None;
        Ok(())
    }
}

fn attributes_to_mode(attributes: u32, is_dir: bool) -> u32 {
    if attributes & FILE_ATTRIBUTE_UNIX_EXTENSION != 0 {
        let mode = (attributes >> 16) & MODE_PERM;
        if mode != 0 {
            return mode;
        }
    }
    windows_attr_mode(attributes, is_dir)
}

fn sevenz_error(err: sevenz_rust2::Error) -> VfsError {
    VfsError::codec(SEVENZIP_NAME, err.to_string())
}
