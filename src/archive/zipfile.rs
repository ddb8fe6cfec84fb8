//! ZIP support via the zip crate.
//!
//! Reading lists members with `by_index_raw` (no decryption needed for
//! metadata) and decrypts lazily when a member's content is opened.
//! Writing stores directories and already-compressed extensions as-is and
//! deflates everything else.

use super::{default_mode, ArchiveReader, ArchiverFile, Decoder, Encoder, RawEntry, WriteSeek};
use crate::entry::MODE_PERM;
use crate::error::{Result, VfsError};
use crate::paths;
use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use encoding_rs::Encoding;
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};
use std::path::Path;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const ZIP_NAME: &str = "zip";

/// Opens `.zip` containers.
#[derive(Debug, Clone, Default)]
pub struct ZipDecoder {
    /// Tried in order for member names that are not valid UTF-8
    encodings: Vec<&'static Encoding>,
    /// Fall back to the zip crate's CP437 decoding instead of failing
    skip_encoding_errors: bool,
}

impl ZipDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_encodings(mut self, encodings: Vec<&'static Encoding>, skip_errors: bool) -> Self {
        self.encodings = encodings;
        self.skip_encoding_errors = skip_errors;
        self
    }

    /// Member name as UTF-8, transcoding legacy code pages when configured.
    fn decode_name(&self, raw: &[u8], fallback: &str) -> Result<String> {
        if let Ok(name) = std::str::from_utf8(raw) {
            return Ok(name.to_string());
        }
        if self.encodings.is_empty() {
            return Ok(fallback.to_string());
        }
        for encoding in &self.encodings {
            if let Some(name) = encoding.decode_without_bom_handling_and_without_replacement(raw) {
                return Ok(name.into_owned());
            }
        }
        if self.skip_encoding_errors {
            debug!("No configured encoding decodes {:?}, keeping {}", raw, fallback);
            Ok(fallback.to_string())
        } else {
            Err(VfsError::codec(
                ZIP_NAME,
                format!("member name {:?} is not valid in any configured encoding", fallback),
            ))
        }
    }
}

impl Decoder for ZipDecoder {
    fn name(&self) -> &'static str {
        ZIP_NAME
    }

    fn open(&self, path: &Path, password: Option<&str>) -> Result<Box<dyn ArchiveReader>> {
        let file = File::open(path)?;
        let mut archive = ZipArchive::new(BufReader::new(file)).map_err(zip_error)?;

        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let member = archive.by_index_raw(i).map_err(zip_error)?;
            let name = self.decode_name(member.name_raw(), member.name())?;
            let is_dir = member.is_dir();
            let mode = member
                .unix_mode()
                .map(|mode| mode & MODE_PERM)
                .filter(|mode| *mode != 0)
                .unwrap_or_else(|| default_mode(is_dir));

            entries.push(RawEntry {
                path: paths::to_member_path(&name),
                is_dir,
                size: if is_dir { 0 } else { member.size() },
                mode,
                modified: member.last_modified().and_then(zip_to_datetime),
            });
        }

        debug!("Listed {} members in ZIP {}", entries.len(), path.display());
        Ok(Box::new(ZipReader {
            archive: Some(archive),
            password: password.map(str::to_owned),
            entries,
        }))
    }
}

struct ZipReader {
    archive: Option<ZipArchive<BufReader<File>>>,
    password: Option<String>,
    entries: Vec<RawEntry>,
}

impl ArchiveReader for ZipReader {
    fn name(&self) -> &'static str {
        ZIP_NAME
    }

    fn entries(&self) -> &[RawEntry] {
        &self.entries
    }

    fn open_stream(&mut self, index: usize) -> Result<Box<dyn Read>> {
        let archive = self.archive.as_mut().ok_or_else(|| {
            VfsError::EntryClosed(
                self.entries
                    .get(index)
                    .map(|e| e.path.clone())
                    .unwrap_or_default(),
            )
        })?;

        let mut member = match &self.password {
            Some(password) => archive.by_index_decrypt(index, password.as_bytes()),
            None => archive.by_index(index),
        }
        .map_err(zip_error)?;

        // ZipFile borrows the archive, so the member is decoded up front.
        // The declared size is not trusted for preallocation.
        let mut data = Vec::new();
        member.read_to_end(&mut data)?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn close(&mut self) -> Result<()> {
        self.archive = None;
        Ok(())
    }
}

/// Writes `.zip` containers.
#[derive(Debug, Clone, Default)]
pub struct ZipEncoder {
    extensions: HashSet<String>,
}

impl ZipEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn method_for(&self, root: &str) -> CompressionMethod {
        match paths::extension(root) {
            Some(ext) if self.extensions.contains(&ext) => CompressionMethod::Stored,
            _ => CompressionMethod::Deflated,
        }
    }
}

impl Encoder for ZipEncoder {
    fn name(&self) -> &'static str {
        ZIP_NAME
    }

    fn set_compressed_ext(&mut self, extensions: HashSet<String>) {
        self.extensions = extensions;
    }

    fn create(&self, sink: &mut dyn WriteSeek, entries: &mut [&mut dyn ArchiverFile]) -> Result<()> {
        let mut zip = ZipWriter::new(sink);

        for (i, entry) in entries.iter_mut().enumerate() {
            let root = paths::to_member_path(entry.root());
            let mut options = SimpleFileOptions::default().unix_permissions(entry.mode() & MODE_PERM);
            if let Some(modified) = entry.modified().and_then(datetime_to_zip) {
                options = options.last_modified_time(modified);
            }

            if entry.is_dir() {
                let name = if root.ends_with('/') {
                    root
                } else {
                    format!("{}/", root)
                };
                zip.add_directory(name.as_str(), options.compression_method(CompressionMethod::Stored))
                    .map_err(|e| entry_error(i, &name, e))?;
                continue;
            }

            zip.start_file(root.as_str(), options.compression_method(self.method_for(&root)))
                .map_err(|e| entry_error(i, &root, e))?;
            let written = io::copy(&mut **entry, &mut zip).map_err(|e| entry_error(i, &root, e))?;
            if written != entry.size() {
                warn!(
                    "Wrote {} bytes for {} but its size is {}",
                    written,
                    root,
                    entry.size()
                );
            }
        }

        zip.finish().map_err(zip_error)?;
        debug!("Wrote {} entries to ZIP", entries.len());
        Ok(())
    }
}

fn zip_error(err: zip::result::ZipError) -> VfsError {
    VfsError::codec(ZIP_NAME, err)
}

fn entry_error(position: usize, name: &str, err: impl std::fmt::Display) -> VfsError {
    VfsError::codec(ZIP_NAME, format!("writing entry [{}] {}: {}", position, name, err))
}

fn zip_to_datetime(dt: zip::DateTime) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(i32::from(dt.year()), u32::from(dt.month()), u32::from(dt.day()))?
        .and_hms_opt(
            u32::from(dt.hour()),
            u32::from(dt.minute()),
            u32::from(dt.second()),
        )
        .map(|naive| naive.and_utc())
}

fn datetime_to_zip(dt: DateTime<Utc>) -> Option<zip::DateTime> {
    zip::DateTime::from_date_and_time(
        u16::try_from(dt.year()).ok()?,
        dt.month() as u8,
        dt.day() as u8,
        dt.hour() as u8,
        dt.minute() as u8,
        dt.second() as u8,
    )
    .ok()
}
