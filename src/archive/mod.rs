//! Archive codec adapters.
//!
//! Wraps the native Rust crates for ZIP (zip crate), 7z (sevenz-rust2) and
//! RAR (unrar) behind one contract: a [`Decoder`] opens a container and hands
//! back an [`ArchiveReader`] that lists members in a single deterministic
//! pass and opens member streams by position. Encoders go the other way and
//! serialize [`ArchiverFile`]s into a container.

pub mod local;
pub mod rarfile;
pub mod sevenzip;
pub mod zipfile;

pub use local::LocalFile;
pub use rarfile::RarDecoder;
pub use sevenzip::SevenZipDecoder;
pub use zipfile::{ZipDecoder, ZipEncoder};

use crate::entry::MODE_PERM;
use crate::error::Result;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashSet;
use std::io::{Read, Seek, Write};
use std::path::Path;

/// One member as listed by a codec, before any tree building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    /// Slash separated member path; directories may keep a trailing `/`
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub mode: u32,
    pub modified: Option<DateTime<Utc>>,
}

/// An opened container: the member listing plus lazy stream access.
pub trait ArchiveReader {
    /// Format name of the codec that produced this reader.
    fn name(&self) -> &'static str;

    /// Members in container order. Position in this slice is the member index.
    fn entries(&self) -> &[RawEntry];

    /// Open the content of the member at `index`.
    fn open_stream(&mut self, index: usize) -> Result<Box<dyn Read>>;

    /// Release codec resources. Later `open_stream` calls fail.
    fn close(&mut self) -> Result<()>;
}

/// Format probe: parses a container or fails.
pub trait Decoder {
    fn name(&self) -> &'static str;

    fn open(&self, path: &Path, password: Option<&str>) -> Result<Box<dyn ArchiveReader>>;
}

/// Byte sink an encoder can write a container into.
pub trait WriteSeek: Write + Seek {}

impl<T: Write + Seek + ?Sized> WriteSeek for T {}

/// Something an encoder can store as a container member.
pub trait ArchiverFile: Read {
    /// Path the member is stored under
    fn root(&self) -> &str;
    fn is_dir(&self) -> bool;
    fn size(&self) -> u64;
    fn mode(&self) -> u32;
    fn modified(&self) -> Option<DateTime<Utc>>;
}

pub trait Encoder {
    fn name(&self) -> &'static str;

    /// Extensions (lowercase, no dot) stored without compression.
    fn set_compressed_ext(&mut self, extensions: HashSet<String>);

    fn create(&self, sink: &mut dyn WriteSeek, entries: &mut [&mut dyn ArchiverFile]) -> Result<()>;
}

/// Permissions used when a codec carries no usable mode.
pub(crate) fn default_mode(is_dir: bool) -> u32 {
    if is_dir {
        0o755
    } else {
        0o644
    }
}

/// Permission bits derived from DOS/Windows attributes.
/// Read-only (0x01) drops the write bits.
pub(crate) fn windows_attr_mode(attributes: u32, is_dir: bool) -> u32 {
    const FILE_ATTRIBUTE_READONLY: u32 = 0x01;
    let mode = default_mode(is_dir);
    if attributes & FILE_ATTRIBUTE_READONLY != 0 {
        mode & !0o222
    } else {
        mode
    }
}

/// Permission bits of a file on the host filesystem.
pub(crate) fn host_mode(meta: &std::fs::Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & MODE_PERM
    }
    #[cfg(not(unix))]
    {
        let mode = default_mode(meta.is_dir());
        if meta.permissions().readonly() {
            mode & !0o222
        } else {
            mode
        }
    }
}

/// Decode a packed MS-DOS date/time (date in the high word).
pub(crate) fn dos_datetime(packed: u32) -> Option<DateTime<Utc>> {
    let date = packed >> 16;
    let time = packed & 0xFFFF;
    let year = ((date >> 9) & 0x7F) as i32 + 1980;
    let month = (date >> 5) & 0x0F;
    let day = date & 0x1F;
    let hour = (time >> 11) & 0x1F;
    let minute = (time >> 5) & 0x3F;
    let second = (time & 0x1F) * 2;
    NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_opt(hour, minute, second)
        .map(|naive| naive.and_utc())
}

/// Windows FILETIME ticks between 1601-01-01 and the Unix epoch.
const FILETIME_UNIX_EPOCH: u64 = 116_444_736_000_000_000;

/// Convert 100ns ticks since 1601-01-01 into a UTC timestamp.
pub(crate) fn filetime_datetime(ticks: u64) -> Option<DateTime<Utc>> {
    let since_epoch = ticks.checked_sub(FILETIME_UNIX_EPOCH)?;
    let secs = i64::try_from(since_epoch / 10_000_000).ok()?;
    let nanos = ((since_epoch % 10_000_000) * 100) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos)
}
