//! Error types for the archive filesystem.
//!
//! Callers can tell "not an archive we know" (`UnknownArchiveFormat`) apart
//! from "archive opened but the path is absent" (`NotFound`) and from
//! "the path itself is malformed" (`InvalidPath`).

use std::io;

pub type Result<T> = std::result::Result<T, VfsError>;

/// Boxed codec error as surfaced by the zip/7z/rar crates.
pub type CodecSource = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum VfsError {
    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    #[error("no such file or directory: {0}")]
    NotFound(String),

    /// No more directory entries remain for this listing.
    #[error("end of directory listing: {0}")]
    EndOfListing(String),

    #[error("operation not supported: {0}")]
    UnsupportedOperation(&'static str),

    #[error("entry already closed: {0}")]
    EntryClosed(String),

    #[error("unknown archive format: {0}")]
    UnknownArchiveFormat(String),

    #[error("unknown encoder: {0}")]
    UnknownEncoder(String),

    /// Directory index growth would overflow addressable memory.
    #[error("directory index too large")]
    CapacityExceeded,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("{codec} error: {source}")]
    Codec {
        codec: &'static str,
        #[source]
        source: CodecSource,
    },
}

impl VfsError {
    /// Wrap an error raised by one of the archive crates.
    pub fn codec(codec: &'static str, source: impl Into<CodecSource>) -> Self {
        VfsError::Codec {
            codec,
            source: source.into(),
        }
    }

    /// True for a listing that simply ran out of entries.
    pub fn is_end_of_listing(&self) -> bool {
        matches!(self, VfsError::EndOfListing(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, VfsError::NotFound(_))
    }
}

impl From<VfsError> for io::Error {
    fn from(err: VfsError) -> Self {
        match err {
            VfsError::Io(e) => e,
            VfsError::NotFound(_) => io::Error::new(io::ErrorKind::NotFound, err),
            VfsError::InvalidPath(_) => io::Error::new(io::ErrorKind::InvalidInput, err),
            VfsError::UnsupportedOperation(_) => io::Error::new(io::ErrorKind::Unsupported, err),
            VfsError::CapacityExceeded => io::Error::new(io::ErrorKind::OutOfMemory, err),
            other => io::Error::other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_conversion_keeps_kind() {
        let err: io::Error = VfsError::NotFound("a/b.txt".into()).into();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        let err: io::Error = VfsError::UnsupportedOperation("write").into();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);

        let inner = io::Error::new(io::ErrorKind::UnexpectedEof, "short read");
        let err: io::Error = VfsError::Io(inner).into();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_codec_error_display() {
        let err = VfsError::codec("zip", "bad central directory");
        assert_eq!(err.to_string(), "zip error: bad central directory");
    }
}
