//! User configuration
//!
//! Loaded from `<config dir>/arcvfs/config.json` when present. Every field has
//! a default, so a partial file is fine.

use crate::paths;
use crate::tree::{DirectoryLayout, TreeOptions};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Extensions that gain nothing from a second compression pass.
const DEFAULT_COMPRESSED_EXTENSIONS: &[&str] = &[
    "7z", "aac", "avi", "br", "bz2", "docx", "flac", "gif", "gz", "jar", "jpeg", "jpg", "lz4",
    "lzma", "m4a", "mkv", "mov", "mp3", "mp4", "ogg", "opus", "png", "rar", "webm", "webp", "xlsx",
    "xz", "zip", "zst",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Password for encrypted archives
    pub password: Option<String>,

    /// encoding_rs labels tried in order for zip names that are not UTF-8
    pub filename_encodings: Vec<String>,

    /// Fall back to lossy names instead of failing when no encoding fits
    pub skip_encoding_errors: bool,

    pub directory_layout: DirectoryLayout,

    /// Synthesize directories that only appear as parents of members
    pub implicit_dirs: bool,

    /// Stored instead of deflated when writing zip files
    pub compressed_extensions: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            password: None,
            filename_encodings: Vec::new(),
            skip_encoding_errors: true,
            directory_layout: DirectoryLayout::default(),
            implicit_dirs: false,
            compressed_extensions: DEFAULT_COMPRESSED_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

impl Config {
    /// `<config dir>/arcvfs/config.json`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(dir.join("arcvfs").join("config.json"))
    }

    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load the default config file, or defaults if there is none.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = match Self::default_path() {
            Ok(path) => path,
            Err(_) => return Ok(Self::default()),
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.encodings()?;
        for ext in &self.compressed_extensions {
            let trimmed = ext.trim_start_matches('.');
            if trimmed.is_empty() || trimmed.contains(['/', '\\', '.']) {
                return Err(ConfigError::InvalidExtension(ext.clone()));
            }
        }
        Ok(())
    }

    /// Resolve `filename_encodings` to encoding_rs encodings.
    pub fn encodings(&self) -> Result<Vec<&'static Encoding>, ConfigError> {
        self.filename_encodings
            .iter()
            .map(|label| {
                Encoding::for_label(label.trim().as_bytes())
                    .ok_or_else(|| ConfigError::UnknownEncoding(label.clone()))
            })
            .collect()
    }

    pub fn compressed_extension_set(&self) -> HashSet<String> {
        self.compressed_extensions
            .iter()
            .map(|ext| paths::normalize_extension(ext))
            .collect()
    }

    pub fn tree_options(&self) -> TreeOptions {
        TreeOptions {
            layout: self.directory_layout,
            implicit_dirs: self.implicit_dirs,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unknown filename encoding: {0}")]
    UnknownEncoding(String),

    #[error("Invalid compressed extension: {0:?}")]
    InvalidExtension(String),
}
