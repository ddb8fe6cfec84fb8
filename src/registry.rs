//! Format registry and dispatcher.
//!
//! Decoders are probed strictly in registration order; the first one that
//! parses the container owns the resulting filesystem. File extensions are
//! never consulted.

use crate::archive::{
    ArchiveReader, ArchiverFile, Decoder, Encoder, RarDecoder, SevenZipDecoder, WriteSeek,
    ZipDecoder, ZipEncoder,
};
use crate::config::{Config, ConfigError};
use crate::error::{Result, VfsError};
use crate::fs::ArchiveFs;
use crate::tree::{RootInfo, TreeBuilder, TreeOptions};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

#[derive(Default)]
pub struct Registry {
    decoders: Vec<Box<dyn Decoder>>,
    encoders: BTreeMap<String, Box<dyn Encoder>>,
    tree_options: TreeOptions,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// zip, 7z and rar decoders (in that order) and the zip encoder,
    /// configured from `config`.
    pub fn with_defaults(config: &Config) -> std::result::Result<Self, ConfigError> {
        let mut registry = Self::new();
        registry.set_tree_options(config.tree_options());

        let zip = ZipDecoder::new().with_encodings(config.encodings()?, config.skip_encoding_errors);
        registry.register_decoder(Box::new(zip));
        registry.register_decoder(Box::new(SevenZipDecoder::new()));
        registry.register_decoder(Box::new(RarDecoder::new()));

        let mut encoder = ZipEncoder::new();
        encoder.set_compressed_ext(config.compressed_extension_set());
        registry.register_encoder(encoder.name(), Box::new(encoder));
        Ok(registry)
    }

    pub fn register_decoder(&mut self, decoder: Box<dyn Decoder>) {
        debug!("Registered decoder {}", decoder.name());
        self.decoders.push(decoder);
    }

    /// Register `encoder` under `name`, replacing any previous one.
    pub fn register_encoder(&mut self, name: &str, encoder: Box<dyn Encoder>) {
        debug!("Registered encoder {}", name);
        self.encoders.insert(name.to_string(), encoder);
    }

    pub fn set_tree_options(&mut self, options: TreeOptions) {
        self.tree_options = options;
    }

    pub fn decoder_names(&self) -> Vec<&'static str> {
        self.decoders.iter().map(|d| d.name()).collect()
    }

    pub fn encoder_names(&self) -> Vec<&str> {
        self.encoders.keys().map(String::as_str).collect()
    }

    /// Open the archive at `path` with the first decoder that parses it.
    pub fn open(&self, path: &Path, password: Option<&str>) -> Result<ArchiveFs> {
        let meta = fs::metadata(path)?;
        let reader = self.probe(path, password)?;
        let builder = TreeBuilder::new(RootInfo::from_metadata(&meta)).with_options(self.tree_options);
        ArchiveFs::new(reader, &builder)
    }

    fn probe(&self, path: &Path, password: Option<&str>) -> Result<Box<dyn ArchiveReader>> {
        for decoder in &self.decoders {
            match decoder.open(path, password) {
                Ok(reader) => {
                    info!("Opened {} as {}", path.display(), decoder.name());
                    return Ok(reader);
                }
                Err(e) => debug!("{} could not open {}: {}", decoder.name(), path.display(), e),
            }
        }
        Err(VfsError::UnknownArchiveFormat(path.display().to_string()))
    }

    /// Serialize `entries` into `sink` with the encoder registered as `name`.
    pub fn create(
        &self,
        name: &str,
        sink: &mut dyn WriteSeek,
        entries: &mut [&mut dyn ArchiverFile],
    ) -> Result<()> {
        let encoder = self
            .encoders
            .get(name)
            .ok_or_else(|| VfsError::UnknownEncoder(name.to_string()))?;
        encoder.create(sink, entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{LocalFile, RawEntry};
    use crate::fs::EntrySource;
    use crate::tree::DirectoryLayout;
    use anyhow::Result;
    use std::cell::RefCell;
    use std::fs::File;
    use std::io::{Cursor, Read, Write};
    use std::rc::Rc;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn write_zip(path: &Path) -> Result<()> {
        let mut zip = ZipWriter::new(File::create(path)?);
        let options = SimpleFileOptions::default();
        zip.add_directory("docs/", options)?;
        zip.start_file("docs/readme.txt", options)?;
        zip.write_all(b"read me")?;
        zip.start_file("top.bin", options)?;
        zip.write_all(&[1, 2, 3, 4])?;
        zip.finish()?;
        Ok(())
    }

    /// Succeeds or fails on every probe, recording the attempt.
    struct Probe {
        name: &'static str,
        accept: bool,
        log: Rc<RefCell<Vec<&'static str>>>,
    }

    struct NoMembers(&'static str);

    impl ArchiveReader for NoMembers {
        fn name(&self) -> &'static str {
            self.0
        }

        fn entries(&self) -> &[RawEntry] {
            &[]
        }

        fn open_stream(&mut self, index: usize) -> crate::error::Result<Box<dyn Read>> {
            Err(VfsError::NotFound(index.to_string()))
        }

        fn close(&mut self) -> crate::error::Result<()> {
            Ok(())
        }
    }

    impl Decoder for Probe {
        fn name(&self) -> &'static str {
            self.name
        }

        fn open(
            &self,
            _path: &Path,
            _password: Option<&str>,
        ) -> crate::error::Result<Box<dyn ArchiveReader>> {
            self.log.borrow_mut().push(self.name);
            if self.accept {
                Ok(Box::new(NoMembers(self.name)))
            } else {
                Err(VfsError::codec(self.name, "bad magic"))
            }
        }
    }

    #[test]
    fn test_probe_order() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("blob");
        std::fs::write(&path, b"whatever")?;

        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = Registry::new();
        for (name, accept) in [("first", false), ("second", true), ("third", true)] {
            registry.register_decoder(Box::new(Probe {
                name,
                accept,
                log: Rc::clone(&log),
            }));
        }

        let fs = registry.open(&path, None)?;
        assert_eq!(fs.format(), "second");
        assert_eq!(*log.borrow(), vec!["first", "second"]);
        Ok(())
    }

    #[test]
    fn test_default_decoder_order() {
        let registry = Registry::with_defaults(&Config::default()).unwrap();
        assert_eq!(registry.decoder_names(), vec!["zip", "7zip", "rar"]);
        assert_eq!(registry.encoder_names(), vec!["zip"]);
    }

    #[test]
    fn test_unknown_format() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("notes.zip");
        std::fs::write(&path, b"plain text, whatever the extension says")?;

        let registry = Registry::with_defaults(&Config::default())?;
        match registry.open(&path, None) {
            Err(VfsError::UnknownArchiveFormat(_)) => {}
            Err(other) => panic!("expected UnknownArchiveFormat, got {}", other),
            Ok(_) => panic!("text file opened as an archive"),
        }

        assert!(matches!(
            Registry::new().open(&path, None),
            Err(VfsError::UnknownArchiveFormat(_))
        ));
        Ok(())
    }

    #[test]
    fn test_missing_file_is_io_error() -> Result<()> {
        let dir = tempdir()?;
        let registry = Registry::with_defaults(&Config::default())?;
        let err = registry.open(&dir.path().join("nope.zip"), None).err();
        assert!(matches!(err, Some(VfsError::Io(_))));
        Ok(())
    }

    #[test]
    fn test_open_zip_end_to_end() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("fixture.dat");
        write_zip(&path)?;

        let registry = Registry::with_defaults(&Config::default())?;
        let mut fs = registry.open(&path, None)?;
        assert_eq!(fs.format(), "zip");

        let root: Vec<String> = fs.read_dir(".", 0)?.into_iter().map(|i| i.name).collect();
        assert_eq!(root, vec!["docs", "top.bin"]);

        let mut content = String::new();
        fs.open("docs/readme.txt")?.read_to_string(&mut content)?;
        assert_eq!(content, "read me");
        assert_eq!(fs.stat("top.bin")?.size, 4);

        fs.close()?;
        Ok(())
    }

    #[test]
    fn test_nested_layout_from_config() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested.zip");
        let mut zip = ZipWriter::new(File::create(&path)?);
        let options = SimpleFileOptions::default();
        zip.add_directory("a/", options)?;
        zip.add_directory("a/b/", options)?;
        zip.finish()?;

        let config = Config {
            directory_layout: DirectoryLayout::Nested,
            ..Config::default()
        };
        let registry = Registry::with_defaults(&config)?;
        let mut fs = registry.open(&path, None)?;
        let root: Vec<String> = fs.read_dir(".", 0)?.into_iter().map(|i| i.name).collect();
        assert_eq!(root, vec!["a"]);
        Ok(())
    }

    #[test]
    fn test_unknown_encoder() {
        let registry = Registry::new();
        let mut sink = Cursor::new(Vec::new());
        let err = registry.create("tar", &mut sink, &mut []).unwrap_err();
        assert!(matches!(err, VfsError::UnknownEncoder(name) if name == "tar"));
    }

    /// Re-encode `input` as zip, streaming one member at a time.
    fn convert(registry: &Registry, input: &Path, output: &Path) -> Result<()> {
        let fs = RefCell::new(registry.open(input, None)?);
        let names: Vec<String> = fs.borrow().walk()?.into_iter().map(|i| i.path).collect();
        let mut sources = EntrySource::collect(&fs, &names)?;
        let mut inputs: Vec<&mut dyn ArchiverFile> = sources
            .iter_mut()
            .map(|s| s as &mut dyn ArchiverFile)
            .collect();
        registry.create("zip", &mut File::create(output)?, &mut inputs)?;
        Ok(())
    }

    #[test]
    fn test_convert_zip_without_directory_records() -> Result<()> {
        let dir = tempdir()?;
        let input = dir.path().join("flat.zip");
        let mut zip = ZipWriter::new(File::create(&input)?);
        let options = SimpleFileOptions::default();
        for (name, content) in [
            ("top.txt", "top"),
            ("a/b.txt", "bee"),
            ("x/y/z.txt", "zed"),
            ("x/w.txt", "double-u"),
        ] {
            zip.start_file(name, options)?;
            zip.write_all(content.as_bytes())?;
        }
        zip.finish()?;

        let registry = Registry::with_defaults(&Config::default())?;
        let output = dir.path().join("converted.zip");
        convert(&registry, &input, &output)?;

        let mut archive = zip::ZipArchive::new(File::open(&output)?)?;
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(names, vec!["a/b.txt", "top.txt", "x/w.txt", "x/y/z.txt"]);

        let mut content = String::new();
        archive.by_name("x/y/z.txt")?.read_to_string(&mut content)?;
        assert_eq!(content, "zed");
        Ok(())
    }

    #[test]
    fn test_pack_then_convert() -> Result<()> {
        let dir = tempdir()?;
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("img"))?;
        std::fs::write(src.join("img/photo.jpg"), vec![0xFFu8; 512])?;
        std::fs::write(src.join("notes.txt"), "hello ".repeat(100))?;

        let registry = Registry::with_defaults(&Config::default())?;

        let packed = dir.path().join("packed.zip");
        let mut locals = LocalFile::collect(&src)?;
        let mut inputs: Vec<&mut dyn ArchiverFile> =
            locals.iter_mut().map(|f| f as &mut dyn ArchiverFile).collect();
        registry.create("zip", &mut File::create(&packed)?, &mut inputs)?;

        let converted = dir.path().join("converted.zip");
        convert(&registry, &packed, &converted)?;

        let mut archive = zip::ZipArchive::new(File::open(&converted)?)?;
        assert_eq!(
            archive.by_name("img/photo.jpg")?.compression(),
            zip::CompressionMethod::Stored
        );
        let mut notes = String::new();
        archive.by_name("notes.txt")?.read_to_string(&mut notes)?;
        assert_eq!(notes, "hello ".repeat(100));
        assert!(archive.by_name("img/")?.is_dir());
        Ok(())
    }
}
