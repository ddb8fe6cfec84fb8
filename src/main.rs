//! arcvfs - browse and extract archives through one read-only interface

use anyhow::{bail, Context, Result};
use arcvfs::archive::{ArchiverFile, LocalFile};
use arcvfs::fs::{self as vfs, ArchiveFs, EntrySource};
use arcvfs::{Config, DirectoryLayout, FileInfo, Registry};
use clap::{Parser, Subcommand};
use std::cell::RefCell;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "arcvfs")]
#[command(version)]
#[command(about = "Read zip, 7z and rar archives as a read-only filesystem")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Password for encrypted archives
    #[arg(long, global = true, env = "ARCVFS_PASSWORD")]
    password: Option<String>,

    /// Config file (default: <config dir>/arcvfs/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Synthesize directories that only appear in member paths
    #[arg(long, global = true)]
    implicit_dirs: bool,

    /// List directory records under their parent instead of the root
    #[arg(long, global = true)]
    nested_dirs: bool,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List a directory inside an archive
    Ls {
        archive: PathBuf,

        /// Directory inside the archive
        #[arg(default_value = ".")]
        dir: String,

        /// Entries per page (0 lists everything at once)
        #[arg(short, long, default_value = "0")]
        page: usize,

        /// List every entry in the archive
        #[arg(short, long)]
        recursive: bool,
    },

    /// Show metadata of one entry
    Stat { archive: PathBuf, path: String },

    /// Write a file's contents to stdout
    Cat { archive: PathBuf, path: String },

    /// Extract a single file
    Extract {
        archive: PathBuf,
        path: String,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Create a zip file from a local directory
    Pack {
        dir: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Re-encode any readable archive as zip
    Convert {
        archive: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// List registered formats
    Formats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Only initialize logging if verbose or RUST_LOG is set
    if cli.verbose || std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env()
                    .add_directive(if cli.verbose { "arcvfs=debug".parse()? } else { "arcvfs=warn".parse()? }),
            )
            .with_writer(io::stderr)
            .init();
    }

    let config = load_config(&cli)?;
    let registry = Registry::with_defaults(&config).context("Invalid configuration")?;
    let password = cli.password.clone().or_else(|| config.password.clone());

    match cli.command {
        Commands::Ls {
            archive,
            dir,
            page,
            recursive,
        } => {
            let mut fs = open(&registry, &archive, password.as_deref())?;
            let entries = if recursive {
                fs.walk()?
            } else {
                vfs::list_all(&mut fs, &dir, page)
                    .with_context(|| format!("Failed to list {} in {}", dir, archive.display()))?
            };
            for info in &entries {
                print_info(info);
            }
            eprintln!("\nTotal: {} entries", entries.len());
            fs.close()?;
        }

        Commands::Stat { archive, path } => {
            let fs = open(&registry, &archive, password.as_deref())?;
            let info = fs.stat(&path).with_context(|| format!("Failed to stat {}", path))?;
            println!("Path:     {}", info.path);
            println!("Name:     {}", info.name);
            println!("Type:     {}", if info.is_dir { "directory" } else { "file" });
            println!("Size:     {}", info.size);
            println!("Mode:     {:o}", info.mode);
            match info.modified {
                Some(modified) => println!("Modified: {}", modified.to_rfc3339()),
                None => println!("Modified: -"),
            }
        }

        Commands::Cat { archive, path } => {
            let mut fs = open(&registry, &archive, password.as_deref())?;
            let entry = fs.open(&path).with_context(|| format!("Failed to open {}", path))?;
            if entry.is_dir() {
                bail!("{} is a directory", path);
            }
            let stdout = io::stdout();
            let mut out = stdout.lock();
            io::copy(entry, &mut out).with_context(|| format!("Failed to read {}", path))?;
            out.flush()?;
        }

        Commands::Extract {
            archive,
            path,
            output,
        } => {
            let mut fs = open(&registry, &archive, password.as_deref())?;
            let entry = fs.open(&path).with_context(|| format!("Failed to open {}", path))?;
            if entry.is_dir() {
                bail!("{} is a directory", path);
            }
            let mut out = BufWriter::new(
                File::create(&output).with_context(|| format!("Failed to create {}", output.display()))?,
            );
            let written = io::copy(entry, &mut out).with_context(|| format!("Failed to read {}", path))?;
            out.flush()?;
            println!("Extracted {} bytes to {}", written, output.display());
        }

        Commands::Pack { dir, output } => {
            let mut files = LocalFile::collect(&dir)
                .with_context(|| format!("Failed to scan {}", dir.display()))?;
            let mut inputs: Vec<&mut dyn ArchiverFile> =
                files.iter_mut().map(|f| f as &mut dyn ArchiverFile).collect();
            write_zip(&registry, &output, &mut inputs)?;
            println!("Packed {} entries into {}", inputs.len(), output.display());
        }

        Commands::Convert { archive, output } => {
            let fs = RefCell::new(open(&registry, &archive, password.as_deref())?);
            let names: Vec<String> = fs.borrow().walk()?.into_iter().map(|info| info.path).collect();
            let mut sources = EntrySource::collect(&fs, &names)
                .with_context(|| format!("Failed to list entries of {}", archive.display()))?;
            let mut inputs: Vec<&mut dyn ArchiverFile> = sources
                .iter_mut()
                .map(|s| s as &mut dyn ArchiverFile)
                .collect();
            write_zip(&registry, &output, &mut inputs)?;
            println!("Converted {} entries into {}", inputs.len(), output.display());
        }

        Commands::Formats => {
            println!("Decoders (probe order): {}", registry.decoder_names().join(", "));
            println!("Encoders:               {}", registry.encoder_names().join(", "));
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    if cli.implicit_dirs {
        config.implicit_dirs = true;
    }
    if cli.nested_dirs {
        config.directory_layout = DirectoryLayout::Nested;
    }
    Ok(config)
}

fn open(registry: &Registry, archive: &Path, password: Option<&str>) -> Result<ArchiveFs> {
    if archive.is_dir() {
        bail!(
            "{} is a directory, not an archive (use `pack` to create one from it)",
            archive.display()
        );
    }
    registry
        .open(archive, password)
        .with_context(|| format!("Failed to open {}", archive.display()))
}

fn write_zip(registry: &Registry, output: &Path, inputs: &mut [&mut dyn ArchiverFile]) -> Result<()> {
    let mut file = File::create(output).with_context(|| format!("Failed to create {}", output.display()))?;
    registry
        .create("zip", &mut file, inputs)
        .with_context(|| format!("Failed to write {}", output.display()))
}

fn print_info(info: &FileInfo) {
    let kind = if info.is_dir { 'd' } else { '-' };
    let modified = info
        .modified
        .map(|m| m.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    println!("{}{:04o} {:>12} {} {}", kind, info.permissions(), info.size, modified, info.path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_directory_suggests_pack() -> Result<()> {
        let dir = tempdir()?;
        let registry = Registry::with_defaults(&Config::default())?;

        let err = match open(&registry, dir.path(), None) {
            Ok(_) => panic!("directory opened as an archive"),
            Err(e) => e,
        };
        let message = err.to_string();
        assert!(message.contains("is a directory"), "{}", message);
        assert!(message.contains("pack"), "{}", message);
        Ok(())
    }
}
