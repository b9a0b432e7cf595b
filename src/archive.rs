//! Bundling exported files.
//!
//! [`ArchiveWriter`] is the seam between batch processing and whatever
//! packages the outputs:
//!
//! - [`ZipBundle`]: one `.zip` file holding every entry.
//! - [`DirectoryArchive`]: one file per entry in a directory.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{Seek, Write};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Duplicate archive entry: {0}")]
    DuplicateEntry(String),
    #[error("Invalid archive entry name: {0}")]
    InvalidName(String),
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

pub trait ArchiveWriter {
    /// Add one named entry. Names are flat file names, unique per archive.
    fn add_entry(&mut self, name: &str, bytes: &[u8]) -> Result<(), ArchiveError>;

    /// Flush and close. Returns the number of entries written.
    fn finish(self) -> Result<usize, ArchiveError>
    where
        Self: Sized;
}

/// Writes entries as files into a directory.
#[derive(Debug)]
pub struct DirectoryArchive {
    root: PathBuf,
    names: HashSet<String>,
}

impl DirectoryArchive {
    /// Create the directory if needed.
    pub fn create(root: &Path) -> Result<Self, ArchiveError> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            names: HashSet::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Whether `path` names a zip file rather than a directory.
pub fn is_zip_path(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

/// Entry names must be a single normal path component.
fn validate_name(name: &str) -> Result<(), ArchiveError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(ArchiveError::InvalidName(name.to_string())),
    }
}

impl ArchiveWriter for DirectoryArchive {
    fn add_entry(&mut self, name: &str, bytes: &[u8]) -> Result<(), ArchiveError> {
        validate_name(name)?;
        if !self.names.insert(name.to_string()) {
            return Err(ArchiveError::DuplicateEntry(name.to_string()));
        }
        fs::write(self.root.join(name), bytes)?;
        Ok(())
    }

    fn finish(self) -> Result<usize, ArchiveError> {
        Ok(self.names.len())
    }
}

/// Writes entries into a single zip archive.
pub struct ZipBundle<W: Write + Seek> {
    writer: ZipWriter<W>,
    names: HashSet<String>,
}

impl ZipBundle<File> {
    /// Create (or truncate) the archive file, creating parent directories.
    pub fn create(path: &Path) -> Result<Self, ArchiveError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        Ok(Self::new(File::create(path)?))
    }
}

impl<W: Write + Seek> ZipBundle<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: ZipWriter::new(inner),
            names: HashSet::new(),
        }
    }

    /// Finish the archive and hand back the underlying writer.
    pub fn into_inner(self) -> Result<W, ArchiveError> {
        Ok(self.writer.finish()?)
    }
}

impl<W: Write + Seek> ArchiveWriter for ZipBundle<W> {
    fn add_entry(&mut self, name: &str, bytes: &[u8]) -> Result<(), ArchiveError> {
        validate_name(name)?;
        if !self.names.insert(name.to_string()) {
            return Err(ArchiveError::DuplicateEntry(name.to_string()));
        }
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        self.writer.start_file(name, options)?;
        self.writer.write_all(bytes)?;
        Ok(())
    }

    fn finish(self) -> Result<usize, ArchiveError> {
        let count = self.names.len();
        self.writer.finish()?;
        Ok(count)
    }
}
