//! Format-neutral access to ZIP, 7z and RAR archives.
//!
//! Both phases see an archive as a flat list of [`EntryInfo`] plus a way to
//! stream selected entries. Sources are owned by the opened archive, so a
//! staged temp file lives exactly as long as the archive read from it.

use std::fs;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tempfile::TempPath;

use crate::error::{EngineError, Result};

mod rar;
mod sevenz;
mod zip;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    Zip,
    SevenZ,
    Rar,
}

impl ArchiveFormat {
    /// Container extensions eligible for recursive descent, case-insensitive
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "zip" => Some(ArchiveFormat::Zip),
            "7z" => Some(ArchiveFormat::SevenZ),
            "rar" => Some(ArchiveFormat::Rar),
            _ => None,
        }
    }

    /// Classify a file or entry name by its final extension
    pub fn from_name(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        Self::from_extension(ext)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::SevenZ => "7z",
            ArchiveFormat::Rar => "rar",
        }
    }

    pub fn temp_suffix(self) -> &'static str {
        match self {
            ArchiveFormat::Zip => ".zip",
            ArchiveFormat::SevenZ => ".7z",
            ArchiveFormat::Rar => ".rar",
        }
    }

    /// The RAR library only opens archives by filesystem path
    pub fn requires_path(self) -> bool {
        matches!(self, ArchiveFormat::Rar)
    }
}

/// Random-access bytes backing an opened archive
pub enum ArchiveSource {
    /// An archive file on disk owned by the user
    File { file: fs::File, path: PathBuf },
    /// A nested archive staged in memory
    Memory(Cursor<Vec<u8>>),
    /// A nested archive staged to a temp file, removed on drop
    TempFile { file: fs::File, path: TempPath },
}

impl ArchiveSource {
    pub fn open_file(path: &Path) -> Result<Self> {
        let file = fs::File::open(path).map_err(|e| EngineError::io(path, e))?;
        Ok(ArchiveSource::File {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Reopen a staged temp file for reading, taking over its cleanup
    pub fn from_temp_path(path: TempPath) -> Result<Self> {
        let file = fs::File::open(&path).map_err(|e| EngineError::io(path.to_path_buf(), e))?;
        Ok(ArchiveSource::TempFile { file, path })
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            ArchiveSource::File { path, .. } => Some(path),
            ArchiveSource::TempFile { path, .. } => Some(path),
            ArchiveSource::Memory(_) => None,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self, ArchiveSource::Memory(_))
    }
}

impl Read for ArchiveSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            ArchiveSource::File { file, .. } => file.read(buf),
            ArchiveSource::Memory(cursor) => cursor.read(buf),
            ArchiveSource::TempFile { file, .. } => file.read(buf),
        }
    }
}

impl Seek for ArchiveSource {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        match self {
            ArchiveSource::File { file, .. } => file.seek(pos),
            ArchiveSource::Memory(cursor) => cursor.seek(pos),
            ArchiveSource::TempFile { file, .. } => file.seek(pos),
        }
    }
}

/// Header-level view of one archive entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// Position in the archive's own entry order
    pub index: usize,
    /// In-archive path with `/` separators
    pub path: String,
    /// Declared uncompressed size
    pub size: u64,
    pub is_dir: bool,
}

impl EntryInfo {
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Normalize an in-archive path to `/` separators without leading `./` or `/`
pub fn normalize_entry_path(name: &str) -> String {
    let unified = name.replace('\\', "/");
    let mut trimmed = unified.as_str();
    loop {
        if let Some(rest) = trimmed.strip_prefix("./") {
            trimmed = rest;
        } else if let Some(rest) = trimmed.strip_prefix('/') {
            trimmed = rest;
        } else {
            break;
        }
    }
    trimmed.to_string()
}

/// Stream handed to an entry visitor; `Err` when the entry could not be opened
pub type EntryStream<'a> = Result<&'a mut dyn Read>;

/// Visitor over selected entries. Returning `Err` aborts the whole visit.
pub type EntryVisitor<'v> = dyn FnMut(&EntryInfo, EntryStream<'_>) -> Result<()> + 'v;

enum Backend {
    Zip(::zip::ZipArchive<ArchiveSource>),
    SevenZ(sevenz::SevenZBackend),
    Rar(rar::RarBackend),
}

/// An archive opened for listing and streaming
pub struct OpenedArchive {
    name: String,
    format: ArchiveFormat,
    backend: Backend,
}

impl OpenedArchive {
    /// Open `source` as `format`. `name` is used for logs and errors only.
    ///
    /// `spill_threshold` bounds how much of a single RAR entry is read into
    /// memory; larger entries are extracted through a temp file.
    pub fn open(
        name: impl Into<String>,
        source: ArchiveSource,
        format: ArchiveFormat,
        spill_threshold: u64,
    ) -> Result<Self> {
        let name = name.into();
        let backend = match format {
            ArchiveFormat::Zip => Backend::Zip(::zip::ZipArchive::new(source)?),
            ArchiveFormat::SevenZ => Backend::SevenZ(sevenz::SevenZBackend::open(source)?),
            ArchiveFormat::Rar => {
                Backend::Rar(rar::RarBackend::open(&name, source, spill_threshold)?)
            }
        };
        Ok(Self {
            name,
            format,
            backend,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    /// List all entries in archive order
    pub fn entries(&mut self) -> Result<Vec<EntryInfo>> {
        match &mut self.backend {
            Backend::Zip(archive) => zip::list_entries(archive),
            Backend::SevenZ(backend) => Ok(backend.list_entries()),
            Backend::Rar(backend) => backend.list_entries(),
        }
    }

    /// Stream each entry in `wanted` to `visitor`, in archive order.
    ///
    /// Entries are matched by index for ZIP and by normalized path for 7z and
    /// RAR, whose readers are sequential.
    pub fn visit_entries(&mut self, wanted: &[EntryInfo], visitor: &mut EntryVisitor<'_>) -> Result<()> {
        if wanted.is_empty() {
            return Ok(());
        }
        match &mut self.backend {
            Backend::Zip(archive) => zip::visit_entries(archive, wanted, visitor),
            Backend::SevenZ(backend) => backend.visit_entries(wanted, visitor),
            Backend::Rar(backend) => backend.visit_entries(wanted, visitor),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Write;

    use ::zip::write::SimpleFileOptions;

    /// Build an in-memory ZIP from (name, bytes) pairs
    pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ::zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, data) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }
}
