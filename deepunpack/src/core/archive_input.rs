//! Root archive preparation.
//!
//! A root archive may be given as any volume of a split set. Before the
//! walker or navigator opens it, the path is normalized to the first volume
//! and multi-volume ZIP/7z sets are concatenated into one temp file. RAR sets
//! are left to the RAR library, which follows volumes itself.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::archive::ArchiveFormat;
use crate::error::{EngineError, Result};

/// A root archive ready for reading.
///
/// Holds the temp file of a concatenated split set alive for as long as the
/// archive is read.
pub struct PreparedArchive {
    read_path: PathBuf,
    format: ArchiveFormat,
    _merged: Option<NamedTempFile>,
}

impl PreparedArchive {
    pub fn read_path(&self) -> &Path {
        &self.read_path
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    pub fn is_merged(&self) -> bool {
        self._merged.is_some()
    }
}

/// Naming schemes of split archive volumes
#[derive(Debug, Clone, PartialEq, Eq)]
enum VolumeScheme {
    /// `name.zip.001`, `name.7z.001`: `prefix` ends with the dot
    Numbered { prefix: String, width: usize },
    /// `name.z01 .. name.zip` (final volume carries the `.zip` extension)
    ZipSpanned { stem: String },
    /// `name.part1.rar`, `name.r00`
    RarParts,
}

/// Split `name.ext.NNN` into (`name.ext.`, width, index) for the given marker
fn numbered_suffix(file_name: &str, marker: &str) -> Option<(String, usize, u32)> {
    let lower = file_name.to_ascii_lowercase();
    let pos = lower.rfind(marker)?;
    let digits = &file_name[pos + marker.len()..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let index = digits.parse::<u32>().ok()?;
    Some((file_name[..pos + marker.len()].to_string(), digits.len(), index))
}

/// True for extensions like `z01`, `r00` (letter followed by digits)
fn is_lettered_volume(ext: &str, letter: char) -> bool {
    let lower = ext.to_ascii_lowercase();
    lower.len() >= 2
        && lower.starts_with(letter)
        && lower[1..].bytes().all(|b| b.is_ascii_digit())
}

fn is_rar_part(file_name: &str) -> bool {
    let lower = file_name.to_ascii_lowercase();
    let Some(body) = lower.strip_suffix(".rar") else {
        return false;
    };
    match body.rfind(".part") {
        Some(pos) => {
            let digits = &body[pos + ".part".len()..];
            !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

/// Detect the container format of a root archive path, including split volumes
pub fn detect_archive_format(path: &Path) -> Option<ArchiveFormat> {
    let file_name = path.file_name()?.to_str()?;
    if let Some(format) = ArchiveFormat::from_name(file_name) {
        return Some(format);
    }
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    if numbered_suffix(file_name, ".zip.").is_some() || is_lettered_volume(ext, 'z') {
        return Some(ArchiveFormat::Zip);
    }
    if numbered_suffix(file_name, ".7z.").is_some() {
        return Some(ArchiveFormat::SevenZ);
    }
    if is_rar_part(file_name) || is_lettered_volume(ext, 'r') {
        return Some(ArchiveFormat::Rar);
    }
    None
}

/// Case-insensitive sibling lookup (volumes are often renamed by hand)
fn find_sibling(dir: &Path, name: &str) -> Option<PathBuf> {
    let direct = dir.join(name);
    if direct.exists() {
        return Some(direct);
    }
    fs::read_dir(dir).ok()?.flatten().find_map(|entry| {
        let entry_name = entry.file_name();
        let entry_name = entry_name.to_str()?;
        entry_name
            .eq_ignore_ascii_case(name)
            .then(|| entry.path())
    })
}

fn classify_volume(file_name: &str, format: ArchiveFormat) -> Option<VolumeScheme> {
    match format {
        ArchiveFormat::Zip => {
            if let Some((prefix, width, _)) = numbered_suffix(file_name, ".zip.") {
                return Some(VolumeScheme::Numbered { prefix, width });
            }
            let (stem, ext) = file_name.rsplit_once('.')?;
            if ext.eq_ignore_ascii_case("zip") || is_lettered_volume(ext, 'z') {
                return Some(VolumeScheme::ZipSpanned {
                    stem: stem.to_string(),
                });
            }
            None
        }
        ArchiveFormat::SevenZ => {
            if let Some((prefix, width, _)) = numbered_suffix(file_name, ".7z.") {
                return Some(VolumeScheme::Numbered { prefix, width });
            }
            if file_name.to_ascii_lowercase().ends_with(".7z") {
                return Some(VolumeScheme::Numbered {
                    prefix: format!("{}.", file_name),
                    width: 3,
                });
            }
            None
        }
        ArchiveFormat::Rar => Some(VolumeScheme::RarParts),
    }
}

fn collect_numbered(dir: &Path, prefix: &str, width: usize) -> Vec<PathBuf> {
    (1u32..)
        .map(|index| format!("{}{:0width$}", prefix, index, width = width))
        .map_while(|name| find_sibling(dir, &name))
        .collect()
}

/// Ordered volume list, or None when the archive is a single file
fn collect_volumes(path: &Path, scheme: &VolumeScheme) -> Result<Option<Vec<PathBuf>>> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    match scheme {
        VolumeScheme::Numbered { prefix, width } => {
            let parts = collect_numbered(dir, prefix, *width);
            Ok((!parts.is_empty()).then_some(parts))
        }
        VolumeScheme::ZipSpanned { stem } => {
            let mut parts: Vec<PathBuf> = (1u32..)
                .map(|index| format!("{}.z{:02}", stem, index))
                .map_while(|name| find_sibling(dir, &name))
                .collect();
            if parts.is_empty() {
                return Ok(None);
            }
            let last = find_sibling(dir, &format!("{}.zip", stem)).ok_or_else(|| {
                EngineError::staging(
                    path.display().to_string(),
                    "missing final .zip volume of spanned archive",
                )
            })?;
            parts.push(last);
            Ok(Some(parts))
        }
        VolumeScheme::RarParts => Ok(None),
    }
}

/// Map any volume of a split set to the volume that must be opened first
pub fn normalize_archive_entry_path(path: &Path) -> PathBuf {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return path.to_path_buf();
    };

    for marker in [".zip.", ".7z."] {
        if let Some((prefix, width, _)) = numbered_suffix(file_name, marker) {
            let first = format!("{}{:0width$}", prefix, 1, width = width);
            if let Some(found) = find_sibling(dir, &first) {
                return found;
            }
        }
    }

    if let Some((stem, ext)) = file_name.rsplit_once('.') {
        if is_lettered_volume(ext, 'z') {
            if let Some(found) = find_sibling(dir, &format!("{}.zip", stem)) {
                return found;
            }
        }
        if is_lettered_volume(ext, 'r') {
            if let Some(found) = find_sibling(dir, &format!("{}.rar", stem)) {
                return found;
            }
        }
    }

    if is_rar_part(file_name) {
        let lower = file_name.to_ascii_lowercase();
        if let Some(pos) = lower.rfind(".part") {
            let base = &file_name[..pos];
            let digits = &file_name[pos + ".part".len()..file_name.len() - ".rar".len()];
            let first = format!("{}.part{:0width$}.rar", base, 1, width = digits.len());
            if let Some(found) = find_sibling(dir, &first) {
                return found;
            }
        }
    }

    path.to_path_buf()
}

fn concat_volumes(parts: &[PathBuf], format: ArchiveFormat) -> Result<NamedTempFile> {
    let mut merged = NamedTempFile::with_suffix(format.temp_suffix())
        .map_err(|e| EngineError::io(std::env::temp_dir(), e))?;
    {
        let mut writer = BufWriter::new(merged.as_file_mut());
        for part in parts {
            let mut input = fs::File::open(part).map_err(|e| EngineError::io(part, e))?;
            std::io::copy(&mut input, &mut writer).map_err(|e| EngineError::io(part, e))?;
        }
        writer
            .flush()
            .map_err(|e| EngineError::io(std::env::temp_dir(), e))?;
    }
    Ok(merged)
}

/// Resolve the readable form of a root archive path
pub fn prepare_archive_for_read(path: &Path) -> Result<PreparedArchive> {
    let format = detect_archive_format(path)
        .ok_or_else(|| EngineError::UnsupportedFormat(path.display().to_string()))?;
    let normalized = normalize_archive_entry_path(path);
    if !normalized.is_file() {
        return Err(EngineError::io(
            &normalized,
            std::io::Error::new(std::io::ErrorKind::NotFound, "archive not found"),
        ));
    }

    let file_name = normalized
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    if let Some(scheme) = classify_volume(&file_name, format) {
        if let Some(parts) = collect_volumes(&normalized, &scheme)? {
            let plain = ArchiveFormat::from_name(&file_name) == Some(format);
            if parts.len() > 1 || !plain {
                tracing::info!(
                    target: "scanner",
                    "Merging {} volumes of {}",
                    parts.len(),
                    normalized.display()
                );
                let merged = concat_volumes(&parts, format)?;
                return Ok(PreparedArchive {
                    read_path: merged.path().to_path_buf(),
                    format,
                    _merged: Some(merged),
                });
            }
        }
    }

    Ok(PreparedArchive {
        read_path: normalized,
        format,
        _merged: None,
    })
}
