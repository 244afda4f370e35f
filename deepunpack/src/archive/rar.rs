use std::collections::HashMap;

use super::*;

/// RAR access goes through the unrar library, which only opens archives by
/// path. The source is kept so a staged temp file outlives every read.
pub(super) struct RarBackend {
    _source: ArchiveSource,
    path: PathBuf,
    spill_threshold: u64,
}

fn rar_error(context: &str, e: impl std::fmt::Debug) -> EngineError {
    EngineError::Rar(format!("{}: {:?}", context, e))
}

impl RarBackend {
    pub(super) fn open(name: &str, source: ArchiveSource, spill_threshold: u64) -> Result<Self> {
        let path = source
            .path()
            .ok_or_else(|| {
                EngineError::staging(name, "RAR archives must be staged on disk before opening")
            })?
            .to_path_buf();
        Ok(Self {
            _source: source,
            path,
            spill_threshold,
        })
    }

    pub(super) fn list_entries(&self) -> Result<Vec<EntryInfo>> {
        let listing = unrar::Archive::new(&self.path)
            .open_for_listing()
            .map_err(|e| rar_error("Failed to open RAR archive", e))?;

        let mut entries = Vec::new();
        for (index, header) in listing.enumerate() {
            let header = header.map_err(|e| rar_error("Failed to read RAR header", e))?;
            entries.push(EntryInfo {
                index,
                path: normalize_entry_path(&header.filename.to_string_lossy()),
                size: header.unpacked_size,
                is_dir: header.is_directory(),
            });
        }
        Ok(entries)
    }

    pub(super) fn visit_entries(
        &mut self,
        wanted: &[EntryInfo],
        visitor: &mut EntryVisitor<'_>,
    ) -> Result<()> {
        let mut pending: HashMap<&str, &EntryInfo> =
            wanted.iter().map(|info| (info.path.as_str(), info)).collect();

        let mut archive = unrar::Archive::new(&self.path)
            .open_for_processing()
            .map_err(|e| rar_error("Failed to open RAR for extraction", e))?;

        while !pending.is_empty() {
            let Some(header) = archive
                .read_header()
                .map_err(|e| rar_error("Failed to read RAR header", e))?
            else {
                break;
            };

            let name = normalize_entry_path(&header.entry().filename.to_string_lossy());
            let info = match pending.remove(name.as_str()) {
                Some(info) if header.entry().is_file() => info,
                _ => {
                    archive = header
                        .skip()
                        .map_err(|e| rar_error("Failed to skip RAR entry", e))?;
                    continue;
                }
            };

            if info.size > self.spill_threshold {
                // Large entries go through a temp file instead of one big buffer
                let spill = tempfile::Builder::new()
                    .prefix("deepunpack_rar_")
                    .tempfile()
                    .map_err(|e| EngineError::io(std::env::temp_dir(), e))?
                    .into_temp_path();
                archive = header
                    .extract_to(&*spill)
                    .map_err(|e| rar_error("Failed to extract RAR entry", e))?;
                let mut file = fs::File::open(&spill).map_err(|e| EngineError::io(spill.to_path_buf(), e))?;
                visitor(info, Ok(&mut file))?;
            } else {
                let (data, next) = header
                    .read()
                    .map_err(|e| rar_error("Failed to read RAR entry", e))?;
                archive = next;
                visitor(info, Ok(&mut Cursor::new(data)))?;
            }
        }
        Ok(())
    }
}
