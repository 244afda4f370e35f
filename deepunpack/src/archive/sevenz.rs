use std::collections::HashMap;

use super::*;

/// 7z archives are read through a sequential, solid-block aware reader;
/// entries can only be streamed in archive order.
pub(super) struct SevenZBackend {
    reader: sevenz_rust2::ArchiveReader<ArchiveSource>,
}

impl SevenZBackend {
    pub(super) fn open(source: ArchiveSource) -> Result<Self> {
        let reader = sevenz_rust2::ArchiveReader::new(source, sevenz_rust2::Password::empty())
            .map_err(|e| EngineError::SevenZ(format!("Failed to open 7z archive: {}", e)))?;
        Ok(Self { reader })
    }

    pub(super) fn list_entries(&self) -> Vec<EntryInfo> {
        self.reader
            .archive()
            .files
            .iter()
            .enumerate()
            .map(|(index, entry)| EntryInfo {
                index,
                path: normalize_entry_path(entry.name()),
                size: entry.size(),
                is_dir: entry.is_directory(),
            })
            .collect()
    }

    pub(super) fn visit_entries(
        &mut self,
        wanted: &[EntryInfo],
        visitor: &mut EntryVisitor<'_>,
    ) -> Result<()> {
        let mut pending: HashMap<&str, &EntryInfo> =
            wanted.iter().map(|info| (info.path.as_str(), info)).collect();
        let mut aborted: Option<EngineError> = None;

        let outcome = self.reader.for_each_entries(|entry, entry_reader| {
            let name = normalize_entry_path(entry.name());
            if let Some(info) = pending.remove(name.as_str()) {
                if let Err(e) = visitor(info, Ok(entry_reader)) {
                    aborted = Some(e);
                    return Ok(false);
                }
            }
            // Stop decoding once every requested entry has been seen
            Ok(!pending.is_empty())
        });

        if let Some(e) = aborted {
            return Err(e);
        }
        outcome.map_err(|e| EngineError::SevenZ(format!("Failed to read 7z entries: {}", e)))?;
        Ok(())
    }
}
