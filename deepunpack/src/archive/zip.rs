use super::*;

pub(super) fn list_entries(archive: &mut ::zip::ZipArchive<ArchiveSource>) -> Result<Vec<EntryInfo>> {
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        // Raw access reads the header only and never triggers decryption
        let file = archive.by_index_raw(index)?;
        entries.push(EntryInfo {
            index,
            path: normalize_entry_path(file.name()),
            size: file.size(),
            is_dir: file.is_dir(),
        });
    }
    Ok(entries)
}

pub(super) fn visit_entries(
    archive: &mut ::zip::ZipArchive<ArchiveSource>,
    wanted: &[EntryInfo],
    visitor: &mut EntryVisitor<'_>,
) -> Result<()> {
    let mut ordered: Vec<&EntryInfo> = wanted.iter().collect();
    ordered.sort_by_key(|info| info.index);

    for info in ordered {
        match archive.by_index(info.index) {
            Ok(mut file) => visitor(info, Ok(&mut file))?,
            Err(e) => visitor(info, Err(EngineError::Zip(e)))?,
        }
    }
    Ok(())
}
