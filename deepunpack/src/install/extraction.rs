use std::collections::HashMap;
use std::io::{BufWriter, Read, Write};
use std::path::PathBuf;

use super::*;
use crate::archive::{ArchiveFormat, ArchiveSource, EntryInfo, OpenedArchive};
use crate::core::archive_input::PreparedArchive;
use crate::core::path_utils::ensure_inside;

/// Find the entry a chain segment names: exact in-archive path first, then a
/// file-name match when it is unique.
fn find_chain_entry<'e>(entries: &'e [EntryInfo], segment: &str) -> Option<&'e EntryInfo> {
    let files = || entries.iter().filter(|e| !e.is_dir);
    if let Some(exact) = files().find(|e| e.path == segment) {
        return Some(exact);
    }

    let wanted_name = segment.rsplit('/').next().unwrap_or(segment);
    let mut by_name = files().filter(|e| e.file_name() == wanted_name);
    match (by_name.next(), by_name.next()) {
        (Some(only), None) => Some(only),
        _ => None,
    }
}

impl Installer {
    /// Navigate one archive chain from a fresh root handle and extract the
    /// group's files from the innermost archive.
    pub(super) fn install_group(
        &self,
        root: &PreparedArchive,
        root_name: &str,
        chain: &[String],
        writes: &[&PlannedWrite<'_>],
        run: &mut InstallRun<'_>,
    ) -> Result<()> {
        let Some((first, rest)) = chain.split_first() else {
            return Err(EngineError::ChainSegmentNotFound {
                archive: root_name.to_string(),
                segment: String::new(),
            });
        };
        if first != root_name {
            return Err(EngineError::ChainSegmentNotFound {
                archive: root_name.to_string(),
                segment: first.clone(),
            });
        }

        let source = ArchiveSource::open_file(root.read_path())?;
        let archive = OpenedArchive::open(
            root_name,
            source,
            root.format(),
            self.config.memory_stage_threshold,
        )?;
        self.descend_chain(archive, rest, writes, run)
    }

    /// Recurse down the remaining chain. Each parent is dropped once its
    /// nested archive has been staged.
    fn descend_chain(
        &self,
        mut archive: OpenedArchive,
        remaining: &[String],
        writes: &[&PlannedWrite<'_>],
        run: &mut InstallRun<'_>,
    ) -> Result<()> {
        self.control.ensure_not_cancelled()?;

        let Some((segment, rest)) = remaining.split_first() else {
            return self.extract_group(&mut archive, writes, run);
        };

        let entries = archive.entries()?;
        let entry = find_chain_entry(&entries, segment)
            .cloned()
            .ok_or_else(|| EngineError::ChainSegmentNotFound {
                archive: archive.name().to_string(),
                segment: segment.clone(),
            })?;
        let format = ArchiveFormat::from_name(&entry.path)
            .ok_or_else(|| EngineError::UnsupportedFormat(entry.path.clone()))?;

        tracing::debug!(
            target: "installer",
            "Re-staging {} ({} bytes) from {}",
            entry.path,
            entry.size,
            archive.name()
        );
        let source = self.stager.stage_entry(&mut archive, &entry, format)?;
        drop(archive);

        let nested = OpenedArchive::open(
            segment.clone(),
            source,
            format,
            self.config.memory_stage_threshold,
        )?;
        self.descend_chain(nested, rest, writes, run)
    }

    /// Stream every planned file out of the innermost archive
    fn extract_group(
        &self,
        archive: &mut OpenedArchive,
        writes: &[&PlannedWrite<'_>],
        run: &mut InstallRun<'_>,
    ) -> Result<()> {
        let entries = archive.entries()?;
        let by_path: HashMap<&str, &EntryInfo> = entries
            .iter()
            .filter(|e| !e.is_dir)
            .map(|e| (e.path.as_str(), e))
            .collect();

        let mut wanted = Vec::new();
        let mut targets: HashMap<String, &PlannedWrite<'_>> = HashMap::new();
        for write in writes {
            let path = write.record.relative_path_in_archive.as_str();
            match by_path.get(path) {
                Some(entry) if !targets.contains_key(path) => {
                    wanted.push((*entry).clone());
                    targets.insert(path.to_string(), *write);
                }
                Some(_) => {
                    tracing::debug!(
                        target: "installer",
                        "Duplicate plan record for {} in {}",
                        path,
                        archive.name()
                    );
                    run.result.files_skipped += 1;
                }
                None => {
                    tracing::warn!(
                        target: "installer",
                        "Entry {} not found in {}, skipping",
                        path,
                        archive.name()
                    );
                    run.result.files_skipped += 1;
                }
            }
        }

        archive.visit_entries(&wanted, &mut |info, stream| {
            let Some(write) = targets.get(info.path.as_str()) else {
                return Ok(());
            };
            let outcome = match stream {
                Ok(reader) => self.extract_file(reader, write, run),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(written) => {
                    record_installed(write, written, run);
                    Ok(())
                }
                Err(e) if e.is_cancelled() => Err(e),
                Err(e) => {
                    tracing::error!(
                        target: "installer",
                        "Failed to install {}: {}",
                        write.record.file_name,
                        e
                    );
                    run.result
                        .errors
                        .push(format!("Failed to install {}: {}", write.record.file_name, e));
                    run.result.files_failed += 1;
                    Ok(())
                }
            }
        })
    }

    /// Write one entry to its destination and return the bytes written
    fn extract_file(
        &self,
        reader: &mut dyn Read,
        write: &PlannedWrite<'_>,
        run: &mut InstallRun<'_>,
    ) -> Result<u64> {
        self.control.ensure_not_cancelled()?;
        ensure_inside(run.destination, &write.destination)?;

        if write.record.size > self.config.large_file_threshold {
            tracing::debug!(
                target: "installer",
                "Large file strategy for {} ({} bytes)",
                write.record.file_name,
                write.record.size
            );
            self.extract_atomic(reader, write, self.config.large_copy_chunk_size, run)
        } else if write.decision == WriteDecision::Overwrite {
            // The existing file stays intact until the new one is complete
            self.extract_atomic(reader, write, self.config.copy_chunk_size, run)
        } else {
            self.extract_standard(reader, write, run)
        }
    }

    /// Buffered write straight to a new destination file. A partial file is
    /// removed when the copy does not finish.
    fn extract_standard(
        &self,
        reader: &mut dyn Read,
        write: &PlannedWrite<'_>,
        run: &mut InstallRun<'_>,
    ) -> Result<u64> {
        let path = &write.destination;
        let file = fs::File::create(path).map_err(|e| EngineError::io(path, e))?;
        let mut writer = BufWriter::with_capacity(self.config.copy_chunk_size, file);

        let copied = self
            .copy_with_progress(reader, &mut writer, self.config.copy_chunk_size, write, run)
            .and_then(|written| {
                writer.flush().map_err(|e| EngineError::io(path, e))?;
                Ok(written)
            });
        if copied.is_err() {
            drop(writer);
            let _ = fs::remove_file(path);
        }
        copied
    }

    /// Write through a temp file in the destination directory and rename it
    /// into place only when complete. On failure the temp file is dropped and
    /// whatever was at the destination before is left alone.
    fn extract_atomic(
        &self,
        reader: &mut dyn Read,
        write: &PlannedWrite<'_>,
        chunk_size: usize,
        run: &mut InstallRun<'_>,
    ) -> Result<u64> {
        let path = &write.destination;
        let mut temp = tempfile::NamedTempFile::new_in(run.destination)
            .map_err(|e| EngineError::io(run.destination, e))?;

        let written = {
            let mut writer = BufWriter::with_capacity(chunk_size, temp.as_file_mut());
            let written = self.copy_with_progress(reader, &mut writer, chunk_size, write, run)?;
            writer.flush().map_err(|e| EngineError::io(path, e))?;
            written
        };
        temp.as_file()
            .sync_all()
            .map_err(|e| EngineError::io(path, e))?;
        temp.persist(path)
            .map_err(|e| EngineError::io(path, e.error))?;
        Ok(written)
    }

    fn copy_with_progress(
        &self,
        reader: &mut dyn Read,
        writer: &mut dyn Write,
        chunk_size: usize,
        write: &PlannedWrite<'_>,
        run: &mut InstallRun<'_>,
    ) -> Result<u64> {
        let source_path = || PathBuf::from(&write.record.relative_path_in_archive);
        let mut buffer = vec![0u8; chunk_size];
        let mut written = 0u64;

        loop {
            self.control.ensure_not_cancelled()?;
            let read = reader
                .read(&mut buffer)
                .map_err(|e| EngineError::io(source_path(), e))?;
            if read == 0 {
                break;
            }
            writer
                .write_all(&buffer[..read])
                .map_err(|e| EngineError::io(&write.destination, e))?;

            written += read as u64;
            run.bytes_done += read as u64;
            if run.throttle.ready() {
                run.sink.bytes(run.bytes_done, &write.record.file_name);
            }
            run.pacer.tick();
        }
        Ok(written)
    }
}

fn record_installed(write: &PlannedWrite<'_>, written: u64, run: &mut InstallRun<'_>) {
    run.result.files_installed += 1;
    run.result.total_size_installed += written;
    if write.decision == WriteDecision::Overwrite {
        run.result.conflicts_resolved += 1;
    }
    run.installed
        .insert(write.record.file_name.clone(), write.record.size);

    run.sink.bytes(run.bytes_done, &write.record.file_name);
    run.throttle.mark();
    run.sink.file_completed();
}
