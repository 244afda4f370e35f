//! Size-gated stream staging.
//!
//! Archive libraries need random access, but a nested archive arrives as a
//! forward-only decompression stream. The stager copies that stream into
//! memory or, above the threshold, into a temp file that is deleted when the
//! returned [`ArchiveSource`] is dropped.

use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use crate::archive::{ArchiveFormat, ArchiveSource, EntryInfo, OpenedArchive};
use crate::core::config::EngineConfig;
use crate::core::pacing::Pacer;
use crate::core::task_control::TaskControl;
use crate::error::{EngineError, Result};

/// Maximum consecutive interrupted reads tolerated by the defensive copy
const MAX_INTERRUPTED_RETRIES: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStrategy {
    /// Large chunks, buffered writes
    Direct,
    /// Small chunks, retries interrupted reads, flushes every chunk
    Defensive,
}

impl CopyStrategy {
    /// Strategies in the order they are attempted
    pub const ALL: [CopyStrategy; 2] = [CopyStrategy::Direct, CopyStrategy::Defensive];
}

pub struct Stager {
    memory_threshold: u64,
    staging_dir: Option<PathBuf>,
    chunk_size: usize,
    defensive_chunk_size: usize,
    yield_interval: Duration,
    control: TaskControl,
}

impl Stager {
    pub fn new(config: &EngineConfig, control: TaskControl) -> Self {
        Self {
            memory_threshold: config.memory_stage_threshold,
            staging_dir: config.staging_dir.clone(),
            chunk_size: config.copy_chunk_size,
            defensive_chunk_size: config.defensive_chunk_size,
            yield_interval: config.yield_interval(),
            control,
        }
    }

    pub fn memory_threshold(&self) -> u64 {
        self.memory_threshold
    }

    /// True when a stream of this size and format will be staged on disk
    pub fn stages_on_disk(&self, estimated_size: u64, format: ArchiveFormat) -> bool {
        estimated_size > self.memory_threshold || format.requires_path()
    }

    /// Materialize `reader` into a random-access source.
    pub fn stage(
        &self,
        name: &str,
        reader: &mut dyn Read,
        estimated_size: u64,
        format: ArchiveFormat,
        strategy: CopyStrategy,
    ) -> Result<ArchiveSource> {
        if self.stages_on_disk(estimated_size, format) {
            tracing::debug!(
                target: "staging",
                "Staging {} ({} bytes) to temp file [{:?}]",
                name,
                estimated_size,
                strategy
            );
            self.stage_on_disk(name, reader, estimated_size, format, strategy)
        } else {
            tracing::debug!(
                target: "staging",
                "Staging {} ({} bytes) in memory [{:?}]",
                name,
                estimated_size,
                strategy
            );
            self.stage_in_memory(name, reader, estimated_size, strategy)
        }
    }

    fn stage_in_memory(
        &self,
        name: &str,
        reader: &mut dyn Read,
        estimated_size: u64,
        strategy: CopyStrategy,
    ) -> Result<ArchiveSource> {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(estimated_size as usize)
            .map_err(|_| {
                EngineError::staging(
                    name,
                    format!("cannot reserve {} bytes of memory", estimated_size),
                )
            })?;
        let copied = self.copy_chunks(name, reader, &mut buffer, strategy)?;
        check_copied_size(name, copied, estimated_size);
        Ok(ArchiveSource::Memory(std::io::Cursor::new(buffer)))
    }

    fn stage_on_disk(
        &self,
        name: &str,
        reader: &mut dyn Read,
        estimated_size: u64,
        format: ArchiveFormat,
        strategy: CopyStrategy,
    ) -> Result<ArchiveSource> {
        // Dropping the NamedTempFile on any error path removes the file
        let mut builder = tempfile::Builder::new();
        builder.prefix("deepunpack_stage_").suffix(format.temp_suffix());
        let mut temp = match &self.staging_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| EngineError::staging(name, format!("cannot create temp file: {}", e)))?;

        let copied = {
            let mut writer = BufWriter::new(temp.as_file_mut());
            let copied = self.copy_chunks(name, reader, &mut writer, strategy)?;
            writer
                .flush()
                .map_err(|e| EngineError::staging(name, format!("temp file write failed: {}", e)))?;
            copied
        };
        if strategy == CopyStrategy::Defensive {
            temp.as_file()
                .sync_all()
                .map_err(|e| EngineError::staging(name, format!("temp file sync failed: {}", e)))?;
        }
        check_copied_size(name, copied, estimated_size);

        ArchiveSource::from_temp_path(temp.into_temp_path())
    }

    /// Chunked copy with a cancellation check per chunk and time-based yields
    fn copy_chunks(
        &self,
        name: &str,
        reader: &mut dyn Read,
        writer: &mut dyn Write,
        strategy: CopyStrategy,
    ) -> Result<u64> {
        let chunk_size = match strategy {
            CopyStrategy::Direct => self.chunk_size,
            CopyStrategy::Defensive => self.defensive_chunk_size,
        };
        let mut buffer = vec![0u8; chunk_size];
        let mut pacer = Pacer::new(self.yield_interval);
        let mut total = 0u64;
        let mut interrupted = 0u32;

        loop {
            self.control.ensure_not_cancelled()?;

            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    interrupted = 0;
                    n
                }
                Err(e)
                    if e.kind() == ErrorKind::Interrupted
                        && strategy == CopyStrategy::Defensive
                        && interrupted < MAX_INTERRUPTED_RETRIES =>
                {
                    interrupted += 1;
                    continue;
                }
                Err(e) => {
                    return Err(EngineError::staging(name, format!("read failed: {}", e)));
                }
            };

            writer.write_all(&buffer[..read]).map_err(|e| {
                EngineError::staging(name, format!("write failed after {} bytes: {}", total, e))
            })?;
            if strategy == CopyStrategy::Defensive {
                writer
                    .flush()
                    .map_err(|e| EngineError::staging(name, format!("flush failed: {}", e)))?;
            }
            total += read as u64;
            pacer.tick();
        }

        Ok(total)
    }

    /// Stage one archive entry, retrying with the defensive strategy when the
    /// direct copy fails.
    pub fn stage_entry(
        &self,
        archive: &mut OpenedArchive,
        entry: &EntryInfo,
        format: ArchiveFormat,
    ) -> Result<ArchiveSource> {
        self.stage_with_fallback(&entry.path, |strategy| {
            let mut staged: Option<Result<ArchiveSource>> = None;
            let visit = archive.visit_entries(std::slice::from_ref(entry), &mut |info, stream| {
                let reader = stream?;
                staged = Some(self.stage(&info.path, reader, info.size, format, strategy));
                Ok(())
            });
            match (visit, staged) {
                (_, Some(result)) => result,
                (Err(e), None) => Err(e),
                (Ok(()), None) => Err(EngineError::staging(&entry.path, "entry not found in archive")),
            }
        })
    }

    /// Run `attempt` once per strategy until one succeeds. Cancellation is
    /// never retried.
    fn stage_with_fallback(
        &self,
        name: &str,
        mut attempt: impl FnMut(CopyStrategy) -> Result<ArchiveSource>,
    ) -> Result<ArchiveSource> {
        let mut last_error = None;

        for strategy in CopyStrategy::ALL {
            match attempt(strategy) {
                Ok(source) => return Ok(source),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        target: "staging",
                        "Staging {} with {:?} strategy failed: {}",
                        name,
                        strategy,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| EngineError::staging(name, "no staging strategy succeeded")))
    }
}

fn check_copied_size(name: &str, copied: u64, estimated_size: u64) {
    if estimated_size > 0 && copied != estimated_size {
        tracing::warn!(
            target: "staging",
            "Staged {} bytes for {} but header declared {}",
            copied,
            name,
            estimated_size
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::test_support::zip_bytes;
    use std::io::Cursor;

    fn stager(threshold: u64) -> Stager {
        let config = EngineConfig {
            memory_stage_threshold: threshold,
            ..EngineConfig::default()
        };
        Stager::new(&config, TaskControl::new())
    }

    /// Reader that fails after yielding `good` bytes
    struct FailingReader {
        good: usize,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.good == 0 {
                return Err(std::io::Error::new(ErrorKind::InvalidData, "corrupt stream"));
            }
            let n = buf.len().min(self.good);
            buf[..n].fill(7);
            self.good -= n;
            Ok(n)
        }
    }

    #[test]
    fn test_small_stream_stays_in_memory() {
        let data = vec![1u8; 4096];
        let source = stager(1 << 20)
            .stage("small.zip", &mut Cursor::new(data), 4096, ArchiveFormat::Zip, CopyStrategy::Direct)
            .unwrap();
        assert!(source.is_in_memory());
    }

    #[test]
    fn test_large_stream_goes_to_disk_and_is_removed_on_drop() {
        let data = vec![2u8; 8192];
        let source = stager(1024)
            .stage("big.7z", &mut Cursor::new(data), 8192, ArchiveFormat::SevenZ, CopyStrategy::Direct)
            .unwrap();
        let path = source.path().unwrap().to_path_buf();
        assert!(path.exists());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 8192);

        drop(source);
        assert!(!path.exists());
    }

    #[test]
    fn test_rar_is_always_staged_on_disk() {
        let source = stager(1 << 20)
            .stage("tiny.rar", &mut Cursor::new(vec![0u8; 16]), 16, ArchiveFormat::Rar, CopyStrategy::Direct)
            .unwrap();
        assert!(source.path().is_some());
    }

    #[test]
    fn test_read_failure_is_staging_error() {
        let result = stager(1024).stage(
            "broken.zip",
            &mut FailingReader { good: 10_000 },
            20_000,
            ArchiveFormat::Zip,
            CopyStrategy::Direct,
        );
        assert!(matches!(result, Err(EngineError::Staging { .. })));
    }

    #[test]
    fn test_cancelled_before_copy() {
        let control = TaskControl::new();
        control.cancel();
        let stager = Stager::new(&EngineConfig::default(), control);
        let result = stager.stage(
            "any.zip",
            &mut Cursor::new(vec![0u8; 10]),
            10,
            ArchiveFormat::Zip,
            CopyStrategy::Direct,
        );
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }

    #[test]
    fn test_stage_entry_from_archive() {
        let inner = zip_bytes(&[("mod.esp", b"plugin")]);
        let outer = zip_bytes(&[("inner.zip", &inner)]);
        let mut archive = OpenedArchive::open(
            "outer.zip",
            ArchiveSource::Memory(Cursor::new(outer)),
            ArchiveFormat::Zip,
            1 << 20,
        )
        .unwrap();
        let entry = archive.entries().unwrap().remove(0);

        let staged = stager(1 << 20)
            .stage_entry(&mut archive, &entry, ArchiveFormat::Zip)
            .unwrap();
        let mut nested = OpenedArchive::open("inner.zip", staged, ArchiveFormat::Zip, 1 << 20).unwrap();
        let entries = nested.entries().unwrap();
        assert_eq!(entries[0].path, "mod.esp");
    }

    /// Reader whose first read is interrupted
    struct InterruptedOnce {
        data: Cursor<Vec<u8>>,
        interrupted: bool,
    }

    impl Read for InterruptedOnce {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::new(ErrorKind::Interrupted, "signal"));
            }
            self.data.read(buf)
        }
    }

    #[test]
    fn test_defensive_strategy_recovers_from_failed_direct_copy() {
        let stager = stager(1 << 20);
        let mut attempts = Vec::new();
        let source = stager
            .stage_with_fallback("flaky.zip", |strategy| {
                attempts.push(strategy);
                let mut reader = InterruptedOnce {
                    data: Cursor::new(vec![3u8; 2048]),
                    interrupted: false,
                };
                stager.stage("flaky.zip", &mut reader, 2048, ArchiveFormat::Zip, strategy)
            })
            .unwrap();

        assert_eq!(attempts, vec![CopyStrategy::Direct, CopyStrategy::Defensive]);
        match source {
            ArchiveSource::Memory(cursor) => assert_eq!(cursor.into_inner(), vec![3u8; 2048]),
            _ => panic!("expected an in-memory source"),
        }
    }

    #[test]
    fn test_cancellation_is_not_retried() {
        let stager = stager(1 << 20);
        let mut attempts = 0;
        let result = stager.stage_with_fallback("any.zip", |_| {
            attempts += 1;
            Err(EngineError::Cancelled)
        });
        assert!(matches!(result, Err(EngineError::Cancelled)));
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_failed_disk_staging_removes_temp_file() {
        let staging = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            memory_stage_threshold: 1024,
            staging_dir: Some(staging.path().to_path_buf()),
            ..EngineConfig::default()
        };
        let stager = Stager::new(&config, TaskControl::new());

        for strategy in CopyStrategy::ALL {
            let result = stager.stage(
                "broken.7z",
                &mut FailingReader { good: 100_000 },
                200_000,
                ArchiveFormat::SevenZ,
                strategy,
            );
            assert!(matches!(result, Err(EngineError::Staging { .. })));
        }
        assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);

        let ok = stager
            .stage("fine.7z", &mut Cursor::new(vec![1u8; 4096]), 4096, ArchiveFormat::SevenZ, CopyStrategy::Direct)
            .unwrap();
        assert!(ok.path().unwrap().starts_with(staging.path()));
    }
}
