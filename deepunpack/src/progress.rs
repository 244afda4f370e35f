//! One-way progress reporting for the scan and install phases.

use tokio::sync::mpsc::UnboundedSender;

/// Receives progress from a running operation.
///
/// Calls arrive on the worker in processing order. Byte reports are already
/// throttled by the caller.
pub trait ProgressSink: Send + Sync {
    /// Human-readable status line
    fn status(&self, _message: &str) {}
    /// Work totals after conflict resolution, reported once before extraction
    fn totals(&self, _files: usize, _bytes: u64) {}
    /// Cumulative bytes written so far and the file being written
    fn bytes(&self, _processed: u64, _current_file: &str) {}
    /// One file finished writing
    fn file_completed(&self) {}
}

/// No-op sink for silent operation.
pub struct SilentSink;

impl ProgressSink for SilentSink {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Status(String),
    Totals { files: usize, bytes: u64 },
    Bytes { processed: u64, current_file: String },
    FileCompleted,
}

/// Pushes events into a channel so an interactive surface can poll them
/// while the operation runs on a worker.
pub struct ChannelSink {
    tx: UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }

    fn send(&self, event: ProgressEvent) {
        // A dropped receiver only means nobody is watching
        let _ = self.tx.send(event);
    }
}

impl ProgressSink for ChannelSink {
    fn status(&self, message: &str) {
        self.send(ProgressEvent::Status(message.to_string()));
    }

    fn totals(&self, files: usize, bytes: u64) {
        self.send(ProgressEvent::Totals { files, bytes });
    }

    fn bytes(&self, processed: u64, current_file: &str) {
        self.send(ProgressEvent::Bytes {
            processed,
            current_file: current_file.to_string(),
        });
    }

    fn file_completed(&self) {
        self.send(ProgressEvent::FileCompleted);
    }
}
