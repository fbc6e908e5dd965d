//! Per-disk I/O counters and their serialisable snapshot.

use std::ops::AddAssign;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::request::RequestKind;

/// Snapshot of disk queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoStats {
    /// Reads completed successfully
    pub reads_completed: u64,
    /// Writes completed successfully
    pub writes_completed: u64,
    /// Bytes transferred by successful reads
    pub bytes_read: u64,
    /// Bytes transferred by successful writes
    pub bytes_written: u64,
    /// Requests that completed with an error
    pub errors: u64,
    /// Requests admitted but not yet picked up by a worker
    pub queued: u64,
}

impl IoStats {
    /// Total requests that reached a terminal state.
    pub fn completed(&self) -> u64 {
        self.reads_completed + self.writes_completed + self.errors
    }
}

impl AddAssign for IoStats {
    fn add_assign(&mut self, other: Self) {
        self.reads_completed += other.reads_completed;
        self.writes_completed += other.writes_completed;
        self.bytes_read += other.bytes_read;
        self.bytes_written += other.bytes_written;
        self.errors += other.errors;
        self.queued += other.queued;
    }
}

impl std::iter::Sum for IoStats {
    fn sum<I: Iterator<Item = IoStats>>(iter: I) -> Self {
        iter.fold(IoStats::default(), |mut acc, s| {
            acc += s;
            acc
        })
    }
}

/// Live counters updated by the submission path and the workers.
#[derive(Debug, Default)]
pub(crate) struct DiskQueueStats {
    reads_completed: AtomicU64,
    writes_completed: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    errors: AtomicU64,
    queued: AtomicU64,
}

impl DiskQueueStats {
    pub(crate) fn add_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn remove_queued(&self) {
        self.queued.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn add_success(&self, kind: RequestKind, bytes: u64) {
        match kind {
            RequestKind::Read => {
                self.reads_completed.fetch_add(1, Ordering::Relaxed);
                self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
            }
            RequestKind::Write => {
                self.writes_completed.fetch_add(1, Ordering::Relaxed);
                self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn add_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }
}

impl From<&DiskQueueStats> for IoStats {
    fn from(stats: &DiskQueueStats) -> Self {
        IoStats {
            reads_completed: stats.reads_completed.load(Ordering::Relaxed),
            writes_completed: stats.writes_completed.load(Ordering::Relaxed),
            bytes_read: stats.bytes_read.load(Ordering::Relaxed),
            bytes_written: stats.bytes_written.load(Ordering::Relaxed),
            errors: stats.errors.load(Ordering::Relaxed),
            queued: stats.queued.load(Ordering::Relaxed),
        }
    }
}
