//! Registry routing requests to the disk queue of their file's disk.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

use crate::block::DiskId;
use crate::buffer::AlignedBuffer;
use crate::config::DiskQueueConfig;
use crate::diagnostics::Diagnostics;
use crate::disk_queue::{fail, reject, DiskQueue};
use crate::error::{IoError, IoResult};
use crate::file::FileHandle;
use crate::request::{CompletedRequest, Request, RequestHandle};
use crate::stats::{DiskQueueStats, IoStats};

/// Lazily created set of disk queues, one per [`DiskId`].
///
/// Constructed explicitly and shared by reference; there is no global
/// instance. Dropping the registry shuts every queue down.
pub struct DiskQueues {
    config: DiskQueueConfig,
    diagnostics: Diagnostics,
    queues: DashMap<DiskId, Arc<DiskQueue>>,
    closed: AtomicBool,
    rejected: DiskQueueStats,
}

impl DiskQueues {
    /// Creates an empty registry. Queues started later use `config` and
    /// `diagnostics`.
    pub fn new(config: DiskQueueConfig, diagnostics: &Diagnostics) -> Self {
        Self {
            config,
            diagnostics: diagnostics.clone(),
            queues: DashMap::new(),
            closed: AtomicBool::new(false),
            rejected: DiskQueueStats::default(),
        }
    }

    /// Returns the queue of `disk`, starting it on first use.
    pub fn queue(&self, disk: DiskId) -> IoResult<Arc<DiskQueue>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IoError::QueueClosed { disk });
        }
        if let Some(queue) = self.queues.get(&disk) {
            return Ok(Arc::clone(queue.value()));
        }
        match self.queues.entry(disk) {
            Entry::Occupied(e) => Ok(Arc::clone(e.get())),
            Entry::Vacant(e) => {
                // The vacant entry holds the shard lock, so a shutdown that
                // flipped `closed` either sees this insert or we see the flag.
                if self.closed.load(Ordering::Acquire) {
                    return Err(IoError::QueueClosed { disk });
                }
                let queue = Arc::new(DiskQueue::new(disk, self.config.clone(), &self.diagnostics)?);
                e.insert(Arc::clone(&queue));
                Ok(queue)
            }
        }
    }

    /// Routes `request` to the queue of its file's disk.
    pub fn submit(&self, request: Request) -> IoResult<RequestHandle> {
        let disk = request.file().disk_id();
        match self.queue(disk) {
            Ok(queue) => queue.add_request(request),
            Err(IoError::QueueClosed { .. }) => Err(reject(disk, &self.rejected, request)),
            Err(IoError::WorkerSpawn { name, source }) => {
                let delivered = IoError::WorkerSpawn {
                    name: name.clone(),
                    source: std::io::Error::new(source.kind(), source.to_string()),
                };
                fail(&self.rejected, request, delivered);
                Err(IoError::WorkerSpawn { name, source })
            }
            Err(e) => Err(e),
        }
    }

    /// Reads `buffer.len()` bytes of `file` at `offset`; `on_done` runs on
    /// the disk's worker when the read completes.
    pub fn submit_read(
        &self,
        file: Arc<dyn FileHandle>,
        offset: u64,
        buffer: AlignedBuffer,
        on_done: impl FnOnce(&CompletedRequest) + Send + 'static,
    ) -> IoResult<RequestHandle> {
        self.submit(Request::read(file, offset, buffer).on_complete(on_done))
    }

    /// Writes `buffer` to `file` at `offset`; `on_done` runs on the disk's
    /// worker when the write completes.
    pub fn submit_write(
        &self,
        file: Arc<dyn FileHandle>,
        offset: u64,
        buffer: AlignedBuffer,
        on_done: impl FnOnce(&CompletedRequest) + Send + 'static,
    ) -> IoResult<RequestHandle> {
        self.submit(Request::write(file, offset, buffer).on_complete(on_done))
    }

    /// Disks with a running queue, in ascending order.
    pub fn disks(&self) -> Vec<DiskId> {
        let mut disks: Vec<DiskId> = self.queues.iter().map(|e| *e.key()).collect();
        disks.sort();
        disks
    }

    /// Counters summed over every queue, including submissions rejected by
    /// the registry itself.
    pub fn stats(&self) -> IoStats {
        let mut total = IoStats::from(&self.rejected);
        for entry in self.queues.iter() {
            total += entry.value().stats();
        }
        total
    }

    /// Counters of each queue.
    pub fn stats_by_disk(&self) -> BTreeMap<DiskId, IoStats> {
        self.queues
            .iter()
            .map(|e| (*e.key(), e.value().stats()))
            .collect()
    }

    /// Shuts every queue down, draining their pending requests.
    ///
    /// Later submissions fail with [`IoError::QueueClosed`].
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let queues: Vec<Arc<DiskQueue>> = self.queues.iter().map(|e| Arc::clone(e.value())).collect();
        for queue in &queues {
            queue.shutdown();
        }
        self.diagnostics
            .in_scope(|| info!(queues = queues.len(), "disk queues shut down"));
    }
}

impl Drop for DiskQueues {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for DiskQueues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskQueues")
            .field("disks", &self.disks())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{MemoryFile, OpenMode};

    fn file_on(disk: u64, name: &str) -> Arc<dyn FileHandle> {
        Arc::new(MemoryFile::open(name, OpenMode::READ_WRITE, Some(DiskId(disk))).unwrap())
    }

    #[test]
    fn test_one_queue_per_disk() {
        let queues = DiskQueues::new(DiskQueueConfig::default(), &Diagnostics::silent());
        let a = queues.queue(DiskId(1)).unwrap();
        let b = queues.queue(DiskId(1)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        queues.queue(DiskId(0)).unwrap();
        assert_eq!(queues.disks(), vec![DiskId(0), DiskId(1)]);
    }

    #[test]
    fn test_routes_by_disk_and_aggregates_stats() {
        let queues = DiskQueues::new(DiskQueueConfig::default(), &Diagnostics::silent());
        let f0 = file_on(0, "mem://f0");
        let f1 = file_on(1, "mem://f1");

        let handles = vec![
            queues.submit_write(Arc::clone(&f0), 0, AlignedBuffer::new(32), |_| {}).unwrap(),
            queues.submit_write(Arc::clone(&f1), 0, AlignedBuffer::new(64), |_| {}).unwrap(),
            queues.submit_write(Arc::clone(&f1), 64, AlignedBuffer::new(64), |_| {}).unwrap(),
        ];
        for done in crate::wait_all(handles) {
            assert!(done.is_ok());
        }
        let read = queues
            .submit_read(Arc::clone(&f1), 0, AlignedBuffer::new(128), |_| {})
            .unwrap()
            .wait();
        assert!(read.is_ok());

        let total = queues.stats();
        assert_eq!(total.writes_completed, 3);
        assert_eq!(total.bytes_written, 160);
        assert_eq!(total.bytes_read, 128);

        let by_disk = queues.stats_by_disk();
        assert_eq!(by_disk[&DiskId(0)].writes_completed, 1);
        assert_eq!(by_disk[&DiskId(1)].writes_completed, 2);
        assert_eq!(by_disk[&DiskId(1)].reads_completed, 1);
    }

    #[test]
    fn test_failed_submission_delivers_its_error() {
        let queues = DiskQueues::new(DiskQueueConfig::default(), &Diagnostics::silent());
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let slot = Arc::clone(&seen);
        let request = Request::write(file_on(3, "mem://spawn"), 0, AlignedBuffer::new(8))
            .on_complete(move |done| *slot.lock() = done.result.as_ref().err().map(IoError::kind));
        let handle = request.handle();
        fail(
            &queues.rejected,
            request,
            IoError::WorkerSpawn {
                name: "disk-queue-3-0".to_string(),
                source: std::io::Error::from(std::io::ErrorKind::WouldBlock),
            },
        );
        assert_eq!(*seen.lock(), Some(crate::IoErrorKind::WorkerSpawn));
        assert!(matches!(handle.wait().result, Err(IoError::WorkerSpawn { .. })));
        assert_eq!(queues.stats().errors, 1);
    }

    #[test]
    fn test_queue_creation_racing_shutdown() {
        for _ in 0..20 {
            let queues = Arc::new(DiskQueues::new(DiskQueueConfig::default(), &Diagnostics::silent()));
            let creators: Vec<_> = (0..4u64)
                .map(|t| {
                    let queues = Arc::clone(&queues);
                    std::thread::spawn(move || {
                        for d in 0..8u64 {
                            let _ = queues.queue(DiskId(t * 8 + d));
                        }
                    })
                })
                .collect();
            queues.shutdown();
            for c in creators {
                c.join().unwrap();
            }
            assert!(queues.queues.iter().all(|e| !e.value().is_accepting()));
            assert!(queues.queue(DiskId(1000)).is_err());
        }
    }

    #[test]
    fn test_shutdown_rejects_new_submissions() {
        let queues = DiskQueues::new(DiskQueueConfig::default(), &Diagnostics::silent());
        let f = file_on(2, "mem://late");
        let early = queues
            .submit_write(Arc::clone(&f), 0, AlignedBuffer::new(8), |_| {})
            .unwrap();
        queues.shutdown();
        assert!(early.is_done());

        let err = queues
            .submit_write(f, 0, AlignedBuffer::new(8), |done| assert!(!done.is_ok()))
            .unwrap_err();
        assert!(matches!(err, IoError::QueueClosed { disk: DiskId(2) }));
        assert!(queues.queue(DiskId(9)).is_err());
        assert_eq!(queues.stats().errors, 1);
    }
}
