//! Per-disk request dispatcher.
//!
//! A [`DiskQueue`] owns a read queue, a write queue and a fixed set of worker
//! threads. Submissions append to one of the queues and release one permit of
//! the worker semaphore; a worker takes a permit, picks the next request by
//! the fairness policy, performs the transfer and delivers the completion
//! before picking again.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace};

use crate::block::DiskId;
use crate::config::DiskQueueConfig;
use crate::diagnostics::Diagnostics;
use crate::error::{IoError, IoResult};
use crate::request::{Request, RequestHandle, RequestKind};
use crate::semaphore::Semaphore;
use crate::stats::{DiskQueueStats, IoStats};

/// Which queue a worker serves when both hold requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FairnessPolicy {
    /// Writes first, so dirty buffers are released early.
    #[default]
    Write,
    /// Reads first.
    Read,
    /// Submission order across both queues.
    None,
}

impl FairnessPolicy {
    fn to_u8(self) -> u8 {
        match self {
            FairnessPolicy::Write => 0,
            FairnessPolicy::Read => 1,
            FairnessPolicy::None => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => FairnessPolicy::Read,
            2 => FairnessPolicy::None,
            _ => FairnessPolicy::Write,
        }
    }
}

impl fmt::Display for FairnessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FairnessPolicy::Write => write!(f, "write"),
            FairnessPolicy::Read => write!(f, "read"),
            FairnessPolicy::None => write!(f, "none"),
        }
    }
}

struct Queued {
    seq: u64,
    request: Request,
}

enum Pickup {
    Serve(Request),
    Idle,
    Stop,
}

struct Shared {
    disk: DiskId,
    reads: Mutex<VecDeque<Queued>>,
    writes: Mutex<VecDeque<Queued>>,
    permits: Semaphore,
    accepting: AtomicBool,
    fairness: AtomicU8,
    next_seq: AtomicU64,
    stats: DiskQueueStats,
}

impl Shared {
    fn fairness(&self) -> FairnessPolicy {
        FairnessPolicy::from_u8(self.fairness.load(Ordering::Acquire))
    }

    /// Picks the next request. Both queue locks are held so the emptiness
    /// check and the shutdown flag are observed together.
    fn pickup(&self) -> Pickup {
        let mut writes = self.writes.lock();
        let mut reads = self.reads.lock();
        let take_write = match self.fairness() {
            FairnessPolicy::Write => !writes.is_empty(),
            FairnessPolicy::Read => reads.is_empty(),
            FairnessPolicy::None => match (writes.front(), reads.front()) {
                (Some(w), Some(r)) => w.seq < r.seq,
                (Some(_), None) => true,
                _ => false,
            },
        };
        let next = if take_write {
            writes.pop_front()
        } else {
            reads.pop_front()
        };
        match next {
            Some(queued) => Pickup::Serve(queued.request),
            None if !self.accepting.load(Ordering::Acquire) => Pickup::Stop,
            None => Pickup::Idle,
        }
    }

    fn run_worker(&self, index: usize) {
        debug!(disk = %self.disk, worker = index, "disk queue worker started");
        loop {
            self.permits.acquire();
            match self.pickup() {
                Pickup::Serve(request) => {
                    self.stats.remove_queued();
                    trace!(
                        disk = %self.disk,
                        request = %request.id(),
                        kind = %request.kind(),
                        offset = request.offset(),
                        len = request.len(),
                        "dispatching request"
                    );
                    request.serve(&self.stats);
                }
                Pickup::Idle => continue,
                Pickup::Stop => break,
            }
        }
        debug!(disk = %self.disk, worker = index, "disk queue worker stopped");
    }
}

/// Dispatcher serialising the requests of one disk onto its worker threads.
///
/// Within one queue requests of the same kind are dispatched in submission
/// order; across kinds the [`FairnessPolicy`] decides. Dropping the queue
/// shuts it down.
pub struct DiskQueue {
    shared: Arc<Shared>,
    config: DiskQueueConfig,
    worker_ids: Vec<ThreadId>,
    workers: Mutex<Workers>,
    joined: Condvar,
}

enum Workers {
    Running(Vec<JoinHandle<()>>),
    Joining,
    Joined,
}

impl DiskQueue {
    /// Starts `config.max_in_flight` workers for `disk`.
    ///
    /// Each worker installs `diagnostics` as its default dispatcher.
    pub fn new(disk: DiskId, config: DiskQueueConfig, diagnostics: &Diagnostics) -> IoResult<Self> {
        let shared = Arc::new(Shared {
            disk,
            reads: Mutex::new(VecDeque::new()),
            writes: Mutex::new(VecDeque::new()),
            permits: Semaphore::new(0),
            accepting: AtomicBool::new(true),
            fairness: AtomicU8::new(config.fairness.to_u8()),
            next_seq: AtomicU64::new(0),
            stats: DiskQueueStats::default(),
        });
        let mut handles = Vec::with_capacity(config.workers());
        for index in 0..config.workers() {
            let name = format!("{}-{}-{}", config.thread_name_prefix, disk.0, index);
            let worker = Arc::clone(&shared);
            let diagnostics = diagnostics.clone();
            let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
                let _guard = diagnostics.install();
                worker.run_worker(index);
            });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    stop_workers(&shared, handles);
                    return Err(IoError::WorkerSpawn { name, source });
                }
            }
        }

        let queue = Self {
            shared,
            config,
            worker_ids: handles.iter().map(|h| h.thread().id()).collect(),
            workers: Mutex::new(Workers::Running(handles)),
            joined: Condvar::new(),
        };

        diagnostics.in_scope(|| {
            info!(
                disk = %disk,
                workers = queue.config.workers(),
                fairness = %queue.config.fairness,
                "disk queue started"
            )
        });
        Ok(queue)
    }

    /// Disk served by this queue.
    pub fn disk(&self) -> DiskId {
        self.shared.disk
    }

    /// Configuration the queue was started with.
    pub fn config(&self) -> &DiskQueueConfig {
        &self.config
    }

    /// Enqueues a read request and returns without waiting for it.
    ///
    /// Requests are always queued by their own kind, so a write passed here
    /// still lands in the write queue.
    pub fn add_read_request(&self, request: Request) -> IoResult<RequestHandle> {
        self.add_request(request)
    }

    /// Enqueues a write request and returns without waiting for it.
    ///
    /// Requests are always queued by their own kind.
    pub fn add_write_request(&self, request: Request) -> IoResult<RequestHandle> {
        self.add_request(request)
    }

    /// Enqueues `request` into the queue matching its kind.
    ///
    /// After shutdown the request is completed immediately on the calling
    /// thread with [`IoError::QueueClosed`] and the same error is returned.
    pub fn add_request(&self, request: Request) -> IoResult<RequestHandle> {
        let queue = match request.kind() {
            RequestKind::Read => &self.shared.reads,
            RequestKind::Write => &self.shared.writes,
        };
        let handle = request.handle();
        let mut pending = queue.lock();
        if !self.shared.accepting.load(Ordering::Acquire) {
            drop(pending);
            return Err(reject(self.shared.disk, &self.shared.stats, request));
        }
        let seq = self.shared.next_seq.fetch_add(1, Ordering::Relaxed);
        pending.push_back(Queued { seq, request });
        self.shared.stats.add_queued();
        drop(pending);

        self.shared.permits.release(1);
        Ok(handle)
    }

    /// Current fairness policy.
    pub fn fairness_policy(&self) -> FairnessPolicy {
        self.shared.fairness()
    }

    /// Changes the fairness policy.
    ///
    /// Workers read the policy once per pickup, so a pickup racing with this
    /// call may still use the previous policy.
    pub fn set_fairness_policy(&self, policy: FairnessPolicy) {
        self.shared.fairness.store(policy.to_u8(), Ordering::Release);
        debug!(disk = %self.shared.disk, policy = %policy, "fairness policy changed");
    }

    /// Number of queued reads and writes not yet picked up.
    pub fn pending(&self) -> (usize, usize) {
        let writes = self.shared.writes.lock().len();
        let reads = self.shared.reads.lock().len();
        (reads, writes)
    }

    /// Whether submissions are still accepted.
    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::Acquire)
    }

    /// Snapshot of this queue's counters.
    pub fn stats(&self) -> IoStats {
        IoStats::from(&self.shared.stats)
    }

    /// Stops admissions, drains every queued request and joins the workers.
    ///
    /// Requests queued before the call are all served and completed before
    /// it returns. Concurrent callers all wait for the join. Called from a
    /// completion callback of this queue it only stops admissions and
    /// returns; the workers exit once the queues are drained.
    ///
    /// A callback must not shut down a different queue whose own callbacks
    /// may shut down this one.
    pub fn shutdown(&self) {
        let first = {
            let _writes = self.shared.writes.lock();
            let _reads = self.shared.reads.lock();
            self.shared.accepting.swap(false, Ordering::AcqRel)
        };
        if first {
            let (reads, writes) = self.pending();
            debug!(
                disk = %self.shared.disk,
                queued_reads = reads,
                queued_writes = writes,
                "disk queue shutting down"
            );
            self.shared.permits.release(self.worker_ids.len());
        }

        if self.worker_ids.contains(&thread::current().id()) {
            return;
        }

        let handles = {
            let mut workers = self.workers.lock();
            loop {
                match std::mem::replace(&mut *workers, Workers::Joining) {
                    Workers::Running(handles) => break handles,
                    Workers::Joining => self.joined.wait(&mut workers),
                    Workers::Joined => {
                        *workers = Workers::Joined;
                        return;
                    }
                }
            }
        };

        join_workers(handles);
        *self.workers.lock() = Workers::Joined;
        self.joined.notify_all();
    }
}

fn join_workers(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let name = handle.thread().name().unwrap_or("disk-queue").to_string();
        if handle.join().is_err() {
            error!("Disk queue worker {} panicked", name);
        }
    }
}

/// Stops and joins workers started before a later spawn failed.
fn stop_workers(shared: &Shared, handles: Vec<JoinHandle<()>>) {
    {
        let _writes = shared.writes.lock();
        let _reads = shared.reads.lock();
        shared.accepting.store(false, Ordering::Release);
    }
    shared.permits.release(handles.len());
    join_workers(handles);
}

/// Completes a request that arrived after shutdown.
pub(crate) fn reject(disk: DiskId, stats: &DiskQueueStats, request: Request) -> IoError {
    debug!(disk = %disk, request = %request.id(), "request rejected, queue shut down");
    fail(stats, request, IoError::QueueClosed { disk });
    IoError::QueueClosed { disk }
}

/// Completes a request that never reached a worker with `error`.
pub(crate) fn fail(stats: &DiskQueueStats, request: Request, error: IoError) {
    stats.add_error();
    request.complete(Err(error));
}

impl Drop for DiskQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for DiskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (reads, writes) = self.pending();
        f.debug_struct("DiskQueue")
            .field("disk", &self.shared.disk)
            .field("fairness", &self.fairness_policy())
            .field("accepting", &self.is_accepting())
            .field("queued_reads", &reads)
            .field("queued_writes", &writes)
            .finish()
    }
}
