//! I/O requests, their completion records and the handles callers wait on.
//!
//! A [`Request`] owns its buffer from submission until completion. When the
//! worker finishes the transfer it builds a [`CompletedRequest`] that carries
//! the buffer back, runs the completion callback with it, and then parks it
//! in a shared slot where the caller's [`RequestHandle`] picks it up.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{error, warn};

use crate::buffer::AlignedBuffer;
use crate::error::IoResult;
use crate::file::FileHandle;
use crate::stats::DiskQueueStats;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    /// Fill the buffer from the file.
    Read,
    /// Store the buffer into the file.
    Write,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Read => write!(f, "read"),
            RequestKind::Write => write!(f, "write"),
        }
    }
}

/// Process-unique request number, increasing in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl RequestId {
    fn next() -> Self {
        RequestId(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

/// Completion callback, run on the worker thread exactly once.
pub type CompletionCallback = Box<dyn FnOnce(&CompletedRequest) + Send + 'static>;

/// One pending read or write.
pub struct Request {
    id: RequestId,
    kind: RequestKind,
    file: Arc<dyn FileHandle>,
    offset: u64,
    buffer: AlignedBuffer,
    on_complete: Option<CompletionCallback>,
    slot: Arc<CompletionSlot>,
}

impl Request {
    /// Creates a request transferring `buffer.len()` bytes at `offset`.
    pub fn new(
        kind: RequestKind,
        file: Arc<dyn FileHandle>,
        offset: u64,
        buffer: AlignedBuffer,
    ) -> Self {
        Self {
            id: RequestId::next(),
            kind,
            file,
            offset,
            buffer,
            on_complete: None,
            slot: Arc::new(CompletionSlot::default()),
        }
    }

    /// Read request filling `buffer` from `offset`.
    pub fn read(file: Arc<dyn FileHandle>, offset: u64, buffer: AlignedBuffer) -> Self {
        Self::new(RequestKind::Read, file, offset, buffer)
    }

    /// Write request storing `buffer` at `offset`.
    pub fn write(file: Arc<dyn FileHandle>, offset: u64, buffer: AlignedBuffer) -> Self {
        Self::new(RequestKind::Write, file, offset, buffer)
    }

    /// Sets the callback run when the request completes.
    ///
    /// The callback runs on the worker thread before any waiter is released
    /// and must not block on other requests of the same disk queue.
    pub fn on_complete(mut self, f: impl FnOnce(&CompletedRequest) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    /// Request number.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Transfer direction.
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Target file.
    pub fn file(&self) -> &Arc<dyn FileHandle> {
        &self.file
    }

    /// Byte offset in the file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Transfer length in bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True for zero-length transfers.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub(crate) fn handle(&self) -> RequestHandle {
        RequestHandle {
            id: self.id,
            kind: self.kind,
            slot: Arc::clone(&self.slot),
        }
    }

    /// Performs the transfer synchronously, records it in `stats` and
    /// completes the request.
    pub(crate) fn serve(mut self, stats: &DiskQueueStats) {
        let result = match self.kind {
            RequestKind::Read => self.file.read_at(self.offset, &mut self.buffer),
            RequestKind::Write => self.file.write_at(self.offset, &self.buffer),
        };
        match &result {
            Ok(()) => stats.add_success(self.kind, self.buffer.len() as u64),
            Err(e) => {
                stats.add_error();
                warn!(request = %self.id, kind = %self.kind, "request failed: {}", e);
            }
        }
        self.complete(result);
    }

    /// Delivers `result` to the callback and then to the waiters.
    pub(crate) fn complete(self, result: IoResult<()>) {
        let Request {
            id,
            kind,
            file,
            offset,
            buffer,
            on_complete,
            slot,
        } = self;
        let done = CompletedRequest {
            id,
            kind,
            file,
            offset,
            buffer,
            result,
        };

        if let Some(callback) = on_complete {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(&done))) {
                error!(
                    request = %done.id,
                    path = %done.file.path().display(),
                    "completion callback panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
        slot.fulfil(done);
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("path", &self.file.path())
            .field("offset", &self.offset)
            .field("len", &self.buffer.len())
            .field("has_callback", &self.on_complete.is_some())
            .finish()
    }
}

/// Outcome of a finished request, handing the buffer back to the caller.
#[derive(Debug)]
pub struct CompletedRequest {
    /// Request number.
    pub id: RequestId,
    /// Transfer direction.
    pub kind: RequestKind,
    /// Target file.
    pub file: Arc<dyn FileHandle>,
    /// Byte offset in the file.
    pub offset: u64,
    /// The request's buffer; filled for successful reads.
    pub buffer: AlignedBuffer,
    /// Success, or the error that ended the request.
    pub result: IoResult<()>,
}

impl CompletedRequest {
    /// Whether the transfer succeeded.
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Default)]
struct SlotState {
    completed: Option<CompletedRequest>,
    finished: bool,
    listeners: Vec<Weak<AnyListener>>,
}

#[derive(Default)]
struct CompletionSlot {
    state: Mutex<SlotState>,
    done: Condvar,
    notify: Notify,
}

impl CompletionSlot {
    fn fulfil(&self, completed: CompletedRequest) {
        let listeners = {
            let mut state = self.state.lock();
            state.completed = Some(completed);
            state.finished = true;
            std::mem::take(&mut state.listeners)
        };
        self.done.notify_all();
        self.notify.notify_one();
        for listener in listeners.iter().filter_map(Weak::upgrade) {
            listener.fire();
        }
    }

    fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    fn try_take(&self) -> Option<CompletedRequest> {
        self.state.lock().completed.take()
    }

    fn wait(&self) -> CompletedRequest {
        let mut state = self.state.lock();
        loop {
            if let Some(done) = state.completed.take() {
                return done;
            }
            self.done.wait(&mut state);
        }
    }

    /// Registers `listener`; returns false if the slot already finished.
    fn listen(&self, listener: &Arc<AnyListener>) -> bool {
        let mut state = self.state.lock();
        if state.finished {
            return false;
        }
        state.listeners.retain(|w| w.strong_count() > 0);
        state.listeners.push(Arc::downgrade(listener));
        true
    }
}

#[derive(Default)]
struct AnyListener {
    fired: Mutex<bool>,
    cv: Condvar,
}

impl AnyListener {
    fn fire(&self) {
        *self.fired.lock() = true;
        self.cv.notify_all();
    }

    fn wait(&self) {
        let mut fired = self.fired.lock();
        while !*fired {
            self.cv.wait(&mut fired);
        }
    }
}

/// Caller-side handle of a submitted request.
pub struct RequestHandle {
    id: RequestId,
    kind: RequestKind,
    slot: Arc<CompletionSlot>,
}

impl RequestHandle {
    /// Request number.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Transfer direction.
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Whether the completion has been delivered.
    pub fn is_done(&self) -> bool {
        self.slot.is_finished()
    }

    /// Blocks the calling thread until the request completes.
    pub fn wait(self) -> CompletedRequest {
        self.slot.wait()
    }

    /// Returns the completion if it has been delivered, or the handle back.
    pub fn try_wait(self) -> Result<CompletedRequest, RequestHandle> {
        match self.slot.try_take() {
            Some(done) => Ok(done),
            None => Err(self),
        }
    }

    /// Resolves once the request completes, without blocking a thread.
    pub async fn completed(self) -> CompletedRequest {
        loop {
            if let Some(done) = self.slot.try_take() {
                return done;
            }
            self.slot.notify.notified().await;
        }
    }
}

impl fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("done", &self.is_done())
            .finish()
    }
}

/// Blocks until every request in `handles` has completed.
///
/// Completions are returned in the order of `handles`.
pub fn wait_all(handles: impl IntoIterator<Item = RequestHandle>) -> Vec<CompletedRequest> {
    handles.into_iter().map(RequestHandle::wait).collect()
}

/// Blocks until one request in `handles` has completed, removes its handle
/// and returns the completion with the handle's former index.
///
/// Returns `None` if `handles` is empty.
pub fn wait_any(handles: &mut Vec<RequestHandle>) -> Option<(usize, CompletedRequest)> {
    if handles.is_empty() {
        return None;
    }
    let listener = Arc::new(AnyListener::default());
    let already_done = handles.iter().any(|h| !h.slot.listen(&listener));
    if !already_done {
        listener.wait();
    }
    let index = handles.iter().position(RequestHandle::is_done)?;
    let handle = handles.remove(index);
    Some((index, handle.wait()))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IoError;
    use crate::file::{MemoryFile, OpenMode};
    use crate::stats::IoStats;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    fn memory_file() -> Arc<dyn FileHandle> {
        Arc::new(MemoryFile::open("mem://req", OpenMode::READ_WRITE, None).unwrap())
    }

    #[test]
    fn test_ids_increase() {
        let file = memory_file();
        let a = Request::read(Arc::clone(&file), 0, AlignedBuffer::new(8));
        let b = Request::read(file, 0, AlignedBuffer::new(8));
        assert!(b.id() > a.id());
        assert_eq!(a.kind(), RequestKind::Read);
        assert_eq!(a.len(), 8);
    }

    #[test]
    fn test_serve_write_then_read_hands_buffer_back() {
        let file = memory_file();
        let data = AlignedBuffer::from_slice(b"payload!", 8);
        let write = Request::write(Arc::clone(&file), 16, data);
        let write_handle = write.handle();
        let stats = DiskQueueStats::default();
        write.serve(&stats);
        let done = write_handle.wait();
        assert!(done.is_ok());
        assert_eq!(&done.buffer[..], b"payload!");

        let read = Request::read(file, 16, AlignedBuffer::new(8));
        let read_handle = read.handle();
        read.serve(&stats);
        let done = read_handle.wait();
        assert_eq!(&done.buffer[..], b"payload!");
        assert_eq!(done.offset, 16);

        let snap = IoStats::from(&stats);
        assert_eq!(snap.writes_completed, 1);
        assert_eq!(snap.bytes_read, 8);
    }

    #[test]
    fn test_callback_runs_before_waiters() {
        let file = memory_file();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let req = Request::write(file, 0, AlignedBuffer::new(4)).on_complete(move |done| {
            assert!(done.is_ok());
            seen.fetch_add(1, Ordering::SeqCst);
        });
        let handle = req.handle();
        req.serve(&DiskQueueStats::default());
        handle.wait();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_read_reports_error() {
        let file = memory_file();
        let req = Request::read(file, 100, AlignedBuffer::new(4));
        let handle = req.handle();
        let stats = DiskQueueStats::default();
        req.serve(&stats);
        assert_eq!(IoStats::from(&stats).errors, 1);
        let done = handle.wait();
        assert!(matches!(done.result, Err(IoError::ReadFailure { offset: 100, .. })));
    }

    #[test]
    fn test_panicking_callback_still_completes() {
        let req = Request::write(memory_file(), 0, AlignedBuffer::new(4))
            .on_complete(|_| panic!("callback failure"));
        let handle = req.handle();
        req.serve(&DiskQueueStats::default());
        assert!(handle.wait().is_ok());
    }

    #[test]
    fn test_wait_blocks_until_served() {
        let req = Request::write(memory_file(), 0, AlignedBuffer::new(4));
        let handle = req.handle();
        assert!(!handle.is_done());
        let handle = handle.try_wait().unwrap_err();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            req.serve(&DiskQueueStats::default());
        });
        let done = handle.wait();
        assert!(done.is_ok());
        worker.join().unwrap();
    }

    #[test]
    fn test_wait_all_preserves_order() {
        let file = memory_file();
        let reqs: Vec<Request> = (0..4)
            .map(|i| Request::write(Arc::clone(&file), i * 4, AlignedBuffer::new(4)))
            .collect();
        let handles: Vec<RequestHandle> = reqs.iter().map(Request::handle).collect();
        let ids: Vec<RequestId> = handles.iter().map(RequestHandle::id).collect();
        let worker = thread::spawn(move || {
            for req in reqs.into_iter().rev() {
                req.serve(&DiskQueueStats::default());
            }
        });
        let done = wait_all(handles);
        worker.join().unwrap();
        assert_eq!(done.iter().map(|d| d.id).collect::<Vec<_>>(), ids);
    }

    #[test]
    fn test_wait_any_returns_first_finished() {
        let file = memory_file();
        let first = Request::write(Arc::clone(&file), 0, AlignedBuffer::new(4));
        let second = Request::write(file, 4, AlignedBuffer::new(4));
        let mut handles = vec![first.handle(), second.handle()];
        let second_id = second.id();

        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            second.serve(&DiskQueueStats::default());
            first
        });
        let (index, done) = wait_any(&mut handles).unwrap();
        assert_eq!(index, 1);
        assert_eq!(done.id, second_id);
        assert_eq!(handles.len(), 1);

        let first = worker.join().unwrap();
        first.serve(&DiskQueueStats::default());
        let (index, _) = wait_any(&mut handles).unwrap();
        assert_eq!(index, 0);
        assert!(wait_any(&mut handles).is_none());
    }

    #[tokio::test]
    async fn test_completed_future() {
        let req = Request::write(memory_file(), 0, AlignedBuffer::new(4));
        let handle = req.handle();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            req.serve(&DiskQueueStats::default());
        });
        let done = handle.completed().await;
        assert!(done.is_ok());
        worker.join().unwrap();
    }
}
