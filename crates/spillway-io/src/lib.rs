#![warn(missing_docs)]

//! Spillway block I/O layer: per-disk asynchronous request queues for
//! external-memory algorithms.
//!
//! Callers bind [`Request`]s to [`FileHandle`]s and submit them to the
//! [`DiskQueue`] of the file's disk, usually through a [`DiskQueues`]
//! registry. Each disk queue serves its requests on dedicated worker threads
//! in a fairness-respecting order and hands every buffer back through a
//! [`CompletedRequest`]. The addressable FIFO and priority queues are the
//! ordered-container primitives cancelable or reprioritisable work queues
//! are built from.

#[cfg(not(unix))]
compile_error!("spillway-io supports Unix targets only");

pub mod addressable_fifo;
pub mod addressable_priority;
pub mod block;
pub mod buffer;
pub mod config;
pub mod diagnostics;
pub mod disk_queue;
pub mod disk_queues;
pub mod error;
pub mod file;
pub mod request;
pub mod semaphore;
pub mod stats;

pub use addressable_fifo::{AddressableFifoQueue, FifoHandle};
pub use addressable_priority::{
    AddressablePriorityQueue, Ascending, Descending, PriorityHandle, PriorityOrder,
};
pub use block::{BlockId, BlockLocator, DiskId};
pub use buffer::{AlignedBuffer, DEFAULT_BUFFER_ALIGNMENT};
pub use config::{DiskQueueConfig, IoConfig};
pub use diagnostics::Diagnostics;
pub use disk_queue::{DiskQueue, FairnessPolicy};
pub use disk_queues::DiskQueues;
pub use error::{EmptyQueue, IoError, IoErrorKind, IoResult};
pub use file::{
    open_file, open_file_with_sector_fallback, FileHandle, FileKind, MemoryFile, OpenMode,
    SyscallFile, UnknownFileKind, DEFAULT_SECTOR_SIZE,
};
#[cfg(all(feature = "uring", target_os = "linux"))]
pub use file::UringFile;
pub use request::{
    wait_all, wait_any, CompletedRequest, CompletionCallback, Request, RequestHandle, RequestId,
    RequestKind,
};
pub use semaphore::Semaphore;
pub use stats::IoStats;
