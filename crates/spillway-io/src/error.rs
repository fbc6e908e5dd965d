//! Error types for the block I/O layer.

use std::path::PathBuf;

use thiserror::Error;

use crate::file::OpenMode;

/// Result type alias for I/O layer operations.
pub type IoResult<T> = Result<T, IoError>;

/// Error variants surfaced by file handles and disk queues.
///
/// Every variant names the failing call and its target so that a completion
/// handler can report the failure without access to the request.
#[derive(Debug, Error)]
pub enum IoError {
    /// The file could not be opened (missing path, permission, busy device).
    #[error("{call}() failed for path={path:?} mode={mode}: {source}")]
    OpenFailure {
        /// The failing call.
        call: &'static str,
        /// Target path.
        path: PathBuf,
        /// Requested open mode.
        mode: OpenMode,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Unbuffered access was required but the backend cannot provide it.
    #[error("direct I/O required for path={path:?} mode={mode}, but {backend} files do not support it")]
    DirectIoUnsupported {
        /// Target path.
        path: PathBuf,
        /// Requested open mode.
        mode: OpenMode,
        /// Backend that rejected the mode.
        backend: &'static str,
    },

    /// The exclusive whole-file lock could not be acquired.
    #[error("{call}() failed for path={path:?}: {source}")]
    LockFailure {
        /// The failing call.
        call: &'static str,
        /// Target path.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The file could not be resized.
    #[error("{call}() failed for path={path:?} old_size={old_size} new_size={new_size}: {source}")]
    ResizeFailure {
        /// The failing call.
        call: &'static str,
        /// Target path.
        path: PathBuf,
        /// Size before the resize attempt.
        old_size: u64,
        /// Requested size.
        new_size: u64,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The size or metadata of the file could not be queried.
    #[error("{call}() failed for path={path:?}: {source}")]
    StatFailure {
        /// The failing call.
        call: &'static str,
        /// Target path.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A positioned read failed or returned fewer bytes than requested.
    #[error("{call}() failed for path={path:?} offset={offset} length={length}: {source}")]
    ReadFailure {
        /// The failing call.
        call: &'static str,
        /// Target path.
        path: PathBuf,
        /// Byte offset of the read.
        offset: u64,
        /// Byte length of the read.
        length: usize,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A positioned write failed or wrote fewer bytes than requested.
    #[error("{call}() failed for path={path:?} offset={offset} length={length}: {source}")]
    WriteFailure {
        /// The failing call.
        call: &'static str,
        /// Target path.
        path: PathBuf,
        /// Byte offset of the write.
        offset: u64,
        /// Byte length of the write.
        length: usize,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Offset, length or buffer address is not a multiple of the sector size
    /// on a handle opened for direct I/O.
    #[error("misaligned {call}() on path={path:?}: offset={offset} length={length} buffer={buffer_addr:#x} must be multiples of {alignment}")]
    AlignmentViolation {
        /// The rejected call.
        call: &'static str,
        /// Target path.
        path: PathBuf,
        /// Requested offset.
        offset: u64,
        /// Requested length.
        length: usize,
        /// Base address of the caller's buffer.
        buffer_addr: usize,
        /// Required alignment in bytes.
        alignment: u32,
    },

    /// Closing or removing the file failed.
    #[error("{call}() failed for path={path:?}: {source}")]
    CloseFailure {
        /// The failing call.
        call: &'static str,
        /// Target path.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The handle was already closed.
    #[error("{call}() on closed file path={path:?}")]
    Closed {
        /// The rejected call.
        call: &'static str,
        /// Target path.
        path: PathBuf,
    },

    /// The disk queue stopped accepting requests.
    #[error("disk queue {disk} is shut down, request rejected")]
    QueueClosed {
        /// Disk served by the queue.
        disk: crate::block::DiskId,
    },

    /// A worker thread could not be started.
    #[error("failed to spawn worker thread {name}: {source}")]
    WorkerSpawn {
        /// Thread name.
        name: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

/// Discriminant of an [`IoError`], for matching in completion handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoErrorKind {
    /// See [`IoError::OpenFailure`].
    OpenFailure,
    /// See [`IoError::DirectIoUnsupported`].
    DirectIoUnsupported,
    /// See [`IoError::LockFailure`].
    LockFailure,
    /// See [`IoError::ResizeFailure`].
    ResizeFailure,
    /// See [`IoError::StatFailure`].
    StatFailure,
    /// See [`IoError::ReadFailure`].
    ReadFailure,
    /// See [`IoError::WriteFailure`].
    WriteFailure,
    /// See [`IoError::AlignmentViolation`].
    AlignmentViolation,
    /// See [`IoError::CloseFailure`].
    CloseFailure,
    /// See [`IoError::Closed`].
    Closed,
    /// See [`IoError::QueueClosed`].
    QueueClosed,
    /// See [`IoError::WorkerSpawn`].
    WorkerSpawn,
}

impl IoError {
    /// Returns the kind of this error.
    pub fn kind(&self) -> IoErrorKind {
        match self {
            IoError::OpenFailure { .. } => IoErrorKind::OpenFailure,
            IoError::DirectIoUnsupported { .. } => IoErrorKind::DirectIoUnsupported,
            IoError::LockFailure { .. } => IoErrorKind::LockFailure,
            IoError::ResizeFailure { .. } => IoErrorKind::ResizeFailure,
            IoError::StatFailure { .. } => IoErrorKind::StatFailure,
            IoError::ReadFailure { .. } => IoErrorKind::ReadFailure,
            IoError::WriteFailure { .. } => IoErrorKind::WriteFailure,
            IoError::AlignmentViolation { .. } => IoErrorKind::AlignmentViolation,
            IoError::CloseFailure { .. } => IoErrorKind::CloseFailure,
            IoError::Closed { .. } => IoErrorKind::Closed,
            IoError::QueueClosed { .. } => IoErrorKind::QueueClosed,
            IoError::WorkerSpawn { .. } => IoErrorKind::WorkerSpawn,
        }
    }

    /// Returns the OS error code, if the failure came from an OS call.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            IoError::OpenFailure { source, .. }
            | IoError::LockFailure { source, .. }
            | IoError::ResizeFailure { source, .. }
            | IoError::StatFailure { source, .. }
            | IoError::ReadFailure { source, .. }
            | IoError::WriteFailure { source, .. }
            | IoError::CloseFailure { source, .. }
            | IoError::WorkerSpawn { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// Returns true for caller programming errors that must never be retried.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            IoError::AlignmentViolation { .. } | IoError::Closed { .. }
        )
    }
}

/// Returned by `top`/`pop` of an empty addressable queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("queue is empty")]
pub struct EmptyQueue;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::DiskId;

    #[test]
    fn test_io_result_alias() {
        let ok: IoResult<u32> = Ok(7);
        assert!(ok.is_ok());

        let err: IoResult<u32> = Err(IoError::QueueClosed { disk: DiskId(3) });
        assert!(err.is_err());
    }

    #[test]
    fn test_read_failure_display() {
        let err = IoError::ReadFailure {
            call: "pread",
            path: PathBuf::from("/tmp/spill.0"),
            offset: 4096,
            length: 512,
            source: std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read"),
        };
        let msg = err.to_string();
        assert!(msg.contains("pread()"));
        assert!(msg.contains("spill.0"));
        assert!(msg.contains("offset=4096"));
        assert!(msg.contains("length=512"));
        assert!(msg.contains("short read"));
        assert_eq!(err.kind(), IoErrorKind::ReadFailure);
    }

    #[test]
    fn test_open_failure_carries_mode() {
        let err = IoError::OpenFailure {
            call: "open",
            path: PathBuf::from("/nonexistent"),
            mode: OpenMode::READ_ONLY | OpenMode::DIRECT,
            source: std::io::Error::from_raw_os_error(libc::ENOENT),
        };
        let msg = err.to_string();
        assert!(msg.contains("READ_ONLY"));
        assert!(msg.contains("DIRECT"));
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn test_alignment_violation_is_caller_error() {
        let err = IoError::AlignmentViolation {
            call: "pwrite",
            path: PathBuf::from("/tmp/x"),
            offset: 100,
            length: 4096,
            buffer_addr: 0x1000,
            alignment: 512,
        };
        assert!(err.is_caller_error());
        assert!(err.to_string().contains("0x1000"));
        assert_eq!(err.raw_os_error(), None);
    }

    #[test]
    fn test_queue_closed_display() {
        let err = IoError::QueueClosed { disk: DiskId(2) };
        assert_eq!(err.to_string(), "disk queue disk2 is shut down, request rejected");
        assert!(!err.is_caller_error());
    }

    #[test]
    fn test_empty_queue_display() {
        assert_eq!(EmptyQueue.to_string(), "queue is empty");
    }
}
