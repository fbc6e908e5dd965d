//! io_uring data path on top of the syscall descriptor handling.

use std::path::Path;

use io_uring::{opcode, squeue, types, IoUring};
use parking_lot::Mutex;

use super::{check_alignment, FileHandle, OpenMode, SyscallFile, DEFAULT_SECTOR_SIZE};
use crate::block::DiskId;
use crate::error::{IoError, IoResult};

/// Submission queue depth of the per-file ring.
const RING_ENTRIES: u32 = 8;

/// File whose transfers are submitted through an `io_uring` ring.
///
/// Open, locking, resizing and closing are delegated to [`SyscallFile`].
/// Each transfer is pushed as one submission and waited for before the call
/// returns, so the file keeps the synchronous [`FileHandle`] contract.
pub struct UringFile {
    inner: SyscallFile,
    ring: Mutex<IoUring>,
}

impl std::fmt::Debug for UringFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UringFile").field("inner", &self.inner).finish()
    }
}

impl UringFile {
    /// Opens `path` and sets up a ring for it.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode, disk: Option<DiskId>) -> IoResult<Self> {
        Self::open_with_sector_fallback(path, mode, disk, DEFAULT_SECTOR_SIZE)
    }

    /// Like [`UringFile::open`] with an explicit fallback sector size.
    pub fn open_with_sector_fallback(
        path: impl AsRef<Path>,
        mode: OpenMode,
        disk: Option<DiskId>,
        fallback_sector: u32,
    ) -> IoResult<Self> {
        let inner = SyscallFile::open_with_sector_fallback(path, mode, disk, fallback_sector)?;
        let ring = IoUring::new(RING_ENTRIES).map_err(|source| IoError::OpenFailure {
            call: "io_uring_setup",
            path: inner.path().to_path_buf(),
            mode,
            source,
        })?;
        Ok(Self {
            inner,
            ring: Mutex::new(ring),
        })
    }

    fn submit_and_wait(&self, entry: squeue::Entry) -> std::io::Result<usize> {
        let mut ring = self.ring.lock();
        // SAFETY: the buffer behind `entry` is borrowed by the caller until
        // this function has reaped the completion.
        unsafe {
            ring.submission()
                .push(&entry)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        }
        ring.submit_and_wait(1)?;
        let cqe = ring.completion().next().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "no completion received")
        })?;
        if cqe.result() < 0 {
            return Err(std::io::Error::from_raw_os_error(-cqe.result()));
        }
        Ok(cqe.result() as usize)
    }
}

impl FileHandle for UringFile {
    fn path(&self) -> &Path {
        self.inner.path()
    }

    fn mode(&self) -> OpenMode {
        self.inner.mode()
    }

    fn disk_id(&self) -> DiskId {
        self.inner.disk_id()
    }

    fn alignment(&self) -> u32 {
        self.inner.alignment()
    }

    fn io_type(&self) -> &'static str {
        "uring"
    }

    fn size(&self) -> IoResult<u64> {
        self.inner.size()
    }

    fn set_size(&self, new_size: u64) -> IoResult<()> {
        self.inner.set_size(new_size)
    }

    fn lock(&self) -> IoResult<()> {
        self.inner.lock()
    }

    fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> IoResult<()> {
        check_alignment(self, "io_uring_read", offset, buf)?;
        let length = buf.len();
        let read_failure = |source| IoError::ReadFailure {
            call: "io_uring_read",
            path: self.path().to_path_buf(),
            offset,
            length,
            source,
        };

        let mut done = 0;
        while done < length {
            let chunk = &mut buf[done..];
            let len = chunk.len().min(u32::MAX as usize) as u32;
            let pos = offset + done as u64;
            let n = self
                .inner
                .with_raw_fd("io_uring_read", |fd| {
                    let entry = opcode::Read::new(types::Fd(fd), chunk.as_mut_ptr(), len)
                        .offset(pos)
                        .build();
                    self.submit_and_wait(entry)
                })?
                .map_err(read_failure)?;
            if n == 0 {
                return Err(read_failure(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("end of file after {} bytes", done),
                )));
            }
            done += n;
        }
        Ok(())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> IoResult<()> {
        check_alignment(self, "io_uring_write", offset, buf)?;
        let length = buf.len();
        let write_failure = |source| IoError::WriteFailure {
            call: "io_uring_write",
            path: self.path().to_path_buf(),
            offset,
            length,
            source,
        };

        let mut done = 0;
        while done < length {
            let chunk = &buf[done..];
            let len = chunk.len().min(u32::MAX as usize) as u32;
            let pos = offset + done as u64;
            let n = self
                .inner
                .with_raw_fd("io_uring_write", |fd| {
                    let entry = opcode::Write::new(types::Fd(fd), chunk.as_ptr(), len)
                        .offset(pos)
                        .build();
                    self.submit_and_wait(entry)
                })?
                .map_err(write_failure)?;
            if n == 0 {
                return Err(write_failure(std::io::Error::from(std::io::ErrorKind::WriteZero)));
            }
            done += n;
        }
        Ok(())
    }

    fn close(&self) -> IoResult<()> {
        self.inner.close()
    }

    fn close_and_remove(&self) -> IoResult<()> {
        self.inner.close_and_remove()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
