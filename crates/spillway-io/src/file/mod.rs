//! File handles: one uniform synchronous interface over the platform file APIs.
//!
//! [`FileHandle`] is the capability set every backend implements. Backends
//! are selected at configuration time through [`FileKind`] and [`open_file`]:
//!
//! - [`SyscallFile`]: positioned `pread`/`pwrite` on a POSIX descriptor.
//! - [`MemoryFile`]: an in-memory byte vector.
//! - `UringFile` (feature `uring`): descriptor handling of [`SyscallFile`],
//!   data transfer through an `io_uring` ring.

mod memory;
mod mode;
mod syscall;
#[cfg(all(feature = "uring", target_os = "linux"))]
mod uring;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::block::DiskId;
use crate::error::{IoError, IoResult};

pub use memory::MemoryFile;
pub use mode::OpenMode;
pub use syscall::SyscallFile;
#[cfg(all(feature = "uring", target_os = "linux"))]
pub use uring::UringFile;

/// Sector size assumed when the device cannot be queried.
pub const DEFAULT_SECTOR_SIZE: u32 = 512;

/// Capability set of an open file or block device.
///
/// All methods take `&self`: a handle is shared between the submitting
/// threads and the disk queue worker, and serialises descriptor and size
/// changes internally. Reads and writes may run concurrently with each other
/// but never with `set_size`, `lock` or `close`.
///
/// On handles that need alignment, `offset`, the buffer length and the
/// buffer's base address must be multiples of [`alignment`](Self::alignment);
/// otherwise the call fails with [`IoError::AlignmentViolation`].
pub trait FileHandle: Send + Sync + fmt::Debug {
    /// Path the handle was opened with.
    fn path(&self) -> &Path;

    /// Mode the handle was opened with.
    fn mode(&self) -> OpenMode;

    /// Disk whose queue serves this file.
    fn disk_id(&self) -> DiskId;

    /// Required alignment in bytes for direct I/O.
    fn alignment(&self) -> u32;

    /// Whether reads and writes are checked against [`alignment`](Self::alignment).
    fn needs_alignment(&self) -> bool {
        self.mode().wants_direct()
    }

    /// Short backend name, e.g. `"syscall"`.
    fn io_type(&self) -> &'static str;

    /// Current size in bytes.
    fn size(&self) -> IoResult<u64>;

    /// Grows or shrinks the file to `new_size` bytes.
    fn set_size(&self, new_size: u64) -> IoResult<()>;

    /// Takes the whole-file lock. A no-op if already held.
    fn lock(&self) -> IoResult<()>;

    /// Whether this handle holds the whole-file lock.
    fn is_locked(&self) -> bool;

    /// Reads exactly `buf.len()` bytes at `offset`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> IoResult<()>;

    /// Writes all of `buf` at `offset`.
    fn write_at(&self, offset: u64, buf: &[u8]) -> IoResult<()>;

    /// Releases the descriptor. Closing twice is a no-op.
    fn close(&self) -> IoResult<()>;

    /// Closes the handle and deletes the file.
    fn close_and_remove(&self) -> IoResult<()>;

    /// Whether the handle has been closed.
    fn is_closed(&self) -> bool;
}

/// Rejects a transfer that violates the direct I/O alignment contract.
pub(crate) fn check_alignment(
    file: &dyn FileHandle,
    call: &'static str,
    offset: u64,
    buf: &[u8],
) -> IoResult<()> {
    if !file.needs_alignment() {
        return Ok(());
    }
    let alignment = file.alignment();
    let align = u64::from(alignment);
    let addr = buf.as_ptr() as usize;
    if offset % align != 0 || buf.len() as u64 % align != 0 || addr as u64 % align != 0 {
        return Err(IoError::AlignmentViolation {
            call,
            path: file.path().to_path_buf(),
            offset,
            length: buf.len(),
            buffer_addr: addr,
            alignment,
        });
    }
    Ok(())
}

/// File backend selected at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// [`SyscallFile`].
    #[default]
    Syscall,
    /// [`MemoryFile`].
    Memory,
    /// `UringFile`; only available with the `uring` feature on Linux.
    Uring,
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileKind::Syscall => write!(f, "syscall"),
            FileKind::Memory => write!(f, "memory"),
            FileKind::Uring => write!(f, "uring"),
        }
    }
}

/// Returned when parsing an unknown [`FileKind`] name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown file kind {0:?}, expected one of: syscall, memory, uring")]
pub struct UnknownFileKind(pub String);

impl FromStr for FileKind {
    type Err = UnknownFileKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "syscall" => Ok(FileKind::Syscall),
            "memory" => Ok(FileKind::Memory),
            "uring" => Ok(FileKind::Uring),
            _ => Err(UnknownFileKind(s.to_string())),
        }
    }
}

/// Opens `path` with the backend named by `kind`.
///
/// `disk` pins the file to a disk queue; when `None` the backend derives the
/// disk from the device holding the file.
pub fn open_file(
    kind: FileKind,
    path: impl AsRef<Path>,
    mode: OpenMode,
    disk: Option<DiskId>,
) -> IoResult<Arc<dyn FileHandle>> {
    open_file_with_sector_fallback(kind, path, mode, disk, DEFAULT_SECTOR_SIZE)
}

/// Like [`open_file`]; `fallback_sector` is the alignment assumed when the
/// backend cannot discover the device's sector size.
pub fn open_file_with_sector_fallback(
    kind: FileKind,
    path: impl AsRef<Path>,
    mode: OpenMode,
    disk: Option<DiskId>,
    fallback_sector: u32,
) -> IoResult<Arc<dyn FileHandle>> {
    let path: PathBuf = path.as_ref().to_path_buf();
    if !fallback_sector.is_power_of_two() {
        return Err(IoError::OpenFailure {
            call: "open",
            path,
            mode,
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("fallback sector size {} is not a power of two", fallback_sector),
            ),
        });
    }
    match kind {
        FileKind::Syscall => Ok(Arc::new(SyscallFile::open_with_sector_fallback(
            path,
            mode,
            disk,
            fallback_sector,
        )?)),
        FileKind::Memory => Ok(Arc::new(MemoryFile::open(path, mode, disk)?)),
        #[cfg(all(feature = "uring", target_os = "linux"))]
        FileKind::Uring => Ok(Arc::new(UringFile::open_with_sector_fallback(
            path,
            mode,
            disk,
            fallback_sector,
        )?)),
        #[cfg(not(all(feature = "uring", target_os = "linux")))]
        FileKind::Uring => Err(IoError::OpenFailure {
            call: "open",
            path,
            mode,
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "io_uring backend not compiled in (enable the `uring` feature)",
            ),
        }),
    }
}
