//! POSIX descriptor backend with positioned reads and writes.

use std::fs::{File, Metadata, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::os::unix::fs::{FileExt, FileTypeExt, MetadataExt, OpenOptionsExt};
use std::os::unix::io::{AsRawFd, IntoRawFd, RawFd};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use super::{check_alignment, FileHandle, OpenMode, DEFAULT_SECTOR_SIZE};
use crate::block::DiskId;
use crate::error::{IoError, IoResult};

/// Largest `st_blksize` still trusted as a direct I/O sector size.
const MAX_DISCOVERED_SECTOR: u64 = 64 * 1024;

#[derive(Debug)]
struct DescriptorState {
    file: Option<File>,
    locked: bool,
    direct: bool,
}

/// File or block device accessed through `pread`/`pwrite`.
///
/// The descriptor sits behind a reader-writer lock: transfers share it,
/// while `set_size`, `lock` and `close` take it exclusively.
#[derive(Debug)]
pub struct SyscallFile {
    path: PathBuf,
    mode: OpenMode,
    disk: DiskId,
    alignment: u32,
    is_device: bool,
    state: RwLock<DescriptorState>,
}

impl SyscallFile {
    /// Opens `path` in `mode`.
    ///
    /// If `DIRECT` is requested and the open fails, the open is retried
    /// without it unless `REQUIRE_DIRECT` is set. Unless `NO_LOCK` is given,
    /// the whole-file lock is taken before returning.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode, disk: Option<DiskId>) -> IoResult<Self> {
        Self::open_with_sector_fallback(path, mode, disk, DEFAULT_SECTOR_SIZE)
    }

    /// Like [`SyscallFile::open`], using `fallback_sector` as the alignment
    /// when the sector size cannot be discovered.
    pub fn open_with_sector_fallback(
        path: impl AsRef<Path>,
        mode: OpenMode,
        disk: Option<DiskId>,
        fallback_sector: u32,
    ) -> IoResult<Self> {
        let path = path.as_ref().to_path_buf();
        let (file, direct) = open_descriptor(&path, mode)?;
        let meta = file.metadata().map_err(|source| IoError::StatFailure {
            call: "fstat",
            path: path.clone(),
            source,
        })?;
        let is_device = meta.file_type().is_block_device();
        let alignment = discover_sector_size(&file, &meta, is_device, fallback_sector);
        let disk = disk.unwrap_or_else(|| DiskId(if is_device { meta.rdev() } else { meta.dev() }));

        let handle = Self {
            path,
            mode,
            disk,
            alignment,
            is_device,
            state: RwLock::new(DescriptorState {
                file: Some(file),
                locked: false,
                direct,
            }),
        };

        if !mode.contains(OpenMode::NO_LOCK) {
            handle.lock()?;
        }

        debug!(
            path = %handle.path.display(),
            mode = %mode,
            disk = %disk,
            alignment,
            direct,
            "opened file"
        );
        Ok(handle)
    }

    /// Whether the descriptor currently bypasses the page cache.
    ///
    /// False when `DIRECT` was requested but the filesystem rejected it.
    pub fn is_direct(&self) -> bool {
        self.state.read().direct
    }

    /// Whether the handle refers to a block device.
    pub fn is_device(&self) -> bool {
        self.is_device
    }

    /// Runs `f` with the raw descriptor while holding the shared lock.
    pub(crate) fn with_raw_fd<R>(&self, call: &'static str, f: impl FnOnce(RawFd) -> R) -> IoResult<R> {
        let state = self.state.read();
        let file = state.file.as_ref().ok_or_else(|| self.closed(call))?;
        Ok(f(file.as_raw_fd()))
    }

    fn closed(&self, call: &'static str) -> IoError {
        IoError::Closed {
            call,
            path: self.path.clone(),
        }
    }

    fn current_size(&self, file: &File) -> IoResult<u64> {
        let stat_failure = |call, source| IoError::StatFailure {
            call,
            path: self.path.clone(),
            source,
        };
        if self.is_device {
            // st_size is zero for block devices.
            let mut file = file;
            file.seek(SeekFrom::End(0)).map_err(|e| stat_failure("lseek", e))
        } else {
            file.metadata().map(|m| m.len()).map_err(|e| stat_failure("fstat", e))
        }
    }

    fn flock(&self, file: &File) -> IoResult<()> {
        let op = if self.mode.is_read_only() {
            libc::LOCK_SH
        } else {
            libc::LOCK_EX
        };
        // SAFETY: the descriptor is owned by `file` and open for the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), op | libc::LOCK_NB) };
        if rc != 0 {
            return Err(IoError::LockFailure {
                call: "flock",
                path: self.path.clone(),
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

impl FileHandle for SyscallFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn mode(&self) -> OpenMode {
        self.mode
    }

    fn disk_id(&self) -> DiskId {
        self.disk
    }

    fn alignment(&self) -> u32 {
        self.alignment
    }

    fn io_type(&self) -> &'static str {
        "syscall"
    }

    fn size(&self) -> IoResult<u64> {
        let state = self.state.read();
        let file = state.file.as_ref().ok_or_else(|| self.closed("fstat"))?;
        self.current_size(file)
    }

    fn set_size(&self, new_size: u64) -> IoResult<()> {
        let mut state = self.state.write();
        let file = state.file.as_ref().ok_or_else(|| self.closed("ftruncate"))?;

        if self.mode.is_read_only() || self.is_device {
            debug!(path = %self.path.display(), new_size, "set_size ignored on read-only file or device");
            return Ok(());
        }

        let old_size = self.current_size(file)?;
        let resize_failure = |call, source| IoError::ResizeFailure {
            call,
            path: self.path.clone(),
            old_size,
            new_size,
            source,
        };

        if !self.mode.wants_direct() || new_size % u64::from(self.alignment) == 0 {
            return file.set_len(new_size).map_err(|e| resize_failure("ftruncate", e));
        }

        // Sizes that are not a sector multiple go through a buffered descriptor.
        let was_locked = state.locked;
        if let Some(file) = state.file.take() {
            drop(file);
        }
        state.locked = false;

        let buffered = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|e| resize_failure("open", e))?;
        buffered.set_len(new_size).map_err(|e| resize_failure("ftruncate", e))?;
        drop(buffered);

        let (file, direct) = open_descriptor(&self.path, self.mode.without(OpenMode::TRUNCATE))?;
        if was_locked {
            self.flock(&file)?;
        }
        state.file = Some(file);
        state.locked = was_locked;
        state.direct = direct;

        debug!(
            path = %self.path.display(),
            old_size,
            new_size,
            "resized direct file through buffered descriptor"
        );
        Ok(())
    }

    fn lock(&self) -> IoResult<()> {
        let mut state = self.state.write();
        if state.locked {
            return Ok(());
        }
        let file = state.file.as_ref().ok_or_else(|| self.closed("flock"))?;
        self.flock(file)?;
        state.locked = true;
        Ok(())
    }

    fn is_locked(&self) -> bool {
        self.state.read().locked
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> IoResult<()> {
        check_alignment(self, "pread", offset, buf)?;
        let state = self.state.read();
        let file = state.file.as_ref().ok_or_else(|| self.closed("pread"))?;
        file.read_exact_at(buf, offset)
            .map_err(|source| IoError::ReadFailure {
                call: "pread",
                path: self.path.clone(),
                offset,
                length: buf.len(),
                source,
            })
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> IoResult<()> {
        check_alignment(self, "pwrite", offset, buf)?;
        let state = self.state.read();
        let file = state.file.as_ref().ok_or_else(|| self.closed("pwrite"))?;
        file.write_all_at(buf, offset)
            .map_err(|source| IoError::WriteFailure {
                call: "pwrite",
                path: self.path.clone(),
                offset,
                length: buf.len(),
                source,
            })
    }

    fn close(&self) -> IoResult<()> {
        let mut state = self.state.write();
        let Some(file) = state.file.take() else {
            return Ok(());
        };
        state.locked = false;

        let fd = file.into_raw_fd();
        // SAFETY: `fd` was released by `into_raw_fd` and is closed exactly once.
        if unsafe { libc::close(fd) } != 0 {
            return Err(IoError::CloseFailure {
                call: "close",
                path: self.path.clone(),
                source: std::io::Error::last_os_error(),
            });
        }
        debug!(path = %self.path.display(), "closed file");
        Ok(())
    }

    fn close_and_remove(&self) -> IoResult<()> {
        self.close()?;
        std::fs::remove_file(&self.path).map_err(|source| IoError::CloseFailure {
            call: "unlink",
            path: self.path.clone(),
            source,
        })?;
        info!("Removed {}", self.path.display());
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state.read().file.is_none()
    }
}

impl Drop for SyscallFile {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("Failed to close {} on drop: {}", self.path.display(), e);
        }
    }
}

/// Opens the descriptor, falling back to buffered I/O when permitted.
///
/// Returns the file and whether direct I/O is active on it.
fn open_descriptor(path: &Path, mode: OpenMode) -> IoResult<(File, bool)> {
    let open_failure = |source| IoError::OpenFailure {
        call: "open",
        path: path.to_path_buf(),
        mode,
        source,
    };

    if !mode.wants_direct() {
        return open_with(path, mode, false).map(|f| (f, false)).map_err(open_failure);
    }

    match open_with(path, mode, true) {
        Ok(file) => Ok((file, true)),
        Err(source) if mode.requires_direct() => {
            if source.kind() == std::io::ErrorKind::Unsupported {
                Err(IoError::DirectIoUnsupported {
                    path: path.to_path_buf(),
                    mode,
                    backend: "syscall",
                })
            } else {
                Err(open_failure(source))
            }
        }
        Err(source) => {
            warn!(
                "open() with direct I/O failed for {} ({}), retrying buffered",
                path.display(),
                source
            );
            open_with(path, mode, false).map(|f| (f, false)).map_err(open_failure)
        }
    }
}

fn open_with(path: &Path, mode: OpenMode, direct: bool) -> std::io::Result<File> {
    let mut flags = 0;
    if mode.contains(OpenMode::CREATE) {
        flags |= libc::O_CREAT;
    }
    if mode.contains(OpenMode::TRUNCATE) {
        flags |= libc::O_TRUNC;
    }
    if mode.contains(OpenMode::SYNCHRONOUS) {
        flags |= sync_flags();
    }
    if direct {
        #[cfg(test)]
        if tests::REJECT_DIRECT.with(|reject| reject.get()) {
            return Err(std::io::Error::from_raw_os_error(libc::EINVAL));
        }
        flags |= direct_flag()?;
    }

    let file = OpenOptions::new()
        .read(mode.is_readable() || !mode.is_writable())
        .write(mode.is_writable())
        .mode(0o644)
        .custom_flags(flags)
        .open(path)?;

    if direct {
        disable_page_cache(&file)?;
    }
    Ok(file)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn sync_flags() -> libc::c_int {
    libc::O_SYNC | libc::O_DSYNC | libc::O_RSYNC
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn sync_flags() -> libc::c_int {
    libc::O_SYNC | libc::O_DSYNC
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn direct_flag() -> std::io::Result<libc::c_int> {
    Ok(libc::O_DIRECT)
}

#[cfg(target_os = "macos")]
fn direct_flag() -> std::io::Result<libc::c_int> {
    Ok(0)
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "macos"
)))]
fn direct_flag() -> std::io::Result<libc::c_int> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "direct I/O is not available on this platform",
    ))
}

#[cfg(target_os = "macos")]
fn disable_page_cache(file: &File) -> std::io::Result<()> {
    // SAFETY: F_NOCACHE takes an int argument and the descriptor is open.
    if unsafe { libc::fcntl(file.as_raw_fd(), libc::F_NOCACHE, 1) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "macos"))]
fn disable_page_cache(_file: &File) -> std::io::Result<()> {
    Ok(())
}

/// Logical sector size of the device holding `file`.
fn discover_sector_size(file: &File, meta: &Metadata, is_device: bool, fallback: u32) -> u32 {
    #[cfg(target_os = "linux")]
    if is_device {
        let mut size: libc::c_int = 0;
        // SAFETY: BLKSSZGET writes one int into `size`.
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), libc::BLKSSZGET, &mut size as *mut libc::c_int) };
        if rc == 0 && size > 0 {
            return size as u32;
        }
    }
    #[cfg(not(target_os = "linux"))]
    let _ = (file, is_device);

    sector_from_blksize(meta.blksize(), fallback)
}

fn sector_from_blksize(blksize: u64, fallback: u32) -> u32 {
    if blksize.is_power_of_two() && blksize <= MAX_DISCOVERED_SECTOR {
        blksize as u32
    } else {
        fallback
    }
}
