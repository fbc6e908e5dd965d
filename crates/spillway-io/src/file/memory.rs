//! In-memory file backend.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::debug;

use super::{FileHandle, OpenMode, DEFAULT_SECTOR_SIZE};
use crate::block::DiskId;
use crate::error::{IoError, IoResult};

#[derive(Debug, Default)]
struct MemoryState {
    data: Vec<u8>,
    locked: bool,
    closed: bool,
}

/// File whose contents live in a growable byte vector.
///
/// Writes past the end extend the file with zeroes; reads past the end fail.
/// Direct I/O is meaningless here, so `REQUIRE_DIRECT` is rejected and
/// `DIRECT` is accepted without imposing alignment.
#[derive(Debug)]
pub struct MemoryFile {
    path: PathBuf,
    mode: OpenMode,
    disk: DiskId,
    state: RwLock<MemoryState>,
}

impl MemoryFile {
    /// Creates an empty in-memory file labelled `path`.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode, disk: Option<DiskId>) -> IoResult<Self> {
        let path = path.as_ref().to_path_buf();
        if mode.requires_direct() {
            return Err(IoError::DirectIoUnsupported {
                path,
                mode,
                backend: "memory",
            });
        }
        Ok(Self {
            path,
            mode,
            disk: disk.unwrap_or_default(),
            state: RwLock::new(MemoryState {
                locked: !mode.contains(OpenMode::NO_LOCK),
                ..MemoryState::default()
            }),
        })
    }

    fn closed(&self, call: &'static str) -> IoError {
        IoError::Closed {
            call,
            path: self.path.clone(),
        }
    }
}

impl FileHandle for MemoryFile {
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
        DEFAULT_SECTOR_SIZE
    }

    fn needs_alignment(&self) -> bool {
        false
    }

    fn io_type(&self) -> &'static str {
        "memory"
    }

    fn size(&self) -> IoResult<u64> {
        let state = self.state.read();
        if state.closed {
            return Err(self.closed("size"));
        }
        Ok(state.data.len() as u64)
    }

    fn set_size(&self, new_size: u64) -> IoResult<()> {
        let mut state = self.state.write();
        if state.closed {
            return Err(self.closed("set_size"));
        }
        let old_size = state.data.len() as u64;
        let len = usize::try_from(new_size).map_err(|_| IoError::ResizeFailure {
            call: "set_size",
            path: self.path.clone(),
            old_size,
            new_size,
            source: std::io::Error::from(std::io::ErrorKind::OutOfMemory),
        })?;
        state.data.resize(len, 0);
        Ok(())
    }

    fn lock(&self) -> IoResult<()> {
        let mut state = self.state.write();
        if state.closed {
            return Err(self.closed("lock"));
        }
        state.locked = true;
        Ok(())
    }

    fn is_locked(&self) -> bool {
        self.state.read().locked
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> IoResult<()> {
        let state = self.state.read();
        if state.closed {
            return Err(self.closed("read"));
        }
        let start = offset as usize;
        let end = start.checked_add(buf.len());
        match end {
            Some(end) if offset <= usize::MAX as u64 && end <= state.data.len() => {
                buf.copy_from_slice(&state.data[start..end]);
                Ok(())
            }
            _ => Err(IoError::ReadFailure {
                call: "read",
                path: self.path.clone(),
                offset,
                length: buf.len(),
                source: std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("file holds {} bytes", state.data.len()),
                ),
            }),
        }
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> IoResult<()> {
        let mut state = self.state.write();
        if state.closed {
            return Err(self.closed("write"));
        }
        let end = usize::try_from(offset)
            .ok()
            .and_then(|start| start.checked_add(buf.len()).map(|end| (start, end)));
        let Some((start, end)) = end else {
            return Err(IoError::WriteFailure {
                call: "write",
                path: self.path.clone(),
                offset,
                length: buf.len(),
                source: std::io::Error::from(std::io::ErrorKind::OutOfMemory),
            });
        };
        if end > state.data.len() {
            state.data.resize(end, 0);
        }
        state.data[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn close(&self) -> IoResult<()> {
        let mut state = self.state.write();
        if !state.closed {
            state.closed = true;
            state.locked = false;
            state.data = Vec::new();
            debug!(path = %self.path.display(), "closed memory file");
        }
        Ok(())
    }

    fn close_and_remove(&self) -> IoResult<()> {
        self.close()
    }

    fn is_closed(&self) -> bool {
        self.state.read().closed
    }
}
