//! Configuration for disk queues and file backends.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::block::DiskId;
use crate::disk_queue::FairnessPolicy;
use crate::error::IoResult;
use crate::file::{open_file_with_sector_fallback, FileHandle, FileKind, OpenMode, DEFAULT_SECTOR_SIZE};

/// Configuration for one [`DiskQueue`](crate::DiskQueue).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskQueueConfig {
    /// Requests allowed in flight to the disk at once; one worker thread
    /// each. Default: 1.
    pub max_in_flight: usize,
    /// Which queue wins when both hold requests. Default: write.
    pub fairness: FairnessPolicy,
    /// Worker threads are named `{prefix}-{disk}-{index}`. Default: "disk-queue".
    pub thread_name_prefix: String,
}

impl Default for DiskQueueConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 1,
            fairness: FairnessPolicy::Write,
            thread_name_prefix: "disk-queue".to_string(),
        }
    }
}

impl DiskQueueConfig {
    /// Worker count, never less than one.
    pub fn workers(&self) -> usize {
        self.max_in_flight.max(1)
    }
}

/// Top-level I/O layer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Backend used by [`IoConfig::open`]. Default: syscall.
    pub file_kind: FileKind,
    /// Settings applied to every disk queue.
    pub disk_queue: DiskQueueConfig,
    /// Alignment used by files opened through [`IoConfig::open`] when the
    /// device's sector size cannot be discovered. Must be a power of two.
    /// Default: 512.
    pub default_sector_size: u32,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            file_kind: FileKind::Syscall,
            disk_queue: DiskQueueConfig::default(),
            default_sector_size: DEFAULT_SECTOR_SIZE,
        }
    }
}

impl IoConfig {
    /// Opens `path` with the configured backend and fallback sector size.
    pub fn open(
        &self,
        path: impl AsRef<Path>,
        mode: OpenMode,
        disk: Option<DiskId>,
    ) -> IoResult<Arc<dyn FileHandle>> {
        open_file_with_sector_fallback(self.file_kind, path, mode, disk, self.default_sector_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IoConfig::default();
        assert_eq!(config.file_kind, FileKind::Syscall);
        assert_eq!(config.default_sector_size, 512);
        assert_eq!(config.disk_queue.max_in_flight, 1);
        assert_eq!(config.disk_queue.fairness, FairnessPolicy::Write);
        assert_eq!(config.disk_queue.thread_name_prefix, "disk-queue");
    }

    #[test]
    fn test_workers_never_zero() {
        let config = DiskQueueConfig {
            max_in_flight: 0,
            ..Default::default()
        };
        assert_eq!(config.workers(), 1);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: IoConfig =
            serde_json::from_str(r#"{"file_kind":"memory","disk_queue":{"fairness":"read"}}"#).unwrap();
        assert_eq!(config.file_kind, FileKind::Memory);
        assert_eq!(config.disk_queue.fairness, FairnessPolicy::Read);
        assert_eq!(config.disk_queue.max_in_flight, 1);
        assert_eq!(config.default_sector_size, 512);
    }

    #[test]
    fn test_open_through_config() {
        let config = IoConfig {
            file_kind: FileKind::Memory,
            ..Default::default()
        };
        let file = config
            .open("mem://cfg", OpenMode::READ_WRITE, None)
            .unwrap();
        assert_eq!(file.io_type(), "memory");
    }

    #[test]
    fn test_sector_fallback_must_be_power_of_two() {
        let dir = tempfile::tempdir().unwrap();
        let config = IoConfig {
            default_sector_size: 3000,
            ..Default::default()
        };
        let err = config
            .open(dir.path().join("odd"), OpenMode::READ_WRITE | OpenMode::CREATE, None)
            .unwrap_err();
        assert!(matches!(err, crate::IoError::OpenFailure { .. }));
        assert!(!dir.path().join("odd").exists());
    }

    #[test]
    fn test_sector_fallback_reaches_backend() {
        use std::os::unix::fs::MetadataExt;

        let dir = tempfile::tempdir().unwrap();
        let config = IoConfig {
            default_sector_size: 8192,
            ..Default::default()
        };
        let path = dir.path().join("sized");
        let file = config
            .open(&path, OpenMode::READ_WRITE | OpenMode::CREATE, None)
            .unwrap();
        let blksize = std::fs::metadata(&path).unwrap().blksize();
        let expected = if blksize.is_power_of_two() && blksize <= 64 * 1024 {
            blksize as u32
        } else {
            8192
        };
        assert_eq!(file.alignment(), expected);
    }
}
