//! Disk and block identifiers shared with the block-allocation layer.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Identifies one physical disk, i.e. one [`DiskQueue`](crate::DiskQueue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct DiskId(pub u64);

impl fmt::Display for DiskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "disk{}", self.0)
    }
}

/// Logical block identifier handed out by the block manager.
/// Contains the target disk index and the block number on that disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId {
    /// Index of the disk the block was allocated on.
    pub disk: usize,
    /// Block number within the disk (in units of the block size).
    pub offset: u64,
}

impl BlockId {
    /// Creates a new BlockId.
    pub fn new(disk: usize, offset: u64) -> Self {
        Self { disk, offset }
    }

    /// Returns the byte offset of this block for the given block size.
    pub fn byte_offset(&self, block_size: u64) -> u64 {
        self.offset * block_size
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({}, {})", self.disk, self.offset)
    }
}

/// Maps logical blocks to a (disk index, byte offset) pair.
///
/// Implemented by the allocation layer; the I/O layer only consumes it to
/// route a request to the right file and queue.
pub trait BlockLocator {
    /// Number of disks blocks are spread over.
    fn disk_count(&self) -> usize;

    /// Size in bytes of every block handed out by this locator.
    fn block_size(&self) -> u64;

    /// Returns the `index`-th block of an allocation.
    fn block(&self, index: u64) -> BlockId;

    /// Returns the disk index and byte offset of `block`.
    fn locate(&self, block: BlockId) -> (usize, u64) {
        (block.disk, block.byte_offset(self.block_size()))
    }
}
