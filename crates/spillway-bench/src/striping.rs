//! Round-robin placement of benchmark blocks over the scratch files.

use spillway_io::{BlockId, BlockLocator};

/// Block `i` lives on disk `i % disks` at block number `i / disks`.
#[derive(Debug, Clone, Copy)]
pub struct Striping {
    disks: usize,
    block_size: u64,
}

impl Striping {
    pub fn new(disks: usize, block_size: u64) -> Self {
        Self {
            disks: disks.max(1),
            block_size,
        }
    }

    /// Blocks needed on each disk to hold `total_blocks` striped blocks.
    pub fn blocks_per_disk(&self, total_blocks: u64) -> u64 {
        total_blocks.div_ceil(self.disks as u64)
    }
}

impl BlockLocator for Striping {
    fn disk_count(&self) -> usize {
        self.disks
    }

    fn block_size(&self) -> u64 {
        self.block_size
    }

    fn block(&self, index: u64) -> BlockId {
        let disks = self.disks as u64;
        BlockId::new((index % disks) as usize, index / disks)
    }
}
