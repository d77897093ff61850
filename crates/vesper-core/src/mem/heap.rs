use alloc::vec;
use alloc::vec::Vec;

use crate::config::BLOCK_SIZE;
use crate::error::{KernelError, KernelResult};
use crate::klog;

bitflags::bitflags! {
    /// One byte per block. An empty entry is a free block.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct BlockEntry: u8 {
        const TAKEN = 0x01;
        const IS_FIRST = 0b0100_0000;
        const HAS_NEXT = 0b1000_0000;
    }
}

impl BlockEntry {
    pub const FREE: BlockEntry = BlockEntry::empty();

    pub fn is_free(self) -> bool {
        !self.contains(BlockEntry::TAKEN)
    }
}

/// Descriptor table with one entry per block of the heap region.
pub struct BlockTable {
    entries: Vec<BlockEntry>,
}

impl BlockTable {
    pub fn new(total: usize) -> Self {
        Self {
            entries: vec![BlockEntry::FREE; total],
        }
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }
}

/// First-fit allocator over `[start, end)` in whole blocks.
pub struct Heap {
    start: u32,
    end: u32,
    table: BlockTable,
}

impl Heap {
    pub fn create(start: u32, end: u32, mut table: BlockTable) -> KernelResult<Self> {
        if start % BLOCK_SIZE != 0 || end % BLOCK_SIZE != 0 || end < start {
            return Err(KernelError::InvalidArgument);
        }

        let total = ((end - start) / BLOCK_SIZE) as usize;
        if table.total() != total {
            return Err(KernelError::InvalidArgument);
        }

        table.entries.fill(BlockEntry::FREE);
        klog!("[heap] region 0x{:08X}..0x{:08X} ({} blocks)\n", start, end, total);
        Ok(Self { start, end, table })
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn total_blocks(&self) -> usize {
        self.table.total()
    }

    pub fn free_blocks(&self) -> usize {
        self.table.entries.iter().filter(|e| e.is_free()).count()
    }

    pub fn entry(&self, block: usize) -> Option<BlockEntry> {
        self.table.entries.get(block).copied()
    }

    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.start && addr < self.end
    }

    pub fn allocate(&mut self, size: usize) -> KernelResult<u32> {
        if size == 0 {
            return Err(KernelError::InvalidArgument);
        }

        let blocks = blocks_for(size).ok_or(KernelError::OutOfMemory)?;
        let first = match self.first_free_run(blocks) {
            Some(first) => first,
            None => {
                klog!(
                    "[heap] out of memory: size={} blocks={} free={}\n",
                    size,
                    blocks,
                    self.free_blocks()
                );
                return Err(KernelError::OutOfMemory);
            }
        };

        self.mark_taken(first, blocks);
        Ok(self.block_to_address(first))
    }

    /// Releases the chain starting at `addr`. The address must have come
    /// from `allocate`; anything else corrupts the table without notice.
    pub fn free(&mut self, addr: u32) {
        if !self.contains(addr) {
            klog!("[heap] free of foreign address 0x{:08X} ignored\n", addr);
            return;
        }

        let mut block = self.address_to_block(addr);
        while let Some(entry) = self.table.entries.get_mut(block) {
            let has_next = entry.contains(BlockEntry::HAS_NEXT);
            *entry = BlockEntry::FREE;
            if !has_next {
                break;
            }
            block += 1;
        }
    }

    fn first_free_run(&self, blocks: usize) -> Option<usize> {
        let mut run_start = None;
        let mut run_len = 0;

        for (index, entry) in self.table.entries.iter().enumerate() {
            if !entry.is_free() {
                run_start = None;
                run_len = 0;
                continue;
            }

            if run_start.is_none() {
                run_start = Some(index);
            }
            run_len += 1;
            if run_len == blocks {
                return run_start;
            }
        }
        None
    }

    fn mark_taken(&mut self, first: usize, blocks: usize) {
        let last = first + blocks - 1;
        for block in first..=last {
            let mut entry = BlockEntry::TAKEN;
            if block == first {
                entry |= BlockEntry::IS_FIRST;
            }
            if block != last {
                entry |= BlockEntry::HAS_NEXT;
            }
            self.table.entries[block] = entry;
        }
    }

    fn block_to_address(&self, block: usize) -> u32 {
        self.start + block as u32 * BLOCK_SIZE
    }

    fn address_to_block(&self, addr: u32) -> usize {
        ((addr - self.start) / BLOCK_SIZE) as usize
    }
}

fn blocks_for(size: usize) -> Option<usize> {
    let block = BLOCK_SIZE as usize;
    Some(size.checked_add(block - 1)? / block)
}
