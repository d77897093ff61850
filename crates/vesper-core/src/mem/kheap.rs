use crate::config::KernelConfig;
use crate::error::{KernelError, KernelResult};
use crate::klog;

use super::heap::{BlockTable, Heap};
use super::phys::Ram;

/// The single kernel heap together with the memory it hands out.
pub struct KernelHeap {
    heap: Heap,
    ram: Ram,
}

impl KernelHeap {
    /// Builds a heap over a zeroed buffer standing in for the region named
    /// by `config`.
    pub fn new(config: &KernelConfig) -> KernelResult<Self> {
        config.validate()?;
        let ram = Ram::zeroed(config.heap_base, config.heap_size);
        Self::from_ram(ram)
    }

    /// Builds a heap covering exactly the window of `ram`.
    pub fn from_ram(ram: Ram) -> KernelResult<Self> {
        let end = ram.base().checked_add(ram.size()).ok_or(KernelError::InvalidArgument)?;
        let table = BlockTable::new(((end - ram.base()) / crate::config::BLOCK_SIZE) as usize);
        let heap = Heap::create(ram.base(), end, table)?;
        Ok(Self { heap, ram })
    }

    pub fn kmalloc(&mut self, size: usize) -> KernelResult<u32> {
        self.heap.allocate(size)
    }

    pub fn kzalloc(&mut self, size: usize) -> KernelResult<u32> {
        let addr = self.kmalloc(size)?;
        if let Err(err) = self.ram.fill(addr, size, 0) {
            klog!("[kheap] zero fill failed at 0x{:08X}\n", addr);
            self.heap.free(addr);
            return Err(err);
        }
        Ok(addr)
    }

    pub fn kfree(&mut self, addr: u32) {
        self.heap.free(addr);
    }

    pub fn free_blocks(&self) -> usize {
        self.heap.free_blocks()
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn ram(&self) -> &Ram {
        &self.ram
    }

    pub fn ram_mut(&mut self) -> &mut Ram {
        &mut self.ram
    }
}
