use alloc::vec::Vec;

use crate::arch::Mmu;
use crate::config::{PAGE_SIZE, PAGE_TABLE_ENTRIES};
use crate::error::{KernelError, KernelResult};
use crate::klog;

use super::kheap::KernelHeap;

const ENTRY_SIZE: u32 = 4;
const TABLE_BYTES: usize = PAGE_TABLE_ENTRIES * ENTRY_SIZE as usize;
const ENTRY_ADDR_MASK: u32 = 0xFFFF_F000;
const TABLE_SPAN: u32 = PAGE_TABLE_ENTRIES as u32 * PAGE_SIZE;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct PageFlags: u32 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const CACHE_DISABLED = 1 << 4;
    }
}

pub fn is_aligned(addr: u32) -> bool {
    addr % PAGE_SIZE == 0
}

pub fn align_up(addr: u32) -> KernelResult<u32> {
    let mask = PAGE_SIZE - 1;
    addr.checked_add(mask).map(|v| v & !mask).ok_or(KernelError::InvalidArgument)
}

pub fn align_down(addr: u32) -> u32 {
    addr & !(PAGE_SIZE - 1)
}

pub fn pages_required(length: u32) -> u32 {
    if length == 0 {
        return 0;
    }
    (length - 1) / PAGE_SIZE + 1
}

/// A raw directory or table entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PageEntry(u32);

impl PageEntry {
    pub const fn new(phys: u32, flags: PageFlags) -> Self {
        Self((phys & ENTRY_ADDR_MASK) | flags.bits())
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn address(self) -> u32 {
        self.0 & ENTRY_ADDR_MASK
    }

    pub const fn flags(self) -> PageFlags {
        PageFlags::from_bits_truncate(self.0)
    }

    pub const fn is_present(self) -> bool {
        self.0 & PageFlags::PRESENT.bits() != 0
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Access {
    Read,
    Write,
}

fn indexes(virt: u32) -> KernelResult<(usize, usize)> {
    if !is_aligned(virt) {
        return Err(KernelError::InvalidArgument);
    }
    let directory = (virt / TABLE_SPAN) as usize;
    let table = (virt % TABLE_SPAN / PAGE_SIZE) as usize;
    Ok((directory, table))
}

/// Two-level page directory living in kernel heap memory. Owned by exactly
/// one task; `free` consumes it.
#[derive(Debug, Eq, PartialEq)]
pub struct AddressSpace {
    directory: u32,
}

impl AddressSpace {
    /// Allocates a directory and all 1024 tables, identity mapping the
    /// whole 4 GiB range with `flags`.
    pub fn new(heap: &mut KernelHeap, flags: PageFlags) -> KernelResult<Self> {
        let directory = heap.kzalloc(TABLE_BYTES)?;

        for index in 0..PAGE_TABLE_ENTRIES {
            let table = match heap.kzalloc(TABLE_BYTES) {
                Ok(table) => table,
                Err(err) => {
                    klog!("[paging] address space allocation failed after {} tables\n", index);
                    release(heap, directory, index);
                    return Err(err);
                }
            };

            let first_page = (index * PAGE_TABLE_ENTRIES) as u32;
            let words = heap.ram_mut().slice_mut(table, TABLE_BYTES)?;
            for (slot, word) in words.chunks_exact_mut(ENTRY_SIZE as usize).enumerate() {
                let phys = (first_page + slot as u32).wrapping_mul(PAGE_SIZE);
                word.copy_from_slice(&PageEntry::new(phys, flags).raw().to_le_bytes());
            }

            let entry = PageEntry::new(table, flags | PageFlags::WRITABLE);
            heap.ram_mut().write_u32(directory + index as u32 * ENTRY_SIZE, entry.raw())?;
        }

        klog!("[paging] address space created directory=0x{:08X}\n", directory);
        Ok(Self { directory })
    }

    /// Physical address of the page directory, as loaded into CR3.
    pub fn directory(&self) -> u32 {
        self.directory
    }

    pub fn activate(&self, mmu: &mut dyn Mmu) {
        mmu.load_directory(self.directory);
    }

    fn table_of(&self, heap: &KernelHeap, directory_index: usize) -> KernelResult<u32> {
        let raw = heap.ram().read_u32(self.directory + directory_index as u32 * ENTRY_SIZE)?;
        Ok(PageEntry::from_raw(raw).address())
    }

    pub fn entry(&self, heap: &KernelHeap, virt: u32) -> KernelResult<PageEntry> {
        let (dir, tbl) = indexes(virt)?;
        let table = self.table_of(heap, dir)?;
        let raw = heap.ram().read_u32(table + tbl as u32 * ENTRY_SIZE)?;
        Ok(PageEntry::from_raw(raw))
    }

    pub fn set_entry(&self, heap: &mut KernelHeap, virt: u32, entry: PageEntry) -> KernelResult<()> {
        let (dir, tbl) = indexes(virt)?;
        let table = self.table_of(heap, dir)?;
        heap.ram_mut().write_u32(table + tbl as u32 * ENTRY_SIZE, entry.raw())
    }

    pub fn map(&self, heap: &mut KernelHeap, virt: u32, phys: u32, flags: PageFlags) -> KernelResult<()> {
        if !is_aligned(virt) || !is_aligned(phys) {
            return Err(KernelError::InvalidArgument);
        }
        self.set_entry(heap, virt, PageEntry::new(phys, flags))
    }

    /// Maps `count` consecutive pages. Either every page is mapped or the
    /// previous entries are left in place.
    pub fn map_range(
        &self,
        heap: &mut KernelHeap,
        virt: u32,
        phys: u32,
        count: u32,
        flags: PageFlags,
    ) -> KernelResult<()> {
        if !is_aligned(virt) || !is_aligned(phys) {
            return Err(KernelError::InvalidArgument);
        }
        if count == 0 {
            return Ok(());
        }

        let span = (count - 1).checked_mul(PAGE_SIZE).ok_or(KernelError::InvalidArgument)?;
        virt.checked_add(span).ok_or(KernelError::InvalidArgument)?;
        phys.checked_add(span).ok_or(KernelError::InvalidArgument)?;

        let mut previous = Vec::with_capacity(count as usize);
        for page in 0..count {
            let offset = page * PAGE_SIZE;
            match self.replace(heap, virt + offset, phys + offset, flags) {
                Ok(old) => previous.push(old),
                Err(err) => {
                    klog!("[paging] map_range failed at page {} of {}, rolling back\n", page, count);
                    for (undo, old) in previous.iter().enumerate() {
                        let page_virt = virt + undo as u32 * PAGE_SIZE;
                        if let Err(undo_err) = self.set_entry(heap, page_virt, *old) {
                            klog!("[paging] rollback of 0x{:08X} failed: {}\n", page_virt, undo_err);
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn replace(&self, heap: &mut KernelHeap, virt: u32, phys: u32, flags: PageFlags) -> KernelResult<PageEntry> {
        let old = self.entry(heap, virt)?;
        self.map(heap, virt, phys, flags)?;
        Ok(old)
    }

    pub fn map_to(
        &self,
        heap: &mut KernelHeap,
        virt: u32,
        phys: u32,
        phys_end: u32,
        flags: PageFlags,
    ) -> KernelResult<()> {
        if !is_aligned(virt) || !is_aligned(phys) || !is_aligned(phys_end) || phys_end < phys {
            return Err(KernelError::InvalidArgument);
        }
        let count = (phys_end - phys) / PAGE_SIZE;
        self.map_range(heap, virt, phys, count, flags)
    }

    /// Clears the flags of every page in the range, keeping the stored
    /// addresses.
    pub fn unmap_to(&self, heap: &mut KernelHeap, virt: u32, phys: u32, phys_end: u32) -> KernelResult<()> {
        self.map_to(heap, virt, phys, phys_end, PageFlags::empty())
    }

    /// Physical address stored for `virt`, with the sub-page offset kept.
    /// Presence is not checked.
    pub fn translate(&self, heap: &KernelHeap, virt: u32) -> KernelResult<u32> {
        let page = align_down(virt);
        let entry = self.entry(heap, page)?;
        Ok(entry.address() | (virt - page))
    }

    /// Like `translate`, but only for pages user code may touch this way.
    pub fn resolve(&self, heap: &KernelHeap, virt: u32, access: Access) -> KernelResult<u32> {
        let page = align_down(virt);
        let entry = self.entry(heap, page)?;
        let mut required = PageFlags::PRESENT | PageFlags::USER;
        if access == Access::Write {
            required |= PageFlags::WRITABLE;
        }
        if !entry.flags().contains(required) {
            return Err(KernelError::InvalidArgument);
        }
        Ok(entry.address() | (virt - page))
    }

    /// Releases every table, then the directory. No task may still refer
    /// to this space.
    pub fn free(self, heap: &mut KernelHeap) {
        release(heap, self.directory, PAGE_TABLE_ENTRIES);
        klog!("[paging] address space freed directory=0x{:08X}\n", self.directory);
    }
}

fn release(heap: &mut KernelHeap, directory: u32, tables: usize) {
    for index in 0..tables {
        if let Ok(raw) = heap.ram().read_u32(directory + index as u32 * ENTRY_SIZE) {
            heap.kfree(PageEntry::from_raw(raw).address());
        }
    }
    heap.kfree(directory);
}
