use alloc::string::String;
use alloc::vec::Vec;

use crate::config::PAGE_SIZE;
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::klog;
use crate::mem::paging::align_up;
use crate::mem::Access;
use crate::task::TaskId;

use super::{Allocation, ProcessArguments, ProcessId, USER_WRITABLE};

impl Kernel {
    fn task_of(&self, id: ProcessId) -> KernelResult<TaskId> {
        self.processes.get(id).map(|process| process.task).ok_or(KernelError::NotFound)
    }

    /// Allocates `size` bytes for a process. The block is identity-mapped
    /// into the process's space, so the returned address is valid from
    /// both sides. Blocks whose addresses are already used by an
    /// allocation inherited through fork are skipped.
    pub fn process_malloc(&mut self, id: ProcessId, size: usize) -> KernelResult<u32> {
        let process = self.processes.get(id).ok_or(KernelError::NotFound)?;
        if !process.has_free_allocation_slot() {
            return Err(KernelError::OutOfMemory);
        }
        let task = process.task;

        let mut skipped = Vec::new();
        let claimed = self.unshadowed_block(id, size, &mut skipped);
        for block in skipped {
            self.heap.kfree(block);
        }
        let ptr = claimed?;

        let mapped = align_up(ptr + size as u32).and_then(|end| {
            let space = self.tasks.get(task).ok_or(KernelError::NotFound)?.space();
            space.map_to(&mut self.heap, ptr, ptr, end, USER_WRITABLE)
        });
        if let Err(err) = mapped {
            self.heap.kfree(ptr);
            return Err(err);
        }

        let allocation = Allocation {
            ptr,
            phys: ptr,
            size: size as u32,
        };
        let tracked = self
            .processes
            .get_mut(id)
            .ok_or(KernelError::NotFound)
            .and_then(|process| process.track(allocation));
        if let Err(err) = tracked {
            self.heap.kfree(ptr);
            return Err(err);
        }
        Ok(ptr)
    }

    /// Allocates zeroed blocks until one does not overlap an address the
    /// process already has mapped. Rejected blocks are pushed to `skipped`
    /// and stay taken until the caller frees them.
    fn unshadowed_block(&mut self, id: ProcessId, size: usize, skipped: &mut Vec<u32>) -> KernelResult<u32> {
        let process = self.processes.get(id).ok_or(KernelError::NotFound)?;
        loop {
            let ptr = self.heap.kzalloc(size)?;
            let end = match align_up(ptr + size as u32) {
                Ok(end) => end,
                Err(err) => {
                    self.heap.kfree(ptr);
                    return Err(err);
                }
            };
            if !process.overlaps_allocation(ptr, end) {
                return Ok(ptr);
            }
            klog!("[process] 0x{:08X} already mapped in process {}, skipping\n", ptr, id.0);
            skipped.push(ptr);
        }
    }

    /// Releases an allocation made by `process_malloc`. Addresses the
    /// process does not own are ignored.
    pub fn process_free(&mut self, id: ProcessId, ptr: u32) -> KernelResult<()> {
        let process = self.processes.get_mut(id).ok_or(KernelError::NotFound)?;
        let task = process.task;
        let Some(allocation) = process.untrack(ptr) else {
            klog!("[process] free of untracked 0x{:08X} by process {} ignored\n", ptr, id.0);
            return Ok(());
        };

        let space = self.tasks.get(task).ok_or(KernelError::NotFound)?.space();
        let end = align_up(allocation.phys + allocation.size)?;
        let unmapped = space.unmap_to(&mut self.heap, allocation.ptr, allocation.phys, end);
        self.heap.kfree(allocation.phys);
        unmapped
    }

    /// Reads user memory at `virt` through the process's page tables.
    pub fn copy_from_user(&self, id: ProcessId, virt: u32, buf: &mut [u8]) -> KernelResult<()> {
        let space = self.tasks.get(self.task_of(id)?).ok_or(KernelError::NotFound)?.space();
        let mut done = 0;
        while done < buf.len() {
            let addr = virt.checked_add(done as u32).ok_or(KernelError::InvalidArgument)?;
            let phys = space.resolve(&self.heap, addr, Access::Read)?;
            let chunk = page_chunk(addr, buf.len() - done);
            self.heap.ram().read(phys, &mut buf[done..done + chunk])?;
            done += chunk;
        }
        Ok(())
    }

    /// Writes `data` to user memory at `virt`. Every page must be writable
    /// by the process.
    pub fn copy_to_user(&mut self, id: ProcessId, virt: u32, data: &[u8]) -> KernelResult<()> {
        let task = self.task_of(id)?;
        let space = self.tasks.get(task).ok_or(KernelError::NotFound)?.space();
        let mut done = 0;
        while done < data.len() {
            let addr = virt.checked_add(done as u32).ok_or(KernelError::InvalidArgument)?;
            let phys = space.resolve(&self.heap, addr, Access::Write)?;
            let chunk = page_chunk(addr, data.len() - done);
            self.heap.ram_mut().write(phys, &data[done..done + chunk])?;
            done += chunk;
        }
        Ok(())
    }

    /// Reads a NUL-terminated string of at most `max` bytes.
    pub fn copy_string_from_user(&self, id: ProcessId, virt: u32, max: usize) -> KernelResult<String> {
        let mut bytes = Vec::new();
        let mut page = [0u8; PAGE_SIZE as usize];
        while bytes.len() < max {
            let addr = virt.checked_add(bytes.len() as u32).ok_or(KernelError::InvalidArgument)?;
            let chunk = page_chunk(addr, max - bytes.len());
            self.copy_from_user(id, addr, &mut page[..chunk])?;
            match page[..chunk].iter().position(|&byte| byte == 0) {
                Some(end) => {
                    bytes.extend_from_slice(&page[..end]);
                    break;
                }
                None => bytes.extend_from_slice(&page[..chunk]),
            }
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// The `index`th 32-bit word above the process's saved stack pointer.
    pub fn stack_item(&self, id: ProcessId, index: u32) -> KernelResult<u32> {
        let esp = self
            .tasks
            .get(self.task_of(id)?)
            .ok_or(KernelError::NotFound)?
            .registers()
            .esp;
        let addr = index
            .checked_mul(4)
            .and_then(|offset| esp.checked_add(offset))
            .ok_or(KernelError::InvalidArgument)?;
        let mut word = [0u8; 4];
        self.copy_from_user(id, addr, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }

    /// Places `args` in process memory as NUL-terminated strings behind an
    /// `argv` pointer array.
    pub fn inject_arguments(&mut self, id: ProcessId, args: &[&str]) -> KernelResult<()> {
        if !self.processes.contains(id) {
            return Err(KernelError::NotFound);
        }

        let mut arguments = ProcessArguments::default();
        if !args.is_empty() {
            let argv = self.process_malloc(id, args.len() * 4)?;
            for (index, arg) in args.iter().enumerate() {
                let string = self.process_malloc(id, arg.len() + 1)?;
                let mut bytes = Vec::with_capacity(arg.len() + 1);
                bytes.extend_from_slice(arg.as_bytes());
                bytes.push(0);
                self.copy_to_user(id, string, &bytes)?;
                self.copy_to_user(id, argv + index as u32 * 4, &string.to_le_bytes())?;
            }
            arguments = ProcessArguments {
                argc: args.len() as u32,
                argv,
            };
        }

        if let Some(process) = self.processes.get_mut(id) {
            process.arguments = arguments;
        }
        Ok(())
    }

    pub fn arguments(&self, id: ProcessId) -> KernelResult<ProcessArguments> {
        self.processes
            .get(id)
            .map(|process| process.arguments)
            .ok_or(KernelError::NotFound)
    }

    pub fn keyboard_push(&mut self, key: u8) {
        if let Some(process) = self.current_process().and_then(|id| self.processes.get_mut(id)) {
            process.keyboard.push(key);
        }
    }

    /// Next key for the current process, 0 if none is pending.
    pub fn keyboard_pop(&mut self) -> u8 {
        self.current_process()
            .and_then(|id| self.processes.get_mut(id))
            .map_or(0, |process| process.keyboard.pop())
    }

    pub fn keyboard_backspace(&mut self) {
        if let Some(process) = self.current_process().and_then(|id| self.processes.get_mut(id)) {
            process.keyboard.backspace();
        }
    }
}

/// Bytes from `addr` up to the end of its page, capped at `remaining`.
fn page_chunk(addr: u32, remaining: usize) -> usize {
    let left_in_page = (PAGE_SIZE - addr % PAGE_SIZE) as usize;
    left_in_page.min(remaining)
}
