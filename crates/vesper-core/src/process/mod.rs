use alloc::string::String;
use alloc::vec::Vec;

use crate::config::{MAX_PROCESSES, MAX_PROGRAM_ALLOCATIONS, PAGE_SIZE};
use crate::error::{KernelError, KernelResult};
use crate::loader::Image;
use crate::mem::PageFlags;
use crate::task::TaskId;

pub mod keyboard;
mod lifecycle;
mod memory;

pub use keyboard::KeyboardBuffer;

/// Flags for stack and heap pages handed to user code.
pub(crate) const USER_WRITABLE: PageFlags = PageFlags::PRESENT.union(PageFlags::USER).union(PageFlags::WRITABLE);

/// Process id. Equal to the process's slot in the table.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ProcessId(pub usize);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessState {
    Runnable,
    /// Suspended until `target` terminates.
    Waiting { target: ProcessId },
}

/// Heap block owned by a process, identity-mapped into its space.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Allocation {
    pub ptr: u32,
    pub phys: u32,
    pub size: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ProcessArguments {
    pub argc: u32,
    /// User address of the `argv` pointer array.
    pub argv: u32,
}

pub struct Process {
    id: ProcessId,
    filename: String,
    image: Image,
    stack: u32,
    task: TaskId,
    allocations: Vec<Option<Allocation>>,
    keyboard: KeyboardBuffer,
    arguments: ProcessArguments,
    parent: Option<ProcessId>,
    state: ProcessState,
}

impl Process {
    fn new(id: ProcessId, filename: String, image: Image, stack: u32, task: TaskId) -> Self {
        let mut allocations = Vec::with_capacity(MAX_PROGRAM_ALLOCATIONS);
        allocations.resize(MAX_PROGRAM_ALLOCATIONS, None);
        Self {
            id,
            filename,
            image,
            stack,
            task,
            allocations,
            keyboard: KeyboardBuffer::new(),
            arguments: ProcessArguments::default(),
            parent: None,
            state: ProcessState::Runnable,
        }
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    /// Physical address of the user stack buffer.
    pub fn stack(&self) -> u32 {
        self.stack
    }

    pub fn task(&self) -> TaskId {
        self.task
    }

    pub fn parent(&self) -> Option<ProcessId> {
        self.parent
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn is_runnable(&self) -> bool {
        self.state == ProcessState::Runnable
    }

    pub fn arguments(&self) -> ProcessArguments {
        self.arguments
    }

    pub fn keyboard(&self) -> &KeyboardBuffer {
        &self.keyboard
    }

    pub fn keyboard_mut(&mut self) -> &mut KeyboardBuffer {
        &mut self.keyboard
    }

    pub fn allocations(&self) -> impl Iterator<Item = &Allocation> {
        self.allocations.iter().flatten()
    }

    pub fn allocation(&self, ptr: u32) -> Option<&Allocation> {
        self.allocations().find(|allocation| allocation.ptr == ptr)
    }

    fn track(&mut self, allocation: Allocation) -> KernelResult<()> {
        let slot = self
            .allocations
            .iter_mut()
            .find(|slot| slot.is_none())
            .ok_or(KernelError::OutOfMemory)?;
        *slot = Some(allocation);
        Ok(())
    }

    /// True if `[start, end)` touches a page mapped for a live allocation.
    fn overlaps_allocation(&self, start: u32, end: u32) -> bool {
        self.allocations().any(|allocation| {
            let pages = (allocation.size as u64).div_ceil(PAGE_SIZE as u64).max(1);
            let mapped_end = allocation.ptr as u64 + pages * PAGE_SIZE as u64;
            (allocation.ptr as u64) < end as u64 && (start as u64) < mapped_end
        })
    }

    fn has_free_allocation_slot(&self) -> bool {
        self.allocations.iter().any(|slot| slot.is_none())
    }

    fn untrack(&mut self, ptr: u32) -> Option<Allocation> {
        self.allocations
            .iter_mut()
            .find(|slot| matches!(slot, Some(allocation) if allocation.ptr == ptr))
            .and_then(Option::take)
    }
}

/// Fixed table of process slots.
pub struct ProcessTable {
    slots: Vec<Option<Process>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_PROCESSES);
        slots.resize_with(MAX_PROCESSES, || None);
        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, id: ProcessId) -> Option<&Process> {
        self.slots.get(id.0)?.as_ref()
    }

    pub fn get_mut(&mut self, id: ProcessId) -> Option<&mut Process> {
        self.slots.get_mut(id.0)?.as_mut()
    }

    pub fn contains(&self, id: ProcessId) -> bool {
        self.get(id).is_some()
    }

    pub fn free_slot(&self) -> KernelResult<ProcessId> {
        self.slots
            .iter()
            .position(Option::is_none)
            .map(ProcessId)
            .ok_or(KernelError::SlotTaken)
    }

    fn insert(&mut self, process: Process) -> KernelResult<()> {
        let slot = self.slots.get_mut(process.id.0).ok_or(KernelError::InvalidArgument)?;
        if slot.is_some() {
            return Err(KernelError::SlotTaken);
        }
        *slot = Some(process);
        Ok(())
    }

    fn remove(&mut self, id: ProcessId) -> Option<Process> {
        self.slots.get_mut(id.0)?.take()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.slots.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}
