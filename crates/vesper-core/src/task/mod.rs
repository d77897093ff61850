use alloc::vec::Vec;

use crate::config::{selectors, space};
use crate::error::{KernelError, KernelResult};
use crate::klog;
use crate::mem::{AddressSpace, KernelHeap, PageFlags};
use crate::process::ProcessId;
use crate::trap::TrapFrame;

const FLAGS_INTERRUPTS_ENABLED: u32 = 0x202;

/// Register snapshot persisted between traps.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Registers {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub ip: u32,
    pub cs: u32,
    pub flags: u32,
    pub esp: u32,
    pub ss: u32,
}

impl Registers {
    /// Initial state of a user task about to run `entry`.
    pub const fn user(entry: u32) -> Self {
        Self {
            edi: 0,
            esi: 0,
            ebp: 0,
            ebx: 0,
            edx: 0,
            ecx: 0,
            eax: 0,
            ip: entry,
            cs: selectors::USER_CODE,
            flags: FLAGS_INTERRUPTS_ENABLED,
            esp: space::STACK_VIRTUAL_ADDRESS_START,
            ss: selectors::USER_DATA,
        }
    }

    pub fn from_frame(frame: &TrapFrame) -> Self {
        Self {
            edi: frame.edi,
            esi: frame.esi,
            ebp: frame.ebp,
            ebx: frame.ebx,
            edx: frame.edx,
            ecx: frame.ecx,
            eax: frame.eax,
            ip: frame.ip,
            cs: frame.cs,
            flags: frame.flags,
            esp: frame.esp,
            ss: frame.ss,
        }
    }

    pub fn to_frame(&self) -> TrapFrame {
        TrapFrame {
            edi: self.edi,
            esi: self.esi,
            ebp: self.ebp,
            reserved: 0,
            ebx: self.ebx,
            edx: self.edx,
            ecx: self.ecx,
            eax: self.eax,
            ip: self.ip,
            cs: self.cs,
            flags: self.flags,
            esp: self.esp,
            ss: self.ss,
        }
    }
}

/// Handle into the task arena. A freed slot bumps its generation, so stale
/// handles stop resolving.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct TaskId {
    index: u32,
    generation: u32,
}

impl TaskId {
    pub const fn index(&self) -> usize {
        self.index as usize
    }

    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

pub struct Task {
    id: TaskId,
    space: AddressSpace,
    registers: Registers,
    process: ProcessId,
    prev: Option<TaskId>,
    next: Option<TaskId>,
}

impl Task {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn space(&self) -> &AddressSpace {
        &self.space
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    /// Owning process. Not an owning reference.
    pub fn process(&self) -> ProcessId {
        self.process
    }

    pub fn save_state(&mut self, frame: &TrapFrame) {
        self.registers = Registers::from_frame(frame);
    }

    /// Frame that returns to user mode with this task's registers.
    pub fn resume_frame(&self) -> TrapFrame {
        self.registers.to_frame()
    }
}

struct Slot {
    generation: u32,
    task: Option<Task>,
}

/// Round-robin list of every live task, with the head/tail/current roles.
pub struct TaskList {
    slots: Vec<Slot>,
    head: Option<TaskId>,
    tail: Option<TaskId>,
    current: Option<TaskId>,
}

impl TaskList {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            head: None,
            tail: None,
            current: None,
        }
    }

    /// Builds a task with a fresh address space and appends it to the
    /// tail. The first task in an empty list becomes current.
    pub fn create(&mut self, heap: &mut KernelHeap, process: ProcessId, entry: u32) -> KernelResult<TaskId> {
        let space = AddressSpace::new(heap, PageFlags::PRESENT | PageFlags::USER)?;
        let id = self.vacant_id();

        let task = Task {
            id,
            space,
            registers: Registers::user(entry),
            process,
            prev: self.tail,
            next: None,
        };

        match self.tail {
            Some(tail) => {
                if let Some(last) = self.get_mut(tail) {
                    last.next = Some(id);
                }
            }
            None => {
                self.head = Some(id);
                self.current = Some(id);
            }
        }
        self.tail = Some(id);
        self.slots[id.index()].task = Some(task);

        klog!("[task] created index={} gen={} for process {}\n", id.index, id.generation, process.0);
        Ok(id)
    }

    fn vacant_id(&mut self) -> TaskId {
        if let Some(index) = self.slots.iter().position(|slot| slot.task.is_none()) {
            return TaskId {
                index: index as u32,
                generation: self.slots[index].generation,
            };
        }
        self.slots.push(Slot {
            generation: 0,
            task: None,
        });
        TaskId {
            index: (self.slots.len() - 1) as u32,
            generation: 0,
        }
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        let slot = self.slots.get(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        slot.task.as_ref()
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        slot.task.as_mut()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.get(id).is_some()
    }

    pub fn head(&self) -> Option<TaskId> {
        self.head
    }

    pub fn tail(&self) -> Option<TaskId> {
        self.tail
    }

    pub fn current(&self) -> Option<TaskId> {
        self.current
    }

    pub fn current_task(&self) -> Option<&Task> {
        self.current.and_then(|id| self.get(id))
    }

    pub fn set_current(&mut self, id: TaskId) -> KernelResult<()> {
        if !self.contains(id) {
            return Err(KernelError::NotFound);
        }
        self.current = Some(id);
        Ok(())
    }

    /// Task after the current one, wrapping to the head.
    pub fn next(&self) -> Option<TaskId> {
        match self.current {
            Some(current) => self.next_after(current),
            None => self.head,
        }
    }

    pub fn next_after(&self, id: TaskId) -> Option<TaskId> {
        let task = self.get(id)?;
        task.next.or(self.head)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.task.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    pub fn save_state(&mut self, id: TaskId, frame: &TrapFrame) -> KernelResult<()> {
        let task = self.get_mut(id).ok_or(KernelError::NotFound)?;
        task.save_state(frame);
        Ok(())
    }

    /// Releases the task's address space and unlinks it, moving any of
    /// head, tail or current that pointed at it.
    pub fn free(&mut self, heap: &mut KernelHeap, id: TaskId) -> KernelResult<()> {
        if !self.contains(id) {
            return Err(KernelError::NotFound);
        }

        if self.current == Some(id) {
            let successor = self.next_after(id).filter(|next| *next != id);
            self.current = successor;
        }

        let slot = &mut self.slots[id.index()];
        let task = slot.task.take().ok_or(KernelError::NotFound)?;
        slot.generation = slot.generation.wrapping_add(1);

        match task.prev {
            Some(prev) => {
                if let Some(prev_task) = self.get_mut(prev) {
                    prev_task.next = task.next;
                }
            }
            None => self.head = task.next,
        }
        match task.next {
            Some(next) => {
                if let Some(next_task) = self.get_mut(next) {
                    next_task.prev = task.prev;
                }
            }
            None => self.tail = task.prev,
        }

        task.space.free(heap);
        klog!("[task] freed index={} gen={}\n", id.index, id.generation);
        Ok(())
    }
}

impl Default for TaskList {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a> {
    list: &'a TaskList,
    cursor: Option<TaskId>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Task;

    fn next(&mut self) -> Option<Self::Item> {
        let task = self.list.get(self.cursor?)?;
        self.cursor = task.next;
        Some(task)
    }
}
