use alloc::string::String;
use alloc::vec::Vec;

use crate::config::{space, MAX_PROCESSES};
use crate::error::{KernelError, KernelResult};
use crate::kernel::{kernel_panic, Kernel};
use crate::klog;
use crate::loader::{self, Image};
use crate::mem::paging::align_up;
use crate::task::TaskId;

use super::{Allocation, Process, ProcessId, ProcessState, USER_WRITABLE};

impl Kernel {
    /// Loads `filename` into the first free slot.
    pub fn load(&mut self, filename: &str) -> KernelResult<ProcessId> {
        let slot = self.processes.free_slot()?;
        self.load_into_slot(filename, slot)
    }

    /// Loads `filename` and makes it the current process.
    pub fn load_switch(&mut self, filename: &str) -> KernelResult<ProcessId> {
        let id = self.load(filename)?;
        self.switch_process(id)?;
        Ok(id)
    }

    /// Builds a process in `slot`: image (ELF, else flat binary), user
    /// stack, task, and the mappings for both. Nothing is left behind on
    /// failure.
    pub fn load_into_slot(&mut self, filename: &str, slot: ProcessId) -> KernelResult<ProcessId> {
        if slot.0 >= MAX_PROCESSES {
            return Err(KernelError::InvalidArgument);
        }
        if self.processes.contains(slot) {
            return Err(KernelError::SlotTaken);
        }

        let image = self.load_image(filename)?;

        let stack = match self.heap.kzalloc(space::USER_STACK_SIZE as usize) {
            Ok(stack) => stack,
            Err(err) => {
                image.close(&mut self.heap);
                return Err(err);
            }
        };

        let task = match self.tasks.create(&mut self.heap, slot, image.entry()) {
            Ok(task) => task,
            Err(err) => {
                self.heap.kfree(stack);
                image.close(&mut self.heap);
                return Err(err);
            }
        };

        let process = Process::new(slot, String::from(filename), image, stack, task);
        if let Err(err) = self.map_process(&process) {
            klog!("[process] mapping '{}' failed: {}\n", filename, err);
            self.release(process);
            return Err(err);
        }

        self.processes.insert(process)?;
        klog!("[process] loaded '{}' as process {}\n", filename, slot.0);
        Ok(slot)
    }

    fn load_image(&mut self, filename: &str) -> KernelResult<Image> {
        match loader::load_elf(self.files.as_mut(), &mut self.heap, filename) {
            Ok(elf) => Ok(Image::Elf(elf)),
            Err(KernelError::BadFormat) => {
                klog!("[process] '{}' is not an ELF executable, loading as flat binary\n", filename);
                loader::load_flat(self.files.as_mut(), &mut self.heap, filename).map(Image::FlatBinary)
            }
            Err(err) => Err(err),
        }
    }

    fn map_process(&mut self, process: &Process) -> KernelResult<()> {
        let task = self.tasks.get(process.task).ok_or(KernelError::NotFound)?;
        process.image.map_into(&mut self.heap, task.space())?;
        task.space().map_to(
            &mut self.heap,
            space::stack_virtual_address_end(),
            process.stack,
            process.stack + space::USER_STACK_SIZE,
            USER_WRITABLE,
        )
    }

    /// Returns every resource a process record owns to the heap.
    fn release(&mut self, process: Process) {
        let Process {
            id,
            image,
            stack,
            task,
            allocations,
            ..
        } = process;

        for allocation in allocations.iter().flatten() {
            self.heap.kfree(allocation.phys);
        }
        image.close(&mut self.heap);
        self.heap.kfree(stack);
        if let Err(err) = self.tasks.free(&mut self.heap, task) {
            klog!("[process] task of process {} already gone: {}\n", id.0, err);
        }
    }

    /// Makes `id` current and installs its address space.
    pub fn switch_process(&mut self, id: ProcessId) -> KernelResult<()> {
        let task = self.processes.get(id).ok_or(KernelError::NotFound)?.task;
        self.tasks.set_current(task)?;
        self.task_page();
        Ok(())
    }

    /// Process owning the current task.
    pub fn current_process(&self) -> Option<ProcessId> {
        self.tasks.current_task().map(|task| task.process())
    }

    /// Switches to the first runnable process in scheduling order,
    /// starting at the current task. Halts if there is none.
    pub fn switch_to_any(&mut self) {
        let start = self.tasks.current().or(self.tasks.head());
        let mut cursor = start;
        for _ in 0..self.tasks.len() {
            let Some(id) = cursor else { break };
            if let Some(process) = self.runnable_owner(id) {
                if self.switch_process(process).is_ok() {
                    return;
                }
            }
            cursor = self.tasks.next_after(id);
        }
        kernel_panic("no process left to switch to");
    }

    fn runnable_owner(&self, task: TaskId) -> Option<ProcessId> {
        let owner = self.tasks.get(task)?.process();
        self.processes
            .get(owner)
            .filter(|process| process.is_runnable())
            .map(|process| process.id)
    }

    /// Frees everything the process owns and wakes anything waiting on it.
    /// If it was current another runnable process takes over.
    pub fn terminate(&mut self, id: ProcessId) -> KernelResult<()> {
        let process = self.processes.remove(id).ok_or(KernelError::NotFound)?;
        let was_current = self.tasks.current() == Some(process.task);
        let filename = process.filename.clone();

        self.release(process);
        self.wake_waiters(id);
        klog!("[process] terminated process {} '{}'\n", id.0, filename);

        if was_current {
            self.switch_to_any();
        }
        Ok(())
    }

    fn wake_waiters(&mut self, target: ProcessId) {
        for slot in 0..MAX_PROCESSES {
            let Some(process) = self.processes.get_mut(ProcessId(slot)) else {
                continue;
            };
            if process.parent == Some(target) {
                process.parent = None;
            }
            if process.state != (ProcessState::Waiting { target }) {
                continue;
            }

            process.state = ProcessState::Runnable;
            let task = process.task;
            if let Some(task) = self.tasks.get_mut(task) {
                task.registers_mut().eax = 0;
            }
            klog!("[process] woke process {} after {} exited\n", slot, target.0);
        }
    }

    /// Copies `parent` into a new process. The child gets its own copy of
    /// the image, the stack and every live allocation at the same virtual
    /// addresses, and the parent's registers with `eax` cleared. The
    /// parent's saved `eax` becomes the child's id, and the child runs
    /// next.
    pub fn fork(&mut self, parent: ProcessId) -> KernelResult<ProcessId> {
        let slot = self.processes.free_slot()?;
        let source = self.processes.get(parent).ok_or(KernelError::NotFound)?;
        let registers = *self.tasks.get(source.task).ok_or(KernelError::NotFound)?.registers();
        let filename = source.filename.clone();
        let arguments = source.arguments;
        let parent_stack = source.stack;

        let image = source.image.duplicate(&mut self.heap)?;

        let stack = match self.heap.kmalloc(space::USER_STACK_SIZE as usize) {
            Ok(stack) => stack,
            Err(err) => {
                image.close(&mut self.heap);
                return Err(err);
            }
        };
        if let Err(err) = self.heap.ram_mut().copy(parent_stack, stack, space::USER_STACK_SIZE as usize) {
            self.heap.kfree(stack);
            image.close(&mut self.heap);
            return Err(err);
        }

        let task = match self.tasks.create(&mut self.heap, slot, image.entry()) {
            Ok(task) => task,
            Err(err) => {
                self.heap.kfree(stack);
                image.close(&mut self.heap);
                return Err(err);
            }
        };

        let mut child = Process::new(slot, filename, image, stack, task);
        child.parent = Some(parent);
        child.arguments = arguments;
        if let Some(child_task) = self.tasks.get_mut(task) {
            *child_task.registers_mut() = registers;
            child_task.registers_mut().eax = 0;
        }

        let mapped = self.map_process(&child);
        if let Err(err) = mapped.and_then(|_| self.copy_allocations(parent, &mut child)) {
            klog!("[process] fork of process {} failed: {}\n", parent.0, err);
            self.release(child);
            return Err(err);
        }

        self.processes.insert(child)?;
        let parent_task = self.processes.get(parent).map(|process| process.task);
        if let Some(parent_task) = parent_task.and_then(|task| self.tasks.get_mut(task)) {
            parent_task.registers_mut().eax = slot.0 as u32;
        }

        klog!("[process] forked process {} into {}\n", parent.0, slot.0);
        self.switch_process(slot)?;
        Ok(slot)
    }

    fn copy_allocations(&mut self, parent: ProcessId, child: &mut Process) -> KernelResult<()> {
        let source = self.processes.get(parent).ok_or(KernelError::NotFound)?;
        let live: Vec<Allocation> = source.allocations().copied().collect();
        let task = self.tasks.get(child.task).ok_or(KernelError::NotFound)?;

        for allocation in live {
            let phys = self.heap.kmalloc(allocation.size as usize)?;
            let copy = Allocation {
                ptr: allocation.ptr,
                phys,
                size: allocation.size,
            };
            // Tracked before mapping so a failure below still frees it.
            child.track(copy)?;
            self.heap.ram_mut().copy(allocation.phys, phys, allocation.size as usize)?;
            task.space().map_to(
                &mut self.heap,
                allocation.ptr,
                phys,
                align_up(phys + allocation.size)?,
                USER_WRITABLE,
            )?;
        }
        Ok(())
    }

    /// Suspends `id` until `target` terminates. Waiting on a process that
    /// no longer exists returns at once.
    pub fn wait(&mut self, id: ProcessId, target: ProcessId) -> KernelResult<()> {
        if id == target {
            return Err(KernelError::InvalidArgument);
        }
        if !self.processes.contains(id) {
            return Err(KernelError::NotFound);
        }
        if !self.processes.contains(target) {
            return Ok(());
        }

        let task = match self.processes.get_mut(id) {
            Some(process) => {
                process.state = ProcessState::Waiting { target };
                process.task
            }
            None => return Err(KernelError::NotFound),
        };
        klog!("[process] process {} waiting on {}\n", id.0, target.0);

        if self.tasks.current() == Some(task) {
            self.switch_to_any();
        }
        Ok(())
    }
}
