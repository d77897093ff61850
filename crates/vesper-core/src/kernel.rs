use alloc::boxed::Box;

use crate::arch::Mmu;
use crate::config::KernelConfig;
use crate::drivers::CharDevice;
use crate::error::{KernelError, KernelResult};
use crate::fs::FileIo;
use crate::klog;
use crate::mem::{AddressSpace, KernelHeap, PageFlags};
use crate::process::{Process, ProcessId, ProcessTable};
use crate::syscall::SyscallTable;
use crate::task::TaskList;
use crate::trap::{InterruptTable, TrapFrame};

/// Everything the core shares between traps: the heap, the kernel's own
/// address space, the process table, the task list and the dispatch
/// tables. Built once at boot.
pub struct Kernel {
    pub(crate) heap: KernelHeap,
    pub(crate) kernel_space: AddressSpace,
    pub(crate) active_directory: Option<u32>,
    pub(crate) mmu: Box<dyn Mmu>,
    pub(crate) processes: ProcessTable,
    pub(crate) tasks: TaskList,
    pub(crate) syscalls: SyscallTable,
    pub(crate) interrupts: InterruptTable,
    pub(crate) files: Box<dyn FileIo>,
    pub(crate) console: &'static dyn CharDevice,
}

impl Kernel {
    pub fn boot(
        config: KernelConfig,
        mmu: Box<dyn Mmu>,
        files: Box<dyn FileIo>,
        console: &'static dyn CharDevice,
    ) -> KernelResult<Self> {
        let mut heap = KernelHeap::new(&config)?;
        let kernel_space = match AddressSpace::new(&mut heap, PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER) {
            Ok(space) => space,
            Err(_) => kernel_panic("no address space set up at boot"),
        };

        let mut kernel = Self {
            heap,
            kernel_space,
            active_directory: None,
            mmu,
            processes: ProcessTable::new(),
            tasks: TaskList::new(),
            syscalls: SyscallTable::with_defaults(),
            interrupts: InterruptTable::new(),
            files,
            console,
        };
        kernel.kernel_page();

        klog!(
            "[kernel] booted heap=0x{:08X}..0x{:08X} free_blocks={}\n",
            kernel.heap.heap().start(),
            kernel.heap.heap().end(),
            kernel.heap.free_blocks()
        );
        Ok(kernel)
    }

    /// Installs the kernel's own address space.
    pub fn kernel_page(&mut self) {
        self.kernel_space.activate(self.mmu.as_mut());
        self.active_directory = Some(self.kernel_space.directory());
    }

    /// Installs the current task's address space, if there is one.
    pub fn task_page(&mut self) {
        if let Some(task) = self.tasks.current_task() {
            task.space().activate(self.mmu.as_mut());
            self.active_directory = Some(task.space().directory());
        }
    }

    pub fn active_directory(&self) -> Option<u32> {
        self.active_directory
    }

    pub fn kernel_space(&self) -> &AddressSpace {
        &self.kernel_space
    }

    pub fn heap(&self) -> &KernelHeap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut KernelHeap {
        &mut self.heap
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    pub fn process(&self, id: ProcessId) -> Option<&Process> {
        self.processes.get(id)
    }

    pub fn tasks(&self) -> &TaskList {
        &self.tasks
    }

    pub fn syscalls(&self) -> &SyscallTable {
        &self.syscalls
    }

    pub fn syscalls_mut(&mut self) -> &mut SyscallTable {
        &mut self.syscalls
    }

    pub fn console(&self) -> &'static dyn CharDevice {
        self.console
    }

    /// Frame that enters the current task, with its space installed.
    pub fn resume_current(&mut self) -> KernelResult<TrapFrame> {
        let frame = self
            .tasks
            .current_task()
            .map(|task| task.resume_frame())
            .ok_or(KernelError::NotFound)?;
        self.task_page();
        Ok(frame)
    }
}

/// Logs `msg` and halts. Used only for conditions the kernel cannot
/// recover from.
pub fn kernel_panic(msg: &str) -> ! {
    klog!("[panic] {}\n", msg);
    panic!("{}", msg);
}
