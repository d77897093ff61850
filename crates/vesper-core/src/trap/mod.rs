use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::config::SYSCALL_VECTOR;
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::klog;
use crate::task::TaskId;

pub mod vectors {
    pub const TIMER: u8 = 0x20;
    pub const KEYBOARD: u8 = 0x21;
}

const VECTORS: usize = 256;

/// CPU state as laid out on the kernel stack by `pushad` followed by the
/// hardware `iret` frame.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TrapFrame {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub reserved: u32,
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

/// A driver-side handler for one hardware vector. Runs under the kernel
/// address space with the interrupted task's state already saved.
pub trait InterruptHandler: Send + Sync {
    fn handle(&self, kernel: &mut Kernel, frame: &TrapFrame);
}

impl<F> InterruptHandler for F
where
    F: Fn(&mut Kernel, &TrapFrame) + Send + Sync,
{
    fn handle(&self, kernel: &mut Kernel, frame: &TrapFrame) {
        self(kernel, frame)
    }
}

pub struct InterruptTable {
    handlers: Vec<Option<Arc<dyn InterruptHandler>>>,
}

impl InterruptTable {
    pub fn new() -> Self {
        let mut handlers = Vec::with_capacity(VECTORS);
        handlers.resize_with(VECTORS, || None);
        Self { handlers }
    }

    /// The syscall gate is reserved for the syscall table.
    pub fn register(&mut self, vector: u8, handler: Arc<dyn InterruptHandler>) -> KernelResult<()> {
        if vector == SYSCALL_VECTOR {
            return Err(KernelError::InvalidArgument);
        }
        self.handlers[vector as usize] = Some(handler);
        Ok(())
    }

    pub fn get(&self, vector: u8) -> Option<Arc<dyn InterruptHandler>> {
        self.handlers[vector as usize].clone()
    }
}

impl Default for InterruptTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    /// Entry point for every interrupt and syscall. On return `frame` holds
    /// the state to `iret` into, which belongs to whichever task is current
    /// once the handler has finished.
    pub fn trap(&mut self, vector: u8, frame: &mut TrapFrame) -> KernelResult<()> {
        self.kernel_page();

        let interrupted = self.tasks.current();
        if let Some(id) = interrupted {
            self.tasks.save_state(id, frame)?;
        }

        let outcome = if vector == SYSCALL_VECTOR {
            Ok(Some(self.syscall(frame.eax)))
        } else {
            self.dispatch_interrupt(vector, frame).map(|_| None)
        };

        self.leave_trap(interrupted, outcome.as_ref().ok().copied().flatten(), frame);
        outcome.map(|_| ())
    }

    fn dispatch_interrupt(&mut self, vector: u8, frame: &TrapFrame) -> KernelResult<()> {
        match self.interrupts.get(vector) {
            Some(handler) => {
                handler.handle(self, frame);
                Ok(())
            }
            None => {
                klog!("[trap] unhandled vector {} ip=0x{:08X}\n", vector, frame.ip);
                Err(KernelError::NotFound)
            }
        }
    }

    fn leave_trap(&mut self, interrupted: Option<TaskId>, result: Option<u32>, frame: &mut TrapFrame) {
        let current = match self.tasks.current_task() {
            Some(task) => task,
            None => return,
        };

        if Some(current.id()) == interrupted {
            if let Some(value) = result {
                frame.eax = value;
            }
        } else {
            *frame = current.resume_frame();
        }

        self.task_page();
    }

    pub fn register_interrupt(&mut self, vector: u8, handler: Arc<dyn InterruptHandler>) -> KernelResult<()> {
        self.interrupts.register(vector, handler)?;
        klog!("[trap] handler registered for vector {}\n", vector);
        Ok(())
    }
}
