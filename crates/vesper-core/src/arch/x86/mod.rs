#![allow(bad_asm_style)]

use core::arch::{asm, global_asm};

use spin::{Mutex, Once};

use crate::arch::Mmu;
use crate::config::SYSCALL_VECTOR;
use crate::error::KernelResult;
use crate::kernel::{kernel_panic, Kernel};
use crate::klog;
use crate::trap::{vectors, TrapFrame};

const CR0_PAGING: u32 = 1 << 31;
const PIC1_COMMAND: u16 = 0x20;
const PIC2_COMMAND: u16 = 0xA0;
const PIC_EOI: u8 = 0x20;

static KERNEL: Once<Mutex<Kernel>> = Once::new();

/// Loads CR3 and turns paging on with the first directory.
pub struct X86Mmu {
    paging: bool,
}

impl X86Mmu {
    pub const fn new() -> Self {
        Self { paging: false }
    }
}

impl Mmu for X86Mmu {
    fn load_directory(&mut self, directory: u32) {
        unsafe {
            asm!("mov cr3, {}", in(reg) directory, options(nostack, preserves_flags));
        }
        if !self.paging {
            unsafe {
                asm!(
                    "mov {tmp}, cr0",
                    "or {tmp}, {bit}",
                    "mov cr0, {tmp}",
                    tmp = out(reg) _,
                    bit = const CR0_PAGING,
                    options(nostack, preserves_flags),
                );
            }
            self.paging = true;
        }
    }
}

global_asm!(r#"
    .intel_syntax noprefix
    .section .text

    .macro load_kernel_segments
        mov ax, 0x10
        mov ds, ax
        mov es, ax
        mov fs, ax
        mov gs, ax
    .endm

    .macro load_user_segments
        mov ax, 0x23
        mov ds, ax
        mov es, ax
        mov fs, ax
        mov gs, ax
    .endm

    .globl isr80h_wrapper
    .type isr80h_wrapper, @function
isr80h_wrapper:
    pushad
    load_kernel_segments
    push esp
    call isr80h_handler
    add esp, 4
    load_user_segments
    popad
    iretd

    .macro irq_stub num
        .globl irq_\num
        .type irq_\num, @function
    irq_\num:
        pushad
        load_kernel_segments
        push esp
        push \num
        call interrupt_handler
        add esp, 8
        load_user_segments
        popad
        iretd
    .endm

    irq_stub 32
    irq_stub 33

    .globl task_return
    .type task_return, @function
task_return:
    mov ebp, [esp + 4]
    push dword ptr [ebp + 48]
    push dword ptr [ebp + 44]
    push dword ptr [ebp + 40]
    push dword ptr [ebp + 36]
    push dword ptr [ebp + 32]
    load_user_segments
    mov edi, [ebp + 0]
    mov esi, [ebp + 4]
    mov ebx, [ebp + 16]
    mov edx, [ebp + 20]
    mov ecx, [ebp + 24]
    mov eax, [ebp + 28]
    mov ebp, [ebp + 8]
    iretd

    .section .note.GNU-stack,"",@progbits
"#);

extern "C" {
    pub fn isr80h_wrapper();
    pub fn irq_32();
    pub fn irq_33();
    fn task_return(frame: *const TrapFrame) -> !;
}

/// Makes `kernel` the instance the trap entry points use. Only the first
/// call takes effect.
pub fn install(kernel: Kernel) {
    KERNEL.call_once(|| Mutex::new(kernel));
}

pub fn with_kernel<R>(f: impl FnOnce(&mut Kernel) -> R) -> Option<R> {
    KERNEL.get().map(|kernel| f(&mut kernel.lock()))
}

/// Loads the first program and drops to user mode in it.
pub fn start(filename: &str) -> ! {
    let loaded: Option<KernelResult<TrapFrame>> = with_kernel(|kernel| {
        kernel.load_switch(filename)?;
        kernel.resume_current()
    });
    let frame = match loaded {
        Some(Ok(frame)) => frame,
        Some(Err(err)) => {
            klog!("[x86] cannot start '{}': {}\n", filename, err);
            kernel_panic("first program failed to load")
        }
        None => kernel_panic("kernel not installed"),
    };
    unsafe { task_return(&frame) }
}

#[no_mangle]
extern "C" fn isr80h_handler(frame: &mut TrapFrame) {
    let result = with_kernel(|kernel| kernel.trap(SYSCALL_VECTOR, frame));
    if let Some(Err(err)) = result {
        klog!("[x86] syscall trap failed: {}\n", err);
    }
}

#[no_mangle]
extern "C" fn interrupt_handler(vector: u32, frame: &mut TrapFrame) {
    let vector = vector as u8;
    let result = with_kernel(|kernel| kernel.trap(vector, frame));
    if let Some(Err(err)) = result {
        klog!("[x86] vector {} trap failed: {}\n", vector, err);
    }
    if vector >= vectors::TIMER {
        end_of_interrupt(vector);
    }
}

fn end_of_interrupt(vector: u8) {
    unsafe {
        if vector >= vectors::TIMER + 8 {
            outb(PIC2_COMMAND, PIC_EOI);
        }
        outb(PIC1_COMMAND, PIC_EOI);
    }
}

unsafe fn outb(port: u16, value: u8) {
    asm!("out dx, al", in("dx") port, in("al") value, options(nomem, nostack, preserves_flags));
}
