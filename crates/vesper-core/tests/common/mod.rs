#![allow(dead_code)]

use vesper_core::arch::HostMmu;
use vesper_core::config::{space, BLOCK_SIZE, SYSCALL_VECTOR};
use vesper_core::drivers::mock::MemConsole;
use vesper_core::fs::mem::MemFs;
use vesper_core::loader::elf::{PF_R, PF_W, PF_X};
use vesper_core::process::ProcessId;
use vesper_core::syscall::Command;
use vesper_core::trap::TrapFrame;
use vesper_core::{Kernel, KernelConfig};

pub const HEAP_BASE: u32 = 0x0100_0000;
pub const HEAP_SIZE: u32 = 64 * 1024 * 1024;
pub const ENTRY: u32 = 0x0040_0000;
pub const DATA: u32 = 0x0040_1000;

pub const TEXT_FLAGS: u32 = PF_R | PF_X;
pub const DATA_FLAGS: u32 = PF_R | PF_W;

pub fn config() -> KernelConfig {
    KernelConfig::new().with_heap_base(HEAP_BASE).with_heap_size(HEAP_SIZE)
}

pub fn boot(fs: MemFs) -> (Kernel, &'static MemConsole) {
    let console: &'static MemConsole = Box::leak(Box::new(MemConsole::new("console")));
    let kernel = Kernel::boot(config(), Box::new(HostMmu::new()), Box::new(fs), console).unwrap();
    (kernel, console)
}

/// Kernel with a heap of exactly `blocks` blocks, for running allocations
/// out at a chosen step.
pub fn boot_sized(fs: MemFs, blocks: u32) -> (Kernel, &'static MemConsole) {
    let console: &'static MemConsole = Box::leak(Box::new(MemConsole::new("console")));
    let config = config().with_heap_size(blocks * BLOCK_SIZE);
    let kernel = Kernel::boot(config, Box::new(HostMmu::new()), Box::new(fs), console).unwrap();
    (kernel, console)
}

/// Kernel whose file system holds `0:/prog.elf`, a two-segment program.
pub fn boot_with_program() -> (Kernel, &'static MemConsole) {
    boot(MemFs::new().with_file("0:/prog.elf", program()))
}

pub fn program() -> Vec<u8> {
    ElfBuilder::new(ENTRY)
        .segment(ENTRY, vec![0x90; 64], 64, TEXT_FLAGS)
        .segment(DATA, b"data".to_vec(), 0x2000, DATA_FLAGS)
        .build()
}

struct Segment {
    vaddr: u32,
    data: Vec<u8>,
    memsz: u32,
    flags: u32,
}

/// Builds minimal ELF32 executables. Segment `n` is stored at file offset
/// `(n + 1) * 0x1000` plus the sub-page part of its address.
pub struct ElfBuilder {
    entry: u32,
    segments: Vec<Segment>,
}

impl ElfBuilder {
    pub fn new(entry: u32) -> Self {
        Self {
            entry,
            segments: Vec::new(),
        }
    }

    pub fn segment(mut self, vaddr: u32, data: Vec<u8>, memsz: u32, flags: u32) -> Self {
        self.segments.push(Segment {
            vaddr,
            data,
            memsz,
            flags,
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![0u8; 52];
        out[0..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
        out[4] = 1;
        out[5] = 1;
        out[6] = 1;
        put_u16(&mut out, 16, 2);
        put_u16(&mut out, 18, 3);
        put_u32(&mut out, 20, 1);
        put_u32(&mut out, 24, self.entry);
        put_u32(&mut out, 28, 52);
        put_u16(&mut out, 40, 52);
        put_u16(&mut out, 42, 32);
        put_u16(&mut out, 44, self.segments.len() as u16);

        let mut offsets = Vec::new();
        for (index, segment) in self.segments.iter().enumerate() {
            let offset = (index as u32 + 1) * 0x1000 + segment.vaddr % 0x1000;
            offsets.push(offset);

            let mut header = [0u8; 32];
            put_u32(&mut header, 0, 1);
            put_u32(&mut header, 4, offset);
            put_u32(&mut header, 8, segment.vaddr);
            put_u32(&mut header, 12, segment.vaddr);
            put_u32(&mut header, 16, segment.data.len() as u32);
            put_u32(&mut header, 20, segment.memsz);
            put_u32(&mut header, 24, segment.flags);
            put_u32(&mut header, 28, 0x1000);
            out.extend_from_slice(&header);
        }

        for (segment, offset) in self.segments.iter().zip(offsets) {
            let offset = offset as usize;
            if out.len() < offset + segment.data.len() {
                out.resize(offset + segment.data.len(), 0);
            }
            out[offset..offset + segment.data.len()].copy_from_slice(&segment.data);
        }
        out
    }
}

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Runs `command` as a syscall from the current process with `args` pushed
/// on its stack, and returns the frame the trap hands back.
pub fn syscall(kernel: &mut Kernel, command: Command, args: &[u32]) -> TrapFrame {
    syscall_raw(kernel, command.id(), args)
}

pub fn syscall_raw(kernel: &mut Kernel, id: u32, args: &[u32]) -> TrapFrame {
    let caller = kernel.current_process().unwrap();
    let mut frame = kernel.resume_current().unwrap();
    frame.esp = space::STACK_VIRTUAL_ADDRESS_START - 4 * args.len() as u32;
    for (index, arg) in args.iter().enumerate() {
        kernel
            .copy_to_user(caller, frame.esp + 4 * index as u32, &arg.to_le_bytes())
            .unwrap();
    }
    frame.eax = id;
    kernel.trap(SYSCALL_VECTOR, &mut frame).unwrap();
    frame
}

/// Copies `text` plus a NUL into a fresh allocation of `id`.
pub fn user_string(kernel: &mut Kernel, id: ProcessId, text: &str) -> u32 {
    let ptr = kernel.process_malloc(id, text.len() + 1).unwrap();
    let mut bytes = text.as_bytes().to_vec();
    bytes.push(0);
    kernel.copy_to_user(id, ptr, &bytes).unwrap();
    ptr
}
