use alloc::vec::Vec;

use crate::config::MAX_SYSCALLS;
use crate::kernel::kernel_panic;
use crate::klog;

mod handlers;

/// Every operation reachable through the syscall gate. The id is the value
/// user code places in `eax`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum Command {
    Sum = 0,
    Print = 1,
    GetKey = 2,
    PutChar = 3,
    Malloc = 4,
    Free = 5,
    ProcessLoadStart = 6,
    InvokeSystemCommand = 7,
    GetProgramArguments = 8,
    Exit = 9,
    Fork = 10,
    Wait = 11,
    GetPid = 12,
}

impl Command {
    pub const ALL: [Command; 13] = [
        Command::Sum,
        Command::Print,
        Command::GetKey,
        Command::PutChar,
        Command::Malloc,
        Command::Free,
        Command::ProcessLoadStart,
        Command::InvokeSystemCommand,
        Command::GetProgramArguments,
        Command::Exit,
        Command::Fork,
        Command::Wait,
        Command::GetPid,
    ];

    pub const fn id(self) -> u32 {
        self as u32
    }
}

/// Fixed id to command table, filled once at boot.
pub struct SyscallTable {
    commands: Vec<Option<Command>>,
}

impl SyscallTable {
    pub fn new() -> Self {
        let mut commands = Vec::with_capacity(MAX_SYSCALLS);
        commands.resize(MAX_SYSCALLS, None);
        Self { commands }
    }

    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        for command in Command::ALL {
            table.register(command.id() as usize, command);
        }
        table
    }

    /// Binding an id twice, or an id outside the table, is a build mistake
    /// and halts the kernel.
    pub fn register(&mut self, id: usize, command: Command) {
        let slot = match self.commands.get_mut(id) {
            Some(slot) => slot,
            None => kernel_panic("syscall id out of range"),
        };
        if slot.is_some() {
            kernel_panic("syscall command is already registered");
        }
        *slot = Some(command);
        klog!("[syscall] id {} -> {:?}\n", id, command);
    }

    pub fn lookup(&self, id: u32) -> Option<Command> {
        self.commands.get(id as usize).copied().flatten()
    }
}

impl Default for SyscallTable {
    fn default() -> Self {
        Self::new()
    }
}
