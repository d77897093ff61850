use alloc::vec::Vec;

use crate::config::{MAX_PATH, MAX_USER_STRING};
use crate::error::{KernelError, KernelResult};
use crate::fs::resolve_program;
use crate::kernel::Kernel;
use crate::klog;
use crate::process::ProcessId;

use super::Command;

impl Kernel {
    /// Runs syscall `id` for the current process and returns the value for
    /// its `eax`. Failures come back as negative error codes; unknown ids
    /// return 0.
    pub fn syscall(&mut self, id: u32) -> u32 {
        let Some(command) = self.syscalls.lookup(id) else {
            klog!("[syscall] unknown id {}\n", id);
            return 0;
        };

        match self.run_command(command) {
            Ok(value) => value,
            Err(err) => {
                klog!("[syscall] {:?} failed: {}\n", command, err);
                err.code() as u32
            }
        }
    }

    fn run_command(&mut self, command: Command) -> KernelResult<u32> {
        let caller = self.current_process().ok_or(KernelError::NotFound)?;
        match command {
            Command::Sum => {
                let a = self.stack_item(caller, 1)?;
                let b = self.stack_item(caller, 0)?;
                Ok(a.wrapping_add(b))
            }
            Command::Print => {
                let ptr = self.stack_item(caller, 0)?;
                let text = self.copy_string_from_user(caller, ptr, MAX_USER_STRING)?;
                self.console.write(text.as_bytes())?;
                Ok(0)
            }
            Command::GetKey => Ok(self.keyboard_pop() as u32),
            Command::PutChar => {
                let key = self.stack_item(caller, 0)? as u8;
                self.console.write(&[key])?;
                Ok(0)
            }
            Command::Malloc => {
                let size = self.stack_item(caller, 0)? as usize;
                Ok(self.process_malloc(caller, size).unwrap_or(0))
            }
            Command::Free => {
                let ptr = self.stack_item(caller, 0)?;
                self.process_free(caller, ptr)?;
                Ok(0)
            }
            Command::ProcessLoadStart => {
                let ptr = self.stack_item(caller, 0)?;
                let name = self.copy_string_from_user(caller, ptr, MAX_PATH)?;
                let path = resolve_program(&name)?;
                self.load_switch(&path)?;
                Ok(0)
            }
            Command::InvokeSystemCommand => {
                let ptr = self.stack_item(caller, 0)?;
                let line = self.copy_string_from_user(caller, ptr, MAX_USER_STRING)?;
                self.invoke_command_line(&line)?;
                Ok(0)
            }
            Command::GetProgramArguments => {
                let ptr = self.stack_item(caller, 0)?;
                let arguments = self.arguments(caller)?;
                let mut out = [0u8; 8];
                out[..4].copy_from_slice(&arguments.argc.to_le_bytes());
                out[4..].copy_from_slice(&arguments.argv.to_le_bytes());
                self.copy_to_user(caller, ptr, &out)?;
                Ok(0)
            }
            Command::Exit => {
                self.terminate(caller)?;
                Ok(0)
            }
            Command::Fork => self.fork(caller).map(|child| child.0 as u32),
            Command::Wait => {
                let target = self.stack_item(caller, 0)?;
                self.wait(caller, ProcessId(target as usize))?;
                Ok(0)
            }
            Command::GetPid => Ok(caller.0 as u32),
        }
    }

    /// Starts the program named by the first word of `line`, passing every
    /// word as its arguments.
    fn invoke_command_line(&mut self, line: &str) -> KernelResult<ProcessId> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let program = words.first().ok_or(KernelError::InvalidArgument)?;
        let path = resolve_program(program)?;

        let id = self.load(&path)?;
        if let Err(err) = self.inject_arguments(id, &words) {
            self.terminate(id)?;
            return Err(err);
        }
        self.switch_process(id)?;
        Ok(id)
    }
}
