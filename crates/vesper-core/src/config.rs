use crate::error::{KernelError, KernelResult};

pub const PAGE_SIZE: u32 = 4096;
pub const BLOCK_SIZE: u32 = 4096;
pub const PAGE_TABLE_ENTRIES: usize = 1024;

pub const MAX_PROCESSES: usize = 12;
pub const MAX_PROGRAM_ALLOCATIONS: usize = 1024;
pub const KEYBOARD_BUFFER_SIZE: usize = 1024;
pub const MAX_PATH: usize = 108;
pub const MAX_USER_STRING: usize = 1024;

pub const SYSCALL_VECTOR: u8 = 0x80;
pub const MAX_SYSCALLS: usize = 1024;

pub const PROGRAM_ROOT: &str = "0:/";
pub const PROGRAM_SUFFIX: &str = ".elf";

pub mod space {
    pub const PROGRAM_VIRTUAL_ADDRESS: u32 = 0x0040_0000;
    /// Top of the range reserved for program images. The kernel heap may
    /// not overlap the user stack or this window.
    pub const USER_WINDOW_END: u32 = 0x0100_0000;
    pub const USER_STACK_SIZE: u32 = 1024 * 16;
    pub const STACK_VIRTUAL_ADDRESS_START: u32 = 0x003F_F000;

    pub const fn stack_virtual_address_end() -> u32 {
        STACK_VIRTUAL_ADDRESS_START - USER_STACK_SIZE
    }
}

pub mod selectors {
    pub const USER_CODE: u32 = 0x1B;
    pub const USER_DATA: u32 = 0x23;
}

/// Boot-time placement of the kernel heap.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct KernelConfig {
    pub heap_base: u32,
    pub heap_size: u32,
}

impl KernelConfig {
    pub const DEFAULT_HEAP_BASE: u32 = 0x0100_0000;
    pub const DEFAULT_HEAP_SIZE: u32 = 100 * 1024 * 1024;

    pub const fn new() -> Self {
        Self {
            heap_base: Self::DEFAULT_HEAP_BASE,
            heap_size: Self::DEFAULT_HEAP_SIZE,
        }
    }

    pub const fn with_heap_base(mut self, base: u32) -> Self {
        self.heap_base = base;
        self
    }

    pub const fn with_heap_size(mut self, size: u32) -> Self {
        self.heap_size = size;
        self
    }

    pub const fn heap_end(&self) -> Option<u32> {
        self.heap_base.checked_add(self.heap_size)
    }

    pub fn validate(&self) -> KernelResult<()> {
        let end = match self.heap_end() {
            Some(end) => end,
            None => return Err(KernelError::InvalidArgument),
        };
        if self.heap_size == 0 || self.heap_base % BLOCK_SIZE != 0 || self.heap_size % BLOCK_SIZE != 0 {
            return Err(KernelError::InvalidArgument);
        }

        let user_start = space::stack_virtual_address_end();
        if self.heap_base < space::USER_WINDOW_END && end > user_start {
            return Err(KernelError::InvalidArgument);
        }
        Ok(())
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}
