#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod x86;

/// Loads page directories into the CPU.
pub trait Mmu: Send {
    fn load_directory(&mut self, directory: u32);
}

/// Stand-in used when the core runs hosted. Remembers what would have been
/// loaded.
#[derive(Debug, Default)]
pub struct HostMmu {
    loaded: Option<u32>,
    loads: usize,
}

impl HostMmu {
    pub const fn new() -> Self {
        Self { loaded: None, loads: 0 }
    }

    pub fn loaded(&self) -> Option<u32> {
        self.loaded
    }

    pub fn loads(&self) -> usize {
        self.loads
    }
}

impl Mmu for HostMmu {
    fn load_directory(&mut self, directory: u32) {
        self.loaded = Some(directory);
        self.loads += 1;
    }
}
