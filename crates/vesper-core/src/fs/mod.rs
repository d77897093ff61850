use alloc::string::String;

use crate::config::{MAX_PATH, PROGRAM_ROOT, PROGRAM_SUFFIX};
use crate::error::{KernelError, KernelResult};

#[cfg(any(test, feature = "std"))]
pub mod mem;

pub type FileHandle = u32;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileMode {
    Read,
    Write,
    Append,
}

impl FileMode {
    pub fn parse(mode: &str) -> KernelResult<Self> {
        match mode {
            "r" => Ok(FileMode::Read),
            "w" => Ok(FileMode::Write),
            "a" => Ok(FileMode::Append),
            _ => Err(KernelError::InvalidArgument),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FileStat {
    pub size: u32,
}

/// File access used by the loader. Handles are small positive integers.
pub trait FileIo: Send {
    fn open(&mut self, path: &str, mode: FileMode) -> KernelResult<FileHandle>;

    /// Reads `count` items of `size` bytes into `buf` and returns the number
    /// of whole items read.
    fn read(&mut self, handle: FileHandle, buf: &mut [u8], size: u32, count: u32) -> KernelResult<u32>;

    fn stat(&mut self, handle: FileHandle) -> KernelResult<FileStat>;
    fn close(&mut self, handle: FileHandle) -> KernelResult<()>;
}

/// Turns a program name into a path on the boot drive. `shell` becomes
/// `0:/shell.elf`; `0:/blank.bin` and `notes.txt` are kept as given apart
/// from the drive prefix.
pub fn resolve_program(name: &str) -> KernelResult<String> {
    let name = name.trim();
    if name.is_empty() || name.len() > MAX_PATH {
        return Err(KernelError::InvalidArgument);
    }

    let mut path = String::with_capacity(name.len() + PROGRAM_ROOT.len() + PROGRAM_SUFFIX.len());
    if !has_drive_prefix(name) {
        path.push_str(PROGRAM_ROOT);
    }
    path.push_str(name);

    let file = path.rsplit('/').next().unwrap_or("");
    if !file.contains('.') {
        path.push_str(PROGRAM_SUFFIX);
    }

    if path.len() > MAX_PATH {
        return Err(KernelError::InvalidArgument);
    }
    Ok(path)
}

fn has_drive_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 3 && bytes[0].is_ascii_digit() && bytes[1] == b':' && bytes[2] == b'/'
}
