use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};
use crate::fs::{FileHandle, FileIo, FileMode, FileStat};

struct OpenFile {
    path: String,
    position: usize,
}

/// Read-only in-memory file system.
#[derive(Default)]
pub struct MemFs {
    files: BTreeMap<String, Vec<u8>>,
    open: BTreeMap<FileHandle, OpenFile>,
    next_handle: FileHandle,
}

impl MemFs {
    pub fn new() -> Self {
        Self {
            files: BTreeMap::new(),
            open: BTreeMap::new(),
            next_handle: 1,
        }
    }

    pub fn with_file(mut self, path: &str, data: Vec<u8>) -> Self {
        self.insert(path, data);
        self
    }

    pub fn insert(&mut self, path: &str, data: Vec<u8>) {
        self.files.insert(path.to_string(), data);
    }

    pub fn open_handles(&self) -> usize {
        self.open.len()
    }

    fn file(&self, handle: FileHandle) -> KernelResult<(&OpenFile, &Vec<u8>)> {
        let open = self.open.get(&handle).ok_or(KernelError::InvalidArgument)?;
        let data = self.files.get(&open.path).ok_or(KernelError::Io)?;
        Ok((open, data))
    }
}

impl FileIo for MemFs {
    fn open(&mut self, path: &str, mode: FileMode) -> KernelResult<FileHandle> {
        if mode != FileMode::Read || !self.files.contains_key(path) {
            return Err(KernelError::Io);
        }
        if self.next_handle == 0 {
            self.next_handle = 1;
        }
        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1);
        self.open.insert(
            handle,
            OpenFile {
                path: path.to_string(),
                position: 0,
            },
        );
        Ok(handle)
    }

    fn read(&mut self, handle: FileHandle, buf: &mut [u8], size: u32, count: u32) -> KernelResult<u32> {
        if size == 0 || count == 0 {
            return Ok(0);
        }
        let (open, data) = self.file(handle)?;
        let remaining = data.len().saturating_sub(open.position);
        let wanted = (size as usize).checked_mul(count as usize).ok_or(KernelError::InvalidArgument)?;
        let available = wanted.min(remaining).min(buf.len());
        let items = available / size as usize;
        let bytes = items * size as usize;

        let start = open.position;
        buf[..bytes].copy_from_slice(&data[start..start + bytes]);
        if let Some(open) = self.open.get_mut(&handle) {
            open.position += bytes;
        }
        Ok(items as u32)
    }

    fn stat(&mut self, handle: FileHandle) -> KernelResult<FileStat> {
        let (_, data) = self.file(handle)?;
        Ok(FileStat { size: data.len() as u32 })
    }

    fn close(&mut self, handle: FileHandle) -> KernelResult<()> {
        self.open.remove(&handle).map(|_| ()).ok_or(KernelError::InvalidArgument)
    }
}
