use alloc::boxed::Box;
use alloc::vec;
use core::ops::Range;
use core::ptr::NonNull;
use core::slice;

use crate::error::{KernelError, KernelResult};

/// A window of physical memory addressed by physical address.
pub struct Ram {
    base: u32,
    len: usize,
    ptr: NonNull<u8>,
    owned: bool,
}

// Ram is only reachable through the kernel context, which is single-threaded.
unsafe impl Send for Ram {}

impl Ram {
    /// Backs `[base, base + size)` with a freshly zeroed buffer.
    pub fn zeroed(base: u32, size: u32) -> Self {
        let buffer: Box<[u8]> = vec![0u8; size as usize].into_boxed_slice();
        let len = buffer.len();
        let raw = Box::into_raw(buffer) as *mut u8;
        Self {
            base,
            len,
            // Box never hands out a null pointer.
            ptr: NonNull::new(raw).unwrap_or(NonNull::dangling()),
            owned: true,
        }
    }

    /// Wraps memory that is identity mapped at its physical address.
    ///
    /// # Safety
    /// `[base, base + size)` must be valid, identity-mapped memory owned
    /// exclusively by the returned value.
    pub unsafe fn from_raw(base: u32, size: u32) -> Self {
        Self {
            base,
            len: size as usize,
            ptr: NonNull::new(base as usize as *mut u8).unwrap_or(NonNull::dangling()),
            owned: false,
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn size(&self) -> u32 {
        self.len as u32
    }

    pub fn end(&self) -> u32 {
        self.base.wrapping_add(self.len as u32)
    }

    pub fn contains(&self, addr: u32, len: usize) -> bool {
        self.range(addr, len).is_ok()
    }

    fn range(&self, addr: u32, len: usize) -> KernelResult<Range<usize>> {
        let offset = addr.checked_sub(self.base).ok_or(KernelError::InvalidArgument)? as usize;
        let end = offset.checked_add(len).ok_or(KernelError::InvalidArgument)?;
        if end > self.len {
            return Err(KernelError::InvalidArgument);
        }
        Ok(offset..end)
    }

    fn bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    pub fn slice(&self, addr: u32, len: usize) -> KernelResult<&[u8]> {
        let range = self.range(addr, len)?;
        Ok(&self.bytes()[range])
    }

    pub fn slice_mut(&mut self, addr: u32, len: usize) -> KernelResult<&mut [u8]> {
        let range = self.range(addr, len)?;
        Ok(&mut self.bytes_mut()[range])
    }

    pub fn read(&self, addr: u32, buf: &mut [u8]) -> KernelResult<()> {
        buf.copy_from_slice(self.slice(addr, buf.len())?);
        Ok(())
    }

    pub fn write(&mut self, addr: u32, data: &[u8]) -> KernelResult<()> {
        self.slice_mut(addr, data.len())?.copy_from_slice(data);
        Ok(())
    }

    pub fn fill(&mut self, addr: u32, len: usize, value: u8) -> KernelResult<()> {
        self.slice_mut(addr, len)?.fill(value);
        Ok(())
    }

    pub fn copy(&mut self, src: u32, dst: u32, len: usize) -> KernelResult<()> {
        let from = self.range(src, len)?;
        let to = self.range(dst, len)?;
        self.bytes_mut().copy_within(from, to.start);
        Ok(())
    }

    pub fn read_u32(&self, addr: u32) -> KernelResult<u32> {
        let mut word = [0u8; 4];
        self.read(addr, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }

    pub fn write_u32(&mut self, addr: u32, value: u32) -> KernelResult<()> {
        self.write(addr, &value.to_le_bytes())
    }
}

impl Drop for Ram {
    fn drop(&mut self) {
        if self.owned {
            let raw = core::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len);
            unsafe {
                drop(Box::from_raw(raw));
            }
        }
    }
}
