use alloc::vec::Vec;

use crate::config::space;
use crate::error::{KernelError, KernelResult};
use crate::fs::{FileIo, FileMode};
use crate::klog;
use crate::mem::paging::{align_down, align_up};
use crate::mem::{AddressSpace, KernelHeap, PageFlags};

pub mod elf;

use elf::{ElfHeader, ProgramHeader};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImageKind {
    FlatBinary,
    Elf,
}

/// Raw program loaded whole at the program virtual address.
#[derive(Debug)]
pub struct FlatBinary {
    buffer: u32,
    size: u32,
}

impl FlatBinary {
    pub fn buffer(&self) -> u32 {
        self.buffer
    }

    pub fn size(&self) -> u32 {
        self.size
    }
}

/// Parsed ELF32 executable kept in one kernel heap buffer. Segment physical
/// addresses are the buffer address plus the segment's file offset.
#[derive(Debug)]
pub struct ElfImage {
    buffer: u32,
    size: u32,
    header: ElfHeader,
    segments: Vec<ProgramHeader>,
    virtual_base: u32,
    virtual_end: u32,
    physical_base: u32,
    physical_end: u32,
}

impl ElfImage {
    fn new(buffer: u32, size: u32, header: ElfHeader, segments: Vec<ProgramHeader>) -> Self {
        let mut image = Self {
            buffer,
            size,
            header,
            segments,
            virtual_base: u32::MAX,
            virtual_end: 0,
            physical_base: u32::MAX,
            physical_end: 0,
        };

        for segment in &image.segments {
            let phys = buffer + segment.offset;
            image.virtual_base = image.virtual_base.min(segment.vaddr);
            image.physical_base = image.physical_base.min(phys);
            image.virtual_end = image.virtual_end.max(segment.vaddr + segment.filesz);
            image.physical_end = image.physical_end.max(phys + segment.filesz);
        }
        image
    }

    pub fn buffer(&self) -> u32 {
        self.buffer
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn header(&self) -> &ElfHeader {
        &self.header
    }

    pub fn segments(&self) -> &[ProgramHeader] {
        &self.segments
    }

    pub fn virtual_base(&self) -> u32 {
        self.virtual_base
    }

    pub fn virtual_end(&self) -> u32 {
        self.virtual_end
    }

    pub fn physical_base(&self) -> u32 {
        self.physical_base
    }

    pub fn physical_end(&self) -> u32 {
        self.physical_end
    }

    pub fn segment_physical(&self, segment: &ProgramHeader) -> u32 {
        self.buffer + segment.offset
    }

    fn map_into(&self, heap: &mut KernelHeap, space: &AddressSpace) -> KernelResult<()> {
        for segment in &self.segments {
            let mut flags = PageFlags::PRESENT | PageFlags::USER;
            if segment.is_writable() {
                flags |= PageFlags::WRITABLE;
            }

            let phys = self.segment_physical(segment);
            space.map_to(
                heap,
                align_down(segment.vaddr),
                align_down(phys),
                align_up(phys + segment.memsz)?,
                flags,
            )?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum Image {
    FlatBinary(FlatBinary),
    Elf(ElfImage),
}

impl Image {
    pub fn kind(&self) -> ImageKind {
        match self {
            Image::FlatBinary(_) => ImageKind::FlatBinary,
            Image::Elf(_) => ImageKind::Elf,
        }
    }

    pub fn entry(&self) -> u32 {
        match self {
            Image::FlatBinary(_) => space::PROGRAM_VIRTUAL_ADDRESS,
            Image::Elf(elf) => elf.header.entry,
        }
    }

    pub fn buffer(&self) -> u32 {
        match self {
            Image::FlatBinary(flat) => flat.buffer,
            Image::Elf(elf) => elf.buffer,
        }
    }

    pub fn size(&self) -> u32 {
        match self {
            Image::FlatBinary(flat) => flat.size,
            Image::Elf(elf) => elf.size,
        }
    }

    pub fn as_elf(&self) -> Option<&ElfImage> {
        match self {
            Image::Elf(elf) => Some(elf),
            Image::FlatBinary(_) => None,
        }
    }

    /// Maps the image into `space`. ELF segments are mapped one by one
    /// without merging; a flat binary is mapped in one call.
    pub fn map_into(&self, heap: &mut KernelHeap, space: &AddressSpace) -> KernelResult<()> {
        match self {
            Image::Elf(elf) => elf.map_into(heap, space),
            Image::FlatBinary(flat) => space.map_to(
                heap,
                space::PROGRAM_VIRTUAL_ADDRESS,
                flat.buffer,
                align_up(flat.buffer + flat.size)?,
                PageFlags::PRESENT | PageFlags::USER | PageFlags::WRITABLE,
            ),
        }
    }

    /// Copies the image into a fresh buffer.
    pub fn duplicate(&self, heap: &mut KernelHeap) -> KernelResult<Image> {
        let buffer = heap.kmalloc(self.size() as usize)?;
        if let Err(err) = heap.ram_mut().copy(self.buffer(), buffer, self.size() as usize) {
            heap.kfree(buffer);
            return Err(err);
        }

        Ok(match self {
            Image::FlatBinary(flat) => Image::FlatBinary(FlatBinary {
                buffer,
                size: flat.size,
            }),
            Image::Elf(elf) => Image::Elf(ElfImage::new(buffer, elf.size, elf.header, elf.segments.clone())),
        })
    }

    pub fn close(self, heap: &mut KernelHeap) {
        heap.kfree(self.buffer());
    }
}

/// Reads `filename` whole into a zeroed kernel heap buffer.
fn read_file(files: &mut dyn FileIo, heap: &mut KernelHeap, filename: &str) -> KernelResult<(u32, u32)> {
    let handle = files.open(filename, FileMode::Read)?;
    let result = read_open_file(files, heap, handle);
    if let Err(err) = files.close(handle) {
        klog!("[loader] close of '{}' failed: {}\n", filename, err);
    }
    result
}

fn read_open_file(files: &mut dyn FileIo, heap: &mut KernelHeap, handle: u32) -> KernelResult<(u32, u32)> {
    let size = files.stat(handle)?.size;
    let buffer = heap.kzalloc(size as usize)?;

    let read = heap
        .ram_mut()
        .slice_mut(buffer, size as usize)
        .and_then(|dest| files.read(handle, dest, size, 1));

    match read {
        Ok(1) => Ok((buffer, size)),
        Ok(_) => {
            heap.kfree(buffer);
            Err(KernelError::Io)
        }
        Err(err) => {
            heap.kfree(buffer);
            Err(err)
        }
    }
}

/// Loads `filename` as an ELF32 executable. A file that is not one fails
/// with `BadFormat`.
pub fn load_elf(files: &mut dyn FileIo, heap: &mut KernelHeap, filename: &str) -> KernelResult<ElfImage> {
    let (buffer, size) = read_file(files, heap, filename)?;

    let parsed = heap
        .ram()
        .slice(buffer, size as usize)
        .and_then(|bytes| elf::parse(bytes).map_err(KernelError::from));
    let parsed = match parsed {
        Ok(parsed) => parsed,
        Err(err) => {
            heap.kfree(buffer);
            return Err(err);
        }
    };

    let backed = parsed
        .segments
        .iter()
        .map(|segment| segment.offset + segment.memsz)
        .max()
        .unwrap_or(size);

    let (buffer, size) = if backed > size {
        match grow(heap, buffer, size, backed) {
            Ok(grown) => (grown, backed),
            Err(err) => {
                heap.kfree(buffer);
                return Err(err);
            }
        }
    } else {
        (buffer, size)
    };

    let image = ElfImage::new(buffer, size, parsed.header, parsed.segments);
    klog!(
        "[loader] elf '{}' entry=0x{:08X} segments={} vbase=0x{:08X} vend=0x{:08X}\n",
        filename,
        image.header.entry,
        image.segments.len(),
        image.virtual_base,
        image.virtual_end
    );
    Ok(image)
}

fn grow(heap: &mut KernelHeap, buffer: u32, size: u32, backed: u32) -> KernelResult<u32> {
    let grown = heap.kzalloc(backed as usize)?;
    if let Err(err) = heap.ram_mut().copy(buffer, grown, size as usize) {
        heap.kfree(grown);
        return Err(err);
    }
    heap.kfree(buffer);
    Ok(grown)
}

pub fn load_flat(files: &mut dyn FileIo, heap: &mut KernelHeap, filename: &str) -> KernelResult<FlatBinary> {
    let (buffer, size) = read_file(files, heap, filename)?;
    klog!("[loader] flat binary '{}' size={} bytes\n", filename, size);
    Ok(FlatBinary { buffer, size })
}
