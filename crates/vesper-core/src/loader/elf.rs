use alloc::vec::Vec;

use crate::config::{space, PAGE_SIZE};
use crate::error::KernelError;
use crate::klog;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ElfError {
    TooShort,
    InvalidMagic,
    UnsupportedClass,
    UnsupportedEncoding,
    NotExecutable,
    EntryBelowLoadAddress,
    MissingProgramHeaders,
    InvalidProgramHeader,
    NoLoadableSegments,
}

impl From<ElfError> for KernelError {
    fn from(err: ElfError) -> Self {
        klog!("[elf] rejected image: {:?}\n", err);
        KernelError::BadFormat
    }
}

pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
pub const ELFCLASS32: u8 = 1;
pub const ELFDATA2LSB: u8 = 1;
pub const ET_EXEC: u16 = 2;
pub const PT_LOAD: u32 = 1;

pub const PF_X: u32 = 0x1;
pub const PF_W: u32 = 0x2;
pub const PF_R: u32 = 0x4;

pub const HEADER_SIZE: usize = 52;
pub const PROGRAM_HEADER_SIZE: usize = 32;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ElfHeader {
    pub file_type: u16,
    pub machine: u16,
    pub entry: u32,
    pub phoff: u32,
    pub phentsize: u16,
    pub phnum: u16,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub offset: u32,
    pub vaddr: u32,
    pub paddr: u32,
    pub filesz: u32,
    pub memsz: u32,
    pub flags: u32,
    pub align: u32,
}

impl ProgramHeader {
    pub fn is_load(&self) -> bool {
        self.p_type == PT_LOAD
    }

    pub fn is_writable(&self) -> bool {
        self.flags & PF_W != 0
    }

    pub fn is_executable(&self) -> bool {
        self.flags & PF_X != 0
    }
}

/// Header plus the loadable program headers, in file order.
#[derive(Clone, Debug)]
pub struct ElfFile {
    pub header: ElfHeader,
    pub segments: Vec<ProgramHeader>,
}

pub fn parse(bytes: &[u8]) -> Result<ElfFile, ElfError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ElfError::TooShort);
    }

    if bytes[0..4] != ELF_MAGIC {
        return Err(ElfError::InvalidMagic);
    }

    if bytes[4] != ELFCLASS32 {
        return Err(ElfError::UnsupportedClass);
    }

    if bytes[5] != ELFDATA2LSB {
        return Err(ElfError::UnsupportedEncoding);
    }

    let header = ElfHeader {
        file_type: read_u16(bytes, 16)?,
        machine: read_u16(bytes, 18)?,
        entry: read_u32(bytes, 24)?,
        phoff: read_u32(bytes, 28)?,
        phentsize: read_u16(bytes, 42)?,
        phnum: read_u16(bytes, 44)?,
    };

    if header.file_type != ET_EXEC {
        return Err(ElfError::NotExecutable);
    }

    if header.entry < space::PROGRAM_VIRTUAL_ADDRESS {
        return Err(ElfError::EntryBelowLoadAddress);
    }

    if header.phoff == 0 || header.phnum == 0 {
        return Err(ElfError::MissingProgramHeaders);
    }

    if header.phentsize as usize != PROGRAM_HEADER_SIZE {
        return Err(ElfError::InvalidProgramHeader);
    }

    let mut segments = Vec::new();
    for index in 0..header.phnum as usize {
        let offset = (header.phoff as usize)
            .checked_add(index * PROGRAM_HEADER_SIZE)
            .filter(|start| start.checked_add(PROGRAM_HEADER_SIZE).is_some_and(|end| end <= bytes.len()))
            .ok_or(ElfError::InvalidProgramHeader)?;

        let segment = ProgramHeader {
            p_type: read_u32(bytes, offset)?,
            offset: read_u32(bytes, offset + 4)?,
            vaddr: read_u32(bytes, offset + 8)?,
            paddr: read_u32(bytes, offset + 12)?,
            filesz: read_u32(bytes, offset + 16)?,
            memsz: read_u32(bytes, offset + 20)?,
            flags: read_u32(bytes, offset + 24)?,
            align: read_u32(bytes, offset + 28)?,
        };

        if !segment.is_load() {
            continue;
        }

        if segment.memsz < segment.filesz {
            return Err(ElfError::InvalidProgramHeader);
        }

        // Every end address must fit in 32 bits.
        let file_end = segment.offset.checked_add(segment.filesz);
        let ends = [
            segment.offset.checked_add(segment.memsz),
            segment.vaddr.checked_add(segment.memsz),
        ];
        match file_end {
            Some(end) if end as usize <= bytes.len() && ends.iter().all(Option::is_some) => {}
            _ => return Err(ElfError::InvalidProgramHeader),
        }

        // The file buffer is page aligned, so the file offset and the
        // virtual address must agree below the page boundary.
        if segment.vaddr % PAGE_SIZE != segment.offset % PAGE_SIZE {
            return Err(ElfError::InvalidProgramHeader);
        }

        segments.push(segment);
    }

    if segments.is_empty() {
        return Err(ElfError::NoLoadableSegments);
    }

    Ok(ElfFile { header, segments })
}

fn read_u16(bytes: &[u8], offset: usize) -> Result<u16, ElfError> {
    if offset + 2 > bytes.len() {
        return Err(ElfError::TooShort);
    }
    Ok(u16::from_le_bytes([bytes[offset], bytes[offset + 1]]))
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, ElfError> {
    if offset + 4 > bytes.len() {
        return Err(ElfError::TooShort);
    }
    Ok(u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ]))
}
