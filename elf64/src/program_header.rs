//! Program header table (`Elf64_Phdr[]`), describing the segments the
//! loader maps at runtime.

use crate::error::Result;
use crate::reader::Reader;

pub const PF_X: u32 = 0x1;
pub const PF_W: u32 = 0x2;
pub const PF_R: u32 = 0x4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentType {
    Null,
    Load,
    Dynamic,
    Interp,
    Note,
    Shlib,
    Phdr,
    Tls,
    GnuEhFrame,
    GnuStack,
    GnuRelro,
    Other(u32),
}

impl SegmentType {
    fn from_u32(v: u32) -> Self {
        match v {
            0 => SegmentType::Null,
            1 => SegmentType::Load,
            2 => SegmentType::Dynamic,
            3 => SegmentType::Interp,
            4 => SegmentType::Note,
            5 => SegmentType::Shlib,
            6 => SegmentType::Phdr,
            7 => SegmentType::Tls,
            0x6474e550 => SegmentType::GnuEhFrame,
            0x6474e551 => SegmentType::GnuStack,
            0x6474e552 => SegmentType::GnuRelro,
            other => SegmentType::Other(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgramHeader {
    pub segment_type: SegmentType,
    pub flags: u32,
    pub offset: u64,
    pub vaddr: u64,
    pub paddr: u64,
    pub filesz: u64,
    pub memsz: u64,
    pub align: u64,
}

impl ProgramHeader {
    pub(crate) fn parse(r: &mut Reader) -> Result<Self> {
        let segment_type = SegmentType::from_u32(r.read_u32()?);
        let flags = r.read_u32()?;
        let offset = r.read_u64()?;
        let vaddr = r.read_u64()?;
        let paddr = r.read_u64()?;
        let filesz = r.read_u64()?;
        let memsz = r.read_u64()?;
        let align = r.read_u64()?;
        Ok(ProgramHeader {
            segment_type,
            flags,
            offset,
            vaddr,
            paddr,
            filesz,
            memsz,
            align,
        })
    }

    pub fn is_readable(&self) -> bool {
        self.flags & PF_R != 0
    }

    pub fn is_writable(&self) -> bool {
        self.flags & PF_W != 0
    }

    pub fn is_executable(&self) -> bool {
        self.flags & PF_X != 0
    }
}
