//! Section header table (`Elf64_Shdr[]`).
//!
//! Parsing happens in two passes: [`SectionHeader::parse`] reads the raw
//! fixed-size record (the `sh_name` field is still just an index at this
//! point), then [`Elf64::parse`](crate::Elf64::parse) resolves every
//! section's name once the section header string table section is known.

use crate::error::Result;
use crate::reader::Reader;

pub const SHF_WRITE: u64 = 0x1;
pub const SHF_ALLOC: u64 = 0x2;
pub const SHF_EXECINSTR: u64 = 0x4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionType {
    Null,
    Progbits,
    Symtab,
    Strtab,
    Rela,
    Hash,
    Dynamic,
    Note,
    Nobits,
    Rel,
    Shlib,
    Dynsym,
    InitArray,
    FiniArray,
    PreinitArray,
    Group,
    SymtabShndx,
    Other(u32),
}

impl SectionType {
    fn from_u32(v: u32) -> Self {
        match v {
            0 => SectionType::Null,
            1 => SectionType::Progbits,
            2 => SectionType::Symtab,
            3 => SectionType::Strtab,
            4 => SectionType::Rela,
            5 => SectionType::Hash,
            6 => SectionType::Dynamic,
            7 => SectionType::Note,
            8 => SectionType::Nobits,
            9 => SectionType::Rel,
            10 => SectionType::Shlib,
            11 => SectionType::Dynsym,
            14 => SectionType::InitArray,
            15 => SectionType::FiniArray,
            16 => SectionType::PreinitArray,
            17 => SectionType::Group,
            18 => SectionType::SymtabShndx,
            other => SectionType::Other(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SectionHeader {
    pub name_index: u32,
    pub name: String,
    pub section_type: SectionType,
    pub flags: u64,
    pub addr: u64,
    pub offset: u64,
    pub size: u64,
    pub link: u32,
    pub info: u32,
    pub addralign: u64,
    pub entsize: u64,
}

impl SectionHeader {
    pub(crate) fn parse(r: &mut Reader) -> Result<Self> {
        let name_index = r.read_u32()?;
        let section_type = SectionType::from_u32(r.read_u32()?);
        let flags = r.read_u64()?;
        let addr = r.read_u64()?;
        let offset = r.read_u64()?;
        let size = r.read_u64()?;
        let link = r.read_u32()?;
        let info = r.read_u32()?;
        let addralign = r.read_u64()?;
        let entsize = r.read_u64()?;
        Ok(SectionHeader {
            name_index,
            name: String::new(),
            section_type,
            flags,
            addr,
            offset,
            size,
            link,
            info,
            addralign,
            entsize,
        })
    }

    pub fn is_alloc(&self) -> bool {
        self.flags & SHF_ALLOC != 0
    }

    pub fn is_executable(&self) -> bool {
        self.flags & SHF_EXECINSTR != 0
    }
}
