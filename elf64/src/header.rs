//! The ELF file header (`Elf64_Ehdr`), the first fixed-size structure in
//! every ELF64 image.

use crate::error::{Error, Result};
use crate::reader::Reader;

const MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const EM_X86_64: u16 = 0x3e;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    None,
    Relocatable,
    Executable,
    SharedObject,
    Core,
    Other(u16),
}

impl ObjectType {
    fn from_u16(v: u16) -> Self {
        match v {
            0 => ObjectType::None,
            1 => ObjectType::Relocatable,
            2 => ObjectType::Executable,
            3 => ObjectType::SharedObject,
            4 => ObjectType::Core,
            other => ObjectType::Other(other),
        }
    }
}

/// `Elf64_Ehdr`. Only little-endian, 64-bit, `EM_X86_64` files parse
/// successfully; every other combination is a typed [`Error`] rather than a
/// silently wrong read.
#[derive(Debug, Clone)]
pub struct FileHeader {
    pub class: u8,
    pub data_encoding: u8,
    pub abi: u8,
    pub abi_version: u8,
    pub object_type: ObjectType,
    pub machine: u16,
    pub version: u32,
    pub entry: u64,
    pub phoff: u64,
    pub shoff: u64,
    pub flags: u32,
    pub ehsize: u16,
    pub phentsize: u16,
    pub phnum: u16,
    pub shentsize: u16,
    pub shnum: u16,
    pub shstrndx: u16,
}

impl FileHeader {
    pub(crate) fn parse(r: &mut Reader) -> Result<Self> {
        let magic = r.read_bytes(4)?;
        if magic != MAGIC {
            return Err(Error::BadMagic);
        }
        let class = r.read_u8()?;
        if class != ELFCLASS64 {
            return Err(Error::UnsupportedClass(class));
        }
        let data_encoding = r.read_u8()?;
        if data_encoding != ELFDATA2LSB {
            return Err(Error::UnsupportedEndianness(data_encoding));
        }
        let _ei_version = r.read_u8()?;
        let abi = r.read_u8()?;
        let abi_version = r.read_u8()?;
        let _padding = r.read_bytes(7)?;

        let object_type = ObjectType::from_u16(r.read_u16()?);
        let machine = r.read_u16()?;
        if machine != EM_X86_64 {
            return Err(Error::UnsupportedMachine(machine));
        }
        let version = r.read_u32()?;
        let entry = r.read_u64()?;
        let phoff = r.read_u64()?;
        let shoff = r.read_u64()?;
        let flags = r.read_u32()?;
        let ehsize = r.read_u16()?;
        let phentsize = r.read_u16()?;
        let phnum = r.read_u16()?;
        let shentsize = r.read_u16()?;
        let shnum = r.read_u16()?;
        let shstrndx = r.read_u16()?;

        Ok(FileHeader {
            class,
            data_encoding,
            abi,
            abi_version,
            object_type,
            machine,
            version,
            entry,
            phoff,
            shoff,
            flags,
            ehsize,
            phentsize,
            phnum,
            shentsize,
            shnum,
            shstrndx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_header(machine: u16, class: u8) -> Vec<u8> {
        let mut bytes = vec![0u8; 64];
        bytes[0..4].copy_from_slice(&MAGIC);
        bytes[4] = class;
        bytes[5] = ELFDATA2LSB;
        bytes[6] = 1;
        bytes[16..18].copy_from_slice(&2u16.to_le_bytes());
        bytes[18..20].copy_from_slice(&machine.to_le_bytes());
        bytes
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = minimal_header(EM_X86_64, ELFCLASS64);
        bytes[0] = 0;
        let mut r = Reader::new(&bytes);
        assert_eq!(FileHeader::parse(&mut r), Err(Error::BadMagic));
    }

    #[test]
    fn rejects_non_x86_64_machine() {
        let bytes = minimal_header(0x28, ELFCLASS64);
        let mut r = Reader::new(&bytes);
        assert_eq!(FileHeader::parse(&mut r), Err(Error::UnsupportedMachine(0x28)));
    }

    #[test]
    fn rejects_32_bit_class() {
        let bytes = minimal_header(EM_X86_64, 1);
        let mut r = Reader::new(&bytes);
        assert_eq!(FileHeader::parse(&mut r), Err(Error::UnsupportedClass(1)));
    }

    #[test]
    fn parses_valid_header() {
        let bytes = minimal_header(EM_X86_64, ELFCLASS64);
        let mut r = Reader::new(&bytes);
        let header = FileHeader::parse(&mut r).unwrap();
        assert_eq!(header.machine, EM_X86_64);
        assert_eq!(header.object_type, ObjectType::Executable);
    }
}
