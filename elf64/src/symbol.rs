//! Symbol table entries (`Elf64_Sym[]`), found in `SHT_SYMTAB` and
//! `SHT_DYNSYM` sections.

use crate::error::Result;
use crate::reader::{read_cstr_at, Reader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolBind {
    Local,
    Global,
    Weak,
    Other(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolType {
    NoType,
    Object,
    Func,
    Section,
    File,
    Common,
    Tls,
    Other(u8),
}

fn bind_from_nibble(v: u8) -> SymbolBind {
    match v {
        0 => SymbolBind::Local,
        1 => SymbolBind::Global,
        2 => SymbolBind::Weak,
        other => SymbolBind::Other(other),
    }
}

fn type_from_nibble(v: u8) -> SymbolType {
    match v {
        0 => SymbolType::NoType,
        1 => SymbolType::Object,
        2 => SymbolType::Func,
        3 => SymbolType::Section,
        4 => SymbolType::File,
        5 => SymbolType::Common,
        6 => SymbolType::Tls,
        other => SymbolType::Other(other),
    }
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub bind: SymbolBind,
    pub symbol_type: SymbolType,
    pub other: u8,
    pub shndx: u16,
    pub value: u64,
    pub size: u64,
}

impl Symbol {
    /// Parses one fixed-size `Elf64_Sym` record. `name` is left as a lookup
    /// into `strtab` rather than resolved here, so callers reading a whole
    /// table don't redo the string-table bounds check per entry unless they
    /// want to.
    pub(crate) fn parse(r: &mut Reader, strtab: &[u8]) -> Result<Self> {
        let st_name = r.read_u32()?;
        let st_info = r.read_u8()?;
        let other = r.read_u8()?;
        let shndx = r.read_u16()?;
        let value = r.read_u64()?;
        let size = r.read_u64()?;

        let bind = bind_from_nibble(st_info >> 4);
        let symbol_type = type_from_nibble(st_info & 0xf);
        let name = read_cstr_at(strtab, st_name as usize)?;

        Ok(Symbol {
            name,
            bind,
            symbol_type,
            other,
            shndx,
            value,
            size,
        })
    }
}
