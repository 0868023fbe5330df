//! Dynamic table entries (`Elf64_Dyn[]`), found in the `PT_DYNAMIC` segment
//! and mirrored by the `SHT_DYNAMIC` section. The array is terminated by a
//! `DT_NULL` entry rather than a count, so parsing stops there instead of
//! reading for a fixed length.

use crate::error::Result;
use crate::reader::Reader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicTag {
    Null,
    Needed,
    Pltrelsz,
    Hash,
    Strtab,
    Symtab,
    Rela,
    Strsz,
    Syment,
    Init,
    Fini,
    Soname,
    Rpath,
    Symbolic,
    Rel,
    Debug,
    Textrel,
    Jmprel,
    Flags,
    Runpath,
    GnuHash,
    Other(i64),
}

impl DynamicTag {
    fn from_i64(v: i64) -> Self {
        match v {
            0 => DynamicTag::Null,
            1 => DynamicTag::Needed,
            2 => DynamicTag::Pltrelsz,
            4 => DynamicTag::Hash,
            5 => DynamicTag::Strtab,
            6 => DynamicTag::Symtab,
            7 => DynamicTag::Rela,
            10 => DynamicTag::Strsz,
            11 => DynamicTag::Syment,
            12 => DynamicTag::Init,
            13 => DynamicTag::Fini,
            14 => DynamicTag::Soname,
            15 => DynamicTag::Rpath,
            16 => DynamicTag::Symbolic,
            17 => DynamicTag::Rel,
            21 => DynamicTag::Debug,
            22 => DynamicTag::Textrel,
            23 => DynamicTag::Jmprel,
            30 => DynamicTag::Flags,
            0x6ffffffe => DynamicTag::Runpath,
            0x6ffffef5 => DynamicTag::GnuHash,
            other => DynamicTag::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DynamicEntry {
    pub tag: DynamicTag,
    pub value: u64,
}

/// Parses consecutive `Elf64_Dyn` entries from `r` until a `DT_NULL` tag is
/// seen (inclusive of the terminator).
pub(crate) fn parse_table(r: &mut Reader) -> Result<Vec<DynamicEntry>> {
    let mut entries = Vec::new();
    loop {
        let tag = DynamicTag::from_i64(r.read_i64()?);
        let value = r.read_u64()?;
        let done = tag == DynamicTag::Null;
        entries.push(DynamicEntry { tag, value });
        if done {
            break;
        }
    }
    Ok(entries)
}
