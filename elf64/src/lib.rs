//! A from-scratch ELF64 (little-endian, `EM_X86_64`) reader.
//!
//! [`Elf64::parse`] walks a borrowed byte slice once: file header, program
//! headers, section headers (with names resolved against the section
//! header string table), symbol tables, and the dynamic table. Everything
//! downstream (the x86-64 decoder) only ever asks for section bytes by
//! name through [`Elf64::section_by_name`]/[`Elf64::section_bytes`].

pub mod dynamic;
pub mod error;
pub mod header;
pub mod program_header;
pub mod reader;
pub mod section_header;
pub mod symbol;

pub use dynamic::{DynamicEntry, DynamicTag};
pub use error::{Error, Result};
pub use header::{FileHeader, ObjectType};
pub use program_header::{ProgramHeader, SegmentType};
pub use reader::Reader;
pub use section_header::{SectionHeader, SectionType};
pub use symbol::{Symbol, SymbolBind, SymbolType};

/// A fully parsed ELF64 image, borrowing the original file bytes for
/// section contents and symbol/string-table lookups.
#[derive(Debug, Clone)]
pub struct Elf64<'a> {
    bytes: &'a [u8],
    pub header: FileHeader,
    pub program_headers: Vec<ProgramHeader>,
    pub section_headers: Vec<SectionHeader>,
    pub symbols: Vec<Symbol>,
    pub dynamic_symbols: Vec<Symbol>,
    pub dynamic: Vec<DynamicEntry>,
}

impl<'a> Elf64<'a> {
    /// Parses every structure this crate understands out of `bytes`.
    /// Missing optional tables (no `PT_DYNAMIC`, no `SHT_SYMTAB`) simply
    /// leave the corresponding vector empty rather than erroring.
    pub fn parse(bytes: &'a [u8]) -> Result<Elf64<'a>> {
        let mut r = Reader::new(bytes);
        let header = FileHeader::parse(&mut r)?;

        let mut program_headers = Vec::with_capacity(header.phnum as usize);
        for i in 0..header.phnum {
            let offset = header.phoff as usize + i as usize * header.phentsize as usize;
            let mut pr = Reader::at(bytes, offset);
            program_headers.push(ProgramHeader::parse(&mut pr)?);
        }

        let mut section_headers = Vec::with_capacity(header.shnum as usize);
        for i in 0..header.shnum {
            let offset = header.shoff as usize + i as usize * header.shentsize as usize;
            let mut sr = Reader::at(bytes, offset);
            section_headers.push(SectionHeader::parse(&mut sr)?);
        }

        if header.shnum > 0 {
            let shstrtab = section_headers
                .get(header.shstrndx as usize)
                .ok_or(Error::MissingSectionNameTable)?;
            let strtab_bytes = slice_at(bytes, shstrtab.offset, shstrtab.size)?;
            for sh in &mut section_headers {
                sh.name = reader::read_cstr_at(strtab_bytes, sh.name_index as usize)?;
            }
        }

        let mut elf = Elf64 {
            bytes,
            header,
            program_headers,
            section_headers,
            symbols: Vec::new(),
            dynamic_symbols: Vec::new(),
            dynamic: Vec::new(),
        };

        elf.symbols = elf.parse_symbol_table(SectionType::Symtab)?;
        elf.dynamic_symbols = elf.parse_symbol_table(SectionType::Dynsym)?;
        elf.dynamic = elf.parse_dynamic_table()?;

        Ok(elf)
    }

    fn parse_symbol_table(&self, kind: SectionType) -> Result<Vec<Symbol>> {
        let Some(symtab) = self.section_headers.iter().find(|s| s.section_type == kind) else {
            return Ok(Vec::new());
        };
        let strtab = self
            .section_headers
            .get(symtab.link as usize)
            .ok_or(Error::MissingSectionNameTable)?;
        let strtab_bytes = slice_at(self.bytes, strtab.offset, strtab.size)?;
        let table_bytes = slice_at(self.bytes, symtab.offset, symtab.size)?;

        let entsize = if symtab.entsize == 0 { 24 } else { symtab.entsize };
        let count = table_bytes.len() / entsize as usize;
        let mut symbols = Vec::with_capacity(count);
        let mut r = Reader::new(table_bytes);
        for _ in 0..count {
            symbols.push(Symbol::parse(&mut r, strtab_bytes)?);
        }
        Ok(symbols)
    }

    fn parse_dynamic_table(&self) -> Result<Vec<DynamicEntry>> {
        let source = self
            .program_headers
            .iter()
            .find(|p| p.segment_type == SegmentType::Dynamic)
            .map(|p| (p.offset, p.filesz))
            .or_else(|| {
                self.section_headers
                    .iter()
                    .find(|s| s.section_type == SectionType::Dynamic)
                    .map(|s| (s.offset, s.size))
            });

        let Some((offset, size)) = source else {
            return Ok(Vec::new());
        };
        let bytes = slice_at(self.bytes, offset, size)?;
        let mut r = Reader::new(bytes);
        dynamic::parse_table(&mut r)
    }

    /// Looks up a section header by its resolved name (e.g. `.text`).
    pub fn section_by_name(&self, name: &str) -> Option<&SectionHeader> {
        self.section_headers.iter().find(|s| s.name == name)
    }

    /// Returns the raw file bytes a section covers. `SHT_NOBITS` sections
    /// (`.bss`) occupy no file bytes despite a nonzero `sh_size`, so this
    /// treats that case as empty rather than indexing into unrelated data.
    pub fn section_bytes(&self, sh: &SectionHeader) -> &'a [u8] {
        if sh.section_type == SectionType::Nobits {
            return &[];
        }
        slice_at(self.bytes, sh.offset, sh.size).unwrap_or(&[])
    }

    /// Every `SHT_PROGBITS` section with `SHF_EXECINSTR` set -- the set the
    /// CLI driver disassembles, matching `.text`/`.plt`/`.init`/`.fini`/
    /// `.init_array`/`.fini_array` without hardcoding section names.
    pub fn executable_sections(&self) -> impl Iterator<Item = &SectionHeader> {
        self.section_headers
            .iter()
            .filter(|s| s.section_type == SectionType::Progbits && s.is_executable())
    }
}

fn slice_at(bytes: &[u8], offset: u64, size: u64) -> Result<&[u8]> {
    let offset = offset as usize;
    let size = size as usize;
    let end = offset
        .checked_add(size)
        .ok_or(Error::OutOfBoundsRead { offset, len: size })?;
    bytes
        .get(offset..end)
        .ok_or(Error::OutOfBoundsRead { offset, len: size })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_minimal_elf(text: &[u8]) -> Vec<u8> {
        // Ehdr(64) + one PT_LOAD phdr(56) + .text bytes + shstrtab bytes + 3 shdrs(64 each)
        let ehdr_size = 64usize;
        let phdr_size = 56usize;
        let text_off = ehdr_size + phdr_size;
        let shstrtab_bytes = b"\0.text\0.shstrtab\0";
        let shstrtab_off = text_off + text.len();
        let shdr_off = shstrtab_off + shstrtab_bytes.len();

        let mut bytes = vec![0u8; shdr_off + 64 * 3];
        bytes[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        bytes[4] = 2; // ELFCLASS64
        bytes[5] = 1; // ELFDATA2LSB
        bytes[6] = 1;
        bytes[16..18].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
        bytes[18..20].copy_from_slice(&0x3eu16.to_le_bytes()); // EM_X86_64
        bytes[24..32].copy_from_slice(&0u64.to_le_bytes()); // e_entry
        bytes[32..40].copy_from_slice(&(ehdr_size as u64).to_le_bytes()); // e_phoff
        bytes[40..48].copy_from_slice(&(shdr_off as u64).to_le_bytes()); // e_shoff
        bytes[52..54].copy_from_slice(&(ehdr_size as u16).to_le_bytes()); // e_ehsize
        bytes[54..56].copy_from_slice(&(phdr_size as u16).to_le_bytes()); // e_phentsize
        bytes[56..58].copy_from_slice(&1u16.to_le_bytes()); // e_phnum
        bytes[58..60].copy_from_slice(&64u16.to_le_bytes()); // e_shentsize
        bytes[60..62].copy_from_slice(&3u16.to_le_bytes()); // e_shnum
        bytes[62..64].copy_from_slice(&2u16.to_le_bytes()); // e_shstrndx

        // phdr: PT_LOAD
        let p = ehdr_size;
        bytes[p..p + 4].copy_from_slice(&1u32.to_le_bytes());

        // .text bytes
        bytes[text_off..text_off + text.len()].copy_from_slice(text);
        // shstrtab contents
        bytes[shstrtab_off..shstrtab_off + shstrtab_bytes.len()].copy_from_slice(shstrtab_bytes);

        // shdr[0]: null section
        // shdr[1]: .text
        let sh1 = shdr_off + 64;
        bytes[sh1..sh1 + 4].copy_from_slice(&1u32.to_le_bytes()); // name_index -> ".text"
        bytes[sh1 + 4..sh1 + 8].copy_from_slice(&1u32.to_le_bytes()); // SHT_PROGBITS
        bytes[sh1 + 8..sh1 + 16].copy_from_slice(&0x6u64.to_le_bytes()); // ALLOC|EXECINSTR
        bytes[sh1 + 24..sh1 + 32].copy_from_slice(&(text_off as u64).to_le_bytes());
        bytes[sh1 + 32..sh1 + 40].copy_from_slice(&(text.len() as u64).to_le_bytes());

        // shdr[2]: .shstrtab
        let sh2 = shdr_off + 128;
        bytes[sh2..sh2 + 4].copy_from_slice(&7u32.to_le_bytes()); // name_index -> ".shstrtab"
        bytes[sh2 + 4..sh2 + 8].copy_from_slice(&3u32.to_le_bytes()); // SHT_STRTAB
        bytes[sh2 + 24..sh2 + 32].copy_from_slice(&(shstrtab_off as u64).to_le_bytes());
        bytes[sh2 + 32..sh2 + 40].copy_from_slice(&(shstrtab_bytes.len() as u64).to_le_bytes());

        bytes
    }

    #[test]
    fn parses_section_name_and_bytes() {
        let text = [0x90, 0x90, 0xc3];
        let bytes = build_minimal_elf(&text);
        let elf = Elf64::parse(&bytes).unwrap();

        let sh = elf.section_by_name(".text").expect("section present");
        assert!(sh.is_executable());
        assert_eq!(elf.section_bytes(sh), &text[..]);
    }

    #[test]
    fn executable_sections_finds_text() {
        let text = [0xc3];
        let bytes = build_minimal_elf(&text);
        let elf = Elf64::parse(&bytes).unwrap();
        let names: Vec<_> = elf.executable_sections().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec![".text"]);
    }

    #[test]
    fn rejects_truncated_file() {
        let bytes = vec![0x7f, b'E', b'L', b'F'];
        assert!(matches!(Elf64::parse(&bytes), Err(Error::OutOfBoundsRead { .. })));
    }
}
