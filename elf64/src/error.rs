//! Typed errors for ELF64 parsing.

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("missing or malformed ELF magic number")]
    BadMagic,

    #[error("unsupported ELF class {0:#x} (only ELFCLASS64 is supported)")]
    UnsupportedClass(u8),

    #[error("unsupported machine type {0:#06x} (only EM_X86_64 is supported)")]
    UnsupportedMachine(u16),

    #[error("unsupported data encoding {0:#x} (only ELFDATA2LSB is supported)")]
    UnsupportedEndianness(u8),

    #[error("read of {len} byte(s) at offset {offset:#x} is out of bounds")]
    OutOfBoundsRead { offset: usize, len: usize },

    #[error("e_shstrndx does not name a section header string table")]
    MissingSectionNameTable,

    #[error("truncated file: expected at least {expected} byte(s), found {found}")]
    Truncated { expected: usize, found: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
