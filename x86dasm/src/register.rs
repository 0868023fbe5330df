//! x86-64 register banks.
//!
//! Generalizes the old 8086 [`Register`] enum (a flat set of 16-bit/8-bit
//! names) to the full AMD64 register file: eight widths, the legacy
//! high-byte aliases, and the vector/mask banks introduced by SSE/AVX/AVX-512.

use std::fmt;

/// The x86-64 segment registers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Segment {
    Es,
    Cs,
    Ss,
    Ds,
    Fs,
    Gs,
}

impl Segment {
    /// Decode a segment register from its 3-bit `sreg` encoding.
    pub const fn from_index(index: u8) -> Option<Segment> {
        match index {
            0 => Some(Segment::Es),
            1 => Some(Segment::Cs),
            2 => Some(Segment::Ss),
            3 => Some(Segment::Ds),
            4 => Some(Segment::Fs),
            5 => Some(Segment::Gs),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Segment::Es => "es",
            Segment::Cs => "cs",
            Segment::Ss => "ss",
            Segment::Ds => "ds",
            Segment::Fs => "fs",
            Segment::Gs => "gs",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A register reference of any x86-64 bank.
///
/// `index` is the 3-bit encoding before REX/VEX/EVEX extension is applied;
/// callers always construct these from an already-combined 3/4/5-bit index
/// (see [`combine_index`](crate::modrm::combine_index)).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Register {
    /// An 8-bit GPR. `high` marks the legacy AH/CH/DH/BH aliases, which
    /// share an encoding index with AL/CL/DL/BL but are only reachable
    /// in the *absence* of a REX prefix.
    Gpr8 { index: u8, high: bool },
    Gpr16(u8),
    Gpr32(u8),
    Gpr64(u8),
    /// 32-bit instruction pointer, used only as an `IndirectOperand` base
    /// under an address-size override in RIP-relative addressing.
    Eip,
    /// 64-bit instruction pointer, used only as an `IndirectOperand` base
    /// in RIP-relative addressing.
    Rip,
    Mmx(u8),
    Xmm(u8),
    Ymm(u8),
    Zmm(u8),
    /// AVX-512 mask register K0..K7.
    Mask(u8),
    Segment(Segment),
    /// A syntactically-encodable but semantically meaningless register
    /// field, e.g. an unused ModR/M `reg` sub-opcode slot.
    Null,
}

impl Register {
    pub const fn gpr8(index: u8) -> Register {
        // AH/CH/DH/BH share indices 4..=7 with SPL/BPL/SIL/DIL; callers that
        // want the high-byte alias go through `gpr8_high`.
        Register::Gpr8 { index, high: false }
    }

    pub const fn gpr8_high(index: u8) -> Register {
        Register::Gpr8 { index, high: true }
    }

    /// Bit width of the register's value, in bits.
    pub const fn width(self) -> u16 {
        match self {
            Register::Gpr8 { .. } => 8,
            Register::Gpr16(_) => 16,
            Register::Gpr32(_) | Register::Eip => 32,
            Register::Gpr64(_) | Register::Rip => 64,
            Register::Mmx(_) => 64,
            Register::Xmm(_) => 128,
            Register::Ymm(_) => 256,
            Register::Zmm(_) => 512,
            Register::Mask(_) => 64,
            Register::Segment(_) => 16,
            Register::Null => 0,
        }
    }

    /// The encoding index (0..=31 for vector banks, 0..=15 for GPRs),
    /// ignoring high/low byte distinctions.
    pub const fn encoding(self) -> u8 {
        match self {
            Register::Gpr8 { index, .. } => index,
            Register::Gpr16(i)
            | Register::Gpr32(i)
            | Register::Gpr64(i)
            | Register::Mmx(i)
            | Register::Xmm(i)
            | Register::Ymm(i)
            | Register::Zmm(i)
            | Register::Mask(i) => i,
            Register::Segment(s) => s as u8,
            Register::Eip | Register::Rip | Register::Null => 0,
        }
    }

    /// Whether this register's index needs a REX extension bit (>= 8).
    pub const fn requires_extension(self) -> bool {
        self.encoding() >= 8
    }

    /// Whether this register's index needs the VEX/EVEX 5th extension bit (>= 16).
    pub const fn requires_evex_extension(self) -> bool {
        self.encoding() >= 16
    }

    pub const fn is_high_byte(self) -> bool {
        matches!(self, Register::Gpr8 { high: true, .. })
    }

    /// True for SPL/BPL/SIL/DIL, which require a REX prefix to disambiguate
    /// from the legacy AH/CH/DH/BH aliases sharing the same index.
    pub const fn requires_rex_for_low_byte(self) -> bool {
        matches!(self, Register::Gpr8 { index: 4..=7, high: false })
    }

    pub fn name(self) -> &'static str {
        const GPR8: [&str; 8] = ["al", "cl", "dl", "bl", "spl", "bpl", "sil", "dil"];
        const GPR8_EXT: [&str; 8] = ["r8b", "r9b", "r10b", "r11b", "r12b", "r13b", "r14b", "r15b"];
        const GPR8_HIGH: [&str; 4] = ["ah", "ch", "dh", "bh"];
        const GPR16: [&str; 16] = [
            "ax", "cx", "dx", "bx", "sp", "bp", "si", "di", "r8w", "r9w", "r10w", "r11w", "r12w",
            "r13w", "r14w", "r15w",
        ];
        const GPR32: [&str; 16] = [
            "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi", "r8d", "r9d", "r10d", "r11d",
            "r12d", "r13d", "r14d", "r15d",
        ];
        const GPR64: [&str; 16] = [
            "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11",
            "r12", "r13", "r14", "r15",
        ];

        match self {
            Register::Gpr8 { index, high: true } => GPR8_HIGH[index as usize - 4],
            Register::Gpr8 { index, high: false } if index < 8 => GPR8[index as usize],
            Register::Gpr8 { index, .. } => GPR8_EXT[index as usize - 8],
            Register::Gpr16(i) => GPR16[i as usize],
            Register::Gpr32(i) => GPR32[i as usize],
            Register::Gpr64(i) => GPR64[i as usize],
            Register::Eip => "eip",
            Register::Rip => "rip",
            Register::Mmx(i) => {
                const NAMES: [&str; 8] = ["mm0", "mm1", "mm2", "mm3", "mm4", "mm5", "mm6", "mm7"];
                NAMES[i as usize]
            }
            Register::Xmm(i) => XMM_NAMES[i as usize],
            Register::Ymm(i) => YMM_NAMES[i as usize],
            Register::Zmm(i) => ZMM_NAMES[i as usize],
            Register::Mask(i) => {
                const NAMES: [&str; 8] = ["k0", "k1", "k2", "k3", "k4", "k5", "k6", "k7"];
                NAMES[i as usize]
            }
            Register::Segment(s) => s.name(),
            Register::Null => "",
        }
    }
}

const XMM_NAMES: [&str; 32] = [
    "xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7", "xmm8", "xmm9", "xmm10",
    "xmm11", "xmm12", "xmm13", "xmm14", "xmm15", "xmm16", "xmm17", "xmm18", "xmm19", "xmm20",
    "xmm21", "xmm22", "xmm23", "xmm24", "xmm25", "xmm26", "xmm27", "xmm28", "xmm29", "xmm30",
    "xmm31",
];
const YMM_NAMES: [&str; 32] = [
    "ymm0", "ymm1", "ymm2", "ymm3", "ymm4", "ymm5", "ymm6", "ymm7", "ymm8", "ymm9", "ymm10",
    "ymm11", "ymm12", "ymm13", "ymm14", "ymm15", "ymm16", "ymm17", "ymm18", "ymm19", "ymm20",
    "ymm21", "ymm22", "ymm23", "ymm24", "ymm25", "ymm26", "ymm27", "ymm28", "ymm29", "ymm30",
    "ymm31",
];
const ZMM_NAMES: [&str; 32] = [
    "zmm0", "zmm1", "zmm2", "zmm3", "zmm4", "zmm5", "zmm6", "zmm7", "zmm8", "zmm9", "zmm10",
    "zmm11", "zmm12", "zmm13", "zmm14", "zmm15", "zmm16", "zmm17", "zmm18", "zmm19", "zmm20",
    "zmm21", "zmm22", "zmm23", "zmm24", "zmm25", "zmm26", "zmm27", "zmm28", "zmm29", "zmm30",
    "zmm31",
];

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Look up a register by its canonical lowercase Intel-syntax name, used by
/// the Intel-syntax parser (`from_intel_syntax`). Case-sensitive per spec.
pub fn from_name(name: &str) -> Option<Register> {
    for (i, n) in ["al", "cl", "dl", "bl", "spl", "bpl", "sil", "dil"]
        .iter()
        .enumerate()
    {
        if *n == name {
            return Some(Register::gpr8(i as u8));
        }
    }
    for (i, n) in ["ah", "ch", "dh", "bh"].iter().enumerate() {
        if *n == name {
            return Some(Register::gpr8_high(i as u8 + 4));
        }
    }
    for i in 8..16u8 {
        if Register::gpr8(i).name() == name {
            return Some(Register::gpr8(i));
        }
    }
    for i in 0..16u8 {
        if Register::Gpr16(i).name() == name {
            return Some(Register::Gpr16(i));
        }
        if Register::Gpr32(i).name() == name {
            return Some(Register::Gpr32(i));
        }
        if Register::Gpr64(i).name() == name {
            return Some(Register::Gpr64(i));
        }
    }
    if name == "eip" {
        return Some(Register::Eip);
    }
    if name == "rip" {
        return Some(Register::Rip);
    }
    for i in 0..8u8 {
        if Register::Mmx(i).name() == name {
            return Some(Register::Mmx(i));
        }
        if Register::Mask(i).name() == name {
            return Some(Register::Mask(i));
        }
    }
    for i in 0..32u8 {
        if XMM_NAMES[i as usize] == name {
            return Some(Register::Xmm(i));
        }
        if YMM_NAMES[i as usize] == name {
            return Some(Register::Ymm(i));
        }
        if ZMM_NAMES[i as usize] == name {
            return Some(Register::Zmm(i));
        }
    }
    for s in [
        Segment::Es,
        Segment::Cs,
        Segment::Ss,
        Segment::Ds,
        Segment::Fs,
        Segment::Gs,
    ] {
        if s.name() == name {
            return Some(Register::Segment(s));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpr_names_round_trip() {
        for i in 0..16u8 {
            let r = Register::Gpr64(i);
            assert_eq!(from_name(r.name()), Some(r));
        }
    }

    #[test]
    fn high_byte_distinct_from_low_byte() {
        let ah = Register::gpr8_high(4);
        let spl = Register::gpr8(4);
        assert_ne!(ah.name(), spl.name());
        assert_eq!(ah.encoding(), spl.encoding());
        assert!(spl.requires_rex_for_low_byte());
        assert!(!ah.requires_rex_for_low_byte());
    }

    #[test]
    fn extension_thresholds() {
        assert!(!Register::Gpr64(7).requires_extension());
        assert!(Register::Gpr64(8).requires_extension());
        assert!(!Register::Zmm(15).requires_evex_extension());
        assert!(Register::Zmm(16).requires_evex_extension());
    }
}
