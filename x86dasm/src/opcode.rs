//! The closed mnemonic enumeration.
//!
//! Carries no behavioural semantics (per spec) -- just identity and a
//! canonical lowercase text form used by the Intel-syntax printer/parser.

use std::fmt;

macro_rules! opcodes {
    ($($variant:ident => $text:literal),+ $(,)?) => {
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $($variant),+
        }

        impl Opcode {
            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $text),+
                }
            }

            pub fn from_mnemonic(text: &str) -> Option<Opcode> {
                match text {
                    $($text => Some(Opcode::$variant)),+,
                    _ => None,
                }
            }
        }
    };
}

opcodes! {
    Nop => "nop",
    Mov => "mov",
    Movzx => "movzx",
    Movsx => "movsx",
    Movsxd => "movsxd",
    Movabs => "movabs",
    Lea => "lea",

    Add => "add",
    Or => "or",
    Adc => "adc",
    Sbb => "sbb",
    And => "and",
    Sub => "sub",
    Xor => "xor",
    Cmp => "cmp",
    Test => "test",

    Inc => "inc",
    Dec => "dec",
    Not => "not",
    Neg => "neg",
    Mul => "mul",
    Imul => "imul",
    Div => "div",
    Idiv => "idiv",

    Rol => "rol",
    Ror => "ror",
    Rcl => "rcl",
    Rcr => "rcr",
    Shl => "shl",
    Shr => "shr",
    Sar => "sar",

    Push => "push",
    Pop => "pop",
    Call => "call",
    Jmp => "jmp",
    Ret => "ret",
    Leave => "leave",
    Enter => "enter",

    Jo => "jo", Jno => "jno", Jb => "jb", Jae => "jae", Je => "je", Jne => "jne",
    Jbe => "jbe", Ja => "ja", Js => "js", Jns => "jns", Jp => "jp", Jnp => "jnp",
    Jl => "jl", Jge => "jge", Jle => "jle", Jg => "jg", Jcxz => "jrcxz",

    Seto => "seto", Setno => "setno", Setb => "setb", Setae => "setae", Sete => "sete",
    Setne => "setne", Setbe => "setbe", Seta => "seta", Sets => "sets", Setns => "setns",
    Setp => "setp", Setnp => "setnp", Setl => "setl", Setge => "setge", Setle => "setle",
    Setg => "setg",

    Cmovo => "cmovo", Cmovno => "cmovno", Cmovb => "cmovb", Cmovae => "cmovae",
    Cmove => "cmove", Cmovne => "cmovne", Cmovbe => "cmovbe", Cmova => "cmova",
    Cmovs => "cmovs", Cmovns => "cmovns", Cmovp => "cmovp", Cmovnp => "cmovnp",
    Cmovl => "cmovl", Cmovge => "cmovge", Cmovle => "cmovle", Cmovg => "cmovg",

    Xchg => "xchg",
    Bswap => "bswap",
    Bt => "bt", Bts => "bts", Btr => "btr", Btc => "btc",
    Bsf => "bsf", Bsr => "bsr",
    Tzcnt => "tzcnt",
    Lzcnt => "lzcnt",
    Popcnt => "popcnt",
    Xadd => "xadd",
    Cmpxchg => "cmpxchg",

    Cbw => "cbw", Cwde => "cwde", Cdqe => "cdqe",
    Cwd => "cwd", Cdq => "cdq", Cqo => "cqo",

    Movsb => "movsb", Movsw => "movsw", Movsd_str => "movsd", Movsq => "movsq",
    Cmpsb => "cmpsb", Cmpsw => "cmpsw", Cmpsd_str => "cmpsd", Cmpsq => "cmpsq",
    Stosb => "stosb", Stosw => "stosw", Stosd => "stosd", Stosq => "stosq",
    Lodsb => "lodsb", Lodsw => "lodsw", Lodsd => "lodsd", Lodsq => "lodsq",
    Scasb => "scasb", Scasw => "scasw", Scasd => "scasd", Scasq => "scasq",

    Cpuid => "cpuid",
    Syscall => "syscall",
    Int3 => "int3",
    Int => "int",
    Hlt => "hlt",
    Clc => "clc", Stc => "stc", Cld => "cld", Std => "std", Cli => "cli", Sti => "sti",
    Pause => "pause",
    Mfence => "mfence", Lfence => "lfence", Sfence => "sfence",
    Prefetcht0 => "prefetcht0", Prefetcht1 => "prefetcht1", Prefetcht2 => "prefetcht2",
    Prefetchnta => "prefetchnta",

    // Invalid in 64-bit long mode; decoded for diagnostic purposes only.
    PushEs => "push es", PushCs => "push cs", PushSs => "push ss", PushDs => "push ds",
    PopEs => "pop es", PopSs => "pop ss", PopDs => "pop ds",
    Pusha => "pusha", Popa => "popa",
    Into => "into",
    Aaa => "aaa", Aas => "aas", Daa => "daa", Das => "das",
    Aam => "aam", Aad => "aad",
    Bound => "bound",

    // SSE/MMX
    Movd => "movd", Movq => "movq",
    Movdqa => "movdqa", Movdqu => "movdqu",
    Movaps => "movaps", Movapd => "movapd",
    Movups => "movups", Movupd => "movupd",
    Pxor => "pxor", Pand => "pand", Por => "por",
    Paddb => "paddb", Paddw => "paddw", Paddd => "paddd", Paddq => "paddq",
    Psubb => "psubb", Psubw => "psubw", Psubd => "psubd", Psubq => "psubq",
    Pcmpeqb => "pcmpeqb", Pcmpeqw => "pcmpeqw", Pcmpeqd => "pcmpeqd",

    // AVX/AVX-512
    Vmovdqa => "vmovdqa", Vmovdqu => "vmovdqu",
    Vmovdqa32 => "vmovdqa32", Vmovdqu32 => "vmovdqu32",
    Vmovdqa64 => "vmovdqa64", Vmovdqu64 => "vmovdqu64",
    Vmovaps => "vmovaps", Vmovapd => "vmovapd",
    Vpxor => "vpxor", Vpxord => "vpxord",
    Vpand => "vpand", Vpandd => "vpandd",
    Vpor => "vpor", Vpord => "vpord",
    Vpternlogd => "vpternlogd",
    Vpminub => "vpminub", Vpminud => "vpminud",
    Vpcmpeqd => "vpcmpeqd",
    Vpcmpneqb => "vpcmpneqb",
    Vpcmpnequb => "vpcmpnequb",
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mnemonic_round_trip() {
        for op in [Opcode::Mov, Opcode::Vpxor, Opcode::Tzcnt, Opcode::Jne] {
            assert_eq!(Opcode::from_mnemonic(op.mnemonic()), Some(op));
        }
    }
}
