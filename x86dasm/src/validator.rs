//! The shape validator (§4.6): confirms an [`Instruction`]'s operand-kind
//! tuple is one of the admissible forms for its opcode. Used as a gate by
//! both the decoder's test suite (round-trip closure) and the encoder
//! (which refuses to emit bytes for a shape it can't also decode back).

use crate::error::InvalidInstruction;
use crate::instruction::Instruction;
use crate::opcode::Opcode;
use crate::operand::{Operand, PointerSize};
use crate::register::Register;

/// A coarse operand category, matching §4.6's `R8/R16/.../M8.../I8...`
/// vocabulary. Distinct widths of the same kind (e.g. `R32` vs `R64`) are
/// kept apart because most opcode families require every GPR/memory operand
/// to agree on width.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Kind {
    R8,
    R16,
    R32,
    R64,
    Rmm,
    Rx,
    Ry,
    Rz,
    Rk,
    Rseg,
    M8,
    M16,
    M32,
    M64,
    M128,
    M256,
    M512,
    I8,
    I16,
    I32,
    I64,
    S64,
}

impl Kind {
    /// Whether this is a general-purpose-register-or-memory kind of the
    /// given width class, used by the ALU/shift/MOV shape checks below.
    fn gpr_width(self) -> Option<u16> {
        match self {
            Kind::R8 | Kind::M8 => Some(8),
            Kind::R16 | Kind::M16 => Some(16),
            Kind::R32 | Kind::M32 => Some(32),
            Kind::R64 | Kind::M64 => Some(64),
            _ => None,
        }
    }

    fn is_memory(self) -> bool {
        matches!(
            self,
            Kind::M8 | Kind::M16 | Kind::M32 | Kind::M64 | Kind::M128 | Kind::M256 | Kind::M512
        )
    }

    fn is_vector(self) -> bool {
        matches!(self, Kind::Rx | Kind::Ry | Kind::Rz)
    }

    fn vector_width(self) -> Option<u16> {
        match self {
            Kind::Rx | Kind::M128 => Some(128),
            Kind::Ry | Kind::M256 => Some(256),
            Kind::Rz | Kind::M512 => Some(512),
            _ => None,
        }
    }
}

fn pointer_kind(size: PointerSize) -> Kind {
    match size {
        PointerSize::Byte => Kind::M8,
        PointerSize::Word => Kind::M16,
        PointerSize::Dword => Kind::M32,
        PointerSize::Qword => Kind::M64,
        PointerSize::Xmmword => Kind::M128,
        PointerSize::Ymmword => Kind::M256,
        PointerSize::Zmmword => Kind::M512,
    }
}

fn operand_kind(op: &Operand) -> Option<Kind> {
    match op {
        Operand::Register(Register::Null) => None,
        Operand::Register(Register::Gpr8 { .. }) => Some(Kind::R8),
        Operand::Register(Register::Gpr16(_)) => Some(Kind::R16),
        Operand::Register(Register::Gpr32(_)) | Operand::Register(Register::Eip) => Some(Kind::R32),
        Operand::Register(Register::Gpr64(_)) | Operand::Register(Register::Rip) => Some(Kind::R64),
        Operand::Register(Register::Mmx(_)) => Some(Kind::Rmm),
        Operand::Register(Register::Xmm(_)) => Some(Kind::Rx),
        Operand::Register(Register::Ymm(_)) => Some(Kind::Ry),
        Operand::Register(Register::Zmm(_)) => Some(Kind::Rz),
        Operand::Register(Register::Mask(_)) => Some(Kind::Rk),
        Operand::Register(Register::Segment(_)) => Some(Kind::Rseg),
        Operand::Immediate(i) => Some(match i.width {
            8 => Kind::I8,
            16 => Kind::I16,
            32 => Kind::I32,
            _ => Kind::I64,
        }),
        Operand::Indirect(m) => Some(pointer_kind(m.pointer_size)),
        Operand::SegmentedAddress(_) => Some(Kind::S64),
    }
}

/// Opcode families, used to decide which shape rule applies. Most mnemonics
/// that share an encoding pattern (all sixteen Jcc variants, all eight ALU
/// ops, ...) share a family.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Family {
    NoOperand,
    AluBinary,
    UnaryRm,
    ShiftRm,
    PushPop,
    Jcc,
    Setcc,
    Cmovcc,
    MovzxMovsx,
    MovRmReg,
    Lea,
    ImulTriple,
    BitTestRm,
    Bswap,
    Xchg,
    StringOp,
    Movabs,
    Enter,
    IntImm,
    SimdMove2,
    SimdBinary2,
    VectorBinary3,
    VectorCompareToMask3,
    VectorTernary4,
    Unclassified,
}

fn family(op: Opcode) -> Family {
    use Opcode::*;
    match op {
        Nop | Ret | Leave | Cbw | Cwde | Cdqe | Cwd | Cdq | Cqo | Cpuid | Syscall | Int3 | Hlt
        | Clc | Stc | Cld | Std | Cli | Sti | Pause | Mfence | Lfence | Sfence => Family::NoOperand,

        Add | Or | Adc | Sbb | And | Sub | Xor | Cmp | Test => Family::AluBinary,

        Not | Neg | Mul | Div | Idiv | Inc | Dec => Family::UnaryRm,
        Imul => Family::ImulTriple,

        Rol | Ror | Rcl | Rcr | Shl | Shr | Sar => Family::ShiftRm,

        Push | Pop => Family::PushPop,

        Jo | Jno | Jb | Jae | Je | Jne | Jbe | Ja | Js | Jns | Jp | Jnp | Jl | Jge | Jle | Jg
        | Jcxz | Jmp | Call => Family::Jcc,

        Seto | Setno | Setb | Setae | Sete | Setne | Setbe | Seta | Sets | Setns | Setp | Setnp
        | Setl | Setge | Setle | Setg => Family::Setcc,

        Cmovo | Cmovno | Cmovb | Cmovae | Cmove | Cmovne | Cmovbe | Cmova | Cmovs | Cmovns
        | Cmovp | Cmovnp | Cmovl | Cmovge | Cmovle | Cmovg => Family::Cmovcc,

        Movzx | Movsx => Family::MovzxMovsx,
        Movsxd => Family::MovRmReg,
        Mov => Family::MovRmReg,
        Lea => Family::Lea,
        Bt | Bts | Btr | Btc => Family::BitTestRm,
        Bsf | Bsr | Tzcnt | Lzcnt | Popcnt | Xadd | Cmpxchg => Family::MovRmReg,
        Bswap => Family::Bswap,
        Xchg => Family::Xchg,

        Movsb | Movsw | Movsd_str | Movsq | Cmpsb | Cmpsw | Cmpsd_str | Cmpsq | Stosb | Stosw
        | Stosd | Stosq | Lodsb | Lodsw | Lodsd | Lodsq | Scasb | Scasw | Scasd | Scasq => {
            Family::StringOp
        }

        Movabs => Family::Movabs,
        Enter => Family::Enter,
        Int => Family::IntImm,

        Movd | Movq | Movdqa | Movdqu | Movaps | Movapd | Movups | Movupd => Family::SimdMove2,
        Pxor | Pand | Por | Paddb | Paddw | Paddd | Paddq | Psubb | Psubw | Psubd | Psubq
        | Pcmpeqb | Pcmpeqw | Pcmpeqd => Family::SimdBinary2,

        Vmovdqa | Vmovdqu | Vmovdqa32 | Vmovdqu32 | Vmovdqa64 | Vmovdqu64 | Vmovaps | Vmovapd => {
            Family::SimdMove2
        }
        Vpxor | Vpxord | Vpand | Vpandd | Vpor | Vpord | Vpminub | Vpminud => {
            Family::VectorBinary3
        }
        // EVEX compares write a mask register, not a vector register, so
        // the destination kind check differs from the plain binary family.
        Vpcmpeqd | Vpcmpneqb | Vpcmpnequb => Family::VectorCompareToMask3,
        Vpternlogd => Family::VectorTernary4,

        // Opcodes the decoder only produces for diagnostic/invalid-in-64-bit
        // purposes are never validated as encodable; they surface as a
        // decode error before an Instruction value would exist.
        _ => Family::Unclassified,
    }
}

fn alu_binary_ok(kinds: &[Kind]) -> bool {
    if kinds.len() != 2 {
        return false;
    }
    let (a, b) = (kinds[0], kinds[1]);
    match (a.gpr_width(), b.gpr_width()) {
        (Some(wa), Some(wb)) => {
            if a.is_memory() && b.is_memory() {
                return false;
            }
            if b == Kind::I8 && wa >= 8 {
                return true; // sign-extended imm8 shortcut (0x83-style)
            }
            wa == wb
        }
        (Some(wa), None) => matches!(
            (wa, b),
            (8, Kind::I8) | (16, Kind::I16) | (32, Kind::I32) | (64, Kind::I32)
        ),
        _ => false,
    }
}

fn check_family(opcode: Opcode, fam: Family, kinds: &[Kind]) -> bool {
    match fam {
        Family::NoOperand => kinds.is_empty(),
        Family::AluBinary => alu_binary_ok(kinds),
        Family::UnaryRm => kinds.len() == 1 && kinds[0].gpr_width().is_some(),
        Family::ShiftRm => {
            kinds.len() == 2
                && kinds[0].gpr_width().is_some()
                && matches!(kinds[1], Kind::I8 | Kind::R8)
        }
        Family::PushPop => {
            kinds.len() == 1
                && matches!(kinds[0], Kind::R64 | Kind::M64 | Kind::I8 | Kind::I16 | Kind::I32)
        }
        Family::Jcc => kinds.len() == 1 && matches!(kinds[0], Kind::I8 | Kind::I16 | Kind::I32 | Kind::R64 | Kind::M64),
        Family::Setcc => kinds.len() == 1 && matches!(kinds[0], Kind::R8 | Kind::M8),
        Family::Cmovcc => {
            kinds.len() == 2 && kinds[0].gpr_width().is_some() && kinds[0].gpr_width() == kinds[1].gpr_width()
        }
        Family::MovzxMovsx => {
            kinds.len() == 2
                && kinds[0].gpr_width().map(|w| w >= 16).unwrap_or(false)
                && matches!(kinds[1], Kind::R8 | Kind::M8 | Kind::R16 | Kind::M16)
        }
        Family::MovRmReg => {
            if opcode == Opcode::Movsxd {
                kinds.len() == 2
                    && kinds[0].gpr_width().map(|w| w >= 32).unwrap_or(false)
                    && matches!(kinds[1], Kind::R32 | Kind::M32)
            } else {
                kinds.len() == 2 && kinds[0].gpr_width().is_some() && kinds[0].gpr_width() == kinds[1].gpr_width()
            }
        }
        Family::Lea => {
            kinds.len() == 2 && kinds[0].gpr_width().map(|w| w >= 16).unwrap_or(false) && kinds[1].is_memory()
        }
        Family::ImulTriple => {
            (kinds.len() == 1 && kinds[0].gpr_width().is_some())
                || (kinds.len() == 2
                    && kinds[0].gpr_width().map(|w| w >= 16).unwrap_or(false)
                    && kinds[1].gpr_width().is_some())
                || (kinds.len() == 3
                    && kinds[0].gpr_width().map(|w| w >= 16).unwrap_or(false)
                    && kinds[1].gpr_width().is_some()
                    && matches!(kinds[2], Kind::I8 | Kind::I16 | Kind::I32))
        }
        Family::BitTestRm => {
            kinds.len() == 2 && kinds[0].gpr_width().map(|w| w >= 16).unwrap_or(false)
        }
        Family::Bswap => kinds.len() == 1 && matches!(kinds[0], Kind::R32 | Kind::R64),
        Family::Xchg => kinds.len() == 2 && kinds[0].gpr_width().is_some() && kinds[0].gpr_width() == kinds[1].gpr_width(),
        Family::StringOp => kinds.is_empty(),
        Family::Movabs => {
            kinds.len() == 2
                && (kinds[0] == Kind::S64 && kinds[1].gpr_width().is_some()
                    || kinds[1] == Kind::S64 && kinds[0].gpr_width().is_some())
        }
        Family::Enter => kinds.len() == 2 && kinds[0] == Kind::I16 && kinds[1] == Kind::I8,
        Family::IntImm => kinds.len() == 1 && kinds[0] == Kind::I8,
        Family::SimdMove2 => {
            kinds.len() == 2
                && kinds.iter().any(|k| k.is_vector() || matches!(k, Kind::Rmm))
                && kinds.iter().all(|k| k.is_vector() || k.is_memory() || matches!(k, Kind::Rmm | Kind::R32 | Kind::R64))
        }
        Family::SimdBinary2 => kinds.len() == 2,
        Family::VectorBinary3 => kinds.len() == 3 && kinds[0].is_vector() && kinds[1].is_vector(),
        Family::VectorCompareToMask3 => {
            kinds.len() == 3
                && (matches!(kinds[0], Kind::Rk) || kinds[0].is_vector())
                && kinds[1].is_vector()
        }
        Family::VectorTernary4 => kinds.len() == 4,
        Family::Unclassified => true,
    }
}

/// Enforce the global rules and the per-opcode operand-shape table.
pub fn check(instr: &Instruction) -> Result<(), InvalidInstruction> {
    let mnemonic = instr.opcode.mnemonic();

    let immediate_count = instr.operands.iter().filter(|o| matches!(o, Operand::Immediate(_))).count();
    let max_imm = if instr.opcode == Opcode::Enter { 2 } else { 1 };
    if immediate_count > max_imm {
        return Err(InvalidInstruction::TooManyImmediates { opcode: mnemonic, max: max_imm });
    }

    let indirect_count = instr.operands.iter().filter(|o| matches!(o, Operand::Indirect(_))).count();
    let allows_two_indirect = matches!(family(instr.opcode), Family::StringOp);
    let max_indirect = if allows_two_indirect { 2 } else { 1 };
    if indirect_count > max_indirect {
        return Err(InvalidInstruction::TooManyIndirectOperands { opcode: mnemonic, max: max_indirect });
    }

    for op in &instr.operands {
        if let Operand::Indirect(mem) = op {
            match (mem.index, mem.scale) {
                (Some(_), Some(_)) | (None, None) => {}
                _ => return Err(InvalidInstruction::IndexScaleMismatch),
            }
            if let Some(idx) = mem.index {
                let is_sp_like = matches!(
                    idx,
                    Register::Gpr32(4) | Register::Gpr64(4)
                );
                if is_sp_like {
                    return Err(InvalidInstruction::SpAsIndex);
                }
            }
        }
    }

    if let Some(mask) = instr.mask {
        let has_vector_operand = instr.operands.iter().any(|op| match op {
            Operand::Register(r) => matches!(r, Register::Xmm(_) | Register::Ymm(_) | Register::Zmm(_)),
            Operand::Indirect(m) => {
                matches!(m.pointer_size, PointerSize::Xmmword | PointerSize::Ymmword | PointerSize::Zmmword)
            }
            _ => false,
        });
        if !has_vector_operand {
            return Err(InvalidInstruction::MaskNotAllowed { opcode: mnemonic });
        }
        if instr.operands.iter().any(|op| op.as_register() == Some(mask)) {
            return Err(InvalidInstruction::MaskAliasesOperand);
        }
    } else if instr.zero_mask {
        return Err(InvalidInstruction::ZeroMaskWithoutMask);
    }

    let kinds: Vec<Kind> = instr.operands.iter().filter_map(operand_kind).collect();
    if kinds.len() != instr.operands.len() {
        // A Register::Null placeholder slipped into a real operand slot;
        // that's never a well-formed instruction.
        return Err(InvalidInstruction::UnsupportedOperandShape {
            opcode: mnemonic,
            shape: vec!["<null>"],
        });
    }

    let fam = family(instr.opcode);
    if !check_family(instr.opcode, fam, &kinds) {
        return Err(InvalidInstruction::UnsupportedOperandShape {
            opcode: mnemonic,
            shape: kinds.iter().map(kind_name).collect(),
        });
    }

    Ok(())
}

fn kind_name(k: &Kind) -> &'static str {
    match k {
        Kind::R8 => "r8",
        Kind::R16 => "r16",
        Kind::R32 => "r32",
        Kind::R64 => "r64",
        Kind::Rmm => "mm",
        Kind::Rx => "xmm",
        Kind::Ry => "ymm",
        Kind::Rz => "zmm",
        Kind::Rk => "k",
        Kind::Rseg => "sreg",
        Kind::M8 => "m8",
        Kind::M16 => "m16",
        Kind::M32 => "m32",
        Kind::M64 => "m64",
        Kind::M128 => "m128",
        Kind::M256 => "m256",
        Kind::M512 => "m512",
        Kind::I8 => "i8",
        Kind::I16 => "i16",
        Kind::I32 => "i32",
        Kind::I64 => "i64",
        Kind::S64 => "moffs64",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::Immediate;

    #[test]
    fn nop_has_no_operands() {
        assert!(check(&Instruction::new(Opcode::Nop)).is_ok());
    }

    #[test]
    fn mov_width_mismatch_rejected() {
        let bad = Instruction::new(Opcode::Mov).with_operands(vec![
            Operand::Register(Register::Gpr64(0)),
            Operand::Register(Register::Gpr32(1)),
        ]);
        assert!(matches!(
            check(&bad),
            Err(InvalidInstruction::UnsupportedOperandShape { .. })
        ));
    }

    #[test]
    fn mov_matching_widths_ok() {
        let ok = Instruction::new(Opcode::Mov).with_operands(vec![
            Operand::Register(Register::Gpr64(0)),
            Operand::Register(Register::Gpr64(1)),
        ]);
        assert!(check(&ok).is_ok());
    }

    #[test]
    fn sp_as_index_rejected() {
        use crate::operand::{IndirectOperand, PointerSize};
        let mem = IndirectOperand::new(PointerSize::Qword)
            .with_base(Register::Gpr64(0))
            .with_index_scale(Register::Gpr64(4), 1);
        let instr = Instruction::new(Opcode::Mov).with_operands(vec![
            Operand::Register(Register::Gpr64(0)),
            Operand::Indirect(mem),
        ]);
        assert!(matches!(check(&instr), Err(InvalidInstruction::SpAsIndex)));
    }

    #[test]
    fn zero_mask_without_mask_rejected() {
        let mut instr = Instruction::new(Opcode::Vpxor).with_operands(vec![
            Operand::Register(Register::Xmm(0)),
            Operand::Register(Register::Xmm(1)),
            Operand::Register(Register::Xmm(2)),
        ]);
        instr.zero_mask = true;
        assert!(matches!(check(&instr), Err(InvalidInstruction::ZeroMaskWithoutMask)));
    }

    #[test]
    fn enter_allows_two_immediates() {
        let instr = Instruction::new(Opcode::Enter).with_operands(vec![
            Operand::Immediate(Immediate::new(0x10, 16)),
            Operand::Immediate(Immediate::new(0, 8)),
        ]);
        assert!(check(&instr).is_ok());
    }
}
