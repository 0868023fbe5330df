//! Intel-syntax rendering and parsing.
//!
//! `to_intel_syntax` is the printer used by the CLI driver; `from_intel_syntax`
//! is its inverse on the subset of text the printer actually produces, used
//! by the round-trip tests and by anything that wants to hand-author an
//! `Instruction` from a string instead of a builder chain.

use crate::opcode::Opcode;
use crate::operand::{Displacement, IndirectOperand, Operand, PointerSize, SegmentedAddress};
use crate::register::{self, Register};
use crate::instruction::Instruction;
use crate::prefix::LegacyPrefix;

/// Opcodes whose operand size is implicit and which therefore never take a
/// `BYTE PTR`/`XMMWORD PTR`/... prefix on an indirect operand.
fn implicit_size_opcode(op: Opcode) -> bool {
    matches!(op, Opcode::Lea)
}

/// EVEX compressed-displacement opcodes: a `mod=01` 8-bit displacement
/// represents `disp8 * 32` (full-vector broadcast/compressed-disp factor
/// for these specific 512-bit-capable ops), not the raw byte value.
fn compressed_disp_factor(op: Opcode) -> Option<i64> {
    match op {
        Opcode::Vpternlogd | Opcode::Vpminub | Opcode::Vpminud => Some(32),
        _ => None,
    }
}

fn format_immediate(value: i64, width: u8, short_hex: bool) -> String {
    if short_hex {
        if value < 0 {
            format!("-0x{:x}", -value)
        } else {
            format!("0x{:x}", value)
        }
    } else {
        let digits = (((width as usize) + 3) / 4).max(1);
        if value < 0 {
            format!("-0x{:0width$x}", -value, width = digits)
        } else {
            format!("0x{:0width$x}", value, width = digits)
        }
    }
}

fn format_indirect(mem: &IndirectOperand, op: Opcode, short_hex: bool) -> String {
    let mut out = String::new();
    if !implicit_size_opcode(op) {
        out.push_str(mem.pointer_size.ptr_text());
        out.push(' ');
    }
    out.push('[');
    if let Some(seg) = mem.segment {
        out.push_str(seg.name());
        out.push(':');
    }
    let mut wrote_term = false;
    if let Some(base) = mem.base {
        out.push_str(base.name());
        wrote_term = true;
    }
    if let Some(index) = mem.index {
        if wrote_term {
            out.push('+');
        }
        out.push_str(index.name());
        out.push('*');
        out.push_str(&mem.scale.unwrap_or(1).to_string());
        wrote_term = true;
    }
    let disp = match compressed_disp_factor(op) {
        Some(factor) if matches!(mem.displacement, Displacement::Short(_)) => {
            mem.displacement.value() * factor
        }
        _ => mem.displacement.value(),
    };
    if disp != 0 || !wrote_term {
        if disp < 0 {
            out.push('-');
            out.push_str(&format_immediate(-disp, 32, short_hex));
        } else if wrote_term {
            out.push('+');
            out.push_str(&format_immediate(disp, 32, short_hex));
        } else {
            out.push_str(&format_immediate(disp, 32, short_hex));
        }
    }
    out.push(']');
    out
}

fn format_operand(op: &Operand, opcode: Opcode, short_hex: bool) -> String {
    match op {
        Operand::Register(r) => r.name().to_string(),
        Operand::Immediate(imm) => format_immediate(imm.value, imm.width, short_hex),
        Operand::Indirect(mem) => format_indirect(mem, opcode, short_hex),
        Operand::SegmentedAddress(SegmentedAddress { segment, address }) => {
            let seg = segment.map(|s| format!("{}:", s.name())).unwrap_or_default();
            format!("[{seg}{}]", format_immediate(*address as i64, 64, short_hex))
        }
    }
}

/// Render `instr` in Intel syntax, e.g. `mov     rbp,rsp` with `opcode_pad`
/// columns of mnemonic padding, using `short_hex` (no leading zeros) for
/// immediates when true, or width-padded hex otherwise.
pub fn to_intel_syntax(instr: &Instruction, opcode_pad: usize, short_hex: bool) -> String {
    let mut mnemonic = String::new();
    if let Some(lp) = instr.legacy_prefix {
        let name = match lp {
            LegacyPrefix::Lock => "lock",
            LegacyPrefix::Rep => "rep",
            LegacyPrefix::Repnz => "repnz",
        };
        mnemonic.push_str(name);
        mnemonic.push(' ');
    }
    mnemonic.push_str(instr.opcode.mnemonic());

    let mut text = if instr.operands.is_empty() {
        mnemonic
    } else if mnemonic.len() < opcode_pad {
        format!("{mnemonic:<opcode_pad$}")
    } else {
        format!("{mnemonic} ")
    };

    let rendered: Vec<String> = instr
        .operands
        .iter()
        .enumerate()
        .map(|(i, op)| {
            let mut s = format_operand(op, instr.opcode, short_hex);
            if i == 0 {
                if let Some(mask) = instr.mask {
                    s.push_str(&format!("{{{}}}", mask.name()));
                    if instr.zero_mask {
                        s.push_str("{z}");
                    }
                }
            }
            s
        })
        .collect();

    text.push_str(&rendered.join(","));
    text
}

struct Tokenizer<'a> {
    rest: &'a str,
}

impl<'a> Tokenizer<'a> {
    fn new(s: &'a str) -> Self {
        Tokenizer { rest: s.trim() }
    }

    fn next_word(&mut self) -> Option<&'a str> {
        self.rest = self.rest.trim_start();
        if self.rest.is_empty() {
            return None;
        }
        let end = self.rest.find(char::is_whitespace).unwrap_or(self.rest.len());
        let word = &self.rest[..end];
        self.rest = &self.rest[end..];
        Some(word)
    }
}

fn parse_immediate(text: &str) -> Option<(i64, u8)> {
    let (neg, digits) = if let Some(d) = text.strip_prefix('-') { (true, d) } else { (false, text) };
    let hex = digits.strip_prefix("0x")?;
    let value = i64::from_str_radix(hex, 16).ok()?;
    let value = if neg { -value } else { value };
    let width = if value.abs() <= i8::MAX as i64 {
        8
    } else if value.abs() <= i16::MAX as i64 {
        16
    } else if value.abs() <= i32::MAX as i64 {
        32
    } else {
        64
    };
    Some((value, width))
}

fn pointer_size_from_text(text: &str) -> Option<PointerSize> {
    Some(match text {
        "BYTE" => PointerSize::Byte,
        "WORD" => PointerSize::Word,
        "DWORD" => PointerSize::Dword,
        "QWORD" => PointerSize::Qword,
        "XMMWORD" => PointerSize::Xmmword,
        "YMMWORD" => PointerSize::Ymmword,
        "ZMMWORD" => PointerSize::Zmmword,
        _ => return None,
    })
}

fn parse_indirect(token: &str, pointer_size: PointerSize, opcode: Opcode) -> Option<IndirectOperand> {
    let inner = token.strip_prefix('[')?.strip_suffix(']')?;
    let mut mem = IndirectOperand::new(pointer_size);

    let (seg_part, addr_part) = match inner.split_once(':') {
        Some((seg, rest)) if register::from_name(seg).is_none() => {
            let seg_reg = match seg {
                "es" => crate::register::Segment::Es,
                "cs" => crate::register::Segment::Cs,
                "ss" => crate::register::Segment::Ss,
                "ds" => crate::register::Segment::Ds,
                "fs" => crate::register::Segment::Fs,
                "gs" => crate::register::Segment::Gs,
                _ => return None,
            };
            mem = mem.with_segment(seg_reg);
            (seg, rest)
        }
        _ => ("", inner),
    };
    let _ = seg_part;

    // Split on +/- while keeping the sign with the following term, except a
    // leading '-' which belongs to the first term.
    let mut terms: Vec<String> = Vec::new();
    let mut current = String::new();
    for (i, ch) in addr_part.char_indices() {
        if (ch == '+' || ch == '-') && i != 0 {
            terms.push(std::mem::take(&mut current));
            if ch == '-' {
                current.push('-');
            }
        } else {
            current.push(ch);
        }
    }
    if !current.is_empty() {
        terms.push(current);
    }

    let mut disp: i64 = 0;
    for term in terms {
        if let Some((reg_part, scale_part)) = term.split_once('*') {
            let reg = register::from_name(reg_part)?;
            let scale: u8 = scale_part.parse().ok()?;
            mem = mem.with_index_scale(reg, scale);
        } else if let Some(reg) = register::from_name(&term) {
            mem = mem.with_base(reg);
        } else if let Some((value, _)) = parse_immediate(&term) {
            disp += value;
        } else {
            return None;
        }
    }
    if disp != 0 {
        let displacement = match compressed_disp_factor(opcode) {
            Some(factor) if disp % factor == 0 => Displacement::Short((disp / factor) as i8),
            _ if disp >= i8::MIN as i64 && disp <= i8::MAX as i64 => Displacement::Short(disp as i8),
            _ => Displacement::Long(disp as i32),
        };
        mem = mem.with_displacement(displacement);
    }
    Some(mem)
}

fn parse_operand(token: &str, opcode: Opcode) -> Option<Operand> {
    let token = token.trim();
    for size_word in ["BYTE", "WORD", "DWORD", "QWORD", "XMMWORD", "YMMWORD", "ZMMWORD"] {
        if let Some(rest) = token.strip_prefix(size_word) {
            let rest = rest.trim_start().strip_prefix("PTR").unwrap_or(rest).trim_start();
            let size = pointer_size_from_text(size_word)?;
            return parse_indirect(rest, size, opcode).map(Operand::Indirect);
        }
    }
    if token.starts_with('[') {
        return parse_indirect(token, PointerSize::Qword, opcode).map(Operand::Indirect);
    }
    if let Some(reg) = register::from_name(token) {
        return Some(Operand::Register(reg));
    }
    let (value, width) = parse_immediate(token)?;
    Some(Operand::Immediate(crate::operand::Immediate::new(value, width)))
}

/// Parse Intel-syntax text back into an `Instruction`. Symmetric inverse of
/// `to_intel_syntax` on the subset of text it produces: no attempt is made
/// to parse arbitrary NASM/MASM syntax variations.
pub fn from_intel_syntax(text: &str) -> Option<Instruction> {
    let mut tok = Tokenizer::new(text);
    let mut first = tok.next_word()?;
    let legacy_prefix = match first {
        "lock" => Some(LegacyPrefix::Lock),
        "rep" => Some(LegacyPrefix::Rep),
        "repnz" => Some(LegacyPrefix::Repnz),
        _ => None,
    };
    if legacy_prefix.is_some() {
        first = tok.next_word()?;
    }
    let opcode = Opcode::from_mnemonic(first)?;

    let operand_text = tok.rest.trim();
    let mut operands = Vec::new();
    let mut mask = None;
    let mut zero_mask = false;

    if !operand_text.is_empty() {
        let mut depth = 0i32;
        let mut current = String::new();
        let mut parts: Vec<String> = Vec::new();
        for ch in operand_text.chars() {
            match ch {
                '[' => {
                    depth += 1;
                    current.push(ch);
                }
                ']' => {
                    depth -= 1;
                    current.push(ch);
                }
                ',' if depth == 0 => parts.push(std::mem::take(&mut current)),
                _ => current.push(ch),
            }
        }
        if !current.is_empty() {
            parts.push(current);
        }

        for (i, part) in parts.iter().enumerate() {
            let mut part = part.trim().to_string();
            if i == 0 {
                if let Some(brace) = part.find('{') {
                    let suffix = part.split_off(brace);
                    if let Some(mask_name) = suffix.strip_prefix('{').and_then(|s| s.split('}').next()) {
                        mask = register::from_name(mask_name);
                    }
                    zero_mask = suffix.contains("{z}");
                }
            }
            operands.push(parse_operand(&part, opcode)?);
        }
    }

    let mut instr = Instruction::new(opcode).with_operands(operands);
    if let Some(lp) = legacy_prefix {
        instr = instr.with_legacy_prefix(lp);
    }
    if let Some(m) = mask {
        instr = instr.with_mask(m, zero_mask);
    }
    Some(instr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::Immediate;

    #[test]
    fn nop_prints_bare() {
        let instr = Instruction::new(Opcode::Nop);
        assert_eq!(to_intel_syntax(&instr, 8, true), "nop");
    }

    #[test]
    fn mov_reg_reg_prints_and_parses() {
        let instr = Instruction::new(Opcode::Mov).with_operands(vec![
            Operand::Register(Register::Gpr64(5)),
            Operand::Register(Register::Gpr64(4)),
        ]);
        let text = to_intel_syntax(&instr, 8, true);
        assert_eq!(text, "mov     rbp,rsp");
        assert_eq!(from_intel_syntax(&text), Some(instr));
    }

    #[test]
    fn immediate_short_hex_no_leading_zeros() {
        let instr = Instruction::new(Opcode::Add).with_operands(vec![
            Operand::Register(Register::Gpr64(4)),
            Operand::Immediate(Immediate::new(0x18, 8)),
        ]);
        assert_eq!(to_intel_syntax(&instr, 8, true), "add     rsp,0x18");
    }

    #[test]
    fn indirect_operand_round_trips() {
        let mem = IndirectOperand::new(PointerSize::Qword)
            .with_base(Register::Gpr64(0))
            .with_index_scale(Register::Gpr64(1), 4)
            .with_displacement(Displacement::Long(0x10));
        let instr = Instruction::new(Opcode::Mov).with_operands(vec![
            Operand::Register(Register::Gpr64(2)),
            Operand::Indirect(mem),
        ]);
        let text = to_intel_syntax(&instr, 8, true);
        assert_eq!(text, "mov     rdx,QWORD PTR [rax+rcx*4+0x10]");
        assert_eq!(from_intel_syntax(&text), Some(instr));
    }

    #[test]
    fn lea_has_no_pointer_size_token() {
        let mem = IndirectOperand::new(PointerSize::Qword)
            .with_base(Register::Rip)
            .with_displacement(Displacement::Long(0x10));
        let instr = Instruction::new(Opcode::Lea).with_operands(vec![
            Operand::Register(Register::Gpr64(0)),
            Operand::Indirect(mem),
        ]);
        assert_eq!(to_intel_syntax(&instr, 8, true), "lea     rax,[rip+0x10]");
    }

    #[test]
    fn mask_and_zero_mask_suffix() {
        let instr = Instruction::new(Opcode::Vmovdqa32)
            .with_operands(vec![
                Operand::Register(Register::Zmm(0)),
                Operand::Register(Register::Zmm(1)),
            ])
            .with_mask(Register::Mask(2), true);
        assert_eq!(to_intel_syntax(&instr, 8, true), "vmovdqa32 zmm0{k2}{z},zmm1");
    }
}
