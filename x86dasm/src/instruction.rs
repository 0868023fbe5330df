//! The decoder/encoder's shared value type: a fully-decoded instruction.

use crate::opcode::Opcode;
use crate::operand::Operand;
use crate::prefix::LegacyPrefix;
use crate::register::Register;

/// An immutable, owned x86-64 instruction. Produced by the decoder or
/// assembled directly (e.g. by tests); consumed by the encoder, the
/// Intel-syntax printer, or the validator. Operands are left-dense: a
/// 2-operand instruction never has a "hole" at index 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub legacy_prefix: Option<LegacyPrefix>,
    pub opcode: Opcode,
    /// AVX-512 destination mask register (K1..K7; K0 means "no masking"
    /// and is therefore never stored here -- see `Instruction::mask`).
    pub mask: Option<Register>,
    pub zero_mask: bool,
    pub operands: Vec<Operand>,
    /// Set only for the handful of EVEX compare opcodes where the decoder
    /// observed the undocumented trailing 0x04 byte described in
    /// `decoder::EVEX_COMPARE_QUIRK_BYTE`. Never set by any other path.
    pub trailing_quirk_byte: bool,
}

impl Instruction {
    pub fn new(opcode: Opcode) -> Instruction {
        Instruction {
            legacy_prefix: None,
            opcode,
            mask: None,
            zero_mask: false,
            operands: Vec::new(),
            trailing_quirk_byte: false,
        }
    }

    pub fn with_operand(mut self, operand: Operand) -> Self {
        self.operands.push(operand);
        self
    }

    pub fn with_operands(mut self, operands: Vec<Operand>) -> Self {
        self.operands = operands;
        self
    }

    pub fn with_legacy_prefix(mut self, prefix: LegacyPrefix) -> Self {
        self.legacy_prefix = Some(prefix);
        self
    }

    pub fn with_mask(mut self, mask: Register, zero_mask: bool) -> Self {
        self.mask = Some(mask);
        self.zero_mask = zero_mask;
        self
    }

    pub fn with_trailing_quirk_byte(mut self, present: bool) -> Self {
        self.trailing_quirk_byte = present;
        self
    }

    pub fn operand(&self, index: usize) -> Option<&Operand> {
        self.operands.get(index)
    }
}
