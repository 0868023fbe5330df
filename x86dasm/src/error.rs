//! The decoder/encoder/validator error taxonomy.
//!
//! Errors are typed, not stringly-typed, except for the single catch-all
//! `DecodingException` variant the spec reserves for malformed encodings
//! that don't deserve their own variant (truncated input, impossible SIB
//! combinations, disallowed far-segment forms).

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown opcode {bytes:02x?} at offset {offset:#x}")]
    UnknownOpcode { bytes: Vec<u8>, offset: usize },

    #[error("reserved opcode {bytes:02x?} at offset {offset:#x}")]
    ReservedOpcode { bytes: Vec<u8>, offset: usize },

    #[error("{mnemonic} ({byte:#04x}) is invalid in 64-bit mode at offset {offset:#x}")]
    InvalidLegacyOpcode {
        byte: u8,
        mnemonic: &'static str,
        offset: usize,
    },

    #[error("unrecognized prefix {name} at offset {offset:#x}")]
    UnrecognizedPrefix { name: &'static str, offset: usize },

    #[error("malformed encoding at offset {offset:#x}: {message}")]
    DecodingException { message: String, offset: usize },

    #[error("truncated instruction at offset {offset:#x}: needed {needed} more byte(s)")]
    Truncated { offset: usize, needed: usize },
}

impl DecodeError {
    /// The file offset of the first unconsumed byte, i.e. the start of the
    /// instruction that failed to decode -- the position the cursor is left
    /// at per spec's error-handling contract.
    pub fn offset(&self) -> usize {
        match self {
            DecodeError::UnknownOpcode { offset, .. }
            | DecodeError::ReservedOpcode { offset, .. }
            | DecodeError::InvalidLegacyOpcode { offset, .. }
            | DecodeError::UnrecognizedPrefix { offset, .. }
            | DecodeError::DecodingException { offset, .. }
            | DecodeError::Truncated { offset, .. } => *offset,
        }
    }
}

impl From<crate::cursor::Error> for DecodeError {
    fn from(e: crate::cursor::Error) -> Self {
        match e {
            crate::cursor::Error::OutOfBounds { offset, len } => DecodeError::Truncated {
                offset,
                needed: offset.saturating_sub(len).max(1),
            },
        }
    }
}

/// Raised by the validator (and by the encoder, which runs the validator
/// before emitting bytes for a shape it would otherwise not be able to
/// round-trip).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidInstruction {
    #[error("{opcode} does not admit operand shape {shape:?}")]
    UnsupportedOperandShape { opcode: &'static str, shape: Vec<&'static str> },

    #[error("{opcode} takes at most {max} immediate operand(s)")]
    TooManyImmediates { opcode: &'static str, max: usize },

    #[error("{opcode} takes at most {max} indirect operand(s)")]
    TooManyIndirectOperands { opcode: &'static str, max: usize },

    #[error("destination mask is not legal on {opcode}")]
    MaskNotAllowed { opcode: &'static str },

    #[error("zero-masking requires a destination mask")]
    ZeroMaskWithoutMask,

    #[error("destination mask register may not also appear as a named operand")]
    MaskAliasesOperand,

    #[error("indirect operand requires scale when index is present, and vice versa")]
    IndexScaleMismatch,

    #[error("SP/ESP/RSP cannot be used as an index register")]
    SpAsIndex,
}

/// Raised by the byte encoder. Wraps [`InvalidInstruction`] for shape
/// failures caught by the validator pre-pass, plus one catch-all for
/// mnemonics this encoder doesn't yet have a byte encoding table entry for.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error(transparent)]
    Invalid(#[from] InvalidInstruction),

    #[error("no byte encoding is implemented for {opcode} with this operand shape")]
    Unencodable { opcode: &'static str },
}
