//! Byte cursor abstractions used by the decoder and encoder.
//!
//! [`Cursor`] is a read-only, bounds-checked view over a borrowed byte
//! slice with an internal position, generalizing the old fixed-size
//! `Memory<const SIZE: usize>` array of an 8086 emulator to the
//! arbitrary-length code sections of an ELF64 file.

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("attempted to read past the end of the buffer at offset {offset:#x} (buffer length {len:#x})")]
    OutOfBounds { offset: usize, len: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A read-only cursor over a byte slice. x86-64 code is always
/// little-endian, so every multi-byte read here is little-endian too.
#[derive(Debug, Clone, Copy)]
pub struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    pub fn at(bytes: &'a [u8], pos: usize) -> Self {
        Cursor { bytes, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn set_position(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// Bytes already consumed, from the position this cursor started scanning
    /// the current instruction at (used for error reporting hex dumps).
    pub fn consumed_since(&self, start: usize) -> &'a [u8] {
        &self.bytes[start..self.pos.min(self.bytes.len())]
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        if end > self.bytes.len() {
            return Err(Error::OutOfBounds {
                offset: self.pos,
                len: self.bytes.len(),
            });
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Look at the next byte without consuming it.
    pub fn peek1(&self) -> Result<u8> {
        self.bytes.get(self.pos).copied().ok_or(Error::OutOfBounds {
            offset: self.pos,
            len: self.bytes.len(),
        })
    }

    pub fn read1(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read2_le(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read4_le(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read8_le(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read1()? as i8)
    }

    pub fn read_i16_le(&mut self) -> Result<i16> {
        Ok(self.read2_le()? as i16)
    }

    pub fn read_i32_le(&mut self) -> Result<i32> {
        Ok(self.read4_le()? as i32)
    }

    pub fn read_i64_le(&mut self) -> Result<i64> {
        Ok(self.read8_le()? as i64)
    }
}

/// A write-only byte buffer, the encoder's counterpart to [`Cursor`].
#[derive(Debug, Default, Clone)]
pub struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Writer { bytes: Vec::new() }
    }

    pub fn write_u8(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub fn write_i16(&mut self, v: i16) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn array(self) -> Vec<u8> {
        self.bytes
    }
}
