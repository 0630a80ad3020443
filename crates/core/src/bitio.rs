//! Bit-level I/O for compressed lead data.
//!
//! Huffman-coded leads are packed MSB-first: the first code bit is the most
//! significant bit of the first byte. The writer pads the last byte with
//! zeros; the reader cannot tell padding from data, so the codec always stops
//! after a known number of samples.
//!
//! # Example
//! ```
//! use scp_ecg_core::bitio::{BitReader, BitWriter};
//!
//! let mut writer = BitWriter::new();
//! writer.write_bits(0b101, 3).unwrap();
//! writer.write_bits(0b1110, 4).unwrap(); // -2 in 4-bit two's complement
//! let bytes = writer.finish();
//! assert_eq!(bytes, vec![0b1011_1100]);
//!
//! let mut reader = BitReader::new(&bytes);
//! assert_eq!(reader.read_bits(3).unwrap(), 0b101);
//! assert_eq!(reader.read_signed(4).unwrap(), -2);
//! ```

use crate::error::{BitIoError, Result};

/// Writes bits MSB-first into a byte buffer.
///
/// # Invariants
/// - `bit_count` is always < 8
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    /// Completed bytes
    bytes: Vec<u8>,
    /// Current partial byte, MSB-aligned
    bit_buffer: u8,
    /// Bits used in `bit_buffer` (0-7)
    bit_count: u8,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the lowest `count` bits of `value`, most significant first.
    ///
    /// # Arguments
    /// - `value`: the bits to write; bits above `count` are ignored
    /// - `count`: number of bits to write (0-32)
    ///
    /// # Errors
    /// Returns `BitIoError::InvalidBitCount` if count > 32.
    pub fn write_bits(&mut self, value: u32, count: usize) -> Result<()> {
        if count > 32 {
            return Err(BitIoError::InvalidBitCount(count).into());
        }
        for shift in (0..count).rev() {
            self.write_bit((value >> shift) & 1 == 1);
        }
        Ok(())
    }

    /// Write a run of identical bits.
    pub fn write_run(&mut self, bit: bool, count: usize) {
        for _ in 0..count {
            self.write_bit(bit);
        }
    }

    /// Append one bit, flushing the byte once it is full.
    pub fn write_bit(&mut self, bit: bool) {
        if bit {
            self.bit_buffer |= 0x80 >> self.bit_count;
        }
        self.bit_count += 1;
        if self.bit_count == 8 {
            self.bytes.push(self.bit_buffer);
            self.bit_buffer = 0;
            self.bit_count = 0;
        }
    }

    /// Flush the partial byte (zero padded) and return the output.
    pub fn finish(mut self) -> Vec<u8> {
        if self.bit_count > 0 {
            self.bytes.push(self.bit_buffer);
        }
        self.bytes
    }

    /// Total number of bits written, including the partial byte.
    pub fn bit_len(&self) -> usize {
        self.bytes.len() * 8 + self.bit_count as usize
    }
}

/// Reads bits MSB-first from a byte buffer.
///
/// # Invariants
/// - `bit_position` never exceeds `data.len() * 8`
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    /// Source bytes; padding at the end is indistinguishable from data
    data: &'a [u8],
    /// Index of the next bit, counted from the MSB of `data[0]`
    bit_position: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            bit_position: 0,
        }
    }

    /// Read the next bit.
    ///
    /// # Errors
    /// Returns `BitIoError::UnexpectedEof` at the end of the data.
    pub fn read_bit(&mut self) -> Result<bool> {
        let byte = self
            .data
            .get(self.bit_position / 8)
            .ok_or(BitIoError::UnexpectedEof {
                position: self.bit_position,
            })?;
        let bit = (byte >> (7 - self.bit_position % 8)) & 1 == 1;
        self.bit_position += 1;
        Ok(bit)
    }

    /// Read `count` bits (at most 32) as an unsigned value.
    ///
    /// # Arguments
    /// - `count`: number of bits to read (0-32); 0 reads nothing and yields 0
    ///
    /// # Errors
    /// - `BitIoError::InvalidBitCount` if count > 32
    /// - `BitIoError::UnexpectedEof` if fewer than `count` bits remain; the
    ///   position is then unchanged
    pub fn read_bits(&mut self, count: usize) -> Result<u32> {
        if count > 32 {
            return Err(BitIoError::InvalidBitCount(count).into());
        }
        if count > self.bits_remaining() {
            return Err(BitIoError::UnexpectedEof {
                position: self.bit_position,
            }
            .into());
        }
        let mut value = 0u32;
        for _ in 0..count {
            value = (value << 1) | self.read_bit()? as u32;
        }
        Ok(value)
    }

    /// Read `count` bits as a two's-complement signed value.
    ///
    /// # Errors
    /// Same as [`read_bits`](Self::read_bits).
    pub fn read_signed(&mut self, count: usize) -> Result<i32> {
        let raw = self.read_bits(count)?;
        Ok(sign_extend(raw, count))
    }

    pub fn bits_remaining(&self) -> usize {
        self.data.len() * 8 - self.bit_position
    }

    pub fn position(&self) -> usize {
        self.bit_position
    }
}

/// Interpret the low `bits` bits of `raw` as two's complement.
pub fn sign_extend(raw: u32, bits: usize) -> i32 {
    match bits {
        0 => 0,
        bits if bits >= 32 => raw as i32,
        _ => {
            let shift = 32 - bits;
            ((raw << shift) as i32) >> shift
        }
    }
}
