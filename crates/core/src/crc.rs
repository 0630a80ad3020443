//! CRC-CCITT checksum used by the file header and every section header.
//!
//! Polynomial x^16 + x^12 + x^5 + 1 (0x1021), initial value 0xFFFF, MSB-first,
//! no final xor. Computed a byte at a time from a 256-entry table.
//!
//! ## Example
//!
//! ```rust
//! use scp_ecg_core::crc::{crc16_ccitt, CcittCrc};
//!
//! let mut crc = CcittCrc::new();
//! crc.update(b"1234");
//! crc.update(b"56789");
//! assert_eq!(crc.finalize(), 0x29B1);
//! assert_eq!(crc16_ccitt(b"123456789"), 0x29B1);
//! ```

const POLY: u16 = 0x1021;
const INIT: u16 = 0xFFFF;

const TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ POLY;
            } else {
                crc <<= 1;
            }
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Incremental CRC-CCITT over data fed in pieces.
#[derive(Debug, Clone, Copy)]
pub struct CcittCrc {
    value: u16,
}

impl CcittCrc {
    pub fn new() -> Self {
        Self { value: INIT }
    }

    /// Feed more bytes into the checksum.
    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            let idx = ((self.value >> 8) as u8) ^ byte;
            self.value = (self.value << 8) ^ TABLE[idx as usize];
        }
    }

    pub fn finalize(&self) -> u16 {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = INIT;
    }

    /// Check `data` against an expected CRC, starting from a fresh state.
    pub fn verify(&mut self, data: &[u8], expected: u16) -> bool {
        self.reset();
        self.update(data);
        self.finalize() == expected
    }
}

impl Default for CcittCrc {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute the CRC-CCITT of `data` in one call.
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc = CcittCrc::new();
    crc.update(data);
    crc.finalize()
}
