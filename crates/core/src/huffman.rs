//! Huffman tables (Section 2) and the per-lead sample codec.
//!
//! A lead is coded in three steps:
//! 1. Difference coding: order 0, 1 or 2 (see [`DifferenceOrder`])
//! 2. Entropy coding of the differences with one of three modes:
//!    - **Raw**: fixed 16-bit big-endian values, no bit packing
//!    - **Default**: the built-in run table (|v| <= 8 as a unary run plus
//!      sign, larger values behind a 9-ones escape with 8 or 16 raw bits)
//!    - **Custom**: one or more transmitted tables with in-stream switching
//! 3. MSB-first bit packing (see [`crate::bitio`])
//!
//! # Section 2 Format
//!
//! ```text
//! table_count (2)            0 = raw, 19999 = default table
//! per table:
//!   entry_count (2)
//!   per entry (9 bytes):
//!     prefix_bits (1) | total_bits (1) | mode (1) | value (2) | code (4)
//! ```
//!
//! `mode` is 1 for a value code and 0 for a table switch whose `value` is
//! the 1-based target table. `code` is stored bit-reversed: the first bit in
//! the stream is the least significant bit of the wire field.
//!
//! The codec does not self-terminate: decoders are always told how many
//! samples to produce.

use crate::bitio::{BitReader, BitWriter};
use crate::byteio::{ByteReader, ByteWrite};
use crate::error::{BitIoError, Error, HuffmanError, Result};
use crate::framing::{FrameContext, Section, SectionHeader};

/// Table count announcing the built-in default table
pub const DEFAULT_TABLE_SENTINEL: u16 = 19999;

/// Consecutive ones that announce an escaped value in the default table
const ESCAPE_RUN: usize = 9;

/// Maximum run length coded directly by the default table
const MAX_DIRECT: i32 = 8;

/// How many times the sample sequence is differenced before entropy coding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DifferenceOrder {
    /// Samples are coded as-is
    Zero,
    /// Each sample minus its predecessor; the first sample is raw
    One,
    /// Second difference `x[i] - (2*x[i-1] - x[i-2])`; the first two samples are raw
    #[default]
    Two,
}

impl DifferenceOrder {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Zero => 0,
            Self::One => 1,
            Self::Two => 2,
        }
    }

    /// Turn samples into the values handed to the entropy coder.
    pub fn difference(self, samples: &[i16]) -> Vec<i16> {
        let mut out = Vec::with_capacity(samples.len());
        for (i, &x) in samples.iter().enumerate() {
            let value = match self {
                Self::One if i >= 1 => x.wrapping_sub(samples[i - 1]),
                Self::Two if i >= 2 => {
                    x.wrapping_sub(predict(samples[i - 1], samples[i - 2]))
                }
                _ => x,
            };
            out.push(value);
        }
        out
    }

    /// Rebuild samples in place from decoded difference values.
    pub fn integrate(self, values: &mut [i16]) {
        match self {
            Self::Zero => {}
            Self::One => {
                for i in 1..values.len() {
                    values[i] = values[i].wrapping_add(values[i - 1]);
                }
            }
            Self::Two => {
                for i in 2..values.len() {
                    values[i] = values[i].wrapping_add(predict(values[i - 1], values[i - 2]));
                }
            }
        }
    }
}

/// Linear prediction `2*prev - prev2` in wrapping 16-bit arithmetic.
fn predict(prev: i16, prev2: i16) -> i16 {
    prev.wrapping_mul(2).wrapping_sub(prev2)
}

impl TryFrom<u8> for DifferenceOrder {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Zero),
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            other => Err(Error::InvalidDifferenceOrder(other)),
        }
    }
}

/// One code of a Huffman table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HuffmanEntry {
    /// Length of the prefix code in bits
    pub prefix_bits: u8,
    /// Prefix plus trailing offset bits
    pub total_bits: u8,
    /// `true` when the code selects another table instead of emitting a value
    pub table_switch: bool,
    /// Base value, or 1-based target table for a switch
    pub value: i16,
    /// Prefix code, MSB-first (first stream bit is the most significant)
    pub code: u32,
}

impl HuffmanEntry {
    /// A code emitting `value` plus an optional signed offset.
    pub fn value_code(prefix_bits: u8, total_bits: u8, value: i16, code: u32) -> Self {
        Self {
            prefix_bits,
            total_bits,
            table_switch: false,
            value,
            code,
        }
    }

    /// A code that switches to the 1-based table `target`.
    pub fn switch(prefix_bits: u8, target: u16, code: u32) -> Self {
        Self {
            prefix_bits,
            total_bits: prefix_bits,
            table_switch: true,
            value: target as i16,
            code,
        }
    }

    /// Number of offset bits following the prefix.
    pub fn extra_bits(&self) -> usize {
        self.total_bits.saturating_sub(self.prefix_bits) as usize
    }

    /// Zero-based table selected by a switch entry.
    fn target_table(&self) -> usize {
        (self.value as u16 as usize).saturating_sub(1)
    }

    /// Offset needed to emit `wanted` with this entry, if it fits.
    fn offset_for(&self, wanted: i32) -> Option<i64> {
        if self.table_switch {
            return None;
        }
        let offset = wanted as i64 - self.value as i64;
        let extra = self.extra_bits();
        if extra == 0 {
            return (offset == 0).then_some(0);
        }
        let half = 1i64 << (extra - 1);
        (-half..half).contains(&offset).then_some(offset)
    }

    fn wire_code(&self) -> u32 {
        reverse_bits(self.code, self.prefix_bits)
    }
}

/// Reverse the low `bits` bits of `code`.
fn reverse_bits(code: u32, bits: u8) -> u32 {
    if bits == 0 {
        0
    } else {
        code.reverse_bits() >> (32 - bits as u32)
    }
}

/// An ordered list of codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HuffmanTable {
    /// Codes in transmission order
    entries: Vec<HuffmanEntry>,
    /// Longest prefix; a decoder gives up after this many bits
    max_prefix: u8,
}

impl HuffmanTable {
    /// Build a table, checking that every entry is codable.
    ///
    /// Entries keep their order; when two value entries can emit the same
    /// value at the same cost the encoder picks the earlier one.
    ///
    /// # Arguments
    /// - `entries`: codes with `code` given MSB-first (not as stored on the wire)
    ///
    /// # Errors
    /// Returns `HuffmanError::InvalidTable` if `entries` is empty, a prefix is
    /// not 1 to 32 bits long, or `total_bits` is shorter than the prefix or
    /// leaves more than 32 offset bits.
    pub fn new(entries: Vec<HuffmanEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(HuffmanError::InvalidTable("table has no entries".into()).into());
        }
        for entry in &entries {
            if entry.prefix_bits == 0 || entry.prefix_bits > 32 {
                return Err(HuffmanError::InvalidTable(format!(
                    "prefix length {} outside 1..=32",
                    entry.prefix_bits
                ))
                .into());
            }
            if entry.total_bits < entry.prefix_bits || entry.extra_bits() > 32 {
                return Err(HuffmanError::InvalidTable(format!(
                    "total length {} invalid for prefix length {}",
                    entry.total_bits, entry.prefix_bits
                ))
                .into());
            }
        }
        let max_prefix = entries.iter().map(|e| e.prefix_bits).max().unwrap_or(0);
        Ok(Self {
            entries,
            max_prefix,
        })
    }

    /// The standard SCP-ECG default table as an explicit table.
    ///
    /// Coding a stream with it yields the same bits as [`HuffmanMode::Default`]
    /// except for `-32768`, which this table represents exactly.
    pub fn scp_default() -> Self {
        let mut entries = vec![HuffmanEntry::value_code(1, 1, 0, 0b0)];
        for run in 1..=MAX_DIRECT {
            let bits = run as u8 + 2;
            let ones = ((1u32 << run) - 1) << 2;
            entries.push(HuffmanEntry::value_code(bits, bits, run as i16, ones));
            entries.push(HuffmanEntry::value_code(bits, bits, -run as i16, ones | 0b01));
        }
        entries.push(HuffmanEntry::value_code(10, 18, 0, 0b11_1111_1110));
        entries.push(HuffmanEntry::value_code(10, 26, 0, 0b11_1111_1111));
        Self {
            entries,
            max_prefix: 10,
        }
    }

    /// Codes in the order they are written to Section 2.
    pub fn entries(&self) -> &[HuffmanEntry] {
        &self.entries
    }

    pub fn max_prefix(&self) -> usize {
        self.max_prefix as usize
    }

    fn lookup(&self, bits: usize, code: u32) -> Option<&HuffmanEntry> {
        self.entries
            .iter()
            .find(|e| e.prefix_bits as usize == bits && e.code == code)
    }

    /// Cheapest value entry able to emit `wanted`, with its offset.
    fn best_entry(&self, wanted: i32) -> Option<(&HuffmanEntry, i64)> {
        self.entries
            .iter()
            .filter_map(|e| e.offset_for(wanted).map(|offset| (e, offset)))
            .min_by_key(|(e, _)| e.total_bits)
    }
}

/// Entropy coding mode shared by every lead of a recording.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HuffmanMode {
    /// Fixed 16-bit samples
    Raw,
    /// Built-in default table.
    ///
    /// Lossy for one coded value: a difference of exactly `-32768` is sent
    /// as `+32767`. With order 0 that is a sample of `-32768`; with order 1
    /// or 2 it is any step or curvature that wraps to `-32768`, such as
    /// `[16384, -16384]` under first differences.
    #[default]
    Default,
    /// Transmitted tables; decoding starts in the first one
    Custom(Vec<HuffmanTable>),
}

impl HuffmanMode {
    /// Check that custom tables exist and every switch lands on one.
    ///
    /// # Errors
    /// Returns `HuffmanError::InvalidTable` for an empty custom table list or
    /// a switch whose target is 0 or past the last table.
    pub fn validate(&self) -> Result<()> {
        if let Self::Custom(tables) = self {
            if tables.is_empty() {
                return Err(HuffmanError::InvalidTable("custom mode without tables".into()).into());
            }
            for (index, table) in tables.iter().enumerate() {
                for entry in table.entries.iter().filter(|e| e.table_switch) {
                    let target = entry.value as u16 as usize;
                    if target == 0 || target > tables.len() {
                        return Err(HuffmanError::InvalidTable(format!(
                            "table {} switches to missing table {}",
                            index + 1,
                            target
                        ))
                        .into());
                    }
                }
            }
        }
        Ok(())
    }
}

/// Section 2: the Huffman tables of the recording.
///
/// The payload starts with a table count: 0 for raw samples, 19999 for the
/// default table, otherwise that many custom tables follow. Each entry takes
/// 9 bytes: prefix length, total length, mode (0 switches tables), value and
/// the prefix code with its bits reversed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HuffmanSection {
    /// Coding mode every lead of Sections 5 and 6 uses
    pub mode: HuffmanMode,
}

impl Section for HuffmanSection {
    const ID: u16 = 2;

    fn decode_payload(_: &SectionHeader, payload: &[u8], _: &FrameContext) -> Result<Self> {
        let mut reader = ByteReader::new(payload);
        let mode = match reader.read_u16()? {
            0 => HuffmanMode::Raw,
            DEFAULT_TABLE_SENTINEL => HuffmanMode::Default,
            table_count => {
                let mut tables = Vec::with_capacity(table_count as usize);
                for _ in 0..table_count {
                    let entry_count = reader.read_u16()?;
                    let mut entries = Vec::with_capacity(entry_count as usize);
                    for _ in 0..entry_count {
                        let prefix_bits = reader.read_u8()?;
                        let total_bits = reader.read_u8()?;
                        let mode = reader.read_u8()?;
                        let value = reader.read_i16()?;
                        let wire_code = reader.read_u32()?;
                        entries.push(HuffmanEntry {
                            prefix_bits,
                            total_bits,
                            table_switch: mode == 0,
                            value,
                            code: reverse_bits(wire_code, prefix_bits.min(32)),
                        });
                    }
                    tables.push(HuffmanTable::new(entries)?);
                }
                HuffmanMode::Custom(tables)
            }
        };
        mode.validate()?;
        Ok(Self { mode })
    }

    fn encode_payload(&self, out: &mut Vec<u8>) -> Result<()> {
        self.mode.validate()?;
        match &self.mode {
            HuffmanMode::Raw => out.put_u16(0),
            HuffmanMode::Default => out.put_u16(DEFAULT_TABLE_SENTINEL),
            HuffmanMode::Custom(tables) => {
                if tables.len() >= DEFAULT_TABLE_SENTINEL as usize {
                    return Err(
                        HuffmanError::InvalidTable(format!("{} tables", tables.len())).into(),
                    );
                }
                out.put_u16(tables.len() as u16);
                for table in tables {
                    out.put_u16(table.entries.len() as u16);
                    for entry in &table.entries {
                        out.put_u8(entry.prefix_bits);
                        out.put_u8(entry.total_bits);
                        out.put_u8(if entry.table_switch { 0 } else { 1 });
                        out.put_i16(entry.value);
                        out.put_u32(entry.wire_code());
                    }
                }
            }
        }
        Ok(())
    }
}

/// Per-lead sample codec over a shared set of tables.
///
/// The selected table is local to each `encode`/`decode` call, so one codec
/// can serve every lead of a recording.
#[derive(Debug, Clone, Copy)]
pub struct HuffmanCodec<'a> {
    mode: &'a HuffmanMode,
}

impl<'a> HuffmanCodec<'a> {
    pub fn new(mode: &'a HuffmanMode) -> Self {
        Self { mode }
    }

    /// Decode exactly `sample_count` samples from `data`.
    ///
    /// Decoding stops as soon as `sample_count` values are read; trailing
    /// padding bits are ignored. The values are then integrated according to
    /// `order`.
    ///
    /// # Arguments
    /// - `data`: the compressed bytes of one lead
    /// - `sample_count`: number of samples the lead holds
    /// - `order`: difference order the encoder applied
    ///
    /// # Errors
    /// - `HuffmanError::StreamExhausted` if `data` ends first
    /// - `HuffmanError::Miss` if a prefix matches no entry of the active table
    /// - `HuffmanError::InvalidTable` if the custom tables fail
    ///   [`HuffmanMode::validate`]
    pub fn decode(&self, data: &[u8], sample_count: usize, order: DifferenceOrder) -> Result<Vec<i16>> {
        let mut values = match self.mode {
            HuffmanMode::Raw => decode_raw(data, sample_count)?,
            HuffmanMode::Default => decode_default(data, sample_count)?,
            HuffmanMode::Custom(tables) => {
                self.mode.validate()?;
                decode_custom(tables, data, sample_count)?
            }
        };
        order.integrate(&mut values);
        tracing::trace!(bytes = data.len(), samples = sample_count, "decoded lead");
        Ok(values)
    }

    /// Encode `samples`; the output is padded to a whole byte.
    ///
    /// With custom tables each value uses the cheapest code reachable from
    /// the active table, switching tables when that is shorter.
    ///
    /// # Arguments
    /// - `samples`: one lead at its stored rate
    /// - `order`: difference order to apply before coding
    ///
    /// # Errors
    /// - `HuffmanError::Unencodable` if no reachable entry can emit a value
    /// - `HuffmanError::InvalidTable` if the custom tables fail
    ///   [`HuffmanMode::validate`]
    pub fn encode(&self, samples: &[i16], order: DifferenceOrder) -> Result<Vec<u8>> {
        let values = order.difference(samples);
        let bytes = match self.mode {
            HuffmanMode::Raw => encode_raw(&values),
            HuffmanMode::Default => encode_default(&values)?,
            HuffmanMode::Custom(tables) => {
                self.mode.validate()?;
                encode_custom(tables, &values)?
            }
        };
        tracing::trace!(samples = samples.len(), bytes = bytes.len(), "encoded lead");
        Ok(bytes)
    }
}

/// Map running out of bits to the codec's exhaustion error.
fn exhausted(decoded: usize, expected: usize) -> impl Fn(Error) -> Error {
    move |err| match err {
        Error::BitIo(BitIoError::UnexpectedEof { .. }) => {
            HuffmanError::StreamExhausted { decoded, expected }.into()
        }
        other => other,
    }
}

fn decode_raw(data: &[u8], sample_count: usize) -> Result<Vec<i16>> {
    if data.len() / 2 < sample_count {
        return Err(HuffmanError::StreamExhausted {
            decoded: data.len() / 2,
            expected: sample_count,
        }
        .into());
    }
    Ok(data
        .chunks_exact(2)
        .take(sample_count)
        .map(|pair| i16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

fn encode_raw(values: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 2);
    for &value in values {
        out.put_i16(value);
    }
    out
}

fn decode_default(data: &[u8], sample_count: usize) -> Result<Vec<i16>> {
    let mut reader = BitReader::new(data);
    // Every code is at least one bit
    let mut out = Vec::with_capacity(sample_count.min(data.len() * 8));
    while out.len() < sample_count {
        let value = read_default_value(&mut reader).map_err(exhausted(out.len(), sample_count))?;
        out.push(value);
    }
    Ok(out)
}

fn read_default_value(reader: &mut BitReader<'_>) -> Result<i16> {
    let mut ones = 0;
    while ones < ESCAPE_RUN && reader.read_bit()? {
        ones += 1;
    }
    if ones < ESCAPE_RUN {
        // Terminating zero already consumed
        if ones == 0 {
            return Ok(0);
        }
        let negative = reader.read_bit()?;
        let run = ones as i16;
        return Ok(if negative { -run } else { run });
    }
    let width = if reader.read_bit()? { 16 } else { 8 };
    Ok(reader.read_signed(width)? as i16)
}

fn encode_default(values: &[i16]) -> Result<Vec<u8>> {
    let mut writer = BitWriter::new();
    for &raw in values {
        // -32768 has no code in this table; the differenced value is sent as +32767
        let value = if raw == i16::MIN { i16::MAX } else { raw } as i32;
        let magnitude = value.abs();
        if magnitude <= MAX_DIRECT {
            writer.write_run(true, magnitude as usize);
            writer.write_bit(false);
            if magnitude != 0 {
                writer.write_bit(value < 0);
            }
        } else {
            writer.write_run(true, ESCAPE_RUN);
            if (-128..=127).contains(&value) {
                writer.write_bit(false);
                writer.write_bits(value as u32 & 0xFF, 8)?;
            } else {
                writer.write_bit(true);
                writer.write_bits(value as u32 & 0xFFFF, 16)?;
            }
        }
    }
    Ok(writer.finish())
}

fn decode_custom(tables: &[HuffmanTable], data: &[u8], sample_count: usize) -> Result<Vec<i16>> {
    let mut reader = BitReader::new(data);
    let mut out = Vec::with_capacity(sample_count.min(data.len() * 8));
    let mut selected = 0usize;
    while out.len() < sample_count {
        let table = &tables[selected];
        let start = reader.position();
        let mut code = 0u32;
        let mut bits = 0usize;
        let entry = loop {
            let bit = reader
                .read_bit()
                .map_err(exhausted(out.len(), sample_count))?;
            code = (code << 1) | bit as u32;
            bits += 1;
            if let Some(entry) = table.lookup(bits, code) {
                break entry;
            }
            if bits >= table.max_prefix() {
                return Err(HuffmanError::Miss {
                    position: start,
                    table: selected,
                }
                .into());
            }
        };
        if entry.table_switch {
            selected = entry.target_table();
            continue;
        }
        let offset = reader
            .read_signed(entry.extra_bits())
            .map_err(exhausted(out.len(), sample_count))?;
        out.push((entry.value as i32).wrapping_add(offset) as i16);
    }
    Ok(out)
}

fn encode_custom(tables: &[HuffmanTable], values: &[i16]) -> Result<Vec<u8>> {
    let mut writer = BitWriter::new();
    let mut selected = 0usize;
    for &value in values {
        let wanted = value as i32;
        let current = &tables[selected];

        let mut best = current
            .best_entry(wanted)
            .map(|(entry, offset)| (entry.total_bits as usize, None, entry, offset));
        for switch in current.entries.iter().filter(|e| e.table_switch) {
            let target = switch.target_table();
            if target == selected {
                continue;
            }
            if let Some((entry, offset)) = tables[target].best_entry(wanted) {
                let cost = switch.prefix_bits as usize + entry.total_bits as usize;
                if best.map_or(true, |(best_cost, ..)| cost < best_cost) {
                    best = Some((cost, Some((switch, target)), entry, offset));
                }
            }
        }

        let (_, switch, entry, offset) = best.ok_or(HuffmanError::Unencodable { value: wanted })?;
        if let Some((switch, target)) = switch {
            writer.write_bits(switch.code, switch.prefix_bits as usize)?;
            selected = target;
        }
        writer.write_bits(entry.code, entry.prefix_bits as usize)?;
        let extra = entry.extra_bits();
        if extra > 0 {
            let mask = if extra >= 32 { u32::MAX } else { (1u32 << extra) - 1 };
            writer.write_bits(offset as u32 & mask, extra)?;
        }
    }
    Ok(writer.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{read_section, write_section, FrameVersions};

    fn default_codec() -> HuffmanMode {
        HuffmanMode::Default
    }

    fn sample_wave() -> Vec<i16> {
        (0..400)
            .map(|i| {
                let t = i as f64 / 50.0;
                ((t * 6.0).sin() * 900.0 + (t * 1.3).cos() * 120.0) as i16
            })
            .collect()
    }

    #[test]
    fn test_default_table_bit_patterns() {
        let mode = default_codec();
        let codec = HuffmanCodec::new(&mode);

        // 0 -> "0", 1 -> "100", -1 -> "101", padded to 8 bits
        let bytes = codec.encode(&[0, 1, -1], DifferenceOrder::Zero).unwrap();
        assert_eq!(bytes, vec![0b0100_1010]);

        // 8 -> eight ones, zero, sign
        let bytes = codec.encode(&[8], DifferenceOrder::Zero).unwrap();
        assert_eq!(bytes, vec![0xFF, 0b0000_0000]);

        // 9 -> nine ones, width 0, 8 raw bits
        let bytes = codec.encode(&[9], DifferenceOrder::Zero).unwrap();
        assert_eq!(bytes, vec![0xFF, 0b1000_0010, 0b0100_0000]);
    }

    #[test]
    fn test_round_trip_all_modes_and_orders() {
        let wave = sample_wave();
        let table = HuffmanTable::scp_default();
        let modes = [
            HuffmanMode::Raw,
            HuffmanMode::Default,
            HuffmanMode::Custom(vec![table]),
        ];
        for mode in &modes {
            let codec = HuffmanCodec::new(mode);
            for order in [DifferenceOrder::Zero, DifferenceOrder::One, DifferenceOrder::Two] {
                let bytes = codec.encode(&wave, order).unwrap();
                let decoded = codec.decode(&bytes, wave.len(), order).unwrap();
                assert_eq!(decoded, wave, "mode {:?} order {:?}", mode, order);
            }
        }
    }

    #[test]
    fn test_extreme_values_round_trip() {
        let samples = vec![i16::MAX, -32767, 0, 127, -128, 128, -129, 32000, -32000];
        let mode = HuffmanMode::Default;
        let codec = HuffmanCodec::new(&mode);
        for order in [DifferenceOrder::Zero, DifferenceOrder::One, DifferenceOrder::Two] {
            let bytes = codec.encode(&samples, order).unwrap();
            assert_eq!(codec.decode(&bytes, samples.len(), order).unwrap(), samples);
        }
    }

    #[test]
    fn test_default_mode_coerces_minimum() {
        let mode = HuffmanMode::Default;
        let codec = HuffmanCodec::new(&mode);
        let bytes = codec.encode(&[i16::MIN, 5], DifferenceOrder::Zero).unwrap();
        let decoded = codec.decode(&bytes, 2, DifferenceOrder::Zero).unwrap();
        assert_eq!(decoded, vec![i16::MAX, 5]);

        // The explicit table keeps it
        let mode = HuffmanMode::Custom(vec![HuffmanTable::scp_default()]);
        let codec = HuffmanCodec::new(&mode);
        let bytes = codec.encode(&[i16::MIN, 5], DifferenceOrder::Zero).unwrap();
        assert_eq!(codec.decode(&bytes, 2, DifferenceOrder::Zero).unwrap(), vec![i16::MIN, 5]);
    }

    #[test]
    fn test_default_mode_coerces_wrapped_difference() {
        let mode = HuffmanMode::Default;
        let codec = HuffmanCodec::new(&mode);

        // No sample is -32768, but the first difference wraps to it
        let samples = [16384i16, -16384];
        assert_eq!(DifferenceOrder::One.difference(&samples), vec![16384, i16::MIN]);
        let bytes = codec.encode(&samples, DifferenceOrder::One).unwrap();
        let decoded = codec.decode(&bytes, 2, DifferenceOrder::One).unwrap();
        assert_eq!(decoded, vec![16384, 16384i16.wrapping_add(i16::MAX)]);

        // Same for a wrapped second difference
        let samples = [0i16, 16384, 0];
        assert_eq!(DifferenceOrder::Two.difference(&samples), vec![0, 16384, i16::MIN]);
        let bytes = codec.encode(&samples, DifferenceOrder::Two).unwrap();
        assert_ne!(codec.decode(&bytes, 3, DifferenceOrder::Two).unwrap(), samples);

        // Other orders of the same samples are exact
        let bytes = codec.encode(&samples, DifferenceOrder::Zero).unwrap();
        assert_eq!(codec.decode(&bytes, 3, DifferenceOrder::Zero).unwrap(), samples);
    }

    #[test]
    fn test_explicit_default_table_matches_builtin_bits() {
        let wave = sample_wave();
        let builtin = HuffmanMode::Default;
        let explicit = HuffmanMode::Custom(vec![HuffmanTable::scp_default()]);
        for order in [DifferenceOrder::One, DifferenceOrder::Two] {
            let a = HuffmanCodec::new(&builtin).encode(&wave, order).unwrap();
            let b = HuffmanCodec::new(&explicit).encode(&wave, order).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_stream_exhausted() {
        let mode = HuffmanMode::Default;
        let codec = HuffmanCodec::new(&mode);
        let bytes = codec.encode(&[300, -300, 300], DifferenceOrder::Zero).unwrap();
        // 26 bits per escaped value: four bytes hold only the first
        let result = codec.decode(&bytes[..4], 3, DifferenceOrder::Zero);
        assert!(matches!(
            result,
            Err(Error::Huffman(HuffmanError::StreamExhausted {
                decoded: 1,
                expected: 3
            }))
        ));

        let raw = HuffmanMode::Raw;
        let result = HuffmanCodec::new(&raw).decode(&[0, 1, 0], 2, DifferenceOrder::Zero);
        assert!(matches!(
            result,
            Err(Error::Huffman(HuffmanError::StreamExhausted { .. }))
        ));
    }

    #[test]
    fn test_custom_miss() {
        // Codes "0" and "10"; "11" matches nothing
        let table = HuffmanTable::new(vec![
            HuffmanEntry::value_code(1, 1, 0, 0b0),
            HuffmanEntry::value_code(2, 2, 1, 0b10),
        ])
        .unwrap();
        let mode = HuffmanMode::Custom(vec![table]);
        let result = HuffmanCodec::new(&mode).decode(&[0b0110_0000], 3, DifferenceOrder::Zero);
        assert!(matches!(
            result,
            Err(Error::Huffman(HuffmanError::Miss { position: 1, table: 0 }))
        ));
    }

    #[test]
    fn test_custom_unencodable() {
        let table = HuffmanTable::new(vec![HuffmanEntry::value_code(1, 5, 0, 0b0)]).unwrap();
        let mode = HuffmanMode::Custom(vec![table]);
        let codec = HuffmanCodec::new(&mode);
        assert!(codec.encode(&[7, -8], DifferenceOrder::Zero).is_ok());
        assert!(matches!(
            codec.encode(&[8], DifferenceOrder::Zero),
            Err(Error::Huffman(HuffmanError::Unencodable { value: 8 }))
        ));
    }

    #[test]
    fn test_table_switching() {
        // Table 1: small values; "11" switches to table 2
        let small = HuffmanTable::new(vec![
            HuffmanEntry::value_code(1, 1, 0, 0b0),
            HuffmanEntry::value_code(2, 4, 0, 0b10),
            HuffmanEntry::switch(2, 2, 0b11),
        ])
        .unwrap();
        // Table 2: wide values; "1" switches back
        let wide = HuffmanTable::new(vec![
            HuffmanEntry::value_code(1, 17, 0, 0b0),
            HuffmanEntry::switch(1, 1, 0b1),
        ])
        .unwrap();
        let mode = HuffmanMode::Custom(vec![small, wide]);
        let codec = HuffmanCodec::new(&mode);

        let samples = vec![0, 1, -2, 5000, -12000, 3, 0, 0];
        let bytes = codec.encode(&samples, DifferenceOrder::Zero).unwrap();
        let decoded = codec.decode(&bytes, samples.len(), DifferenceOrder::Zero).unwrap();
        assert_eq!(decoded, samples);

        // Selection state starts over on every call
        let again = codec.decode(&bytes, samples.len(), DifferenceOrder::Zero).unwrap();
        assert_eq!(again, samples);
    }

    #[test]
    fn test_switch_to_missing_table_rejected() {
        let table = HuffmanTable::new(vec![
            HuffmanEntry::value_code(1, 1, 0, 0b0),
            HuffmanEntry::switch(1, 3, 0b1),
        ])
        .unwrap();
        let mode = HuffmanMode::Custom(vec![table]);
        assert!(mode.validate().is_err());
    }

    #[test]
    fn test_invalid_difference_order() {
        assert!(matches!(
            DifferenceOrder::try_from(3),
            Err(Error::InvalidDifferenceOrder(3))
        ));
        assert_eq!(DifferenceOrder::try_from(2).unwrap(), DifferenceOrder::Two);
    }

    #[test]
    fn test_second_difference_keeps_first_two_raw() {
        let samples = [100i16, 110, 130, 160];
        let diffs = DifferenceOrder::Two.difference(&samples);
        assert_eq!(diffs, vec![100, 110, 10, 10]);
        let mut restored = diffs.clone();
        DifferenceOrder::Two.integrate(&mut restored);
        assert_eq!(restored, samples);
    }

    #[test]
    fn test_section_round_trip_reverses_codes() {
        let section = HuffmanSection {
            mode: HuffmanMode::Custom(vec![HuffmanTable::scp_default()]),
        };
        let bytes = write_section(&section, FrameVersions::default()).unwrap();

        // First entry: prefix 1, total 1, value code, value 0, code 0
        // Second entry: "100" -> wire 0b001
        let second = 16 + 2 + 2 + 9;
        assert_eq!(&bytes[second..second + 9], &[3, 3, 1, 0, 1, 0, 0, 0, 0b001]);

        let parsed: HuffmanSection = read_section(&bytes, &FrameContext::default()).unwrap();
        assert_eq!(parsed, section);
    }

    #[test]
    fn test_section_sentinels() {
        for mode in [HuffmanMode::Raw, HuffmanMode::Default] {
            let section = HuffmanSection { mode };
            let bytes = write_section(&section, FrameVersions::default()).unwrap();
            assert_eq!(bytes.len(), 18);
            let parsed: HuffmanSection = read_section(&bytes, &FrameContext::default()).unwrap();
            assert_eq!(parsed, section);
        }
    }
}
