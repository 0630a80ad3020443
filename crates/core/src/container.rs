//! Whole-file container.
//!
//! # File Format
//!
//! ```text
//! +------------------+
//! | crc (2)          |  CRC-CCITT over bytes 2..total_length
//! +------------------+
//! | total_length (4) |
//! +------------------+
//! | Section 0        |  pointer table, always at 1-based index 7
//! +------------------+
//! | Section 1..N     |  in pointer table order
//! +------------------+
//! ```
//!
//! An [`ScpFile`] keeps every present section as its framed bytes, so
//! sections this crate does not interpret survive a read/write cycle.

use std::collections::BTreeMap;
use std::fmt;

use crate::assembler::{SignalAssembler, WaveformSections};
use crate::byteio::{patch_u16, patch_u32, peek_u16, peek_u32, ByteWrite};
use crate::config::EncodeConfig;
use crate::crc::crc16_ccitt;
use crate::error::{FrameError, IncompleteSignalError, Result};
use crate::framing::{
    open_frame, read_section, write_section, FrameContext, FrameVersions, Section, SectionHeader, HEADER_SIZE,
};
use crate::huffman::HuffmanSection;
use crate::leads::LeadLayout;
use crate::median::MedianSection;
use crate::pointer::PointerTable;
use crate::qrs::QrsTable;
use crate::resample::Resampler;
use crate::rhythm::RhythmSection;
use crate::signal::{Signal, Signals};

/// Size of the file header (crc + total length)
pub const FILE_HEADER_SIZE: usize = 6;

/// Section id of the global measurements
pub const GLOBAL_MEASUREMENTS_ID: u16 = 7;

/// Protocol compatibility level, from the sections a file carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CompatibilityLevel {
    Unspecified,
    /// Section 7 only
    GlobalMeasurements,
    /// Sections 3 and 6
    Rhythm,
    /// Sections 3, 4, 5 and 6
    RhythmAndReferenceBeats,
}

impl CompatibilityLevel {
    pub fn code(self) -> u8 {
        match self {
            Self::Unspecified => 0x00,
            Self::GlobalMeasurements => 0xD0,
            Self::Rhythm => 0xE0,
            Self::RhythmAndReferenceBeats => 0xF0,
        }
    }
}

impl fmt::Display for CompatibilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unspecified => write!(f, "unspecified"),
            Self::GlobalMeasurements => write!(f, "global measurements (0xD0)"),
            Self::Rhythm => write!(f, "rhythm (0xE0)"),
            Self::RhythmAndReferenceBeats => write!(f, "rhythm and reference beats (0xF0)"),
        }
    }
}

/// An SCP-ECG file as a directory of framed sections.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScpFile {
    sections: BTreeMap<u16, Vec<u8>>,
    versions: FrameVersions,
}

impl ScpFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and verify a complete file.
    ///
    /// Checks the file CRC and length, then frames every section listed in
    /// the pointer table. Section payloads are interpreted lazily.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (stored_crc, total) = match (peek_u16(bytes, 0), peek_u32(bytes, 2)) {
            (Some(crc), Some(total)) => (crc, total as usize),
            _ => {
                return Err(FrameError::PayloadTruncated {
                    offset: 0,
                    needed: FILE_HEADER_SIZE,
                    available: bytes.len(),
                }
                .into())
            }
        };
        if total < FILE_HEADER_SIZE + HEADER_SIZE || total > bytes.len() {
            return Err(FrameError::PayloadTruncated {
                offset: 0,
                needed: total,
                available: bytes.len(),
            }
            .into());
        }
        if total < bytes.len() {
            tracing::warn!(total, supplied = bytes.len(), "ignoring bytes after declared file end");
        }
        let bytes = &bytes[..total];

        let computed = crc16_ccitt(&bytes[2..]);
        if computed != stored_crc {
            return Err(FrameError::CrcInvalid {
                id: None,
                stored: stored_crc,
                computed,
            }
            .into());
        }

        let pointer_len = peek_u32(bytes, FILE_HEADER_SIZE + 4).unwrap_or(0) as usize;
        let pointer_end = (FILE_HEADER_SIZE + pointer_len).min(bytes.len());
        let pointer_bytes = &bytes[FILE_HEADER_SIZE..pointer_end];
        let pointers: PointerTable = read_section(pointer_bytes, &FrameContext::default())?;
        let pointer_header = SectionHeader::parse(pointer_bytes)?;

        let mut sections = BTreeMap::new();
        sections.insert(PointerTable::ID, pointer_bytes.to_vec());
        for entry in pointers.present().filter(|e| e.id != PointerTable::ID) {
            let range = entry.byte_range();
            if range.end > bytes.len() {
                return Err(FrameError::SectionOutOfBounds {
                    id: entry.id,
                    index: entry.index,
                    length: entry.length,
                    file_len: bytes.len(),
                }
                .into());
            }
            let section = &bytes[range];
            open_frame(entry.id, section)?;
            if sections.insert(entry.id, section.to_vec()).is_some() {
                tracing::warn!(id = entry.id, "duplicate pointer entry, keeping the last");
            }
        }

        tracing::debug!(length = total, sections = sections.len(), "parsed file");
        Ok(Self {
            sections,
            versions: FrameVersions {
                section_version: pointer_header.section_version,
                protocol_version: pointer_header.protocol_version,
            },
        })
    }

    /// Serialize with a fresh pointer table, file length and CRC.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let lengths: BTreeMap<u16, usize> = self
            .sections
            .iter()
            .filter(|(id, _)| **id != PointerTable::ID)
            .map(|(&id, bytes)| (id, bytes.len()))
            .collect();
        let pointers = PointerTable::layout(&lengths);
        let table = write_section(&pointers, self.versions)?;

        let mut out = Vec::with_capacity(FILE_HEADER_SIZE + table.len() + lengths.values().sum::<usize>());
        out.put_u16(0); // crc, patched below
        out.put_u32(0); // length, patched below
        out.extend_from_slice(&table);
        for entry in pointers.present().filter(|e| e.id != PointerTable::ID) {
            if let Some(bytes) = self.sections.get(&entry.id) {
                out.extend_from_slice(bytes);
            }
        }

        let total = out.len() as u32;
        patch_u32(&mut out, 2, total);
        let crc = crc16_ccitt(&out[2..]);
        patch_u16(&mut out, 0, crc);
        tracing::debug!(length = total, sections = lengths.len(), "wrote file");
        Ok(out)
    }

    /// Framed bytes of a section.
    pub fn section(&self, id: u16) -> Option<&[u8]> {
        self.sections.get(&id).map(Vec::as_slice)
    }

    /// Store framed section bytes; an empty buffer removes the section.
    pub fn set_section(&mut self, id: u16, bytes: Vec<u8>) {
        if id == PointerTable::ID {
            return;
        }
        if bytes.len() <= HEADER_SIZE {
            self.sections.remove(&id);
        } else {
            self.sections.insert(id, bytes);
        }
    }

    pub fn remove_section(&mut self, id: u16) -> Option<Vec<u8>> {
        self.sections.remove(&id)
    }

    /// Ids of every stored section, pointer table included.
    pub fn section_ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.sections.keys().copied()
    }

    pub fn has_section(&self, id: u16) -> bool {
        self.sections.contains_key(&id)
    }

    /// Parse a typed section if present.
    pub fn read<S: Section>(&self, ctx: &FrameContext) -> Result<Option<S>> {
        self.section(S::ID).map(|bytes| read_section(bytes, ctx)).transpose()
    }

    /// Frame and store a typed section.
    pub fn write<S: Section>(&mut self, section: &S) -> Result<()> {
        let bytes = write_section(section, self.versions)?;
        self.set_section(S::ID, bytes);
        Ok(())
    }

    pub fn versions(&self) -> FrameVersions {
        self.versions
    }

    pub fn set_versions(&mut self, versions: FrameVersions) {
        self.versions = versions;
    }

    /// Highest level whose sections are present and parse.
    ///
    /// Waveform levels need Sections 3 to 6 to decode as typed sections;
    /// Section 7 is only checked for presence.
    pub fn compatibility_level(&self) -> CompatibilityLevel {
        let sections = match self.waveform_sections() {
            Ok(sections) => Some(sections),
            Err(err) => {
                if self.has_section(RhythmSection::ID) {
                    tracing::debug!(error = %err, "waveform sections do not parse");
                }
                None
            }
        };
        match sections {
            Some(s) if s.rhythm.is_some() && s.qrs.is_some() && s.median.is_some() => {
                CompatibilityLevel::RhythmAndReferenceBeats
            }
            Some(s) if s.rhythm.is_some() => CompatibilityLevel::Rhythm,
            _ if self.has_section(GLOBAL_MEASUREMENTS_ID) => CompatibilityLevel::GlobalMeasurements,
            _ => CompatibilityLevel::Unspecified,
        }
    }

    /// Parse the waveform sections.
    pub fn waveform_sections(&self) -> Result<WaveformSections> {
        let layout: LeadLayout = self
            .read(&FrameContext::default())?
            .ok_or(IncompleteSignalError::MissingSection(LeadLayout::ID))?;
        let ctx = FrameContext {
            lead_count: layout.leads.len(),
        };
        Ok(WaveformSections {
            huffman: self.read(&ctx)?,
            qrs: self.read(&ctx)?,
            median: self.read(&ctx)?,
            rhythm: self.read(&ctx)?,
            layout,
        })
    }

    /// Replace the waveform sections.
    pub fn set_waveform_sections(&mut self, sections: &WaveformSections) -> Result<()> {
        match &sections.huffman {
            Some(huffman) => self.write(huffman)?,
            None => {
                self.remove_section(HuffmanSection::ID);
            }
        }
        self.write(&sections.layout)?;
        match &sections.qrs {
            Some(qrs) => self.write(qrs)?,
            None => {
                self.remove_section(QrsTable::ID);
            }
        }
        match &sections.median {
            Some(median) => self.write(median)?,
            None => {
                self.remove_section(MedianSection::ID);
            }
        }
        match &sections.rhythm {
            Some(rhythm) => self.write(rhythm)?,
            None => {
                self.remove_section(RhythmSection::ID);
            }
        }
        Ok(())
    }
}

impl Signals for ScpFile {
    fn signals(&self) -> Result<Signal> {
        let resampler = Resampler::default();
        SignalAssembler::new(&resampler).decode(&self.waveform_sections()?)
    }

    fn set_signals(&mut self, signal: &Signal, config: &EncodeConfig) -> Result<()> {
        let resampler = Resampler::default();
        let sections = SignalAssembler::new(&resampler).encode(signal, config)?;
        self.versions = config.versions();
        self.set_waveform_sections(&sections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::framing::frame_payload;
    use crate::leads::{LeadExtent, LeadType};
    use crate::qrs::QrsZone;
    use crate::signal::LeadSignal;

    fn small_signal() -> Signal {
        let median: Vec<i16> = (0..10).map(|i| i * 30).collect();
        let rhythm: Vec<i16> = (0..100).map(|i| (i % 17) * 3).collect();
        Signal {
            leads: vec![LeadSignal::new(LeadType::I, rhythm).with_median(median)],
            rhythm_avm: 5.0,
            rhythm_samples_per_second: 500,
            median_avm: 5.0,
            median_samples_per_second: 500,
            median_length_ms: 20,
            median_fiducial_point: 5,
            qrs_zones: vec![QrsZone::new(20, 25, 30)],
            protected_zones: Vec::new(),
        }
    }

    fn layout_file() -> ScpFile {
        let mut file = ScpFile::new();
        let layout = LeadLayout::new(vec![LeadExtent::new(LeadType::II, 1, 100)], false);
        file.write(&layout).unwrap();
        file
    }

    #[test]
    fn test_round_trip_keeps_unknown_sections() {
        let mut file = layout_file();
        let manufacturer = frame_payload(200, b"vendor data!", FrameVersions::default());
        file.set_section(200, manufacturer.clone());

        let bytes = file.to_bytes().unwrap();
        assert_eq!(peek_u32(&bytes, 2), Some(bytes.len() as u32));
        assert_eq!(peek_u16(&bytes, 0), Some(crc16_ccitt(&bytes[2..])));

        let parsed = ScpFile::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.section(200), Some(manufacturer.as_slice()));
        assert_eq!(parsed.section(3), file.section(3));
        assert_eq!(parsed.section_ids().collect::<Vec<_>>(), vec![0, 3, 200]);
        assert_eq!(parsed.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_file_crc_checked() {
        let mut bytes = layout_file().to_bytes().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(matches!(
            ScpFile::from_bytes(&bytes),
            Err(Error::Frame(FrameError::CrcInvalid { id: None, .. }))
        ));
    }

    #[test]
    fn test_short_input() {
        assert!(matches!(
            ScpFile::from_bytes(&[0, 1, 2]),
            Err(Error::Frame(FrameError::PayloadTruncated { needed: 6, .. }))
        ));
        let bytes = layout_file().to_bytes().unwrap();
        assert!(ScpFile::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_section_out_of_bounds() {
        let mut bytes = layout_file().to_bytes().unwrap();
        // Pointer entry 3 starts at file offset 6 + 16 + 3 * 10; bump its length
        let length_at = FILE_HEADER_SIZE + HEADER_SIZE + 3 * 10 + 2;
        patch_u32(&mut bytes, length_at, 4096);
        let crc = crc16_ccitt(&bytes[FILE_HEADER_SIZE + 2..FILE_HEADER_SIZE + HEADER_SIZE + 120]);
        patch_u16(&mut bytes, FILE_HEADER_SIZE, crc);
        let crc = crc16_ccitt(&bytes[2..]);
        patch_u16(&mut bytes, 0, crc);
        assert!(matches!(
            ScpFile::from_bytes(&bytes),
            Err(Error::Frame(FrameError::SectionOutOfBounds { id: 3, .. }))
        ));
    }

    #[test]
    fn test_compatibility_levels() {
        let mut file = ScpFile::new();
        assert_eq!(file.compatibility_level(), CompatibilityLevel::Unspecified);
        file.set_section(7, frame_payload(7, &[0; 4], FrameVersions::default()));
        assert_eq!(file.compatibility_level(), CompatibilityLevel::GlobalMeasurements);

        file.set_signals(&small_signal(), &EncodeConfig::default()).unwrap();
        assert_eq!(file.compatibility_level(), CompatibilityLevel::RhythmAndReferenceBeats);
        assert_eq!(file.compatibility_level().code(), 0xF0);

        file.remove_section(MedianSection::ID);
        assert_eq!(file.compatibility_level(), CompatibilityLevel::Rhythm);
        assert!(CompatibilityLevel::Rhythm > CompatibilityLevel::GlobalMeasurements);
    }

    #[test]
    fn test_malformed_sections_lower_the_level() {
        let mut file = ScpFile::new();
        file.set_signals(&small_signal(), &EncodeConfig::default()).unwrap();

        // Present but too short to hold a sample data header
        file.set_section(6, frame_payload(6, &[0; 4], FrameVersions::default()));
        assert_eq!(file.compatibility_level(), CompatibilityLevel::Unspecified);

        file.set_section(7, frame_payload(7, &[0; 4], FrameVersions::default()));
        assert_eq!(file.compatibility_level(), CompatibilityLevel::GlobalMeasurements);
    }

    #[test]
    fn test_empty_section_removes() {
        let mut file = layout_file();
        assert!(file.has_section(3));
        file.set_section(3, Vec::new());
        assert!(!file.has_section(3));
    }

    #[test]
    fn test_missing_layout() {
        let file = ScpFile::new();
        assert!(matches!(
            file.signals(),
            Err(Error::IncompleteSignal(IncompleteSignalError::MissingSection(3)))
        ));
    }
}
