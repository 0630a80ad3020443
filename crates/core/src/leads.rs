//! Lead layout (Section 3): which leads are stored and which samples each covers.
//!
//! # Payload Format
//!
//! ```text
//! lead_count (1) | flags (1) | per lead: start (4) | end (4) | lead_id (1)
//! ```
//!
//! Flags: bit 0 = reference beat subtracted from the rhythm data, bit 2 = all
//! leads recorded simultaneously, bits 3..7 = number of simultaneously
//! recorded leads. Sample numbers are 1-based and inclusive.

use std::fmt;

use crate::byteio::{ByteReader, ByteWrite};
use crate::error::{Error, LeadGeometryError, Result};
use crate::framing::{FrameContext, Section, SectionHeader};

/// Flag bits of the Section 3 flags byte.
pub mod flags {
    /// Reference beat was subtracted from the rhythm data
    pub const REFERENCE_BEAT_SUBTRACTED: u8 = 0b0000_0001;
    /// All leads share one extent
    pub const ALL_SIMULTANEOUS: u8 = 0b0000_0100;
    /// Shift of the simultaneous lead count (bits 3..7)
    pub const SIMULTANEOUS_COUNT_SHIFT: u8 = 3;
    /// Largest count the flags byte can hold
    pub const SIMULTANEOUS_COUNT_MAX: usize = 0b1_1111;
}

/// Lead identifiers as coded in Section 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeadType {
    Unspecified,
    I,
    II,
    V1,
    V2,
    V3,
    V4,
    V5,
    V6,
    V7,
    V2R,
    V3R,
    V4R,
    V5R,
    V6R,
    V7R,
    X,
    Y,
    Z,
    III,
    AVR,
    AVL,
    AVF,
    NegAVR,
    V8,
    V9,
    V8R,
    V9R,
    /// Any code without a dedicated variant
    Other(u8),
}

const LEAD_CODES: [(LeadType, u8); 28] = [
    (LeadType::Unspecified, 0),
    (LeadType::I, 1),
    (LeadType::II, 2),
    (LeadType::V1, 3),
    (LeadType::V2, 4),
    (LeadType::V3, 5),
    (LeadType::V4, 6),
    (LeadType::V5, 7),
    (LeadType::V6, 8),
    (LeadType::V7, 9),
    (LeadType::V2R, 10),
    (LeadType::V3R, 11),
    (LeadType::V4R, 12),
    (LeadType::V5R, 13),
    (LeadType::V6R, 14),
    (LeadType::V7R, 15),
    (LeadType::X, 16),
    (LeadType::Y, 17),
    (LeadType::Z, 18),
    (LeadType::III, 61),
    (LeadType::AVR, 62),
    (LeadType::AVL, 63),
    (LeadType::AVF, 64),
    (LeadType::NegAVR, 65),
    (LeadType::V8, 66),
    (LeadType::V9, 67),
    (LeadType::V8R, 68),
    (LeadType::V9R, 69),
];

impl LeadType {
    pub fn code(self) -> u8 {
        if let Self::Other(code) = self {
            return code;
        }
        LEAD_CODES
            .iter()
            .find(|(lead, _)| *lead == self)
            .map(|(_, code)| *code)
            .unwrap_or(0)
    }

    pub fn from_code(code: u8) -> Self {
        LEAD_CODES
            .iter()
            .find(|(_, c)| *c == code)
            .map(|(lead, _)| *lead)
            .unwrap_or(Self::Other(code))
    }
}

impl fmt::Display for LeadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AVR => write!(f, "aVR"),
            Self::AVL => write!(f, "aVL"),
            Self::AVF => write!(f, "aVF"),
            Self::NegAVR => write!(f, "-aVR"),
            Self::Other(code) => write!(f, "lead#{}", code),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Sample range of one lead, 1-based and inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeadExtent {
    pub lead: LeadType,
    pub start: i32,
    pub end: i32,
}

impl LeadExtent {
    pub fn new(lead: LeadType, start: i32, end: i32) -> Self {
        Self { lead, start, end }
    }

    pub fn sample_count(&self) -> usize {
        (self.end as i64 - self.start as i64 + 1).max(0) as usize
    }
}

/// Section 3: the lead layout of the recording.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LeadLayout {
    pub leads: Vec<LeadExtent>,
    /// Rhythm data had the reference beat subtracted before compression
    pub reference_beat_subtracted: bool,
}

impl LeadLayout {
    pub fn new(leads: Vec<LeadExtent>, reference_beat_subtracted: bool) -> Self {
        Self {
            leads,
            reference_beat_subtracted,
        }
    }

    /// Earliest start across all leads.
    pub fn min_start(&self) -> Option<i32> {
        self.leads.iter().map(|l| l.start).min()
    }

    /// Latest end across all leads.
    pub fn max_end(&self) -> Option<i32> {
        self.leads.iter().map(|l| l.end).max()
    }

    /// True when every lead covers the same samples.
    pub fn is_simultaneous(&self) -> bool {
        match self.leads.split_first() {
            None => false,
            Some((first, rest)) => rest
                .iter()
                .all(|l| l.start == first.start && l.end == first.end),
        }
    }

    /// Number of leads sharing the first lead's extent.
    pub fn simultaneous_count(&self) -> usize {
        match self.leads.first() {
            None => 0,
            Some(first) => self
                .leads
                .iter()
                .filter(|l| l.start == first.start && l.end == first.end)
                .count(),
        }
    }

    /// Check every extent is non-empty and starts at sample 1 or later.
    pub fn validate(&self) -> Result<()> {
        for (index, lead) in self.leads.iter().enumerate() {
            if lead.start < 1 || lead.end < lead.start {
                return Err(LeadGeometryError::InvalidExtent {
                    lead: index,
                    start: lead.start,
                    end: lead.end,
                }
                .into());
            }
        }
        Ok(())
    }

    fn flag_byte(&self) -> u8 {
        let mut byte = 0;
        if self.reference_beat_subtracted {
            byte |= flags::REFERENCE_BEAT_SUBTRACTED;
        }
        if self.is_simultaneous() {
            byte |= flags::ALL_SIMULTANEOUS;
        }
        let count = self.simultaneous_count().min(flags::SIMULTANEOUS_COUNT_MAX) as u8;
        byte | (count << flags::SIMULTANEOUS_COUNT_SHIFT)
    }
}

impl Section for LeadLayout {
    const ID: u16 = 3;

    fn decode_payload(_: &SectionHeader, payload: &[u8], _: &FrameContext) -> Result<Self> {
        let mut reader = ByteReader::new(payload);
        let lead_count = reader.read_u8()?;
        let flag_byte = reader.read_u8()?;
        let mut leads = Vec::with_capacity(lead_count as usize);
        for _ in 0..lead_count {
            let start = reader.read_i32()?;
            let end = reader.read_i32()?;
            let lead = LeadType::from_code(reader.read_u8()?);
            leads.push(LeadExtent { lead, start, end });
        }
        let layout = Self {
            leads,
            reference_beat_subtracted: flag_byte & flags::REFERENCE_BEAT_SUBTRACTED != 0,
        };
        layout.validate()?;
        if (flag_byte & flags::ALL_SIMULTANEOUS != 0) != layout.is_simultaneous() {
            tracing::warn!(flags = flag_byte, "simultaneous flag disagrees with lead extents");
        }
        Ok(layout)
    }

    fn encode_payload(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.leads.len() > u8::MAX as usize {
            return Err(Error::Config(format!(
                "{} leads exceed the 255 a lead layout can hold",
                self.leads.len()
            )));
        }
        self.validate()?;
        out.put_u8(self.leads.len() as u8);
        out.put_u8(self.flag_byte());
        for lead in &self.leads {
            out.put_i32(lead.start);
            out.put_i32(lead.end);
            out.put_u8(lead.lead.code());
        }
        Ok(())
    }
}
