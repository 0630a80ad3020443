//! Encode configuration.
//!
//! Every field has a default matching common SCP-ECG producers: second
//! difference, the built-in Huffman table, reference beat subtraction on and
//! no bimodal compression. Decoding needs no configuration.

use std::fmt;

use crate::error::{Error, Result};
use crate::framing::{FrameVersions, DEFAULT_VERSION};
use crate::huffman::{DifferenceOrder, HuffmanMode, HuffmanTable};
use crate::qrs::QrsMeasurements;

/// Entropy coding applied to every lead.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Compression {
    /// 16-bit samples, no Huffman section
    Raw,
    /// Built-in default table
    #[default]
    Default,
    /// Transmitted tables
    Custom(Vec<HuffmanTable>),
}

impl Compression {
    pub fn mode(&self) -> HuffmanMode {
        match self {
            Self::Raw => HuffmanMode::Raw,
            Self::Default => HuffmanMode::Default,
            Self::Custom(tables) => HuffmanMode::Custom(tables.clone()),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw => write!(f, "raw"),
            Self::Default => write!(f, "default huffman table"),
            Self::Custom(tables) => write!(f, "{} custom huffman tables", tables.len()),
        }
    }
}

/// Coarse-to-fine sample ratio outside protected zones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BimodalRate {
    X2,
    X4,
}

impl BimodalRate {
    pub fn multiplier(self) -> u32 {
        match self {
            Self::X2 => 2,
            Self::X4 => 4,
        }
    }
}

/// Options for turning a [`Signal`](crate::Signal) into a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeConfig {
    // === Compression ===
    pub difference_order: DifferenceOrder,
    pub compression: Compression,
    /// Down-sample rhythm data outside protected zones
    pub bimodal: Option<BimodalRate>,

    // === Reference beats ===
    /// Subtract the reference beat from rhythm data inside QRS zones
    pub subtract_median: bool,
    /// Onset/offset used to size protected zones the signal does not carry
    pub measurements: Option<QrsMeasurements>,

    // === Section headers ===
    pub section_version: u8,
    pub protocol_version: u8,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            difference_order: DifferenceOrder::Two,
            compression: Compression::Default,
            bimodal: None,
            subtract_median: true,
            measurements: None,
            section_version: DEFAULT_VERSION,
            protocol_version: DEFAULT_VERSION,
        }
    }
}

impl EncodeConfig {
    pub fn with_difference_order(mut self, order: DifferenceOrder) -> Self {
        self.difference_order = order;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_bimodal(mut self, rate: BimodalRate) -> Self {
        self.bimodal = Some(rate);
        self
    }

    pub fn with_subtract_median(mut self, subtract: bool) -> Self {
        self.subtract_median = subtract;
        self
    }

    pub fn with_measurements(mut self, measurements: QrsMeasurements) -> Self {
        self.measurements = Some(measurements);
        self
    }

    pub fn versions(&self) -> FrameVersions {
        FrameVersions {
            section_version: self.section_version,
            protocol_version: self.protocol_version,
        }
    }

    /// Check the options are usable together.
    pub fn validate(&self) -> Result<()> {
        self.compression.mode().validate()?;
        if let Some(QrsMeasurements::Aggregate {
            onset_ms,
            offset_ms,
        }) = &self.measurements
        {
            if onset_ms > offset_ms {
                return Err(Error::Config(format!(
                    "QRS onset {} ms after offset {} ms",
                    onset_ms, offset_ms
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for EncodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Encode Configuration ===")?;
        writeln!(f, "Difference order: {}", self.difference_order.as_u8())?;
        writeln!(f, "Compression: {}", self.compression)?;
        match self.bimodal {
            Some(rate) => writeln!(f, "Bimodal: x{}", rate.multiplier())?,
            None => writeln!(f, "Bimodal: off")?,
        }
        writeln!(f, "Subtract reference beat: {}", self.subtract_median)?;
        match &self.measurements {
            Some(QrsMeasurements::Aggregate {
                onset_ms,
                offset_ms,
            }) => writeln!(f, "QRS measurements: {}..{} ms", onset_ms, offset_ms)?,
            Some(QrsMeasurements::PerBeat(beats)) => {
                writeln!(f, "QRS measurements: {} beats", beats.len())?
            }
            None => writeln!(f, "QRS measurements: from zones")?,
        }
        write!(
            f,
            "Versions: section {}, protocol {}",
            self.section_version, self.protocol_version
        )
    }
}
