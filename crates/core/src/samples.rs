//! Payload shared by the reference beat (Section 5) and rhythm (Section 6) sections.
//!
//! # Payload Format
//!
//! ```text
//! avm (2) | interval_us (2) | difference_order (1) | flag (1)
//! per lead: byte_length (2)
//! per lead: compressed bytes, padded to an even length
//! ```
//!
//! `avm` is the amplitude value multiplier in nanovolts per unit (µV × 1000).
//! The flag byte is reserved in Section 5 and marks bimodal data in Section 6.

use crate::byteio::{ByteReader, ByteWrite};
use crate::error::{Error, IncompleteSignalError, LeadGeometryError, Result};
use crate::framing::FrameContext;
use crate::huffman::{DifferenceOrder, HuffmanCodec};

/// Microseconds per second, the numerator of every sample interval
pub const MICROS_PER_SECOND: u32 = 1_000_000;

/// Compressed per-lead data plus its amplitude and timing header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleData {
    pub avm_nv: u16,
    pub interval_us: u16,
    pub order: DifferenceOrder,
    pub flag: u8,
    /// Compressed bytes per lead, in lead layout order
    pub leads: Vec<Vec<u8>>,
}

impl SampleData {
    /// Amplitude multiplier in microvolts.
    pub fn avm_uv(&self) -> f64 {
        self.avm_nv as f64 / 1000.0
    }

    pub fn samples_per_second(&self) -> Result<u32> {
        match self.interval_us {
            0 => Err(LeadGeometryError::InvalidSampleRate("sample interval of 0 µs".into()).into()),
            interval => Ok(MICROS_PER_SECOND / interval as u32),
        }
    }

    pub(crate) fn read(payload: &[u8], ctx: &FrameContext, section: u16) -> Result<Self> {
        let mut reader = ByteReader::new(payload);
        let avm_nv = reader.read_u16()?;
        let interval_us = reader.read_u16()?;
        let order = DifferenceOrder::try_from(reader.read_u8()?)?;
        let flag = reader.read_u8()?;

        let mut lengths = Vec::with_capacity(ctx.lead_count);
        for _ in 0..ctx.lead_count {
            lengths.push(reader.read_u16()? as usize);
        }
        let mut leads = Vec::with_capacity(ctx.lead_count);
        for length in lengths {
            leads.push(reader.read_bytes(length)?.to_vec());
        }
        if !reader.is_empty() {
            tracing::debug!(section, trailing = reader.remaining(), "unused bytes after lead data");
        }

        Ok(Self {
            avm_nv,
            interval_us,
            order,
            flag,
            leads,
        })
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        out.put_u16(self.avm_nv);
        out.put_u16(self.interval_us);
        out.put_u8(self.order.as_u8());
        out.put_u8(self.flag);
        for lead in &self.leads {
            let padded = lead.len() + lead.len() % 2;
            let length = u16::try_from(padded)
                .map_err(|_| Error::Config(format!("{} compressed bytes exceed one lead's limit", padded)))?;
            out.put_u16(length);
        }
        for lead in &self.leads {
            out.extend_from_slice(lead);
            if lead.len() % 2 == 1 {
                out.put_u8(0);
            }
        }
        Ok(())
    }

    /// Check the lead count against the lead layout.
    pub fn expect_leads(&self, section: u16, expected: usize) -> Result<()> {
        if self.leads.len() != expected {
            return Err(IncompleteSignalError::LeadCount {
                section,
                expected,
                actual: self.leads.len(),
            }
            .into());
        }
        Ok(())
    }

    /// Decode `sample_count` samples of every lead.
    pub fn decode_leads(&self, codec: &HuffmanCodec<'_>, sample_counts: &[usize]) -> Result<Vec<Vec<i16>>> {
        self.leads
            .iter()
            .zip(sample_counts)
            .map(|(data, &count)| codec.decode(data, count, self.order))
            .collect()
    }

    /// Compress every lead into a new payload.
    pub fn encode_leads(
        codec: &HuffmanCodec<'_>,
        leads: &[Vec<i16>],
        header: SampleHeader,
    ) -> Result<Self> {
        let leads = leads
            .iter()
            .map(|samples| codec.encode(samples, header.order))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            avm_nv: header.avm_nv,
            interval_us: header.interval_us,
            order: header.order,
            flag: header.flag,
            leads,
        })
    }

    /// Total compressed bytes across leads, padding included.
    pub fn compressed_len(&self) -> usize {
        self.leads.iter().map(|l| l.len() + l.len() % 2).sum()
    }
}

/// Header fields for [`SampleData::encode_leads`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleHeader {
    pub avm_nv: u16,
    pub interval_us: u16,
    pub order: DifferenceOrder,
    pub flag: u8,
}

/// Convert a microvolt multiplier to its stored nanovolt form.
pub fn avm_to_nv(avm_uv: f64) -> Result<u16> {
    let nv = (avm_uv * 1000.0).round();
    if !nv.is_finite() || nv < 1.0 || nv > u16::MAX as f64 {
        return Err(Error::Config(format!(
            "amplitude multiplier {} µV is outside 0.001..=65.535",
            avm_uv
        )));
    }
    Ok(nv as u16)
}

/// Sample interval in microseconds for a rate that divides one second exactly.
pub fn interval_for(samples_per_second: u32) -> Result<u16> {
    if samples_per_second == 0 {
        return Err(LeadGeometryError::InvalidSampleRate("0 samples per second".into()).into());
    }
    let interval = MICROS_PER_SECOND / samples_per_second;
    if interval == 0 || interval > u16::MAX as u32 || MICROS_PER_SECOND / interval != samples_per_second {
        return Err(LeadGeometryError::InvalidSampleRate(format!(
            "{} samples per second has no exact microsecond interval",
            samples_per_second
        ))
        .into());
    }
    Ok(interval as u16)
}
