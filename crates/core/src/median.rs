//! Reference beat data (Section 5).
//!
//! One averaged beat per lead, `median_length_ms` long at the section's own
//! sample rate. The stored sample count is never written: it follows from
//! the QRS table's beat length and the section's sample interval.

use crate::error::Result;
use crate::framing::{FrameContext, Section, SectionHeader};
use crate::huffman::HuffmanCodec;
use crate::samples::SampleData;

/// Section 5: compressed reference beats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MedianSection {
    pub data: SampleData,
}

impl MedianSection {
    pub fn new(data: SampleData) -> Self {
        Self { data }
    }

    /// Samples per lead for a beat of `median_length_ms`.
    pub fn sample_count(&self, median_length_ms: u16) -> Result<usize> {
        let sps = self.data.samples_per_second()? as u64;
        Ok((median_length_ms as u64 * sps / 1000) as usize)
    }

    /// Decode every lead's reference beat.
    pub fn decode(&self, codec: &HuffmanCodec<'_>, median_length_ms: u16) -> Result<Vec<Vec<i16>>> {
        let count = self.sample_count(median_length_ms)?;
        let counts = vec![count; self.data.leads.len()];
        let leads = self.data.decode_leads(codec, &counts)?;
        tracing::debug!(leads = leads.len(), samples = count, "decoded reference beats");
        Ok(leads)
    }
}

impl Section for MedianSection {
    const ID: u16 = 5;

    fn decode_payload(_: &SectionHeader, payload: &[u8], ctx: &FrameContext) -> Result<Self> {
        SampleData::read(payload, ctx, Self::ID).map(Self::new)
    }

    fn encode_payload(&self, out: &mut Vec<u8>) -> Result<()> {
        self.data.write(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{read_section, write_section, FrameVersions};
    use crate::huffman::{DifferenceOrder, HuffmanMode};
    use crate::samples::SampleHeader;

    fn beat(len: usize, scale: i16) -> Vec<i16> {
        (0..len)
            .map(|i| {
                let x = i as i32 - (len / 2) as i32;
                (scale as i32 * 200 / (1 + x * x / 4)) as i16
            })
            .collect()
    }

    #[test]
    fn test_section_round_trip() {
        let mode = HuffmanMode::Default;
        let codec = HuffmanCodec::new(&mode);
        // 800 ms at 500 Hz
        let leads = vec![beat(400, 1), beat(400, -2), beat(400, 3)];
        let header = SampleHeader {
            avm_nv: 1000,
            interval_us: 2000,
            order: DifferenceOrder::Two,
            flag: 0,
        };
        let section = MedianSection::new(SampleData::encode_leads(&codec, &leads, header).unwrap());
        assert_eq!(section.sample_count(800).unwrap(), 400);

        let bytes = write_section(&section, FrameVersions::default()).unwrap();
        let parsed: MedianSection = read_section(&bytes, &FrameContext { lead_count: 3 }).unwrap();
        assert_eq!(parsed.decode(&codec, 800).unwrap(), leads);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let section = MedianSection::new(SampleData {
            avm_nv: 1000,
            interval_us: 0,
            order: DifferenceOrder::Zero,
            flag: 0,
            leads: Vec::new(),
        });
        assert!(section.sample_count(1000).is_err());
    }
}
