//! Rhythm data (Section 6) and bimodal compression.
//!
//! Rhythm leads cover the sample ranges of the lead layout. In bimodal mode
//! only the protected zones keep the fine sample rate; every other run is
//! stored as one averaged value per `rate` samples and the section's sample
//! interval is the coarse one.

use std::ops::Range;

use crate::error::{IncompleteSignalError, LeadGeometryError, Result};
use crate::framing::{FrameContext, Section, SectionHeader};
use crate::huffman::HuffmanCodec;
use crate::leads::LeadLayout;
use crate::qrs::ProtectedZone;
use crate::samples::{SampleData, SampleHeader};

/// Flag byte value marking bimodal rhythm data
pub const BIMODAL_FLAG: u8 = 1;

/// Section 6: compressed rhythm data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RhythmSection {
    pub data: SampleData,
}

impl RhythmSection {
    pub fn new(data: SampleData) -> Self {
        Self { data }
    }

    pub fn is_bimodal(&self) -> bool {
        self.data.flag == BIMODAL_FLAG
    }

    /// Decode every lead to its full extent.
    ///
    /// Bimodal data needs one plan per lead; see [`bimodal_plans`].
    pub fn decode(
        &self,
        codec: &HuffmanCodec<'_>,
        layout: &LeadLayout,
        plans: Option<&[BimodalPlan]>,
    ) -> Result<Vec<Vec<i16>>> {
        self.data.expect_leads(Self::ID, layout.leads.len())?;
        let leads = match (self.is_bimodal(), plans) {
            (false, _) => {
                let counts: Vec<usize> = layout.leads.iter().map(|l| l.sample_count()).collect();
                self.data.decode_leads(codec, &counts)?
            }
            (true, Some(plans)) => {
                let counts: Vec<usize> = plans.iter().map(BimodalPlan::stored_len).collect();
                let stored = self.data.decode_leads(codec, &counts)?;
                stored
                    .iter()
                    .zip(plans)
                    .map(|(values, plan)| plan.expand(values))
                    .collect::<Result<Vec<_>>>()?
            }
            (true, None) => return Err(IncompleteSignalError::MissingSection(4).into()),
        };

        for (index, (lead, extent)) in leads.iter().zip(&layout.leads).enumerate() {
            if lead.len() != extent.sample_count() {
                return Err(LeadGeometryError::SampleCountMismatch {
                    lead: index,
                    expected: extent.sample_count(),
                    actual: lead.len(),
                }
                .into());
            }
        }
        tracing::debug!(leads = leads.len(), bimodal = self.is_bimodal(), "decoded rhythm");
        Ok(leads)
    }

    /// Compress full-rate rhythm leads, down-sampling them first when `plans` is set.
    pub fn encode(
        codec: &HuffmanCodec<'_>,
        leads: &[Vec<i16>],
        header: SampleHeader,
        plans: Option<&[BimodalPlan]>,
    ) -> Result<Self> {
        let data = match plans {
            None => SampleData::encode_leads(codec, leads, header)?,
            Some(plans) => {
                let coarse = leads
                    .iter()
                    .zip(plans)
                    .map(|(samples, plan)| plan.compress(samples))
                    .collect::<Result<Vec<_>>>()?;
                let header = SampleHeader {
                    flag: BIMODAL_FLAG,
                    ..header
                };
                SampleData::encode_leads(codec, &coarse, header)?
            }
        };
        Ok(Self::new(data))
    }
}

impl Section for RhythmSection {
    const ID: u16 = 6;

    fn decode_payload(_: &SectionHeader, payload: &[u8], ctx: &FrameContext) -> Result<Self> {
        SampleData::read(payload, ctx, Self::ID).map(Self::new)
    }

    fn encode_payload(&self, out: &mut Vec<u8>) -> Result<()> {
        self.data.write(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Protected(Range<usize>),
    Coarse(Range<usize>),
}

/// How one lead is split between fine and coarse storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BimodalPlan {
    len: usize,
    rate: usize,
    segments: Vec<Segment>,
}

impl BimodalPlan {
    /// Plan a lead of `len` samples whose first sample has number `first_sample`.
    pub fn new(len: usize, rate: usize, protected: &[ProtectedZone], first_sample: i32) -> Self {
        let rate = rate.max(1);
        let mut segments = Vec::new();
        let mut pos = 0;
        for range in protected_ranges(protected, first_sample, len) {
            if range.start > pos {
                segments.push(Segment::Coarse(pos..range.start));
            }
            pos = range.end;
            segments.push(Segment::Protected(range));
        }
        if pos < len {
            segments.push(Segment::Coarse(pos..len));
        }
        Self { len, rate, segments }
    }

    /// Number of values actually stored for the lead.
    pub fn stored_len(&self) -> usize {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Protected(r) => r.len(),
                Segment::Coarse(r) => (r.len() + self.rate - 1) / self.rate,
            })
            .sum()
    }

    /// Fine samples kept verbatim.
    pub fn protected_len(&self) -> usize {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Protected(r) => r.len(),
                Segment::Coarse(_) => 0,
            })
            .sum()
    }

    /// Replace every coarse block by its rounded mean.
    pub fn compress(&self, samples: &[i16]) -> Result<Vec<i16>> {
        self.check_len(samples.len(), self.len)?;
        let mut out = Vec::with_capacity(self.stored_len());
        for segment in &self.segments {
            match segment {
                Segment::Protected(r) => out.extend_from_slice(&samples[r.clone()]),
                Segment::Coarse(r) => out.extend(samples[r.clone()].chunks(self.rate).map(mean)),
            }
        }
        Ok(out)
    }

    /// Rebuild the full-rate lead from stored values.
    ///
    /// Coarse samples are interpolated linearly between anchors: the centre
    /// of each coarse block and the protected samples next to it. Samples
    /// with an anchor on one side only take that anchor's value.
    pub fn expand(&self, stored: &[i16]) -> Result<Vec<i16>> {
        self.check_len(stored.len(), self.stored_len())?;
        let mut out = vec![0i16; self.len];
        // Positions are doubled so block centres stay integral
        let mut anchors: Vec<(i64, i64)> = Vec::with_capacity(stored.len());
        let mut values = stored.iter().copied();

        for segment in &self.segments {
            match segment {
                Segment::Protected(r) => {
                    for (p, v) in r.clone().zip(values.by_ref()) {
                        out[p] = v;
                        anchors.push((2 * p as i64, v as i64));
                    }
                }
                Segment::Coarse(r) => {
                    let mut start = r.start;
                    for v in values.by_ref().take((r.len() + self.rate - 1) / self.rate) {
                        let end = (start + self.rate).min(r.end);
                        anchors.push(((start + end) as i64 - 1, v as i64));
                        start = end;
                    }
                }
            }
        }

        let mut right = 0;
        for segment in &self.segments {
            let Segment::Coarse(r) = segment else {
                continue;
            };
            for i in r.clone() {
                let x = 2 * i as i64;
                while right < anchors.len() && anchors[right].0 < x {
                    right += 1;
                }
                out[i] = interpolate(&anchors, right, x);
            }
        }
        Ok(out)
    }

    fn check_len(&self, actual: usize, expected: usize) -> Result<()> {
        if actual != expected {
            return Err(LeadGeometryError::LengthMismatch {
                left: actual,
                right: expected,
            }
            .into());
        }
        Ok(())
    }
}

/// One plan per lead of `layout`.
pub fn bimodal_plans(layout: &LeadLayout, rate: usize, protected: &[ProtectedZone]) -> Vec<BimodalPlan> {
    layout
        .leads
        .iter()
        .map(|extent| BimodalPlan::new(extent.sample_count(), rate, protected, extent.start))
        .collect()
}

/// Protected zones as sorted, merged, lead-relative half-open ranges.
fn protected_ranges(zones: &[ProtectedZone], first_sample: i32, len: usize) -> Vec<Range<usize>> {
    let mut ranges: Vec<Range<usize>> = zones
        .iter()
        .filter(|z| !z.is_empty())
        .filter_map(|z| {
            let start = (z.start as i64 - first_sample as i64).clamp(0, len as i64) as usize;
            let end = (z.end as i64 - first_sample as i64 + 1).clamp(0, len as i64) as usize;
            (start < end).then_some(start..end)
        })
        .collect();
    ranges.sort_by_key(|r| r.start);

    let mut merged: Vec<Range<usize>> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
            _ => merged.push(range),
        }
    }
    merged
}

fn mean(block: &[i16]) -> i16 {
    let sum: i64 = block.iter().map(|&v| v as i64).sum();
    div_round(sum, block.len() as i64) as i16
}

/// Value at doubled position `x`, where `anchors[right]` is the first anchor at or after `x`.
fn interpolate(anchors: &[(i64, i64)], right: usize, x: i64) -> i16 {
    let value = match (right.checked_sub(1).map(|l| anchors[l]), anchors.get(right)) {
        (_, Some(&(rx, rv))) if rx == x => rv,
        (Some((lx, lv)), Some(&(rx, rv))) => lv + div_round((rv - lv) * (x - lx), rx - lx),
        (Some((_, lv)), None) => lv,
        (None, Some(&(_, rv))) => rv,
        (None, None) => 0,
    };
    value.clamp(i16::MIN as i64, i16::MAX as i64) as i16
}

/// Division rounding half away from zero; `den` is positive.
fn div_round(num: i64, den: i64) -> i64 {
    if num >= 0 {
        (num + den / 2) / den
    } else {
        -((-num + den / 2) / den)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{read_section, write_section, FrameVersions};
    use crate::huffman::{DifferenceOrder, HuffmanMode};
    use crate::leads::{LeadExtent, LeadType};

    #[test]
    fn test_protected_ranges_clip_and_merge() {
        let zones = [
            ProtectedZone::new(150, 160),
            ProtectedZone::new(95, 104),
            ProtectedZone::new(103, 110),
            ProtectedZone::new(0, 0),
            ProtectedZone::new(400, 500),
        ];
        // Lead covers samples 101..=300
        let ranges = protected_ranges(&zones, 101, 200);
        assert_eq!(ranges, vec![0..10, 49..60]);
    }

    #[test]
    fn test_plan_segmentation() {
        let plan = BimodalPlan::new(20, 4, &[ProtectedZone::new(7, 10)], 1);
        // 0..6 coarse (2 blocks), 6..10 protected, 10..20 coarse (3 blocks)
        assert_eq!(plan.protected_len(), 4);
        assert_eq!(plan.stored_len(), 2 + 4 + 3);
    }

    #[test]
    fn test_compress_stores_means_and_protected_samples() {
        let samples: Vec<i16> = vec![1, 2, 3, 4, 5, 6, 100, 200, 7, 8];
        let plan = BimodalPlan::new(10, 2, &[ProtectedZone::new(7, 8)], 1);
        let stored = plan.compress(&samples).unwrap();
        assert_eq!(stored, vec![2, 4, 6, 100, 200, 8]);
    }

    #[test]
    fn test_expand_reproduces_ramp() {
        let samples: Vec<i16> = (0..100).map(|i| i * 3).collect();
        let plan = BimodalPlan::new(100, 2, &[ProtectedZone::new(31, 70)], 1);
        let restored = plan.expand(&plan.compress(&samples).unwrap()).unwrap();

        assert_eq!(restored[30..70], samples[30..70]);
        for (i, (&a, &b)) in restored.iter().zip(&samples).enumerate() {
            assert!((a - b).abs() <= 3, "sample {}: {} vs {}", i, a, b);
        }
    }

    #[test]
    fn test_expand_without_protection() {
        let samples = vec![10i16, 10, 20, 20, 30, 30, 40];
        let plan = BimodalPlan::new(7, 2, &[], 1);
        let stored = plan.compress(&samples).unwrap();
        assert_eq!(stored, vec![10, 20, 30, 40]);
        let restored = plan.expand(&stored).unwrap();
        // Anchors at 0.5, 2.5, 4.5 and 6
        assert_eq!(restored, vec![10, 13, 18, 23, 28, 33, 40]);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let plan = BimodalPlan::new(10, 2, &[], 1);
        assert!(plan.compress(&[0; 9]).is_err());
        assert!(plan.expand(&[0; 4]).is_err());
    }

    #[test]
    fn test_bimodal_section_round_trip() {
        let layout = LeadLayout::new(
            vec![
                LeadExtent::new(LeadType::I, 1, 60),
                LeadExtent::new(LeadType::II, 1, 60),
            ],
            false,
        );
        let leads: Vec<Vec<i16>> = vec![
            (0..60).map(|i| (i * 4) as i16).collect(),
            (0..60).map(|i| -(i * 2) as i16).collect(),
        ];
        let zones = [ProtectedZone::new(21, 40)];
        let plans = bimodal_plans(&layout, 4, &zones);
        let mode = HuffmanMode::Default;
        let codec = HuffmanCodec::new(&mode);
        let header = SampleHeader {
            avm_nv: 5000,
            interval_us: 8000,
            order: DifferenceOrder::One,
            flag: 0,
        };

        let section = RhythmSection::encode(&codec, &leads, header, Some(&plans)).unwrap();
        assert!(section.is_bimodal());
        let bytes = write_section(&section, FrameVersions::default()).unwrap();
        let parsed: RhythmSection = read_section(&bytes, &FrameContext { lead_count: 2 }).unwrap();

        let decoded = parsed.decode(&codec, &layout, Some(&plans)).unwrap();
        assert_eq!(decoded[0][20..40], leads[0][20..40]);
        assert_eq!(decoded[1][20..40], leads[1][20..40]);
        assert!(matches!(
            parsed.decode(&codec, &layout, None),
            Err(crate::Error::IncompleteSignal(IncompleteSignalError::MissingSection(4)))
        ));
    }

    #[test]
    fn test_plain_section_round_trip() {
        let layout = LeadLayout::new(vec![LeadExtent::new(LeadType::V1, 11, 20)], false);
        let leads = vec![vec![5i16, -5, 7, 300, -300, 0, 1, 2, 3, 4]];
        let mode = HuffmanMode::Raw;
        let codec = HuffmanCodec::new(&mode);
        let header = SampleHeader {
            avm_nv: 1000,
            interval_us: 2000,
            order: DifferenceOrder::Zero,
            flag: 0,
        };
        let section = RhythmSection::encode(&codec, &leads, header, None).unwrap();
        assert_eq!(section.decode(&codec, &layout, None).unwrap(), leads);
    }
}
