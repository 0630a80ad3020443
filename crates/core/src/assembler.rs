//! Signal assembly: typed waveform sections to and from a [`Signal`].
//!
//! # Decode Pipeline
//!
//! ```text
//! lead layout -> reference beats -> rhythm (bimodal expansion)
//!             -> equalize AVM -> align beat rate -> add beat back per zone
//! ```
//!
//! Encoding runs the same steps in reverse. Any failure aborts the whole
//! assembly; a partial signal is never returned.

use std::borrow::Cow;

use crate::config::EncodeConfig;
use crate::error::{Error, IncompleteSignalError, LeadGeometryError, Result};
use crate::framing::Section;
use crate::huffman::{HuffmanCodec, HuffmanMode, HuffmanSection};
use crate::leads::{LeadExtent, LeadLayout};
use crate::median::MedianSection;
use crate::qrs::{
    add_median, derive_protected_zones, subtract_median, BeatAlignment, ProtectedZone, ProtectionGrid, QrsTable,
};
use crate::resample::{scale_fiducial, Resampler};
use crate::rhythm::{bimodal_plans, RhythmSection};
use crate::samples::{avm_to_nv, interval_for, SampleData, SampleHeader};
use crate::signal::{LeadSignal, Signal};

/// The sections that carry waveform data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WaveformSections {
    /// Absent means raw samples
    pub huffman: Option<HuffmanSection>,
    pub layout: LeadLayout,
    pub qrs: Option<QrsTable>,
    pub median: Option<MedianSection>,
    pub rhythm: Option<RhythmSection>,
}

/// Builds signals from sections and back.
#[derive(Debug, Clone, Copy)]
pub struct SignalAssembler<'r> {
    resampler: &'r Resampler,
}

impl<'r> SignalAssembler<'r> {
    pub fn new(resampler: &'r Resampler) -> Self {
        Self { resampler }
    }

    /// Reconstruct the signal stored in `sections`.
    pub fn decode(&self, sections: &WaveformSections) -> Result<Signal> {
        let raw = HuffmanMode::Raw;
        let mode = sections.huffman.as_ref().map_or(&raw, |h| &h.mode);
        let codec = HuffmanCodec::new(mode);
        let layout = &sections.layout;
        layout.validate()?;

        let mut medians = match &sections.median {
            Some(median) => {
                let qrs = require(sections.qrs.as_ref(), QrsTable::ID)?;
                median.data.expect_leads(MedianSection::ID, layout.leads.len())?;
                Some(median.decode(&codec, qrs.median_length_ms)?)
            }
            None => None,
        };
        let median_sps = match &sections.median {
            Some(median) => median.data.samples_per_second()?,
            None => 0,
        };

        let (mut rhythms, rhythm_sps) = match &sections.rhythm {
            Some(rhythm) if rhythm.is_bimodal() => {
                let median = require(sections.median.as_ref(), MedianSection::ID)?;
                let qrs = require(sections.qrs.as_ref(), QrsTable::ID)?;
                let rate = bimodal_rate(rhythm.data.interval_us, median.data.interval_us)?;
                let plans = bimodal_plans(layout, rate, &qrs.protected);
                (Some(rhythm.decode(&codec, layout, Some(&plans))?), median_sps)
            }
            Some(rhythm) => (
                Some(rhythm.decode(&codec, layout, None)?),
                rhythm.data.samples_per_second()?,
            ),
            None => (None, 0),
        };

        let mut rhythm_avm_nv = sections.rhythm.as_ref().map_or(0, |r| r.data.avm_nv);
        let mut median_avm_nv = sections.median.as_ref().map_or(0, |m| m.data.avm_nv);

        if layout.reference_beat_subtracted {
            match (&mut rhythms, &mut medians, &sections.qrs) {
                (Some(rhythms), Some(medians), Some(qrs)) => {
                    let avm = equalize_avm(rhythms, rhythm_avm_nv, medians, median_avm_nv);
                    rhythm_avm_nv = avm;
                    median_avm_nv = avm;
                    let rates = (median_sps, rhythm_sps);
                    let (aligned, fiducial) = self.align_medians(medians, qrs.first_fiducial, rates)?;
                    for ((rhythm, median), extent) in rhythms.iter_mut().zip(aligned.iter()).zip(&layout.leads) {
                        let beat = BeatAlignment {
                            median,
                            first_fiducial: fiducial,
                            rhythm_first_sample: extent.start,
                        };
                        add_median(rhythm, beat, &qrs.zones)?;
                    }
                    tracing::debug!(zones = qrs.zones.len(), "restored reference beats");
                }
                _ => tracing::warn!("reference beat subtraction flagged without beats, zones or rhythm"),
            }
        }

        let mut rhythms = rhythms.map(Vec::into_iter);
        let mut medians = medians.map(Vec::into_iter);
        let leads = layout
            .leads
            .iter()
            .map(|extent| LeadSignal {
                lead: extent.lead,
                rhythm: rhythms.as_mut().and_then(Iterator::next),
                median: medians.as_mut().and_then(Iterator::next),
                rhythm_start: (extent.start - 1) as usize,
                rhythm_end: extent.end as usize,
            })
            .collect();

        let (median_length_ms, median_fiducial_point, qrs_zones, protected_zones) = match &sections.qrs {
            Some(qrs) => {
                let protected = if qrs.protected.iter().all(ProtectedZone::is_empty) {
                    Vec::new()
                } else {
                    qrs.protected.clone()
                };
                (qrs.median_length_ms, qrs.first_fiducial, qrs.zones.clone(), protected)
            }
            None => (0, 0, Vec::new(), Vec::new()),
        };

        tracing::debug!(
            leads = layout.leads.len(),
            rhythm_sps,
            median_sps,
            "assembled signal"
        );
        Ok(Signal {
            leads,
            rhythm_avm: rhythm_avm_nv as f64 / 1000.0,
            rhythm_samples_per_second: rhythm_sps,
            median_avm: median_avm_nv as f64 / 1000.0,
            median_samples_per_second: median_sps,
            median_length_ms,
            median_fiducial_point,
            qrs_zones,
            protected_zones,
        })
    }

    /// Split `signal` into compressed sections.
    pub fn encode(&self, signal: &Signal, config: &EncodeConfig) -> Result<WaveformSections> {
        signal.validate()?;
        config.validate()?;

        let mode = config.compression.mode();
        let codec = HuffmanCodec::new(&mode);
        let has_rhythm = signal.has_rhythm();
        let has_median = signal.has_median();
        let subtract = config.subtract_median && has_rhythm && has_median && !signal.qrs_zones.is_empty();

        let extents = signal
            .leads
            .iter()
            .map(|lead| {
                let len = match lead.rhythm_len() {
                    0 => signal.median_sample_count().max(1),
                    len => len,
                };
                LeadExtent::new(lead.lead, lead.rhythm_start as i32 + 1, (lead.rhythm_start + len) as i32)
            })
            .collect();
        let layout = LeadLayout::new(extents, subtract);
        layout.validate()?;

        let mut rhythms: Option<Vec<Vec<i16>>> = has_rhythm.then(|| {
            signal.leads.iter().map(|l| l.rhythm.clone().unwrap_or_default()).collect()
        });
        let mut medians: Option<Vec<Vec<i16>>> = has_median.then(|| {
            signal.leads.iter().map(|l| l.median.clone().unwrap_or_default()).collect()
        });
        let mut rhythm_avm_nv = if has_rhythm { avm_to_nv(signal.rhythm_avm)? } else { 0 };
        let mut median_avm_nv = if has_median { avm_to_nv(signal.median_avm)? } else { 0 };

        if subtract {
            if let (Some(rhythms), Some(medians)) = (&mut rhythms, &mut medians) {
                let avm = equalize_avm(rhythms, rhythm_avm_nv, medians, median_avm_nv);
                rhythm_avm_nv = avm;
                median_avm_nv = avm;
                let rates = (signal.median_samples_per_second, signal.rhythm_samples_per_second);
                let (aligned, fiducial) = self.align_medians(medians, signal.median_fiducial_point, rates)?;
                for ((rhythm, median), extent) in rhythms.iter_mut().zip(aligned.iter()).zip(&layout.leads) {
                    let beat = BeatAlignment {
                        median,
                        first_fiducial: fiducial,
                        rhythm_first_sample: extent.start,
                    };
                    subtract_median(rhythm, beat, &signal.qrs_zones)?;
                }
                tracing::debug!(zones = signal.qrs_zones.len(), "subtracted reference beats");
            }
        }

        let protected = match (config.bimodal, has_rhythm) {
            (Some(rate), true) => {
                if !has_median {
                    return Err(Error::Config("bimodal compression needs reference beats".into()));
                }
                if signal.rhythm_samples_per_second != signal.median_samples_per_second {
                    return Err(Error::Config(format!(
                        "bimodal compression needs equal rhythm and reference beat rates, got {} and {}",
                        signal.rhythm_samples_per_second, signal.median_samples_per_second
                    )));
                }
                let zones = if signal.protected_zones.len() == signal.qrs_zones.len() && !signal.protected_zones.is_empty() {
                    signal.protected_zones.clone()
                } else {
                    let grid = ProtectionGrid {
                        first_fiducial: signal.median_fiducial_point,
                        samples_per_second: signal.median_samples_per_second,
                        rate: rate.multiplier(),
                        extent: (layout.min_start().unwrap_or(1), layout.max_end().unwrap_or(1)),
                    };
                    derive_protected_zones(&signal.qrs_zones, config.measurements.as_ref(), grid)
                };
                Some((rate.multiplier(), zones))
            }
            _ => None,
        };

        let median = match &medians {
            Some(medians) => {
                let header = SampleHeader {
                    avm_nv: median_avm_nv,
                    interval_us: interval_for(signal.median_samples_per_second)?,
                    order: config.difference_order,
                    flag: 0,
                };
                Some(MedianSection::new(SampleData::encode_leads(&codec, medians, header)?))
            }
            None => None,
        };

        let rhythm = match &rhythms {
            Some(rhythms) => {
                let fine = interval_for(signal.rhythm_samples_per_second)?;
                let (interval_us, plans) = match &protected {
                    Some((rate, zones)) => {
                        let coarse = u16::try_from(fine as u32 * rate).map_err(|_| {
                            LeadGeometryError::InvalidSampleRate(format!(
                                "coarse interval of {} µs x {} does not fit",
                                fine, rate
                            ))
                        })?;
                        (coarse, Some(bimodal_plans(&layout, *rate as usize, zones)))
                    }
                    None => (fine, None),
                };
                let header = SampleHeader {
                    avm_nv: rhythm_avm_nv,
                    interval_us,
                    order: config.difference_order,
                    flag: 0,
                };
                Some(RhythmSection::encode(&codec, rhythms, header, plans.as_deref())?)
            }
            None => None,
        };

        let qrs = (has_median || !signal.qrs_zones.is_empty()).then(|| QrsTable {
            median_length_ms: signal.median_length_ms,
            first_fiducial: signal.median_fiducial_point,
            zones: signal.qrs_zones.clone(),
            protected: match &protected {
                Some((_, zones)) => zones.clone(),
                None if signal.protected_zones.len() == signal.qrs_zones.len() => signal.protected_zones.clone(),
                None => Vec::new(),
            },
        });

        let huffman = match mode {
            HuffmanMode::Raw => None,
            mode => Some(HuffmanSection { mode }),
        };

        tracing::debug!(
            leads = layout.leads.len(),
            subtract,
            bimodal = protected.is_some(),
            "split signal into sections"
        );
        Ok(WaveformSections {
            huffman,
            layout,
            qrs,
            median,
            rhythm,
        })
    }

    /// Reference beats at the rhythm rate, with the fiducial moved along.
    fn align_medians<'m>(
        &self,
        medians: &'m [Vec<i16>],
        first_fiducial: u16,
        (median_sps, rhythm_sps): (u32, u32),
    ) -> Result<(Cow<'m, [Vec<i16>]>, u16)> {
        if median_sps == rhythm_sps {
            return Ok((Cow::Borrowed(medians), first_fiducial));
        }
        let aligned = medians
            .iter()
            .map(|m| self.resampler.resample(m, median_sps, rhythm_sps))
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(median_sps, rhythm_sps, "resampled reference beats for subtraction");
        Ok((Cow::Owned(aligned), scale_fiducial(first_fiducial, median_sps, rhythm_sps)))
    }
}

fn require<T>(section: Option<&T>, id: u16) -> Result<&T> {
    section.ok_or_else(|| IncompleteSignalError::MissingSection(id).into())
}

/// Fine samples per coarse sample of bimodal rhythm data.
fn bimodal_rate(coarse_us: u16, fine_us: u16) -> Result<usize> {
    if fine_us == 0 || coarse_us < fine_us || coarse_us % fine_us != 0 {
        return Err(LeadGeometryError::InvalidSampleRate(format!(
            "bimodal interval {} µs is not a multiple of {} µs",
            coarse_us, fine_us
        ))
        .into());
    }
    Ok((coarse_us / fine_us) as usize)
}

/// Bring both sample sets to the smaller AVM and return it.
fn equalize_avm(rhythms: &mut [Vec<i16>], rhythm_avm: u16, medians: &mut [Vec<i16>], median_avm: u16) -> u16 {
    let (coarse, big, small) = match rhythm_avm.cmp(&median_avm) {
        std::cmp::Ordering::Equal => return rhythm_avm,
        std::cmp::Ordering::Greater => (rhythms, rhythm_avm, median_avm),
        std::cmp::Ordering::Less => (medians, median_avm, rhythm_avm),
    };
    if small == 0 {
        return big;
    }
    let factor = big as f64 / small as f64;
    for lead in coarse.iter_mut() {
        for v in lead.iter_mut() {
            *v = (*v as f64 * factor).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        }
    }
    tracing::debug!(from = big, to = small, "equalized amplitude multipliers");
    small
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BimodalRate, Compression};
    use crate::huffman::{DifferenceOrder, HuffmanEntry, HuffmanTable};
    use crate::leads::LeadType;
    use crate::qrs::QrsZone;

    fn beat() -> Vec<i16> {
        // 200 ms at 500 Hz, fiducial at sample 41
        (0..100i16)
            .map(|i| match i {
                20..=59 => (i * 37 % 23 - 11) * 40,
                _ => 0,
            })
            .collect()
    }

    fn recording() -> Signal {
        let median = beat();
        let mut rhythm = vec![10i16; 1000];
        for fiducial in [101usize, 401, 701] {
            for (k, &v) in median.iter().enumerate() {
                let i = fiducial - 41 + k;
                rhythm[i] = rhythm[i].wrapping_add(v);
            }
        }
        let leads = vec![
            LeadSignal::new(LeadType::I, rhythm.clone()).with_median(median.clone()),
            LeadSignal::new(LeadType::II, rhythm.iter().map(|v| v / 2).collect())
                .with_median(median.iter().map(|v| v / 2).collect()),
        ];
        Signal {
            leads,
            rhythm_avm: 5.0,
            rhythm_samples_per_second: 500,
            median_avm: 5.0,
            median_samples_per_second: 500,
            median_length_ms: 200,
            median_fiducial_point: 41,
            qrs_zones: [101, 401, 701]
                .into_iter()
                .map(|f| QrsZone::new(f - 20, f, f + 30))
                .collect(),
            protected_zones: Vec::new(),
        }
    }

    fn custom_tables() -> Compression {
        // Table 1 codes small values and "11" escapes to table 2, which codes anything
        let small = HuffmanTable::new(vec![
            HuffmanEntry::value_code(1, 1, 0, 0b0),
            HuffmanEntry::value_code(3, 7, 0, 0b100),
            HuffmanEntry::value_code(3, 11, 0, 0b101),
            HuffmanEntry::switch(2, 2, 0b11),
        ])
        .unwrap();
        let wide = HuffmanTable::new(vec![
            HuffmanEntry::value_code(1, 17, 0, 0b0),
            HuffmanEntry::switch(1, 1, 0b1),
        ])
        .unwrap();
        Compression::Custom(vec![small, wide])
    }

    #[test]
    fn test_round_trip_with_subtraction() {
        let resampler = Resampler::default();
        let assembler = SignalAssembler::new(&resampler);
        let signal = recording();
        let sections = assembler.encode(&signal, &EncodeConfig::default()).unwrap();
        assert!(sections.layout.reference_beat_subtracted);
        assert!(sections.huffman.is_some());
        assert_eq!(assembler.decode(&sections).unwrap(), signal);
    }

    #[test]
    fn test_round_trip_all_modes() {
        let resampler = Resampler::default();
        let assembler = SignalAssembler::new(&resampler);
        let signal = recording();
        for order in [DifferenceOrder::Zero, DifferenceOrder::One, DifferenceOrder::Two] {
            for compression in [Compression::Raw, Compression::Default, custom_tables()] {
                let config = EncodeConfig::default()
                    .with_difference_order(order)
                    .with_compression(compression);
                let sections = assembler.encode(&signal, &config).unwrap();
                assert_eq!(assembler.decode(&sections).unwrap(), signal);
            }
        }
    }

    #[test]
    fn test_subtraction_shrinks_rhythm() {
        let resampler = Resampler::default();
        let assembler = SignalAssembler::new(&resampler);
        let signal = recording();
        let with = assembler.encode(&signal, &EncodeConfig::default()).unwrap();
        let without = assembler
            .encode(&signal, &EncodeConfig::default().with_subtract_median(false))
            .unwrap();
        assert!(!without.layout.reference_beat_subtracted);
        let size = |s: &WaveformSections| s.rhythm.as_ref().unwrap().data.compressed_len();
        assert!(size(&with) < size(&without));
    }

    #[test]
    fn test_unequal_avm_decodes_at_smaller_avm() {
        let resampler = Resampler::default();
        let assembler = SignalAssembler::new(&resampler);
        let mut signal = recording();
        // Reference beats stored at twice the unit size
        signal.median_avm = 10.0;
        for lead in &mut signal.leads {
            let median = lead.median.as_mut().unwrap();
            median.iter_mut().for_each(|v| *v /= 2);
        }
        let sections = assembler.encode(&signal, &EncodeConfig::default()).unwrap();
        let decoded = assembler.decode(&sections).unwrap();
        assert_eq!(decoded.median_avm, 5.0);
        assert_eq!(decoded.rhythm_avm, 5.0);
        assert_eq!(decoded.leads[0].rhythm, signal.leads[0].rhythm);
        let doubled: Vec<i16> = signal.leads[0].median.as_ref().unwrap().iter().map(|v| v * 2).collect();
        assert_eq!(decoded.leads[0].median.as_ref(), Some(&doubled));
    }

    #[test]
    fn test_reference_beats_at_other_rate() {
        let resampler = Resampler::default();
        let assembler = SignalAssembler::new(&resampler);
        let mut signal = recording();
        let half: Vec<Vec<i16>> = signal
            .leads
            .iter()
            .map(|l| resampler.resample(l.median.as_ref().unwrap(), 500, 250).unwrap())
            .collect();
        for (lead, median) in signal.leads.iter_mut().zip(half) {
            lead.median = Some(median);
        }
        signal.median_samples_per_second = 250;
        signal.median_fiducial_point = 21;

        let sections = assembler.encode(&signal, &EncodeConfig::default()).unwrap();
        assert_eq!(assembler.decode(&sections).unwrap(), signal);
    }

    #[test]
    fn test_bimodal_round_trip() {
        let resampler = Resampler::default();
        let assembler = SignalAssembler::new(&resampler);
        let signal = recording();
        let config = EncodeConfig::default().with_bimodal(BimodalRate::X2);
        let sections = assembler.encode(&signal, &config).unwrap();
        let rhythm = sections.rhythm.as_ref().unwrap();
        assert!(rhythm.is_bimodal());
        assert_eq!(rhythm.data.interval_us, 4000);

        let decoded = assembler.decode(&sections).unwrap();
        assert_eq!(decoded.rhythm_samples_per_second, 500);
        let protected = &decoded.protected_zones;
        assert_eq!(protected.len(), 3);
        for (lead, original) in decoded.leads.iter().zip(&signal.leads) {
            let (a, b) = (lead.rhythm.as_ref().unwrap(), original.rhythm.as_ref().unwrap());
            for zone in protected {
                let range = (zone.start - 1) as usize..zone.end as usize;
                assert_eq!(a[range.clone()], b[range]);
            }
        }
    }

    #[test]
    fn test_bimodal_needs_matching_rates() {
        let resampler = Resampler::default();
        let assembler = SignalAssembler::new(&resampler);
        let mut signal = recording();
        signal.rhythm_samples_per_second = 1000;
        let config = EncodeConfig::default().with_bimodal(BimodalRate::X2);
        assert!(matches!(assembler.encode(&signal, &config), Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_sections() {
        let resampler = Resampler::default();
        let assembler = SignalAssembler::new(&resampler);
        let mut sections = assembler.encode(&recording(), &EncodeConfig::default()).unwrap();
        sections.qrs = None;
        assert!(matches!(
            assembler.decode(&sections),
            Err(Error::IncompleteSignal(IncompleteSignalError::MissingSection(4)))
        ));
    }

    #[test]
    fn test_bimodal_rate() {
        assert_eq!(bimodal_rate(4000, 2000).unwrap(), 2);
        assert_eq!(bimodal_rate(2000, 2000).unwrap(), 1);
        assert!(bimodal_rate(3000, 2000).is_err());
        assert!(bimodal_rate(1000, 2000).is_err());
        assert!(bimodal_rate(1000, 0).is_err());
    }
}
