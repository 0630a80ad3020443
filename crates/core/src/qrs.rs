//! QRS zone table (Section 4).
//!
//! Each zone marks where the reference beat was subtracted from the rhythm
//! data: `start..=end` in rhythm sample numbers, with `fiducial` lined up
//! against the reference beat's own fiducial sample (`first_fiducial`).
//! Protected zones mark the samples kept at full rate by bimodal compression.
//!
//! # Payload Format
//!
//! ```text
//! median_length_ms (2) | first_fiducial (2) | qrs_count (2)
//! per zone:      type (2) | start (4) | fiducial (4) | end (4)
//! per zone:      start (4) | end (4)         (optional protected zones)
//! ```
//!
//! All sample numbers are 1-based and inclusive.

use crate::byteio::{ByteReader, ByteWrite};
use crate::error::{Error, LeadGeometryError, Result};
use crate::framing::{FrameContext, Section, SectionHeader};

/// Zone type marking a real subtraction zone
pub const SUBTRACTION_ZONE: u16 = 0;

/// One beat's subtraction window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QrsZone {
    /// 0 = reference beat subtracted; other values are reserved
    pub zone_type: u16,
    pub start: i32,
    pub fiducial: i32,
    pub end: i32,
}

impl QrsZone {
    pub fn new(start: i32, fiducial: i32, end: i32) -> Self {
        Self {
            zone_type: SUBTRACTION_ZONE,
            start,
            fiducial,
            end,
        }
    }

    pub fn is_subtraction(&self) -> bool {
        self.zone_type == SUBTRACTION_ZONE
    }

    fn validate(&self, index: usize) -> Result<()> {
        if self.start > self.fiducial || self.fiducial > self.end {
            return Err(LeadGeometryError::InvalidZone {
                index,
                start: self.start,
                fiducial: self.fiducial,
                end: self.end,
            }
            .into());
        }
        Ok(())
    }
}

/// A window exempt from bimodal down-sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProtectedZone {
    pub start: i32,
    pub end: i32,
}

impl ProtectedZone {
    pub fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }

    /// A zero zone protects nothing.
    pub fn is_empty(&self) -> bool {
        self.end < self.start || (self.start == 0 && self.end == 0)
    }
}

/// Section 4: reference beat timing and QRS zones.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QrsTable {
    /// Length of the reference beat in milliseconds
    pub median_length_ms: u16,
    /// 1-based fiducial sample within the reference beat
    pub first_fiducial: u16,
    pub zones: Vec<QrsZone>,
    /// One per zone, or empty when not stored
    pub protected: Vec<ProtectedZone>,
}

impl Section for QrsTable {
    const ID: u16 = 4;

    fn decode_payload(_: &SectionHeader, payload: &[u8], _: &FrameContext) -> Result<Self> {
        let mut reader = ByteReader::new(payload);
        let median_length_ms = reader.read_u16()?;
        let first_fiducial = reader.read_u16()?;
        let qrs_count = reader.read_u16()? as usize;

        let mut zones = Vec::with_capacity(qrs_count);
        for _ in 0..qrs_count {
            zones.push(QrsZone {
                zone_type: reader.read_u16()?,
                start: reader.read_i32()?,
                fiducial: reader.read_i32()?,
                end: reader.read_i32()?,
            });
        }

        let protected = if reader.remaining() >= qrs_count * 8 {
            let mut protected = Vec::with_capacity(qrs_count);
            for _ in 0..qrs_count {
                protected.push(ProtectedZone {
                    start: reader.read_i32()?,
                    end: reader.read_i32()?,
                });
            }
            protected
        } else {
            vec![ProtectedZone::default(); qrs_count]
        };

        let reserved = zones.iter().filter(|z| !z.is_subtraction()).count();
        if reserved > 0 {
            tracing::warn!(reserved, "QRS zones with reserved types are not subtracted");
        }

        Ok(Self {
            median_length_ms,
            first_fiducial,
            zones,
            protected,
        })
    }

    fn encode_payload(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.zones.len() > u16::MAX as usize {
            return Err(Error::Config(format!("{} QRS zones", self.zones.len())));
        }
        if !self.protected.is_empty() && self.protected.len() != self.zones.len() {
            return Err(Error::Config(format!(
                "{} protected zones for {} QRS zones",
                self.protected.len(),
                self.zones.len()
            )));
        }
        out.put_u16(self.median_length_ms);
        out.put_u16(self.first_fiducial);
        out.put_u16(self.zones.len() as u16);
        for zone in &self.zones {
            out.put_u16(zone.zone_type);
            out.put_i32(zone.start);
            out.put_i32(zone.fiducial);
            out.put_i32(zone.end);
        }
        for zone in &self.protected {
            out.put_i32(zone.start);
            out.put_i32(zone.end);
        }
        Ok(())
    }
}

/// Where the reference beat sits relative to one lead's rhythm samples.
#[derive(Debug, Clone, Copy)]
pub struct BeatAlignment<'a> {
    /// Reference beat samples (same rate and AVM as the rhythm)
    pub median: &'a [i16],
    /// 1-based fiducial sample within `median`
    pub first_fiducial: u16,
    /// 1-based sample number of `rhythm[0]`
    pub rhythm_first_sample: i32,
}

/// Remove the reference beat from every subtraction zone of `rhythm`.
pub fn subtract_median(rhythm: &mut [i16], beat: BeatAlignment<'_>, zones: &[QrsZone]) -> Result<()> {
    apply_median(rhythm, beat, zones, i16::wrapping_sub)
}

/// Restore the reference beat into every subtraction zone of `rhythm`.
pub fn add_median(rhythm: &mut [i16], beat: BeatAlignment<'_>, zones: &[QrsZone]) -> Result<()> {
    apply_median(rhythm, beat, zones, i16::wrapping_add)
}

fn apply_median(
    rhythm: &mut [i16],
    beat: BeatAlignment<'_>,
    zones: &[QrsZone],
    op: fn(i16, i16) -> i16,
) -> Result<()> {
    let fiducial = beat.first_fiducial as usize;
    if fiducial == 0 || fiducial > beat.median.len() {
        return Err(LeadGeometryError::FiducialOutOfRange {
            fiducial: beat.first_fiducial as u32,
            length: beat.median.len(),
        }
        .into());
    }
    for (index, zone) in zones.iter().enumerate() {
        zone.validate(index)?;
    }

    // Sample numbers covered by the lead and by the beat around a zone's fiducial
    let first = beat.rhythm_first_sample as i64;
    let last = first + rhythm.len() as i64 - 1;
    let median_len = beat.median.len() as i64;

    let mut clipped = 0u64;
    for zone in zones.iter().filter(|z| z.is_subtraction()) {
        let (start, end) = (zone.start as i64, zone.end as i64);
        let beat_first = zone.fiducial as i64 - (fiducial as i64 - 1);
        let lo = start.max(first).max(beat_first);
        let hi = end.min(last).min(beat_first + median_len - 1);
        let covered = (hi - lo + 1).max(0);
        clipped += (end - start + 1 - covered).max(0) as u64;

        for sample in lo..=hi {
            let r = (sample - first) as usize;
            let m = (sample - beat_first) as usize;
            rhythm[r] = op(rhythm[r], beat.median[m]);
        }
    }
    if clipped > 0 {
        tracing::trace!(clipped, "zone samples outside lead or reference beat");
    }
    Ok(())
}

/// QRS onset/offset used to size protected zones.
///
/// Times are milliseconds from the start of the reference beat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QrsMeasurements {
    /// One onset/offset pair for every beat
    Aggregate { onset_ms: u16, offset_ms: u16 },
    /// One pair per QRS zone, in zone order
    PerBeat(Vec<(u16, u16)>),
}

impl QrsMeasurements {
    fn for_beat(&self, index: usize) -> Option<(u16, u16)> {
        match self {
            Self::Aggregate {
                onset_ms,
                offset_ms,
            } => Some((*onset_ms, *offset_ms)),
            Self::PerBeat(beats) => beats.get(index).copied(),
        }
    }
}

/// Inputs for [`derive_protected_zones`].
#[derive(Debug, Clone, Copy)]
pub struct ProtectionGrid {
    /// 1-based fiducial sample within the reference beat
    pub first_fiducial: u16,
    /// Fine (reference beat) sample rate
    pub samples_per_second: u32,
    /// Bimodal rate multiplier; zone edges land on multiples of it
    pub rate: u32,
    /// First and last sample number of the recording
    pub extent: (i32, i32),
}

/// Compute one protected zone per QRS zone.
///
/// With measurements the zone spans `fiducial - (fiducial_ms - onset)` to
/// `fiducial + (offset - fiducial_ms)`; without, the subtraction zone itself.
/// Edges are rounded outward onto the bimodal grid and clamped to `extent`.
pub fn derive_protected_zones(
    zones: &[QrsZone],
    measurements: Option<&QrsMeasurements>,
    grid: ProtectionGrid,
) -> Vec<ProtectedZone> {
    let sps = grid.samples_per_second.max(1) as i64;
    let rate = grid.rate.max(1) as i64;
    let fiducial_ms = (grid.first_fiducial.max(1) as i64 - 1) * 1000 / sps;
    let to_samples = |ms: i64| (ms * sps + 500).div_euclid(1000);

    zones
        .iter()
        .enumerate()
        .map(|(index, zone)| {
            let (start, end) = match measurements.and_then(|m| m.for_beat(index)) {
                Some((onset, offset)) => (
                    zone.fiducial as i64 - to_samples(fiducial_ms - onset as i64),
                    zone.fiducial as i64 + to_samples(offset as i64 - fiducial_ms),
                ),
                None => (zone.start as i64, zone.end as i64),
            };
            let start = (start - 1).div_euclid(rate) * rate + 1;
            let end = (end + rate - 1).div_euclid(rate) * rate;
            let start = start.max(grid.extent.0 as i64);
            let end = end.min(grid.extent.1 as i64);
            ProtectedZone::new(start as i32, end as i32)
        })
        .collect()
}
