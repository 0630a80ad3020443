//! In-memory ECG signal model.
//!
//! A [`Signal`] is what decoding produces and what encoding consumes: per
//! lead rhythm and reference beat samples in AVM units, plus the recording's
//! rates, beat timing and QRS zones.

use crate::config::EncodeConfig;
use crate::error::{Error, IncompleteSignalError, LeadGeometryError, Result};
use crate::leads::LeadType;
use crate::qrs::{ProtectedZone, QrsZone};

/// Samples of one lead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadSignal {
    pub lead: LeadType,
    pub rhythm: Option<Vec<i16>>,
    pub median: Option<Vec<i16>>,
    /// First rhythm sample, 0-based
    pub rhythm_start: usize,
    /// One past the last rhythm sample
    pub rhythm_end: usize,
}

impl LeadSignal {
    /// A lead whose rhythm starts at sample 0.
    pub fn new(lead: LeadType, rhythm: Vec<i16>) -> Self {
        let rhythm_end = rhythm.len();
        Self {
            lead,
            rhythm: Some(rhythm),
            median: None,
            rhythm_start: 0,
            rhythm_end,
        }
    }

    pub fn with_median(mut self, median: Vec<i16>) -> Self {
        self.median = Some(median);
        self
    }

    pub fn with_start(mut self, rhythm_start: usize) -> Self {
        let len = self.rhythm_end - self.rhythm_start;
        self.rhythm_start = rhythm_start;
        self.rhythm_end = rhythm_start + len;
        self
    }

    pub fn rhythm_len(&self) -> usize {
        self.rhythm_end.saturating_sub(self.rhythm_start)
    }
}

/// A full recording.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub leads: Vec<LeadSignal>,
    /// Rhythm amplitude multiplier in µV per unit
    pub rhythm_avm: f64,
    pub rhythm_samples_per_second: u32,
    /// Reference beat amplitude multiplier in µV per unit
    pub median_avm: f64,
    pub median_samples_per_second: u32,
    pub median_length_ms: u16,
    /// 1-based fiducial sample of the reference beat
    pub median_fiducial_point: u16,
    pub qrs_zones: Vec<QrsZone>,
    /// Bimodal protected zones, one per QRS zone when present
    pub protected_zones: Vec<ProtectedZone>,
}

impl Default for Signal {
    fn default() -> Self {
        Self {
            leads: Vec::new(),
            rhythm_avm: 0.0,
            rhythm_samples_per_second: 0,
            median_avm: 0.0,
            median_samples_per_second: 0,
            median_length_ms: 0,
            median_fiducial_point: 0,
            qrs_zones: Vec::new(),
            protected_zones: Vec::new(),
        }
    }
}

impl Signal {
    /// Rhythm-only signal.
    pub fn rhythm(leads: Vec<LeadSignal>, avm: f64, samples_per_second: u32) -> Self {
        Self {
            leads,
            rhythm_avm: avm,
            rhythm_samples_per_second: samples_per_second,
            ..Self::default()
        }
    }

    pub fn lead(&self, lead: LeadType) -> Option<&LeadSignal> {
        self.leads.iter().find(|l| l.lead == lead)
    }

    pub fn lead_mut(&mut self, lead: LeadType) -> Option<&mut LeadSignal> {
        self.leads.iter_mut().find(|l| l.lead == lead)
    }

    pub fn has_rhythm(&self) -> bool {
        self.leads.iter().any(|l| l.rhythm.is_some())
    }

    pub fn has_median(&self) -> bool {
        self.leads.iter().any(|l| l.median.is_some())
    }

    /// Reference beat samples implied by its length and rate.
    pub fn median_sample_count(&self) -> usize {
        (self.median_length_ms as u64 * self.median_samples_per_second as u64 / 1000) as usize
    }

    /// Check the signal can be encoded.
    ///
    /// Rhythm and reference beats are all-or-nothing across leads, rhythm
    /// lengths match their extents, and every present kind of data has a
    /// positive AVM and sample rate.
    pub fn validate(&self) -> Result<()> {
        if self.leads.is_empty() {
            return Err(IncompleteSignalError::MissingLead("any".into()).into());
        }

        if self.has_rhythm() {
            if let Some(missing) = self.leads.iter().find(|l| l.rhythm.is_none()) {
                return Err(IncompleteSignalError::MissingLead(format!("{} rhythm", missing.lead)).into());
            }
            check_scale("rhythm", self.rhythm_avm, self.rhythm_samples_per_second)?;
            for (index, lead) in self.leads.iter().enumerate() {
                let actual = lead.rhythm.as_ref().map_or(0, Vec::len);
                if lead.rhythm_end < lead.rhythm_start || actual != lead.rhythm_len() {
                    return Err(LeadGeometryError::SampleCountMismatch {
                        lead: index,
                        expected: lead.rhythm_len(),
                        actual,
                    }
                    .into());
                }
            }
        }

        if self.has_median() {
            if let Some(missing) = self.leads.iter().find(|l| l.median.is_none()) {
                return Err(IncompleteSignalError::MissingLead(format!("{} reference beat", missing.lead)).into());
            }
            check_scale("reference beat", self.median_avm, self.median_samples_per_second)?;
            let expected = self.median_sample_count();
            for lead in &self.leads {
                let actual = lead.median.as_ref().map_or(0, Vec::len);
                if actual != expected {
                    return Err(LeadGeometryError::LengthMismatch {
                        left: actual,
                        right: expected,
                    }
                    .into());
                }
            }
            let fiducial = self.median_fiducial_point as usize;
            if fiducial == 0 || fiducial > expected {
                return Err(LeadGeometryError::FiducialOutOfRange {
                    fiducial: fiducial as u32,
                    length: expected,
                }
                .into());
            }
        }
        Ok(())
    }
}

fn check_scale(what: &str, avm: f64, samples_per_second: u32) -> Result<()> {
    if avm.is_nan() || avm <= 0.0 {
        return Err(Error::Config(format!("{} AVM must be positive, got {}", what, avm)));
    }
    if samples_per_second == 0 {
        return Err(LeadGeometryError::InvalidSampleRate(format!("{} rate of 0", what)).into());
    }
    Ok(())
}

/// Formats that carry ECG waveforms.
pub trait Signals {
    /// Decode the stored waveforms.
    fn signals(&self) -> Result<Signal>;

    /// Replace the stored waveforms.
    fn set_signals(&mut self, signal: &Signal, config: &EncodeConfig) -> Result<()>;
}
