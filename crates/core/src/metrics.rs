//! Encode statistics.
//!
//! Collected by [`encode_with_metrics`](crate::encode_with_metrics):
//! - Sample counts and raw size (2 bytes per sample)
//! - Compressed size per waveform section
//! - Compression ratio
//! - Timing and the resulting compatibility level

use std::time::{Duration, Instant};

use crate::assembler::WaveformSections;
use crate::container::CompatibilityLevel;
use crate::signal::Signal;

/// Statistics for one encode run.
#[derive(Debug, Clone)]
pub struct CodecMetrics {
    // === Timing ===
    pub start_time: Instant,
    pub end_time: Option<Instant>,

    // === Input ===
    pub leads: usize,
    /// Fine-rate rhythm samples across all leads
    pub rhythm_samples: u64,
    /// Reference beat samples across all leads
    pub median_samples: u64,

    // === Output ===
    /// Compressed rhythm bytes (Section 6 lead data)
    pub rhythm_bytes: u64,
    /// Compressed reference beat bytes (Section 5 lead data)
    pub median_bytes: u64,
    /// Whole file size
    pub file_bytes: u64,
    pub compatibility: CompatibilityLevel,
}

impl CodecMetrics {
    /// Start timing now.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            end_time: None,
            leads: 0,
            rhythm_samples: 0,
            median_samples: 0,
            rhythm_bytes: 0,
            median_bytes: 0,
            file_bytes: 0,
            compatibility: CompatibilityLevel::Unspecified,
        }
    }

    /// Record the sample counts of `signal`.
    pub fn record_signal(&mut self, signal: &Signal) {
        self.leads = signal.leads.len();
        let count = |data: &Option<Vec<i16>>| data.as_ref().map_or(0, |d| d.len() as u64);
        self.rhythm_samples = signal.leads.iter().map(|l| count(&l.rhythm)).sum();
        self.median_samples = signal.leads.iter().map(|l| count(&l.median)).sum();
    }

    /// Record the compressed sizes of `sections`.
    pub fn record_sections(&mut self, sections: &WaveformSections) {
        self.rhythm_bytes = sections.rhythm.as_ref().map_or(0, |r| r.data.compressed_len() as u64);
        self.median_bytes = sections.median.as_ref().map_or(0, |m| m.data.compressed_len() as u64);
    }

    pub fn complete(&mut self) {
        self.end_time = Some(Instant::now());
    }

    pub fn duration(&self) -> Duration {
        match self.end_time {
            Some(end) => end.duration_since(self.start_time),
            None => self.start_time.elapsed(),
        }
    }

    /// Raw size of all samples at 16 bits each.
    pub fn raw_bytes(&self) -> u64 {
        (self.rhythm_samples + self.median_samples) * 2
    }

    pub fn compressed_bytes(&self) -> u64 {
        self.rhythm_bytes + self.median_bytes
    }

    /// Compressed / raw; 0.0 without samples.
    pub fn compression_ratio(&self) -> f64 {
        if self.raw_bytes() == 0 {
            0.0
        } else {
            self.compressed_bytes() as f64 / self.raw_bytes() as f64
        }
    }

    /// Human-readable multi-line report.
    pub fn summary(&self) -> String {
        format!(
            "=== Encode Summary ===\n\
             Duration: {} ms\n\
             Leads: {}\n\
             Samples: {} rhythm, {} reference beat\n\
             Raw: {} bytes\n\
             Compressed: {} bytes ({} rhythm, {} reference beat)\n\
             Ratio: {:.1}%\n\
             File: {} bytes\n\
             Compatibility: {}",
            self.duration().as_millis(),
            self.leads,
            self.rhythm_samples,
            self.median_samples,
            self.raw_bytes(),
            self.compressed_bytes(),
            self.rhythm_bytes,
            self.median_bytes,
            self.compression_ratio() * 100.0,
            self.file_bytes,
            self.compatibility,
        )
    }

    /// `key=value` lines for parsing.
    pub fn export_text(&self) -> String {
        format!(
            "duration_ms={}\n\
             leads={}\n\
             rhythm_samples={}\n\
             median_samples={}\n\
             raw_bytes={}\n\
             compressed_bytes={}\n\
             compression_ratio={:.4}\n\
             file_bytes={}\n\
             compatibility={:#04x}\n",
            self.duration().as_millis(),
            self.leads,
            self.rhythm_samples,
            self.median_samples,
            self.raw_bytes(),
            self.compressed_bytes(),
            self.compression_ratio(),
            self.file_bytes,
            self.compatibility.code(),
        )
    }
}

impl Default for CodecMetrics {
    fn default() -> Self {
        Self::new()
    }
}
