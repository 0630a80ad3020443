//! scp-ecg-core: SCP-ECG waveform codec
//!
//! This library reads and writes the waveform part of SCP-ECG files:
//! - Parses the section container and validates every CRC
//! - Decodes Huffman-coded difference data into per-lead samples
//! - Restores subtracted reference beats and bimodal down-sampling
//! - Encodes a [`Signal`] back into a file with the same machinery
//!
//! # Architecture
//!
//! The crate is layered bottom-up:
//! - `byteio`, `crc`, `bitio`: Big-endian fields, CRC-CCITT and bit streams
//! - `framing`, `pointer`, `container`: Section framing and the file directory
//! - `huffman`: Difference orders and prefix-code tables (Section 2)
//! - `leads`, `qrs`, `samples`, `median`, `rhythm`: Sections 3 to 6
//! - `resample`: Sample-rate conversion
//! - `assembler`: Sections to [`Signal`] and back
//! - `derive`: Limb lead derivation
//! - `config`, `metrics`: Encode options and statistics
//!
//! # Design Principles
//!
//! - **No panics**: Malformed input yields a structured [`Error`]
//! - **Lossless where the format allows**: Only bimodal compression loses data
//! - **Pass-through**: Sections outside the waveform model survive untouched

pub mod assembler;
pub mod bitio;
pub mod byteio;
pub mod config;
pub mod container;
pub mod crc;
pub mod derive;
pub mod error;
pub mod framing;
pub mod huffman;
pub mod leads;
pub mod median;
pub mod metrics;
pub mod pointer;
pub mod qrs;
pub mod resample;
pub mod rhythm;
pub mod samples;
pub mod signal;

// Re-export commonly used types
pub use assembler::{SignalAssembler, WaveformSections};
pub use config::{BimodalRate, Compression, EncodeConfig};
pub use container::{CompatibilityLevel, ScpFile};
pub use derive::{derive_limb_leads, DerivedLeads};
pub use error::{Error, Result};
pub use huffman::{DifferenceOrder, HuffmanEntry, HuffmanTable};
pub use leads::LeadType;
pub use metrics::CodecMetrics;
pub use qrs::{ProtectedZone, QrsMeasurements, QrsZone};
pub use resample::Resampler;
pub use signal::{LeadSignal, Signal, Signals};

/// Decode the waveforms of an SCP-ECG file.
pub fn decode(bytes: &[u8]) -> Result<Signal> {
    ScpFile::from_bytes(bytes)?.signals()
}

/// Encode `signal` as a new SCP-ECG file.
pub fn encode(signal: &Signal, config: &EncodeConfig) -> Result<Vec<u8>> {
    let mut file = ScpFile::new();
    file.set_signals(signal, config)?;
    file.to_bytes()
}

/// Like [`encode`], also reporting sizes and timing.
pub fn encode_with_metrics(signal: &Signal, config: &EncodeConfig) -> Result<(Vec<u8>, CodecMetrics)> {
    let mut metrics = CodecMetrics::new();
    metrics.record_signal(signal);

    let resampler = Resampler::default();
    let sections = SignalAssembler::new(&resampler).encode(signal, config)?;
    metrics.record_sections(&sections);

    let mut file = ScpFile::new();
    file.set_versions(config.versions());
    file.set_waveform_sections(&sections)?;
    let bytes = file.to_bytes()?;

    metrics.file_bytes = bytes.len() as u64;
    metrics.compatibility = file.compatibility_level();
    metrics.complete();
    tracing::info!(
        leads = metrics.leads,
        file_bytes = metrics.file_bytes,
        ratio = metrics.compression_ratio(),
        "encoded signal"
    );
    Ok((bytes, metrics))
}
