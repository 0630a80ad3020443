//! Error types for the SCP-ECG codec.
//!
//! Every failure is returned as a value; malformed input never panics.
//! Low-level frame and codec errors abort the section being processed and
//! bubble up unchanged, so a caller always sees the original cause.

use thiserror::Error;

/// Top-level error type for all codec operations.
///
/// Each variant corresponds to a specific failure domain:
/// - Bit I/O: reading bits past the end of a compressed buffer
/// - Frame: section header, length or CRC problems
/// - Huffman: corrupt or truncated compressed lead data
/// - Lead geometry: inconsistent lead lengths, extents, zones or rates
/// - Incomplete signal: a mandatory section or lead is missing
/// - Config: encode preconditions not met
#[derive(Debug, Error)]
pub enum Error {
    /// Bit I/O operation failed
    #[error("bit I/O error: {0}")]
    BitIo(#[from] BitIoError),

    /// Section container is corrupt or does not match the expected section
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Compressed lead data could not be decoded or encoded
    #[error("huffman codec error: {0}")]
    Huffman(#[from] HuffmanError),

    /// Difference order outside 0..=2
    #[error("invalid difference order {0} (expected 0, 1 or 2)")]
    InvalidDifferenceOrder(u8),

    /// Lead lengths, offsets, zones or sample rates are inconsistent
    #[error("invalid lead geometry: {0}")]
    InvalidLeadGeometry(#[from] LeadGeometryError),

    /// A required section or lead is missing
    #[error("incomplete signal: {0}")]
    IncompleteSignal(#[from] IncompleteSignalError),

    /// Encode configuration or signal precondition violated
    #[error("configuration error: {0}")]
    Config(String),
}

/// Bit-level I/O errors.
#[derive(Debug, Error)]
pub enum BitIoError {
    /// Attempted to read past the end of the buffer
    #[error("unexpected end of bit stream at bit {position}")]
    UnexpectedEof { position: usize },

    /// Requested more than 32 bits in one call
    #[error("invalid bit count: {0}")]
    InvalidBitCount(usize),
}

/// Section framing errors.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Section header carries a different id than the parser expects
    #[error("section id mismatch: expected {expected}, got {actual}")]
    Mismatch { expected: u16, actual: u16 },

    /// Declared section length disagrees with the bytes supplied
    #[error("section {id} truncated: header declares {declared} bytes, {actual} available")]
    Truncated { id: u16, declared: usize, actual: usize },

    /// A field inside a section payload runs past its end
    #[error("payload truncated at offset {offset}: need {needed} bytes, {available} available")]
    PayloadTruncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// Stored CRC does not match the computed CRC
    #[error("CRC mismatch in section {id:?}: stored {stored:#06x}, computed {computed:#06x}")]
    CrcInvalid {
        /// `None` for the file-level CRC
        id: Option<u16>,
        stored: u16,
        computed: u16,
    },

    /// Pointer table holds fewer than the mandatory entries
    #[error("pointer table holds {entries} entries, at least {required} required")]
    PointerTableTooShort { entries: usize, required: usize },

    /// A pointer entry addresses bytes outside the file
    #[error("section {id} at index {index} with length {length} lies outside a {file_len}-byte file")]
    SectionOutOfBounds {
        id: u16,
        index: u32,
        length: u32,
        file_len: usize,
    },
}

/// Huffman codec errors.
#[derive(Debug, Error)]
pub enum HuffmanError {
    /// Accumulated prefix matches no entry of the active table
    #[error("no huffman code matches the prefix at bit {position} (table {table})")]
    Miss { position: usize, table: usize },

    /// Stream ended before the expected number of samples was decoded
    #[error("compressed stream exhausted after {decoded} of {expected} samples")]
    StreamExhausted { decoded: usize, expected: usize },

    /// No entry of any reachable table can represent the value
    #[error("value {value} cannot be represented by the selected huffman tables")]
    Unencodable { value: i32 },

    /// Table definition is unusable (empty, bad bit counts, bad switch target)
    #[error("invalid huffman table: {0}")]
    InvalidTable(String),
}

/// Lead geometry errors.
#[derive(Debug, Error)]
pub enum LeadGeometryError {
    /// Two leads that must line up do not
    #[error("lead length mismatch: {left} vs {right} samples")]
    LengthMismatch { left: usize, right: usize },

    /// Two leads that must share an extent do not
    #[error("lead extent mismatch: [{left_start}, {left_end}) vs [{right_start}, {right_end})")]
    ExtentMismatch {
        left_start: u32,
        left_end: u32,
        right_start: u32,
        right_end: u32,
    },

    /// A lead ends before it starts or starts before sample 1
    #[error("lead {lead} has invalid extent [{start}, {end}]")]
    InvalidExtent { lead: usize, start: i32, end: i32 },

    /// A QRS zone is malformed
    #[error("invalid QRS zone {index}: start {start}, fiducial {fiducial}, end {end}")]
    InvalidZone {
        index: usize,
        start: i32,
        fiducial: i32,
        end: i32,
    },

    /// The median fiducial point does not fall inside the median beat
    #[error("fiducial point {fiducial} outside median beat of {length} samples")]
    FiducialOutOfRange { fiducial: u32, length: usize },

    /// A sample rate of zero, or a rate ratio that does not divide evenly
    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(String),

    /// Decoded samples do not cover the declared lead extent
    #[error("lead {lead} decoded {actual} samples, layout declares {expected}")]
    SampleCountMismatch {
        lead: usize,
        expected: usize,
        actual: usize,
    },
}

/// Missing data errors.
#[derive(Debug, Error)]
pub enum IncompleteSignalError {
    /// A section required for the requested operation is absent
    #[error("required section {0} is missing")]
    MissingSection(u16),

    /// A lead required for the requested operation is absent
    #[error("required lead {0} is missing")]
    MissingLead(String),

    /// Sections disagree on the number of leads
    #[error("section {section} holds {actual} leads, lead layout declares {expected}")]
    LeadCount {
        section: u16,
        expected: usize,
        actual: usize,
    },
}

/// Type alias for Result with our Error type
pub type Result<T> = std::result::Result<T, Error>;
