//! Section frame serialization and parsing.
//!
//! Every section of the file is wrapped in the same 16-byte header:
//!
//! ```text
//! +------------------+
//! | crc (2)          |  CRC-CCITT over bytes [2..length)
//! +------------------+
//! | section_id (2)   |  u16 big-endian
//! +------------------+
//! | length (4)       |  u32 total section length, header included
//! +------------------+
//! | section_ver (1)  |
//! +------------------+
//! | protocol_ver (1) |
//! +------------------+
//! | reserved (6)     |
//! +------------------+
//! | payload          |  section specific
//! | (variable)       |
//! +------------------+
//! ```
//!
//! Parsing checks, in order: the header is complete, the id matches the
//! concrete section type, the declared length matches the bytes supplied
//! (the pointer table is exempt), and finally the CRC.

use crate::byteio::{patch_u16, patch_u32, ByteReader, ByteWrite};
use crate::crc::crc16_ccitt;
use crate::error::{FrameError, Result};

/// Size of the section header in bytes
pub const HEADER_SIZE: usize = 16;

/// Section and protocol version written by default (SCP-ECG 2.0)
pub const DEFAULT_VERSION: u8 = 20;

/// Parsed section header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    /// CRC-CCITT over bytes `[2..length)` of the section
    pub crc: u16,
    /// Section id (0 pointer table, 2 Huffman tables, 3 leads, ...)
    pub id: u16,
    /// Total section length in bytes, header included
    pub length: u32,
    /// Version of this section's layout
    pub section_version: u8,
    /// Version of the protocol the producer follows
    pub protocol_version: u8,
    /// Kept as read, written as zeros
    pub reserved: [u8; 6],
}

impl SectionHeader {
    /// Parse the fixed header at the start of `bytes`.
    ///
    /// Only the first [`HEADER_SIZE`] bytes are read; nothing is validated
    /// beyond their presence.
    ///
    /// # Errors
    /// Returns `FrameError::Truncated` if fewer than 16 bytes are supplied.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::Truncated {
                id: crate::byteio::peek_u16(bytes, 2).unwrap_or(0),
                declared: HEADER_SIZE,
                actual: bytes.len(),
            }
            .into());
        }
        let mut reader = ByteReader::new(bytes);
        let crc = reader.read_u16()?;
        let id = reader.read_u16()?;
        let length = reader.read_u32()?;
        let section_version = reader.read_u8()?;
        let protocol_version = reader.read_u8()?;
        let mut reserved = [0u8; 6];
        reserved.copy_from_slice(reader.read_bytes(6)?);
        Ok(Self {
            crc,
            id,
            length,
            section_version,
            protocol_version,
            reserved,
        })
    }
}

/// Information a section parser needs from sections decoded before it.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameContext {
    /// Number of leads declared by the lead layout (Section 3)
    pub lead_count: usize,
}

/// Versions stamped into a written section header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameVersions {
    /// Stamped into byte 8 of the header
    pub section_version: u8,
    /// Stamped into byte 9 of the header
    pub protocol_version: u8,
}

impl Default for FrameVersions {
    fn default() -> Self {
        Self {
            section_version: DEFAULT_VERSION,
            protocol_version: DEFAULT_VERSION,
        }
    }
}

/// A typed section payload with a fixed section id.
pub trait Section: Sized {
    /// Section id owned by this type
    const ID: u16;

    /// Parse the payload (everything after the 16-byte header).
    fn decode_payload(header: &SectionHeader, payload: &[u8], ctx: &FrameContext) -> Result<Self>;

    /// Append the payload bytes to `out`.
    fn encode_payload(&self, out: &mut Vec<u8>) -> Result<()>;
}

/// Validate the frame around `bytes` and return its header and payload.
///
/// `bytes` must be exactly the section as addressed by the pointer table.
/// The pointer table (id 0) may declare a shorter length than supplied; the
/// declared length is then used.
///
/// # Arguments
/// - `expected_id`: id the caller is parsing, checked against the header
/// - `bytes`: the whole section, header included
///
/// # Errors
/// - `FrameError::Truncated` if the header is incomplete or the declared
///   length disagrees with `bytes.len()`
/// - `FrameError::Mismatch` if the header carries another id
/// - `FrameError::CrcInvalid` if the stored CRC does not match
pub fn open_frame(expected_id: u16, bytes: &[u8]) -> Result<(SectionHeader, &[u8])> {
    let header = SectionHeader::parse(bytes)?;
    if header.id != expected_id {
        return Err(FrameError::Mismatch {
            expected: expected_id,
            actual: header.id,
        }
        .into());
    }

    let declared = header.length as usize;
    let length = if declared == bytes.len() {
        declared
    } else if expected_id == 0 && declared >= HEADER_SIZE && declared <= bytes.len() {
        // Pointer table: historical producers disagree on its length, trust the header
        tracing::warn!(
            declared,
            supplied = bytes.len(),
            "pointer table length disagrees with supplied bytes"
        );
        declared
    } else {
        return Err(FrameError::Truncated {
            id: header.id,
            declared,
            actual: bytes.len(),
        }
        .into());
    };
    if length < HEADER_SIZE {
        return Err(FrameError::Truncated {
            id: header.id,
            declared,
            actual: bytes.len(),
        }
        .into());
    }

    let computed = crc16_ccitt(&bytes[2..length]);
    if computed != header.crc {
        return Err(FrameError::CrcInvalid {
            id: Some(header.id),
            stored: header.crc,
            computed,
        }
        .into());
    }

    Ok((header, &bytes[HEADER_SIZE..length]))
}

/// Parse a typed section from its framed bytes.
///
/// # Arguments
/// - `bytes`: the whole section as addressed by the pointer table
/// - `ctx`: facts from sections parsed earlier, such as the lead count
///
/// # Errors
/// Any error of [`open_frame`], or of `S::decode_payload` for a malformed
/// payload.
pub fn read_section<S: Section>(bytes: &[u8], ctx: &FrameContext) -> Result<S> {
    let (header, payload) = open_frame(S::ID, bytes)?;
    tracing::debug!(id = S::ID, length = header.length, "parsing section");
    S::decode_payload(&header, payload, ctx)
}

/// Serialize a typed section including header and CRC.
///
/// An empty payload yields an empty buffer: the section is absent.
///
/// # Errors
/// Whatever `S::encode_payload` reports for a section it cannot represent.
pub fn write_section<S: Section>(section: &S, versions: FrameVersions) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    section.encode_payload(&mut payload)?;
    Ok(frame_payload(S::ID, &payload, versions))
}

/// Wrap a finished payload in a section header.
///
/// Fills in the length and CRC; the reserved bytes are zero. Returns an empty
/// buffer for an empty payload.
pub fn frame_payload(id: u16, payload: &[u8], versions: FrameVersions) -> Vec<u8> {
    if payload.is_empty() {
        return Vec::new();
    }

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.put_u16(0); // crc, patched below
    frame.put_u16(id);
    frame.put_u32(0); // length, patched below
    frame.put_u8(versions.section_version);
    frame.put_u8(versions.protocol_version);
    frame.extend_from_slice(&[0u8; 6]);
    frame.extend_from_slice(payload);

    let length = frame.len() as u32;
    patch_u32(&mut frame, 4, length);
    let crc = crc16_ccitt(&frame[2..]);
    patch_u16(&mut frame, 0, crc);
    frame
}
