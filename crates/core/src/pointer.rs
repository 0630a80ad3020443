//! Pointer table (Section 0): where every other section lives in the file.
//!
//! # Entry Format
//!
//! ```text
//! +-----------------+
//! | section_id (2)  |
//! +-----------------+
//! | length (4)      |  section length in bytes, 0 when absent
//! +-----------------+
//! | index (4)       |  1-based byte index into the file, 0 when absent
//! +-----------------+
//! ```
//!
//! The first twelve entries describe sections 0..=11 and are always present.
//! Further entries describe optional or manufacturer specific sections.

use std::collections::BTreeMap;

use crate::byteio::{ByteReader, ByteWrite};
use crate::error::{FrameError, Result};
use crate::framing::{FrameContext, Section, SectionHeader, HEADER_SIZE};

/// Number of entries every pointer table carries
pub const MANDATORY_ENTRIES: usize = 12;

/// Size of one pointer entry on the wire
pub const ENTRY_SIZE: usize = 10;

/// 1-based file index of the pointer table itself (right after the file header)
pub const FIRST_SECTION_INDEX: u32 = 7;

/// One row of the pointer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerEntry {
    pub id: u16,
    pub length: u32,
    /// 1-based byte index of the section in the file
    pub index: u32,
}

impl PointerEntry {
    pub fn absent(id: u16) -> Self {
        Self {
            id,
            length: 0,
            index: 0,
        }
    }

    /// A section with no index or no payload beyond its header is absent.
    pub fn is_present(&self) -> bool {
        self.index != 0 && self.length as usize > HEADER_SIZE
    }

    /// Zero-based byte range of the section within the file.
    pub fn byte_range(&self) -> std::ops::Range<usize> {
        let start = self.index.saturating_sub(1) as usize;
        start..start + self.length as usize
    }
}

/// The ordered list of pointer entries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PointerTable {
    entries: Vec<PointerEntry>,
}

impl PointerTable {
    pub fn new(entries: Vec<PointerEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[PointerEntry] {
        &self.entries
    }

    pub fn entry(&self, id: u16) -> Option<&PointerEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Entries for sections that are actually stored in the file.
    pub fn present(&self) -> impl Iterator<Item = &PointerEntry> + '_ {
        self.entries.iter().filter(|e| e.is_present())
    }

    /// Byte length of the framed pointer table.
    pub fn framed_len(&self) -> usize {
        HEADER_SIZE + self.entries.len() * ENTRY_SIZE
    }

    /// Lay sections out back to back in id order, right after the pointer table.
    ///
    /// `lengths` maps section ids (other than 0) to their framed length; a
    /// zero length keeps the entry but marks the section absent. Ids 0..=11
    /// always get an entry.
    pub fn layout(lengths: &BTreeMap<u16, usize>) -> Self {
        let mut ids: Vec<u16> = (0..MANDATORY_ENTRIES as u16).collect();
        ids.extend(lengths.keys().copied().filter(|&id| id as usize >= MANDATORY_ENTRIES));

        let table_len = (HEADER_SIZE + ids.len() * ENTRY_SIZE) as u32;
        let mut next_index = FIRST_SECTION_INDEX + table_len;
        let entries = ids
            .into_iter()
            .map(|id| {
                if id == 0 {
                    return PointerEntry {
                        id,
                        length: table_len,
                        index: FIRST_SECTION_INDEX,
                    };
                }
                match lengths.get(&id).copied().unwrap_or(0) {
                    0 => PointerEntry::absent(id),
                    length => {
                        let entry = PointerEntry {
                            id,
                            length: length as u32,
                            index: next_index,
                        };
                        next_index += length as u32;
                        entry
                    }
                }
            })
            .collect();
        Self { entries }
    }
}

impl Section for PointerTable {
    const ID: u16 = 0;

    fn decode_payload(_: &SectionHeader, payload: &[u8], _: &FrameContext) -> Result<Self> {
        let mut reader = ByteReader::new(payload);
        let mut entries = Vec::with_capacity(payload.len() / ENTRY_SIZE);
        while reader.remaining() >= ENTRY_SIZE {
            entries.push(PointerEntry {
                id: reader.read_u16()?,
                length: reader.read_u32()?,
                index: reader.read_u32()?,
            });
        }
        if entries.len() < MANDATORY_ENTRIES {
            return Err(FrameError::PointerTableTooShort {
                entries: entries.len(),
                required: MANDATORY_ENTRIES,
            }
            .into());
        }
        if !reader.is_empty() {
            tracing::warn!(trailing = reader.remaining(), "ignoring partial pointer entry");
        }
        Ok(Self { entries })
    }

    fn encode_payload(&self, out: &mut Vec<u8>) -> Result<()> {
        for entry in &self.entries {
            out.put_u16(entry.id);
            out.put_u32(entry.length);
            out.put_u32(entry.index);
        }
        Ok(())
    }
}
