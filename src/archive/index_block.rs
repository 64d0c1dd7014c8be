//! Index block codec
//!
//! The index block maps stable file numbers to `(letter, position)` pairs.
//! It is a flat table with one fixed-size record per file number, starting
//! at number 1:
//!
//! ```text
//! Wide   (ALD): [letter][pos lo][pos hi]   3 bytes, position little-endian
//! Narrow (DAT): [letter][pos]              2 bytes
//! ```
//!
//! Positions are 1-based; a position of 0 marks the number as unused.

use crate::error::{AldError, Result};

/// Largest file number any archive kind can index
pub const MAX_FILE_NUMBER: u32 = 0xFF_FFFF;

/// Record layout of an index block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordLayout {
    /// 3-byte records with a 16-bit position
    Wide,
    /// 2-byte records with an 8-bit position
    Narrow,
}

impl RecordLayout {
    pub fn record_size(self) -> usize {
        match self {
            Self::Wide => 3,
            Self::Narrow => 2,
        }
    }

    /// Largest file number an index block may cover.
    ///
    /// The table holds a record for every number up to the largest, so this
    /// bounds its size: 48 MB for ALD, and for DAT whatever leaves room in a
    /// volume of at most 65535 sectors.
    pub fn max_number(self) -> u32 {
        match self {
            Self::Wide => MAX_FILE_NUMBER,
            Self::Narrow => (u16::MAX as u32 - 2) * 256 / 2,
        }
    }

    /// Largest zero-based position a record can address
    pub fn max_position(self) -> usize {
        match self {
            Self::Wide => u16::MAX as usize - 1,
            Self::Narrow => u8::MAX as usize - 1,
        }
    }
}

/// One used record of an index block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRecord {
    pub number: u32,
    pub letter: u8,
    /// Zero-based position within the volume's entry list
    pub position: usize,
}

/// Decode every used record, in ascending file-number order.
///
/// Trailing bytes that do not form a whole record (sector padding) are ignored.
pub fn decode(bytes: &[u8], layout: RecordLayout) -> Vec<IndexRecord> {
    let size = layout.record_size();
    bytes
        .chunks_exact(size)
        .enumerate()
        .filter_map(|(raw_number, record)| {
            let letter = record[0];
            let raw_position = match layout {
                RecordLayout::Wide => record[1] as usize | (record[2] as usize) << 8,
                RecordLayout::Narrow => record[1] as usize,
            };
            if raw_position == 0 {
                return None;
            }
            Some(IndexRecord {
                number: raw_number as u32 + 1,
                letter,
                position: raw_position - 1,
            })
        })
        .collect()
}

/// Encode records into a table covering numbers 1..=max.
///
/// Gaps are written as zero records. Records with number 0 carry no slot and
/// are skipped. When two records share a number the later one wins.
pub fn encode(records: &[IndexRecord], layout: RecordLayout) -> Result<Vec<u8>> {
    let size = layout.record_size();
    let max_number = records.iter().map(|r| r.number).max().unwrap_or(0);
    if max_number > layout.max_number() {
        return Err(AldError::ArgumentInvalid(format!(
            "file number {} is past the largest the index block can hold ({})",
            max_number,
            layout.max_number()
        )));
    }
    let mut table = vec![0u8; max_number as usize * size];

    for record in records.iter().filter(|r| r.number > 0) {
        if record.position > layout.max_position() {
            return Err(AldError::ArgumentInvalid(format!(
                "file {} sits at position {} which the index block cannot address",
                record.number, record.position
            )));
        }
        let raw_position = record.position + 1;
        let at = (record.number as usize - 1) * size;
        table[at] = record.letter;
        match layout {
            RecordLayout::Wide => {
                table[at + 1] = (raw_position & 0xFF) as u8;
                table[at + 2] = (raw_position >> 8) as u8;
            }
            RecordLayout::Narrow => {
                table[at + 1] = raw_position as u8;
            }
        }
    }

    Ok(table)
}
