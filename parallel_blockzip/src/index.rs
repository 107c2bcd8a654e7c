//! Archive index and trailer.
//!
//! An archive is laid out as
//!
//! ```text
//! [chunk bytes in completion order][index][u32 LE index length]
//! ```
//!
//! The index is a fixed little-endian layout:
//!
//! | offset | size   | field                               |
//! |--------|--------|-------------------------------------|
//! | 0      | 4      | magic `BZIX`                        |
//! | 4      | 1      | version (1)                         |
//! | 5      | 1      | codec id                            |
//! | 6      | 2      | reserved, zero                      |
//! | 8      | 8      | entry count `N`                     |
//! | 16     | 24 * N | entries: `index`, `offset`, `length`|
//!
//! Entries are stored in write order. Since chunks finish out of order, the
//! file position of a chunk and its logical index diverge and the index is
//! what maps one back onto the other.

use std::ops::Range;

use crate::codec::Codec;
use crate::error::{ArchiveError, Result};

pub const INDEX_MAGIC: [u8; 4] = *b"BZIX";
pub const INDEX_VERSION: u8 = 1;
pub const INDEX_HEADER_LEN: usize = 16;
pub const INDEX_ENTRY_LEN: usize = 24;
/// Size of the trailing length field.
pub const LENGTH_FIELD_LEN: usize = 4;

/// Location of one compressed chunk inside the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexEntry {
    /// Logical sequence number of the chunk.
    pub index: u64,
    /// Byte offset of the compressed chunk from the start of the archive.
    pub offset: u64,
    /// Length of the compressed chunk in bytes.
    pub length: u64,
}

impl IndexEntry {
    pub fn new(index: u64, offset: u64, length: u64) -> Self {
        Self {
            index,
            offset,
            length,
        }
    }

    /// Byte range of the chunk; only valid after [`ArchiveIndex::locate`]
    /// has checked it against the file.
    pub fn byte_range(&self) -> Range<usize> {
        self.offset as usize..(self.offset + self.length) as usize
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.index.to_le_bytes());
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.length.to_le_bytes());
    }

    fn decode(raw: &[u8]) -> Self {
        Self {
            index: read_u64(&raw[0..8]),
            offset: read_u64(&raw[8..16]),
            length: read_u64(&raw[16..24]),
        }
    }
}

/// Table of every chunk in an archive plus the codec that produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveIndex {
    codec: Codec,
    entries: Vec<IndexEntry>,
}

impl ArchiveIndex {
    pub fn new(codec: Codec) -> Self {
        Self {
            codec,
            entries: Vec::new(),
        }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn push(&mut self, entry: IndexEntry) {
        self.entries.push(entry);
    }

    /// Entries in the order they were written.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total compressed bytes covered by the entries.
    pub fn data_len(&self) -> u64 {
        self.entries.iter().map(|e| e.length).sum()
    }

    /// Entries sorted by logical index, so `result[i].index == i` for a
    /// validated index.
    pub fn in_logical_order(&self) -> Vec<IndexEntry> {
        let mut entries = self.entries.clone();
        entries.sort_unstable_by_key(|e| e.index);
        entries
    }

    /// Size of the serialized index, excluding the length field.
    pub fn encoded_len(&self) -> usize {
        INDEX_HEADER_LEN + INDEX_ENTRY_LEN * self.entries.len()
    }

    /// Serializes the index followed by its 4-byte length field.
    pub fn encode_trailer(&self) -> Result<Vec<u8>> {
        let index_len = self.encoded_len();
        let length_field = u32::try_from(index_len).map_err(|_| {
            ArchiveError::format(format!(
                "index of {} entries does not fit in a 32-bit trailer",
                self.entries.len()
            ))
        })?;

        let total = index_len + LENGTH_FIELD_LEN;
        let mut out = Vec::new();
        out.try_reserve_exact(total)
            .map_err(|_| ArchiveError::ResourceExhausted { requested: total })?;

        out.extend_from_slice(&INDEX_MAGIC);
        out.push(INDEX_VERSION);
        out.push(self.codec.id());
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&(self.entries.len() as u64).to_le_bytes());
        for entry in &self.entries {
            entry.encode_into(&mut out);
        }
        out.extend_from_slice(&length_field.to_le_bytes());
        Ok(out)
    }

    /// Parses a serialized index (without its length field).
    ///
    /// Checks the header and that the entry indices are exactly `0..N`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < INDEX_HEADER_LEN {
            return Err(ArchiveError::format(format!(
                "index is {} bytes, shorter than its {}-byte header",
                bytes.len(),
                INDEX_HEADER_LEN
            )));
        }
        if bytes[0..4] != INDEX_MAGIC {
            return Err(ArchiveError::format("index magic mismatch"));
        }
        if bytes[4] != INDEX_VERSION {
            return Err(ArchiveError::format(format!(
                "unsupported index version {}",
                bytes[4]
            )));
        }
        let codec = Codec::from_id(bytes[5])
            .ok_or_else(|| ArchiveError::format(format!("unknown codec id {}", bytes[5])))?;
        if bytes[6..8] != [0, 0] {
            return Err(ArchiveError::format("reserved index bytes are not zero"));
        }

        let count = read_u64(&bytes[8..16]);
        let expected = count
            .checked_mul(INDEX_ENTRY_LEN as u64)
            .and_then(|n| n.checked_add(INDEX_HEADER_LEN as u64));
        if expected != Some(bytes.len() as u64) {
            return Err(ArchiveError::format(format!(
                "index declares {} entries but holds {} bytes",
                count,
                bytes.len()
            )));
        }

        let entries: Vec<IndexEntry> = bytes[INDEX_HEADER_LEN..]
            .chunks_exact(INDEX_ENTRY_LEN)
            .map(IndexEntry::decode)
            .collect();

        let mut seen = vec![false; entries.len()];
        for entry in &entries {
            let Some(slot) = usize::try_from(entry.index)
                .ok()
                .and_then(|i| seen.get_mut(i))
            else {
                return Err(ArchiveError::format(format!(
                    "chunk {} is outside 0..{}",
                    entry.index, count
                )));
            };
            if *slot {
                return Err(ArchiveError::format(format!(
                    "chunk {} is listed twice",
                    entry.index
                )));
            }
            *slot = true;
        }

        Ok(Self { codec, entries })
    }

    /// Checks that the chunk ranges tile `[0, data_end)` with no gaps or
    /// overlaps.
    pub fn validate_layout(&self, data_end: u64) -> Result<()> {
        let mut ranges: Vec<(u64, u64)> = self.entries.iter().map(|e| (e.offset, e.length)).collect();
        ranges.sort_unstable();

        let mut expected = 0u64;
        for (offset, length) in ranges {
            if offset != expected {
                return Err(ArchiveError::format(format!(
                    "chunk data at offset {offset} does not follow the previous chunk ending at {expected}"
                )));
            }
            expected = offset
                .checked_add(length)
                .ok_or_else(|| ArchiveError::format("chunk length overflows"))?;
        }
        if expected != data_end {
            return Err(ArchiveError::format(format!(
                "chunks cover {expected} bytes but the index starts at {data_end}"
            )));
        }
        Ok(())
    }

    /// Reads the trailer from the end of a whole archive and returns the
    /// index together with the length of the chunk data region.
    pub fn locate(archive: &[u8]) -> Result<(Self, u64)> {
        if archive.len() < LENGTH_FIELD_LEN {
            return Err(ArchiveError::format(format!(
                "file is {} bytes, too short to hold a trailer",
                archive.len()
            )));
        }
        let length_pos = archive.len() - LENGTH_FIELD_LEN;
        let raw: [u8; 4] = archive[length_pos..]
            .try_into()
            .map_err(|_| ArchiveError::format("truncated trailer length"))?;
        let index_len = u32::from_le_bytes(raw) as usize;
        if index_len > length_pos {
            return Err(ArchiveError::format(format!(
                "trailer claims a {index_len}-byte index in a {}-byte file",
                archive.len()
            )));
        }

        let index_start = length_pos - index_len;
        let index = Self::decode(&archive[index_start..length_pos])?;
        index.validate_layout(index_start as u64)?;
        Ok((index, index_start as u64))
    }
}

fn read_u64(raw: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&raw[..8]);
    u64::from_le_bytes(buf)
}
