//! Fixed-size on-disk records and the in-memory archive model, laid out
//! bit-exactly per the format: little-endian, packed, no implicit padding.

use crate::buffer::OnDiskStruct;
use crate::error::ArchiveError;

pub const MAGIC: [u8; 4] = *b"box!";
pub const FORMAT_VERSION: u32 = 1;

/// Archive-level flag: a CRC32 over the whole file (checksum field zeroed)
/// is stored and checked on read.
pub const FLAG_INTEGRITY_CHECKSUM_ENABLED: u64 = 1 << 0;

/// Stream-level flag: entry `i`'s compressed bytes form an independent
/// prefix, so random access can seek directly to it.
pub const STREAM_FLAG_SEEKABLE: u64 = 1 << 0;
/// Stream-level flag: `checksum` holds a meaningful CRC32 of the stream.
pub const STREAM_FLAG_HAS_CHECKSUM: u64 = 1 << 1;

/// Sentinel for an entry not yet assigned to a stream. A `stream` field
/// holding this value at read time is a hard error, never tolerated.
pub const INVALID_INDEX: i32 = -1;

fn le_bytes<const N: usize>(buf: &[u8], offset: usize) -> [u8; N] {
    buf[offset..offset + N].try_into().expect("slice length")
}

/// CRC32 + MD5 + SHA1 over an entry's bytes, plus the byte count they were
/// computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DigestInfo {
    pub size: u64,
    pub crc32: u32,
    pub md5: [u8; 16],
    pub sha1: [u8; 20],
}

impl OnDiskStruct for DigestInfo {
    const BYTE_LEN: usize = 8 + 4 + 16 + 20;

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::BYTE_LEN);
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out.extend_from_slice(&self.md5);
        out.extend_from_slice(&self.sha1);
        out
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            size: u64::from_le_bytes(le_bytes(bytes, 0)),
            crc32: u32::from_le_bytes(le_bytes(bytes, 8)),
            md5: le_bytes(bytes, 12),
            sha1: le_bytes(bytes, 28),
        }
    }
}

/// Section type tags. `SECTION_TABLE`/`HEADER` are fixed at the start of
/// the file; every other section is present only if non-empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Section {
    Header = 1,
    SectionTable = 2,
    EntryTable = 3,
    CommentsTable = 4,
    EntryPayload = 5,
    StreamTable = 6,
    StreamPayload = 7,
    StreamData = 8,
    FileNameTable = 9,
    GroupTable = 10,
}

impl Section {
    /// Rejects unrecognized values rather than skipping them; the caller
    /// supplies the surrounding section header's fields so the resulting
    /// error can describe exactly which section could not be interpreted.
    pub fn from_u32(
        value: u32,
        offset: u64,
        size: u64,
        file_len: u64,
    ) -> Result<Self, ArchiveError> {
        match value {
            1 => Ok(Section::Header),
            2 => Ok(Section::SectionTable),
            3 => Ok(Section::EntryTable),
            4 => Ok(Section::CommentsTable),
            5 => Ok(Section::EntryPayload),
            6 => Ok(Section::StreamTable),
            7 => Ok(Section::StreamPayload),
            8 => Ok(Section::StreamData),
            9 => Ok(Section::FileNameTable),
            10 => Ok(Section::GroupTable),
            other => Err(ArchiveError::TruncatedSection {
                section: other,
                offset,
                size,
                file_len,
            }),
        }
    }

    pub fn to_u32(self) -> u32 {
        self as u32
    }
}

/// `{offset, size, type, count}` — one entry of the section table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    pub offset: u64,
    pub size: u64,
    pub section_type: u32,
    pub count: u32,
}

impl OnDiskStruct for SectionHeader {
    const BYTE_LEN: usize = 8 + 8 + 4 + 4;

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::BYTE_LEN);
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.section_type.to_le_bytes());
        out.extend_from_slice(&self.count.to_le_bytes());
        out
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            offset: u64::from_le_bytes(le_bytes(bytes, 0)),
            size: u64::from_le_bytes(le_bytes(bytes, 8)),
            section_type: u32::from_le_bytes(le_bytes(bytes, 16)),
            count: u32::from_le_bytes(le_bytes(bytes, 20)),
        }
    }
}

/// The fixed-offset-0 file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 4],
    pub version: u32,
    pub flags: u64,
    pub section_index: SectionHeader,
    pub file_length: u64,
    pub file_checksum: u32,
}

impl OnDiskStruct for Header {
    const BYTE_LEN: usize = 4 + 4 + 8 + SectionHeader::BYTE_LEN + 8 + 4;

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::BYTE_LEN);
        out.extend_from_slice(&self.magic);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.section_index.to_bytes());
        out.extend_from_slice(&self.file_length.to_le_bytes());
        out.extend_from_slice(&self.file_checksum.to_le_bytes());
        out
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let section_index_start = 16;
        Self {
            magic: le_bytes(bytes, 0),
            version: u32::from_le_bytes(le_bytes(bytes, 4)),
            flags: u64::from_le_bytes(le_bytes(bytes, 8)),
            section_index: SectionHeader::from_bytes(
                &bytes[section_index_start..section_index_start + SectionHeader::BYTE_LEN],
            ),
            file_length: u64::from_le_bytes(le_bytes(
                bytes,
                section_index_start + SectionHeader::BYTE_LEN,
            )),
            file_checksum: u32::from_le_bytes(le_bytes(
                bytes,
                section_index_start + SectionHeader::BYTE_LEN + 8,
            )),
        }
    }
}

/// One fixed-size entry-table record. Variable-length parts (name,
/// optional filter-chain payload) live in their own sections and are
/// joined back in by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryRecord {
    pub filtered_size: u64,
    pub digest: DigestInfo,
    pub stream: i32,
    pub index_in_stream: i32,
    pub payload_offset: u64,
    pub payload_length: u32,
    pub entry_name_offset: u64,
}

impl OnDiskStruct for EntryRecord {
    const BYTE_LEN: usize = 8 + DigestInfo::BYTE_LEN + 4 + 4 + 8 + 4 + 8;

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::BYTE_LEN);
        out.extend_from_slice(&self.filtered_size.to_le_bytes());
        out.extend_from_slice(&self.digest.to_bytes());
        out.extend_from_slice(&self.stream.to_le_bytes());
        out.extend_from_slice(&self.index_in_stream.to_le_bytes());
        out.extend_from_slice(&self.payload_offset.to_le_bytes());
        out.extend_from_slice(&self.payload_length.to_le_bytes());
        out.extend_from_slice(&self.entry_name_offset.to_le_bytes());
        out
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let digest_start = 8;
        let after_digest = digest_start + DigestInfo::BYTE_LEN;
        Self {
            filtered_size: u64::from_le_bytes(le_bytes(bytes, 0)),
            digest: DigestInfo::from_bytes(&bytes[digest_start..after_digest]),
            stream: i32::from_le_bytes(le_bytes(bytes, after_digest)),
            index_in_stream: i32::from_le_bytes(le_bytes(bytes, after_digest + 4)),
            payload_offset: u64::from_le_bytes(le_bytes(bytes, after_digest + 8)),
            payload_length: u32::from_le_bytes(le_bytes(bytes, after_digest + 16)),
            entry_name_offset: u64::from_le_bytes(le_bytes(bytes, after_digest + 20)),
        }
    }
}

/// One fixed-size stream-table record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRecord {
    pub flags: u64,
    pub offset: u64,
    pub length: u64,
    pub checksum: u32,
    pub payload_offset: u64,
    pub payload_length: u32,
}

impl OnDiskStruct for StreamRecord {
    const BYTE_LEN: usize = 8 + 8 + 8 + 4 + 8 + 4;

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::BYTE_LEN);
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.length.to_le_bytes());
        out.extend_from_slice(&self.checksum.to_le_bytes());
        out.extend_from_slice(&self.payload_offset.to_le_bytes());
        out.extend_from_slice(&self.payload_length.to_le_bytes());
        out
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            flags: u64::from_le_bytes(le_bytes(bytes, 0)),
            offset: u64::from_le_bytes(le_bytes(bytes, 8)),
            length: u64::from_le_bytes(le_bytes(bytes, 16)),
            checksum: u32::from_le_bytes(le_bytes(bytes, 24)),
            payload_offset: u64::from_le_bytes(le_bytes(bytes, 28)),
            payload_length: u32::from_le_bytes(le_bytes(bytes, 36)),
        }
    }
}

/// `{identifier, record_length_incl_header, has_next}` — the fixed part of
/// one filter-chain record; `parameter_bytes` (`record_length - BYTE_LEN`)
/// follows immediately and is read/written separately since its length is
/// data-dependent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterRecordHeader {
    pub identifier: u32,
    pub record_length: u64,
    pub has_next: u32,
}

impl OnDiskStruct for FilterRecordHeader {
    const BYTE_LEN: usize = 4 + 8 + 4;

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::BYTE_LEN);
        out.extend_from_slice(&self.identifier.to_le_bytes());
        out.extend_from_slice(&self.record_length.to_le_bytes());
        out.extend_from_slice(&self.has_next.to_le_bytes());
        out
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            identifier: u32::from_le_bytes(le_bytes(bytes, 0)),
            record_length: u64::from_le_bytes(le_bytes(bytes, 4)),
            has_next: u32::from_le_bytes(le_bytes(bytes, 12)),
        }
    }
}

/// In-memory entry: the fixed record plus its name and optional
/// filter-chain payload bytes.
#[derive(Debug, Clone, Default)]
pub struct Entry {
    pub name: String,
    pub original_size: u64,
    pub filtered_size: u64,
    pub compressed_size: u64,
    pub digest: DigestInfo,
    pub stream: Option<usize>,
    pub index_in_stream: Option<usize>,
    pub filter_payload: Option<Vec<u8>>,
}

/// In-memory stream: the ordered entry list plus the fixed record fields.
#[derive(Debug, Clone, Default)]
pub struct Stream {
    pub entries: Vec<usize>,
    pub seekable: bool,
    pub has_checksum: bool,
    pub offset: u64,
    pub length: u64,
    pub checksum: u32,
    pub filter_payload: Option<Vec<u8>>,
}

/// In-memory group: a named, order-preserving set of entry indices.
#[derive(Debug, Clone, Default)]
pub struct Group {
    pub name: String,
    pub indices: Vec<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_info_roundtrips_through_bytes() {
        let d = DigestInfo {
            size: 44,
            crc32: 0x414f_a339,
            md5: [0xAB; 16],
            sha1: [0xCD; 20],
        };
        let bytes = d.to_bytes();
        assert_eq!(bytes.len(), DigestInfo::BYTE_LEN);
        assert_eq!(DigestInfo::from_bytes(&bytes), d);
    }

    #[test]
    fn section_from_u32_rejects_unknown_values() {
        assert!(matches!(Section::from_u32(3, 0, 10, 100), Ok(Section::EntryTable)));
        let err = Section::from_u32(99, 40, 8, 1000).unwrap_err();
        match err {
            ArchiveError::TruncatedSection { section, .. } => assert_eq!(section, 99),
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn header_roundtrips_through_bytes() {
        let h = Header {
            magic: MAGIC,
            version: FORMAT_VERSION,
            flags: FLAG_INTEGRITY_CHECKSUM_ENABLED,
            section_index: SectionHeader {
                offset: 52,
                size: 240,
                section_type: Section::SectionTable.to_u32(),
                count: 10,
            },
            file_length: 4096,
            file_checksum: 0xdead_beef,
        };
        let bytes = h.to_bytes();
        assert_eq!(bytes.len(), Header::BYTE_LEN);
        assert_eq!(Header::from_bytes(&bytes), h);
    }

    #[test]
    fn entry_record_roundtrips_through_bytes() {
        let e = EntryRecord {
            filtered_size: 128,
            digest: DigestInfo::default(),
            stream: INVALID_INDEX,
            index_in_stream: INVALID_INDEX,
            payload_offset: 0,
            payload_length: 0,
            entry_name_offset: 64,
        };
        let bytes = e.to_bytes();
        assert_eq!(bytes.len(), EntryRecord::BYTE_LEN);
        assert_eq!(EntryRecord::from_bytes(&bytes), e);
    }

    #[test]
    fn stream_record_roundtrips_through_bytes() {
        let s = StreamRecord {
            flags: STREAM_FLAG_SEEKABLE | STREAM_FLAG_HAS_CHECKSUM,
            offset: 1024,
            length: 2048,
            checksum: 0x1234_5678,
            payload_offset: 0,
            payload_length: 0,
        };
        let bytes = s.to_bytes();
        assert_eq!(bytes.len(), StreamRecord::BYTE_LEN);
        assert_eq!(StreamRecord::from_bytes(&bytes), s);
    }
}
