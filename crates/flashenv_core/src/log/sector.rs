//! Sector headers and in-memory sector bookkeeping.

use flashenv_fal::{align_up, ERASED_BYTE};

/// Magic bytes identifying a formatted environment sector.
pub const SECTOR_MAGIC: [u8; 4] = *b"FENV";

/// On-flash format version written into every sector header.
pub const FORMAT_VERSION: u16 = 1;

/// Size of the sector meta block before padding.
/// magic (4) + format version (2) + reserved (2) = 8
const SECTOR_META_SIZE: usize = 8;

/// Persistent sector state, stored in byte 0 of the header.
///
/// Each state only clears bits of the previous one:
/// `Erased 0xFF -> Receiving 0xFE -> Active 0xFC -> Retired 0xF8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SectorState {
    /// Never formatted since the last erase.
    Erased = 0xFF,
    /// Target of an unfinished compaction.
    Receiving = 0xFE,
    /// The authoritative sector.
    Active = 0xFC,
    /// Source of a committed compaction, waiting for erase.
    Retired = 0xF8,
}

impl SectorState {
    /// Parses a state byte.
    #[must_use]
    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            0xFF => Some(Self::Erased),
            0xFE => Some(Self::Receiving),
            0xFC => Some(Self::Active),
            0xF8 => Some(Self::Retired),
            _ => None,
        }
    }

    /// Returns the raw state byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Sector header codec for a given write granularity.
///
/// ```text
/// | state slot (W) | magic "FENV" (4) | format version u16 LE | 0xFFFF | 0xFF fill to W |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorHeader {
    write_size: usize,
}

impl SectorHeader {
    /// Creates a header codec.
    #[must_use]
    pub fn new(write_size: u32) -> Self {
        Self {
            write_size: write_size.max(1) as usize,
        }
    }

    /// Total header length; records start at this offset.
    #[must_use]
    pub fn size(&self) -> usize {
        self.write_size + align_up(SECTOR_META_SIZE, self.write_size)
    }

    /// Encodes a full header carrying `state`.
    #[must_use]
    pub fn encode(&self, state: SectorState) -> Vec<u8> {
        let mut buf = self.state_slot(state);
        buf.extend_from_slice(&SECTOR_MAGIC);
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&[ERASED_BYTE; 2]);
        buf.resize(self.size(), ERASED_BYTE);
        buf
    }

    /// Encodes only the state slot, for in-place state transitions.
    #[must_use]
    pub fn state_slot(&self, state: SectorState) -> Vec<u8> {
        let mut slot = vec![ERASED_BYTE; self.write_size];
        slot[0] = state.as_byte();
        slot
    }

    /// Decodes a header.
    ///
    /// Returns `None` for anything that is not a formatted sector of this
    /// format version: blank flash, foreign data or a torn header.
    #[must_use]
    pub fn decode(&self, data: &[u8]) -> Option<SectorState> {
        if data.len() < self.size() {
            return None;
        }
        let meta = &data[self.write_size..self.write_size + SECTOR_META_SIZE];
        if meta[0..4] != SECTOR_MAGIC {
            return None;
        }
        if u16::from_le_bytes([meta[4], meta[5]]) != FORMAT_VERSION {
            return None;
        }
        match SectorState::from_byte(data[0])? {
            SectorState::Erased => None,
            state => Some(state),
        }
    }
}

/// Runtime role of a sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorTag {
    /// Receives appends.
    Active,
    /// Active, but its tail is unreadable; the next append must compact.
    FullPendingGc,
    /// Standby and fully erased.
    Empty,
    /// Standby holding leftovers; erased before it is next used.
    Stale,
}

/// In-memory view of one log sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sector {
    /// Offset of the sector within the partition.
    pub offset: u32,
    /// Size of the sector in bytes.
    pub size: u32,
    /// Next free byte, relative to the sector start.
    pub cursor: u32,
    /// Runtime role.
    pub tag: SectorTag,
}

impl Sector {
    /// Creates a sector descriptor with the cursor at the start.
    #[must_use]
    pub const fn new(offset: u32, size: u32, tag: SectorTag) -> Self {
        Self {
            offset,
            size,
            cursor: 0,
            tag,
        }
    }

    /// Bytes left between the cursor and the sector end.
    #[must_use]
    pub const fn free(&self) -> u32 {
        self.size.saturating_sub(self.cursor)
    }

    /// Whether this sector currently receives appends.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.tag, SectorTag::Active | SectorTag::FullPendingGc)
    }

    /// Partition offset of the cursor.
    #[must_use]
    pub const fn cursor_addr(&self) -> u32 {
        self.offset + self.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_len_is_write_aligned() {
        assert_eq!(SectorHeader::new(64).size(), 128);
        assert_eq!(SectorHeader::new(8).size(), 16);
        assert_eq!(SectorHeader::new(1).size(), 9);
    }

    #[test]
    fn header_roundtrip_for_each_state() {
        let header = SectorHeader::new(64);
        for state in [
            SectorState::Receiving,
            SectorState::Active,
            SectorState::Retired,
        ] {
            let bytes = header.encode(state);
            assert_eq!(bytes.len(), header.size());
            assert_eq!(header.decode(&bytes), Some(state));
        }
    }

    #[test]
    fn state_transitions_narrow() {
        let header = SectorHeader::new(8);
        let mut bytes = header.encode(SectorState::Receiving);
        for state in [SectorState::Active, SectorState::Retired] {
            let slot = header.state_slot(state);
            for (b, s) in bytes.iter_mut().zip(&slot) {
                *b &= s;
            }
            assert_eq!(header.decode(&bytes), Some(state));
        }
    }

    #[test]
    fn blank_sector_has_no_header() {
        let header = SectorHeader::new(64);
        assert_eq!(header.decode(&[ERASED_BYTE; 128]), None);
    }

    #[test]
    fn foreign_data_has_no_header() {
        let header = SectorHeader::new(8);
        let mut bytes = header.encode(SectorState::Active);
        bytes[8] = b'X';
        assert_eq!(header.decode(&bytes), None);

        let mut bytes = header.encode(SectorState::Active);
        bytes[0] = 0x12;
        assert_eq!(header.decode(&bytes), None);
    }

    #[test]
    fn erased_state_with_magic_is_not_formatted() {
        let header = SectorHeader::new(8);
        let bytes = header.encode(SectorState::Erased);
        assert_eq!(header.decode(&bytes), None);
    }

    #[test]
    fn sector_free_space() {
        let mut sector = Sector::new(4096, 4096, SectorTag::Active);
        sector.cursor = 128;
        assert_eq!(sector.free(), 3968);
        assert_eq!(sector.cursor_addr(), 4224);
        assert!(sector.is_active());
        sector.tag = SectorTag::Stale;
        assert!(!sector.is_active());
    }
}
