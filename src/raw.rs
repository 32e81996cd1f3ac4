//! On-flash layout of page headers and records plus the checksum codec for both.
//!
//! All integers are stored little endian.
//!
//! ```text
//! page:   | state u32 | magic u32 | sequence u32 | crc u32 | record | record | ... | 0xFF.. |
//! record: | ns u8 | kind u8 | id u16 | sub_id u16 | length u16 | crc u32 | header_crc u32 | payload | pad |
//! ```
//!
//! Records are padded to the write size of the flash. The page crc covers magic and sequence,
//! the record crc covers the first eight header bytes followed by the payload. The header crc
//! covers the first twelve header bytes, so a damaged length is detected before it is used to
//! find the next record.

use crate::Key;
use crate::platform::{AlignedOps, FnCrc32, Platform};
use alloc::vec::Vec;
use core::fmt::{Debug, Formatter};

pub(crate) const PAGE_MAGIC: u32 = 0x5032_564E;
pub(crate) const PAGE_HEADER_SIZE: usize = 16;
pub(crate) const RECORD_HEADER_SIZE: usize = 16;

const PSB_INIT: u32 = 0x1;
const PSB_ACTIVE: u32 = 0x2;
const PSB_CORRUPT: u32 = 0x4;

/// Page states only ever clear bits, so a page advances through them without an erase.
#[derive(strum::Display, Debug, PartialEq, Copy, Clone)]
#[repr(u32)]
pub(crate) enum PageState {
    // All bits set, default state after flash erase.
    Uninitialized = u32::MAX,

    // Page is the target of a running compaction and must not be read by anyone else.
    Compacting = PageState::Uninitialized as u32 & !PSB_INIT,

    // Page holds the live log and accepts appends.
    Active = PageState::Compacting as u32 & !PSB_ACTIVE,

    // Never written, any unknown state word decodes to this.
    Corrupt = PageState::Active as u32 & !PSB_CORRUPT,
}

const PAGE_STATE_UNINITIALIZED: u32 = PageState::Uninitialized as u32;
const PAGE_STATE_COMPACTING: u32 = PageState::Compacting as u32;
const PAGE_STATE_ACTIVE: u32 = PageState::Active as u32;

impl From<u32> for PageState {
    fn from(val: u32) -> Self {
        match val {
            PAGE_STATE_UNINITIALIZED => PageState::Uninitialized,
            PAGE_STATE_COMPACTING => PageState::Compacting,
            PAGE_STATE_ACTIVE => PageState::Active,
            _ => PageState::Corrupt,
        }
    }
}

#[derive(Copy, Clone, PartialEq)]
pub(crate) struct PageHeader {
    pub(crate) state: u32,
    pub(crate) magic: u32,
    pub(crate) sequence: u32,
    pub(crate) crc: u32,
}

impl PageHeader {
    pub(crate) fn new(state: PageState, sequence: u32, crc32: FnCrc32) -> Self {
        let mut header = Self {
            state: state as u32,
            magic: PAGE_MAGIC,
            sequence,
            crc: 0,
        };
        header.crc = header.calculate_crc32(crc32);
        header
    }

    /// The state word is excluded so it can be advanced in place.
    pub(crate) fn calculate_crc32(&self, crc32: FnCrc32) -> u32 {
        let buf = self.to_bytes();
        crc32(u32::MAX, &buf[4..12])
    }

    pub(crate) fn is_valid(&self, crc32: FnCrc32) -> bool {
        self.magic == PAGE_MAGIC && self.crc == self.calculate_crc32(crc32)
    }

    pub(crate) fn to_bytes(self) -> [u8; PAGE_HEADER_SIZE] {
        let mut buf = [0u8; PAGE_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.state.to_le_bytes());
        buf[4..8].copy_from_slice(&self.magic.to_le_bytes());
        buf[8..12].copy_from_slice(&self.sequence.to_le_bytes());
        buf[12..16].copy_from_slice(&self.crc.to_le_bytes());
        buf
    }

    pub(crate) fn from_bytes(buf: &[u8; PAGE_HEADER_SIZE]) -> Self {
        Self {
            state: read_u32(buf, 0),
            magic: read_u32(buf, 4),
            sequence: read_u32(buf, 8),
            crc: read_u32(buf, 12),
        }
    }
}

impl Debug for PageHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let state = PageState::from(self.state);
        let sequence = self.sequence;
        let crc = self.crc;
        match state {
            PageState::Active | PageState::Compacting => f.write_fmt(format_args!(
                "PageHeader {{ state: {state:>13}, sequence: {sequence:>4}, crc: 0x{crc:0>8x}}}"
            )),
            _ => f.write_fmt(format_args!("PageHeader {{ state: {state:>13} }}")),
        }
    }
}

#[derive(strum::FromRepr, strum::Display, Debug, Eq, PartialEq, Copy, Clone)]
#[repr(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum RecordKind {
    Value = 0x01,
    Tombstone = 0x02,
}

#[derive(Copy, Clone, PartialEq)]
pub(crate) struct RecordHeader {
    pub(crate) namespace: u8,
    pub(crate) kind: u8,
    pub(crate) id: u16,
    pub(crate) sub_id: u16,
    pub(crate) length: u16,
    pub(crate) crc: u32,
    pub(crate) header_crc: u32,
}

impl RecordHeader {
    pub(crate) fn new(key: &Key, kind: RecordKind, payload: &[u8], crc32: FnCrc32) -> Self {
        let mut header = Self {
            namespace: key.namespace,
            kind: kind as u8,
            id: key.id,
            sub_id: key.sub_id,
            length: payload.len() as u16,
            crc: 0,
            header_crc: 0,
        };
        header.crc = header.calculate_crc32(crc32, payload);
        header.header_crc = header.calculate_header_crc32(crc32);
        header
    }

    pub(crate) fn key(&self) -> Key {
        Key::new(self.namespace, self.id, self.sub_id)
    }

    pub(crate) fn kind(&self) -> Option<RecordKind> {
        RecordKind::from_repr(self.kind)
    }

    pub(crate) fn calculate_crc32(&self, crc32: FnCrc32, payload: &[u8]) -> u32 {
        let buf = self.to_bytes();
        let result = crc32(u32::MAX, &buf[0..8]);
        crc32(result, payload)
    }

    pub(crate) fn calculate_header_crc32(&self, crc32: FnCrc32) -> u32 {
        let buf = self.to_bytes();
        crc32(u32::MAX, &buf[0..12])
    }

    /// Key, kind and length can be trusted, even if the payload turns out to be damaged.
    pub(crate) fn is_intact(&self, crc32: FnCrc32) -> bool {
        self.header_crc == self.calculate_header_crc32(crc32)
    }

    /// A record is only trusted if both checksums match and the kind is known. Tombstones
    /// never carry a payload.
    pub(crate) fn verify(&self, crc32: FnCrc32, payload: &[u8]) -> bool {
        if !self.is_intact(crc32) {
            return false;
        }

        let kind_ok = match self.kind() {
            Some(RecordKind::Value) => true,
            Some(RecordKind::Tombstone) => self.length == 0,
            None => false,
        };
        kind_ok
            && payload.len() == self.length as usize
            && self.crc == self.calculate_crc32(crc32, payload)
    }

    pub(crate) fn to_bytes(self) -> [u8; RECORD_HEADER_SIZE] {
        let mut buf = [0u8; RECORD_HEADER_SIZE];
        buf[0] = self.namespace;
        buf[1] = self.kind;
        buf[2..4].copy_from_slice(&self.id.to_le_bytes());
        buf[4..6].copy_from_slice(&self.sub_id.to_le_bytes());
        buf[6..8].copy_from_slice(&self.length.to_le_bytes());
        buf[8..12].copy_from_slice(&self.crc.to_le_bytes());
        buf[12..16].copy_from_slice(&self.header_crc.to_le_bytes());
        buf
    }

    pub(crate) fn from_bytes(buf: &[u8; RECORD_HEADER_SIZE]) -> Self {
        Self {
            namespace: buf[0],
            kind: buf[1],
            id: u16::from_le_bytes([buf[2], buf[3]]),
            sub_id: u16::from_le_bytes([buf[4], buf[5]]),
            length: u16::from_le_bytes([buf[6], buf[7]]),
            crc: read_u32(buf, 8),
            header_crc: read_u32(buf, 12),
        }
    }

    /// Header and payload as they are programmed in a single pass.
    pub(crate) fn encode(&self, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
        buf.extend_from_slice(&self.to_bytes());
        buf.extend_from_slice(payload);
        buf
    }
}

impl Debug for RecordHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let key = self.key();
        let kind = self.kind;
        let length = self.length;
        let crc = self.crc;
        f.write_fmt(format_args!(
            "Record {{ key: {key:?}, kind: 0x{kind:0>2x}, length: {length:>5}, crc: {crc:0>8x} }}"
        ))
    }
}

/// Bytes a record with `length` bytes of payload occupies on the flash.
pub(crate) fn record_size<T: Platform>(length: usize) -> usize {
    T::align_write_ceil(RECORD_HEADER_SIZE + length)
}

/// Offset of the first record in a page.
pub(crate) fn first_record_offset<T: Platform>() -> usize {
    T::align_write_ceil(PAGE_HEADER_SIZE)
}

pub(crate) fn is_erased(buf: &[u8]) -> bool {
    buf.iter().all(|&it| it == 0xFF)
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}
