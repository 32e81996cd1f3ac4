//! In-memory directory from keys to the location of their latest record on the active page.

use crate::Key;
use crate::platform::{AlignedOps, Platform};
use crate::raw::{RECORD_HEADER_SIZE, RecordHeader, RecordKind, is_erased, record_size};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
#[cfg(feature = "defmt")]
use defmt::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Value { offset: u32, length: u16 },
    Tombstone,
}

/// Result of a linear pass over one page.
#[derive(Debug, Default)]
pub(crate) struct ScanOutcome {
    /// Offset right behind the last record, or the page size if the log can't be trusted
    /// beyond some point.
    pub(crate) cursor: usize,
    /// Records found, corrupt ones and leftovers in the free space included.
    pub(crate) records: u32,
    /// Offsets that failed validation.
    pub(crate) corrupt: Vec<usize>,
}

#[derive(Default)]
pub(crate) struct ItemIndex {
    entries: BTreeMap<Key, Slot>,
}

impl ItemIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lookup(&self, key: &Key) -> Option<Slot> {
        self.entries.get(key).copied()
    }

    /// Returns offset and length of the live value, tombstones count as absent.
    pub(crate) fn live(&self, key: &Key) -> Option<(u32, u16)> {
        match self.lookup(key) {
            Some(Slot::Value { offset, length }) => Some((offset, length)),
            _ => None,
        }
    }

    pub(crate) fn insert(&mut self, key: Key, slot: Slot) {
        self.entries.insert(key, slot);
    }

    pub(crate) fn remove(&mut self, key: &Key) {
        self.entries.remove(key);
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.entries
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Value { .. }))
            .map(|(key, _)| *key)
    }

    /// Live records ordered by their position in the log.
    pub(crate) fn live_by_offset(&self) -> Vec<(u32, Key, u16)> {
        let mut live: Vec<_> = self
            .entries
            .iter()
            .filter_map(|(key, slot)| match slot {
                Slot::Value { offset, length } => Some((*offset, *key, *length)),
                Slot::Tombstone => None,
            })
            .collect();
        live.sort_unstable();
        live
    }

    /// Walks the log of `page` from `start` and points every key at its latest valid record.
    /// A record with a damaged payload is skipped by its length. A damaged header can't be
    /// trusted for that, so the scan steps ahead in write size units until it finds the next
    /// intact header or the erased tail of the page. Programmed bytes behind the last record
    /// make the cursor jump to the end of the page so nothing gets appended on top of garbage.
    pub(crate) fn scan_rebuild<T: Platform>(&mut self, page: &[u8], start: usize) -> ScanOutcome {
        #[cfg(feature = "defmt")]
        trace!("scan_rebuild: {} bytes from {}", page.len(), start);

        let mut outcome = ScanOutcome::default();
        let tail = erased_tail::<T>(page);
        let mut offset = start;

        while offset + RECORD_HEADER_SIZE <= page.len() {
            let mut raw = [0u8; RECORD_HEADER_SIZE];
            raw.copy_from_slice(&page[offset..offset + RECORD_HEADER_SIZE]);
            if is_erased(&raw) {
                break;
            }

            outcome.records += 1;

            let header = RecordHeader::from_bytes(&raw);
            let size = record_size::<T>(header.length as usize);
            if !header.is_intact(T::crc32) || offset + size > page.len() {
                #[cfg(feature = "debug-logs")]
                println!("  index: damaged record header at {offset:#06x}");

                outcome.corrupt.push(offset);
                offset = resync::<T>(page, offset, tail);
                continue;
            }

            let payload_start = offset + RECORD_HEADER_SIZE;
            let payload = &page[payload_start..payload_start + header.length as usize];
            if !header.verify(T::crc32, payload) {
                #[cfg(feature = "debug-logs")]
                println!("  index: CRC mismatch for {header:?} at {offset:#06x}");

                outcome.corrupt.push(offset);
                offset += size;
                continue;
            }

            let slot = match header.kind() {
                Some(RecordKind::Tombstone) => Slot::Tombstone,
                _ => Slot::Value {
                    offset: offset as u32,
                    length: header.length,
                },
            };
            self.entries.insert(header.key(), slot);

            offset += size;
        }

        // an interrupted program can leave bytes behind an erased header
        if offset < tail {
            #[cfg(feature = "debug-logs")]
            println!("  index: free space at {offset:#06x} is not erased");

            outcome.records += 1;
            outcome.corrupt.push(offset);
            outcome.cursor = page.len();
            return outcome;
        }

        outcome.cursor = offset.min(page.len());
        outcome
    }
}

/// First write aligned offset from which the rest of `page` is erased.
fn erased_tail<T: Platform>(page: &[u8]) -> usize {
    page.iter()
        .rposition(|&b| b != 0xFF)
        .map_or(0, |last| T::align_write_ceil(last + 1))
        .min(page.len())
}

/// Next offset behind the damaged record at `offset` that holds an intact header, or the start
/// of the erased tail if there is none.
fn resync<T: Platform>(page: &[u8], offset: usize, tail: usize) -> usize {
    let mut candidate = offset + T::WRITE_SIZE;
    while candidate < tail && candidate + RECORD_HEADER_SIZE <= page.len() {
        let mut raw = [0u8; RECORD_HEADER_SIZE];
        raw.copy_from_slice(&page[candidate..candidate + RECORD_HEADER_SIZE]);
        let header = RecordHeader::from_bytes(&raw);
        if !is_erased(&raw)
            && header.is_intact(T::crc32)
            && candidate + record_size::<T>(header.length as usize) <= page.len()
        {
            return candidate;
        }
        candidate += T::WRITE_SIZE;
    }
    candidate.max(tail)
}
