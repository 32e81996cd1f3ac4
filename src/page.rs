//! Role and free-space bookkeeping of the two pages.

use crate::error::Error;
use crate::guard::VoltageGuard;
use crate::platform::{AlignedOps, Platform};
use crate::raw::{
    PageHeader, PageState, RECORD_HEADER_SIZE, RecordHeader, first_record_offset, record_size,
};
use alloc::vec;
use alloc::vec::Vec;
#[cfg(feature = "debug-logs")]
use core::fmt::{Debug, Formatter};
#[cfg(feature = "defmt")]
use defmt::trace;

#[derive(strum::Display, Debug, PartialEq, Clone, Copy)]
pub(crate) enum ThinPageState {
    Uninitialized,
    Compacting,
    Active,
    Corrupt,
}

impl From<PageState> for ThinPageState {
    fn from(val: PageState) -> Self {
        match val {
            PageState::Uninitialized => ThinPageState::Uninitialized,
            PageState::Compacting => ThinPageState::Compacting,
            PageState::Active => ThinPageState::Active,
            PageState::Corrupt => ThinPageState::Corrupt,
        }
    }
}

#[derive(Clone, Copy)]
pub(crate) struct ThinPageHeader {
    pub(crate) state: ThinPageState,
    pub(crate) sequence: u32,
}

impl ThinPageHeader {
    fn uninitialized() -> Self {
        Self {
            state: ThinPageState::Uninitialized,
            sequence: 0,
        }
    }
}

/// What we keep in memory about a page: its header and the free-space cursor.
pub(crate) struct ThinPage {
    pub(crate) address: usize,
    pub(crate) header: ThinPageHeader,
    pub(crate) cursor: usize,
    pub(crate) record_count: u32,
}

impl ThinPage {
    pub(crate) fn uninitialized(address: usize) -> Self {
        Self {
            address,
            header: ThinPageHeader::uninitialized(),
            cursor: 0,
            record_count: 0,
        }
    }

    pub(crate) fn is_blank(&self) -> bool {
        self.header.state == ThinPageState::Uninitialized
    }

    /// Writes a fresh header. The page has to be erased.
    pub(crate) fn initialize<T: Platform>(
        &mut self,
        hal: &mut T,
        guard: &VoltageGuard,
        state: PageState,
        sequence: u32,
    ) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("initialize: @{:#x} sequence {}", self.address, sequence);

        #[cfg(feature = "debug-logs")]
        println!("  page: initialize {:#08x} as {state} ({sequence})", self.address);

        guard.check()?;

        let header = PageHeader::new(state, sequence, T::crc32);
        if hal.write_aligned(self.address, &header.to_bytes()).is_err() {
            self.header.state = ThinPageState::Corrupt;
            return Err(Error::FlashError);
        }

        self.header = ThinPageHeader {
            state: state.into(),
            sequence,
        };
        self.cursor = first_record_offset::<T>();
        self.record_count = 0;

        Ok(())
    }

    /// Advances the state word of a compaction target to active.
    pub(crate) fn mark_as_active<T: Platform>(
        &mut self,
        hal: &mut T,
        guard: &VoltageGuard,
    ) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("mark_as_active: @{:#x}", self.address);

        guard.check()?;

        let raw = (PageState::Active as u32).to_le_bytes();
        hal.write_aligned(self.address, &raw)
            .map_err(|_| Error::FlashError)?;

        self.header.state = ThinPageState::Active;

        Ok(())
    }

    pub(crate) fn erase<T: Platform>(
        &mut self,
        hal: &mut T,
        guard: &VoltageGuard,
        page_size: usize,
    ) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("erase: @{:#x}", self.address);

        #[cfg(feature = "debug-logs")]
        println!("  page: erase {:#08x}", self.address);

        guard.check()?;

        if hal
            .erase(self.address as u32, (self.address + page_size) as u32)
            .is_err()
        {
            self.header.state = ThinPageState::Corrupt;
            return Err(Error::FlashError);
        }

        *self = Self::uninitialized(self.address);

        Ok(())
    }

    /// Appends a record at the free-space cursor and returns its offset inside the page. The
    /// caller is expected to have allocated the space.
    pub(crate) fn write_record<T: Platform>(
        &mut self,
        hal: &mut T,
        guard: &VoltageGuard,
        header: &RecordHeader,
        payload: &[u8],
        page_size: usize,
    ) -> Result<u32, Error> {
        let size = record_size::<T>(payload.len());
        let offset = self.cursor;
        if offset + size > page_size {
            return Err(Error::PageFull);
        }

        #[cfg(feature = "defmt")]
        trace!("write_record: @{:#x}[{:#x}] {}", self.address, offset, size);

        #[cfg(feature = "debug-logs")]
        println!("  page: write {header:?} at {:#08x}", self.address + offset);

        guard.check()?;

        if hal
            .write_aligned(self.address + offset, &header.encode(payload))
            .is_err()
        {
            // whatever made it to the flash is garbage now, never append behind it
            self.cursor = page_size;
            return Err(Error::FlashError);
        }

        self.mark_written(size);

        Ok(offset as u32)
    }

    pub(crate) fn mark_written(&mut self, size: usize) {
        self.cursor += size;
        self.record_count += 1;
    }

    /// Loads header and payload of the record at `offset`. `length` is the payload length the
    /// caller expects, the result still has to be verified.
    pub(crate) fn load_record<T: Platform>(
        &self,
        hal: &mut T,
        offset: u32,
        length: u16,
    ) -> Result<(RecordHeader, Vec<u8>), Error> {
        #[cfg(feature = "defmt")]
        trace!("load_record: @{:#x}[{:#x}]", self.address, offset);

        let mut buf = vec![0u8; RECORD_HEADER_SIZE + length as usize];
        hal.read_aligned(self.address + offset as usize, &mut buf)
            .map_err(|_| Error::FlashError)?;

        let payload = buf.split_off(RECORD_HEADER_SIZE);
        let mut raw = [0u8; RECORD_HEADER_SIZE];
        raw.copy_from_slice(&buf);

        Ok((RecordHeader::from_bytes(&raw), payload))
    }

    /// Reads the whole page at once.
    pub(crate) fn load<T: Platform>(&self, hal: &mut T, page_size: usize) -> Result<Vec<u8>, Error> {
        #[cfg(feature = "defmt")]
        trace!("load: @{:#x}", self.address);

        let mut buf = vec![0u8; page_size];
        hal.read_aligned(self.address, &mut buf)
            .map_err(|_| Error::FlashError)?;
        Ok(buf)
    }
}

#[cfg(feature = "debug-logs")]
impl Debug for ThinPage {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let address = self.address;
        let state = self.header.state;
        let sequence = self.header.sequence;
        let cursor = self.cursor;
        let record_count = self.record_count;
        f.write_fmt(format_args!(
            "Page {{ address: 0x{address:0>8x}, state: {state:>13}, sequence: {sequence:>4}, cursor: {cursor:#06x}, records: {record_count} }}"
        ))
    }
}

/// Owns both pages and decides which one is active. Only the active page is ever appended to
/// or read from by lookups, the other one is either erased, pending an erase or the target of
/// a running compaction.
pub(crate) struct Pages {
    pages: [ThinPage; 2],
    active: usize,
    page_size: usize,
}

impl Pages {
    pub(crate) fn new(base_address: usize, page_size: usize) -> Self {
        Self {
            pages: [
                ThinPage::uninitialized(base_address),
                ThinPage::uninitialized(base_address + page_size),
            ],
            active: 0,
            page_size,
        }
    }

    pub(crate) fn page_size(&self) -> usize {
        self.page_size
    }

    pub(crate) fn active_index(&self) -> usize {
        self.active
    }

    pub(crate) fn secondary_index(&self) -> usize {
        1 - self.active
    }

    pub(crate) fn active(&self) -> &ThinPage {
        &self.pages[self.active]
    }

    pub(crate) fn active_mut(&mut self) -> &mut ThinPage {
        &mut self.pages[self.active]
    }

    pub(crate) fn page(&self, index: usize) -> &ThinPage {
        &self.pages[index]
    }

    pub(crate) fn page_mut(&mut self, index: usize) -> &mut ThinPage {
        &mut self.pages[index]
    }

    pub(crate) fn set_active(&mut self, index: usize) {
        self.active = index;
    }

    pub(crate) fn swap_roles(&mut self) {
        self.active = self.secondary_index();
    }

    /// Bytes available for records on an empty page.
    pub(crate) fn capacity<T: Platform>(&self) -> usize {
        self.page_size - first_record_offset::<T>()
    }

    pub(crate) fn free_bytes<T: Platform>(&self) -> usize {
        let page = self.active();
        match page.header.state {
            ThinPageState::Active | ThinPageState::Compacting => {
                self.page_size.saturating_sub(page.cursor)
            }
            _ => self.capacity::<T>(),
        }
    }

    /// Bump allocation on the active page. Holes left by superseded records are only
    /// reclaimed by compaction.
    pub(crate) fn allocate<T: Platform>(&self, length: usize) -> Result<usize, Error> {
        let size = record_size::<T>(length);
        if size <= self.free_bytes::<T>() {
            Ok(size)
        } else {
            Err(Error::PageFull)
        }
    }

    pub(crate) fn erase<T: Platform>(
        &mut self,
        hal: &mut T,
        guard: &VoltageGuard,
        index: usize,
    ) -> Result<(), Error> {
        let page_size = self.page_size;
        self.pages[index].erase(hal, guard, page_size)
    }
}
