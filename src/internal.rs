use crate::diagnostics::Diagnostics;
use crate::error::Error;
use crate::error::Error::{KeyNotFound, LowVoltage, PageFull};
use crate::index::Slot;
use crate::page::{ThinPageHeader, ThinPageState};
use crate::platform::Platform;
use crate::raw::{
    PAGE_HEADER_SIZE, PageHeader, PageState, RecordHeader, RecordKind, first_record_offset,
    is_erased, record_size,
};
use crate::{Key, Nvs};
use alloc::vec::Vec;
#[cfg(feature = "defmt")]
use defmt::trace;
#[cfg(feature = "defmt")]
use defmt::warn;

/// Serial number arithmetic: `a` is newer than `b` if it is less than half the number space
/// ahead of it, so the comparison survives the counter wrapping around.
pub(crate) fn is_newer(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// Derives the in-memory header of a page from its raw content. A blank header on top of
/// programmed bytes means a header write was torn.
pub(crate) fn classify<T: Platform>(buf: &[u8]) -> ThinPageHeader {
    let mut raw = [0u8; PAGE_HEADER_SIZE];
    raw.copy_from_slice(&buf[..PAGE_HEADER_SIZE]);

    let corrupt = ThinPageHeader {
        state: ThinPageState::Corrupt,
        sequence: 0,
    };

    if is_erased(&raw) {
        return if is_erased(buf) {
            ThinPageHeader {
                state: ThinPageState::Uninitialized,
                sequence: 0,
            }
        } else {
            corrupt
        };
    }

    let header = PageHeader::from_bytes(&raw);
    if !header.is_valid(T::crc32) {
        return corrupt;
    }

    match PageState::from(header.state) {
        state @ (PageState::Compacting | PageState::Active) => ThinPageHeader {
            state: state.into(),
            sequence: header.sequence,
        },
        _ => corrupt,
    }
}

impl<T: Platform> Nvs<T> {
    pub(crate) fn load_pages(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("load_pages");

        let page_size = self.pages.page_size();
        let mut buffers: Vec<Vec<u8>> = Vec::with_capacity(2);
        for index in 0..2 {
            let buf = self.pages.page(index).load(&mut self.hal, page_size)?;
            self.pages.page_mut(index).header = classify::<T>(&buf);
            buffers.push(buf);
        }

        #[cfg(feature = "debug-logs")]
        println!(
            "  internal: loaded {:?} {:?}",
            self.pages.page(0),
            self.pages.page(1)
        );

        // A compacting page without an active one means the compaction finished copying but
        // the state word never advanced.
        let (active, promote) = match self.newest(ThinPageState::Active) {
            Some(index) => (Some(index), false),
            None => (self.newest(ThinPageState::Compacting), true),
        };

        if let Some(index) = active {
            self.pages.set_active(index);

            if promote {
                #[cfg(feature = "defmt")]
                warn!("promoting compaction target {} to active", index);

                #[cfg(feature = "debug-logs")]
                println!("  internal: promoting page {index} to active");

                match self
                    .pages
                    .active_mut()
                    .mark_as_active(&mut self.hal, &self.guard)
                {
                    // the next boot promotes it again
                    Ok(()) | Err(LowVoltage) => {}
                    Err(e) => return Err(e),
                }
                self.pages.active_mut().header.state = ThinPageState::Active;
            }

            let outcome = self
                .index
                .scan_rebuild::<T>(&buffers[index], first_record_offset::<T>());

            let page = self.pages.active_mut();
            page.cursor = outcome.cursor;
            page.record_count = outcome.records;

            for offset in outcome.corrupt {
                self.report_corruption(index, offset);
            }
        } else {
            self.pages.set_active(0);
        }

        for index in 0..2 {
            if Some(index) == active || self.pages.page(index).is_blank() {
                continue;
            }

            #[cfg(feature = "defmt")]
            warn!("erasing stale page {}", index);

            #[cfg(feature = "debug-logs")]
            println!("  internal: erasing stale page {index}");

            // a page left over here is erased again before it becomes a compaction target
            match self.pages.erase(&mut self.hal, &self.guard, index) {
                Ok(()) | Err(LowVoltage) => {}
                Err(e) => return Err(e),
            }
        }

        if self.persist_diagnostics {
            self.load_diagnostics();
        }
        self.diagnostics.record_reset();
        if self.persist_diagnostics {
            self.store_diagnostics(true)?;
        }

        Ok(())
    }

    fn newest(&self, state: ThinPageState) -> Option<usize> {
        let first = self.pages.page(0).header;
        let second = self.pages.page(1).header;
        match (first.state == state, second.state == state) {
            (true, true) if is_newer(second.sequence, first.sequence) => Some(1),
            (true, _) => Some(0),
            (false, true) => Some(1),
            (false, false) => None,
        }
    }

    pub(crate) fn report_corruption(&mut self, page: usize, offset: usize) {
        #[cfg(feature = "defmt")]
        warn!("corrupt record in page {} at {:#x}", page, offset);

        #[cfg(feature = "debug-logs")]
        println!("  internal: corrupt record in page {page} at {offset:#06x}");

        self.diagnostics.record_corruption();
        if let Some(handler) = self.corruption_handler {
            handler(page, offset);
        }
    }

    /// Makes sure the active page has a valid header before the first append. A fresh store
    /// only formats its page on the first write.
    pub(crate) fn prepare_active_page(&mut self) -> Result<(), Error> {
        match self.pages.active().header.state {
            ThinPageState::Active | ThinPageState::Compacting => return Ok(()),
            ThinPageState::Uninitialized => {}
            ThinPageState::Corrupt => {
                let index = self.pages.active_index();
                self.pages.erase(&mut self.hal, &self.guard, index)?;
            }
        }

        let secondary = self.pages.page(self.pages.secondary_index()).header;
        let sequence = match secondary.state {
            ThinPageState::Active | ThinPageState::Compacting => secondary.sequence.wrapping_add(1),
            _ => 0,
        };

        self.pages
            .active_mut()
            .initialize(&mut self.hal, &self.guard, PageState::Active, sequence)
    }

    pub(crate) fn get_bytes(&mut self, key: &Key) -> Result<Vec<u8>, Error> {
        #[cfg(feature = "defmt")]
        trace!("get_bytes: {}", key);

        #[cfg(feature = "debug-logs")]
        println!("internal: get_bytes {key:?}");

        let (offset, length) = self.index.live(key).ok_or(KeyNotFound)?;
        let (header, payload) =
            self.pages
                .active()
                .load_record(&mut self.hal, offset, length)?;

        if header.key() != *key || !header.verify(T::crc32, &payload) {
            self.report_corruption(self.pages.active_index(), offset as usize);
            // The index only knows the latest record. An older valid one on the page is found
            // again by the scan of the next boot, unless a compaction drops it first.
            self.index.remove(key);
            return Err(KeyNotFound);
        }

        Ok(payload)
    }

    pub(crate) fn get_fixed<const N: usize>(&mut self, key: &Key) -> Result<[u8; N], Error> {
        let value = self.get_bytes(key)?;
        <[u8; N]>::try_from(value.as_slice()).map_err(|_| Error::LengthMismatch(value.len()))
    }

    pub(crate) fn read_into(
        &mut self,
        key: &Key,
        offset: usize,
        buf: &mut [u8],
    ) -> Result<(), Error> {
        let value = self.get_bytes(key)?;
        let end = offset.checked_add(buf.len()).ok_or(Error::OutOfBounds)?;
        let window = value.get(offset..end).ok_or(Error::OutOfBounds)?;
        buf.copy_from_slice(window);
        Ok(())
    }

    pub(crate) fn set_bytes(&mut self, key: &Key, value: &[u8]) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("set_bytes: {} ({} bytes)", key, value.len());

        #[cfg(feature = "debug-logs")]
        println!("internal: set_bytes {key:?} ({} bytes)", value.len());

        if *key == Key::DIAGNOSTICS {
            return Err(Error::ReservedKey);
        }

        self.put(key, value)
    }

    fn put(&mut self, key: &Key, value: &[u8]) -> Result<(), Error> {
        if value.len() > u16::MAX as usize
            || record_size::<T>(value.len()) > self.pages.capacity::<T>()
        {
            return Err(Error::ValueTooLong);
        }

        if self.index.live(key).is_some() {
            match self.get_bytes(key) {
                Ok(existing) if existing == value => {
                    #[cfg(feature = "debug-logs")]
                    println!("internal: put: value unchanged");

                    return Ok(());
                }
                Err(Error::FlashError) => return Err(Error::FlashError),
                _ => {}
            }
        }

        self.append_record(key, RecordKind::Value, value)
    }

    pub(crate) fn delete_key(&mut self, key: &Key) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("delete_key: {}", key);

        #[cfg(feature = "debug-logs")]
        println!("internal: delete_key {key:?}");

        if *key == Key::DIAGNOSTICS {
            return Err(Error::ReservedKey);
        }

        if self.index.live(key).is_none() {
            return Err(KeyNotFound);
        }

        self.prepare_active_page()?;

        match self.pages.allocate::<T>(0) {
            Ok(_) => self.write_to_active(key, RecordKind::Tombstone, &[]),
            // leaving the key behind during compaction deletes it without a tombstone
            Err(PageFull) => self.compact_pages(Some(key)),
            Err(e) => Err(e),
        }
    }

    /// Appends a record, compacting once if the active page has no room for it.
    pub(crate) fn append_record(
        &mut self,
        key: &Key,
        kind: RecordKind,
        payload: &[u8],
    ) -> Result<(), Error> {
        self.prepare_active_page()?;

        if let Err(PageFull) = self.pages.allocate::<T>(payload.len()) {
            self.compact_pages(None)?;
            self.pages
                .allocate::<T>(payload.len())
                .map_err(|_| Error::FlashFull)?;
        }

        self.write_to_active(key, kind, payload)
    }

    /// Appends a record without ever compacting, `PageFull` if it doesn't fit.
    fn try_append(&mut self, key: &Key, kind: RecordKind, payload: &[u8]) -> Result<(), Error> {
        self.prepare_active_page()?;
        self.pages.allocate::<T>(payload.len())?;
        self.write_to_active(key, kind, payload)
    }

    fn write_to_active(&mut self, key: &Key, kind: RecordKind, payload: &[u8]) -> Result<(), Error> {
        let header = RecordHeader::new(key, kind, payload, T::crc32);
        let page_size = self.pages.page_size();
        let offset = self.pages.active_mut().write_record(
            &mut self.hal,
            &self.guard,
            &header,
            payload,
            page_size,
        )?;

        let slot = match kind {
            RecordKind::Value => Slot::Value {
                offset,
                length: header.length,
            },
            RecordKind::Tombstone => Slot::Tombstone,
        };
        self.index.insert(*key, slot);

        Ok(())
    }

    /// Picks up the counters of the previous power cycle. A missing or unreadable record
    /// starts from zero.
    fn load_diagnostics(&mut self) {
        let stored = match self.get_bytes(&Key::DIAGNOSTICS) {
            Ok(raw) => Diagnostics::from_bytes(&raw),
            Err(e) => Err(e),
        };

        match stored {
            Ok(stored) => {
                let found = self.diagnostics.bad_crc;
                self.diagnostics = stored;
                self.diagnostics.bad_crc = stored.bad_crc.saturating_add(found);
            }
            Err(_e) => {
                #[cfg(feature = "debug-logs")]
                println!("internal: no stored diagnostics: {_e:?}");
            }
        }
    }

    /// Best effort: the counters are lost rather than failing the operation that updated
    /// them.
    pub(crate) fn store_diagnostics(&mut self, allow_compaction: bool) -> Result<(), Error> {
        let payload = self.diagnostics.to_bytes();
        let result = if allow_compaction {
            self.append_record(&Key::DIAGNOSTICS, RecordKind::Value, &payload)
        } else {
            self.try_append(&Key::DIAGNOSTICS, RecordKind::Value, &payload)
        };

        match result {
            Ok(()) => Ok(()),
            Err(LowVoltage | PageFull | Error::FlashFull) => {
                #[cfg(feature = "defmt")]
                warn!("diagnostics not persisted");

                #[cfg(feature = "debug-logs")]
                println!("internal: diagnostics not persisted");

                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// The inactive page goes first so an interruption never leaves the store with its
    /// active page erased and the stale one intact.
    pub(crate) fn erase_pages(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("erase_pages");

        #[cfg(feature = "debug-logs")]
        println!("internal: erase_pages");

        self.guard.check()?;

        let secondary = self.pages.secondary_index();
        if !self.pages.page(secondary).is_blank() {
            self.pages.erase(&mut self.hal, &self.guard, secondary)?;
        }

        let active = self.pages.active_index();
        if !self.pages.page(active).is_blank() {
            self.pages.erase(&mut self.hal, &self.guard, active)?;
        }

        self.index.clear();

        Ok(())
    }
}
