//! Moves the live records of the active page into the other page.
//!
//! The target carries the `Compacting` state while records are copied, so a reset at any point
//! leaves either the old page as the only active one or the target as the newer one. Only after
//! the target is marked active the old page gets erased.

use crate::error::Error;
use crate::error::Error::LowVoltage;
use crate::index::{ItemIndex, Slot};
use crate::page::ThinPageState;
use crate::platform::Platform;
use crate::raw::PageState;
use crate::{Key, Nvs};
#[cfg(feature = "defmt")]
use defmt::{trace, warn};

impl<T: Platform> Nvs<T> {
    /// `exclude` is left behind instead of being copied, which deletes it without a
    /// tombstone.
    pub(crate) fn compact_pages(&mut self, exclude: Option<&Key>) -> Result<(), Error> {
        let source = self.pages.active_index();
        let target = self.pages.secondary_index();

        #[cfg(feature = "defmt")]
        trace!("compact_pages: {} -> {}", source, target);

        #[cfg(feature = "debug-logs")]
        println!("compaction: page {source} -> page {target}");

        // nothing was ever written, there is nothing to move
        if self.pages.page(source).header.state != ThinPageState::Active {
            return Ok(());
        }

        // a page whose erase was refused earlier is still pending here
        if !self.pages.page(target).is_blank() {
            self.pages.erase(&mut self.hal, &self.guard, target)?;
        }

        let sequence = self.pages.page(source).header.sequence.wrapping_add(1);
        self.pages.page_mut(target).initialize(
            &mut self.hal,
            &self.guard,
            PageState::Compacting,
            sequence,
        )?;

        let (next, copied) = match self.copy_live_records(source, target, exclude) {
            Ok(result) => result,
            Err(e) => {
                self.pages.page_mut(target).header.state = ThinPageState::Corrupt;
                return Err(e);
            }
        };

        if let Err(e) = self
            .pages
            .page_mut(target)
            .mark_as_active(&mut self.hal, &self.guard)
        {
            self.pages.page_mut(target).header.state = ThinPageState::Corrupt;
            return Err(e);
        }

        let discarded = self.pages.page(source).record_count.saturating_sub(copied);

        self.pages.swap_roles();
        self.index = next;
        self.diagnostics
            .record_compaction(self.pages.free_bytes::<T>(), copied, discarded);

        #[cfg(feature = "debug-logs")]
        println!("compaction: copied {copied}, discarded {discarded}");

        match self.pages.erase(&mut self.hal, &self.guard, source) {
            Ok(()) => {}
            Err(LowVoltage) => {
                #[cfg(feature = "defmt")]
                warn!("old page {} left for the next compaction", source);

                #[cfg(feature = "debug-logs")]
                println!("compaction: erase of page {source} postponed");
            }
            Err(e) => return Err(e),
        }

        if self.persist_diagnostics {
            self.store_diagnostics(false)?;
        }

        Ok(())
    }

    /// Copies every live record in log order and builds the index of the target page. Records
    /// that no longer verify are reported and dropped.
    fn copy_live_records(
        &mut self,
        source: usize,
        target: usize,
        exclude: Option<&Key>,
    ) -> Result<(ItemIndex, u32), Error> {
        let page_size = self.pages.page_size();
        let mut next = ItemIndex::new();
        let mut copied = 0u32;

        for (offset, key, length) in self.index.live_by_offset() {
            if exclude == Some(&key) {
                continue;
            }

            let (header, payload) =
                self.pages
                    .page(source)
                    .load_record(&mut self.hal, offset, length)?;

            if header.key() != key || !header.verify(T::crc32, &payload) {
                self.report_corruption(source, offset as usize);
                continue;
            }

            let new_offset = self.pages.page_mut(target).write_record(
                &mut self.hal,
                &self.guard,
                &header,
                &payload,
                page_size,
            )?;

            next.insert(
                key,
                Slot::Value {
                    offset: new_offset,
                    length,
                },
            );
            copied += 1;
        }

        Ok((next, copied))
    }
}
