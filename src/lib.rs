#![doc = include_str!("../README.md")]
#![cfg_attr(not(target_arch = "x86_64"), no_std)]

mod compaction;
mod diagnostics;
pub mod error;
mod get;
mod guard;
mod index;
mod internal;
mod page;
pub mod platform;
mod raw;
mod set;

pub use diagnostics::{Diagnostics, FnCorruptionHandler};
pub use get::Get;
pub use guard::FnCheckVoltage;
pub use set::Set;

extern crate alloc;

use crate::error::Error;
use crate::guard::VoltageGuard;
use crate::index::ItemIndex;
use crate::page::Pages;
use crate::platform::Platform;
use crate::raw::{RECORD_HEADER_SIZE, first_record_offset};
use alloc::vec::Vec;
use core::fmt;

/// Identifies one item: a namespace (usually one per subsystem), an item id and a sub id for
/// tables of similar items.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Key {
    pub namespace: u8,
    pub id: u16,
    pub sub_id: u16,
}

impl Key {
    /// Holds the persisted [`Diagnostics`] and can't be written or deleted by callers.
    pub const DIAGNOSTICS: Key = Key::new(0, 1, 0);

    /// Usage: `const WIFI_SSID: Key = Key::new(2, 1, 0);`
    pub const fn new(namespace: u8, id: u16, sub_id: u16) -> Self {
        Self {
            namespace,
            id,
            sub_id,
        }
    }
}

impl From<(u8, u16, u16)> for Key {
    fn from((namespace, id, sub_id): (u8, u16, u16)) -> Self {
        Self::new(namespace, id, sub_id)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Key({:#04x}, {:#06x}, {:#06x})",
            self.namespace, self.id, self.sub_id
        )
    }
}

/// Runtime configuration of a store.
///
/// Hooks passed here are already active while the pages are recovered on initialization,
/// which matters if recovery has to erase a stale page.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub partition_offset: usize,
    pub partition_size: usize,
    pub persist_diagnostics: bool,
    pub voltage_check: Option<FnCheckVoltage>,
    pub corruption_handler: Option<FnCorruptionHandler>,
}

impl Config {
    /// The partition is split into two equally sized pages.
    pub const fn new(partition_offset: usize, partition_size: usize) -> Self {
        Self {
            partition_offset,
            partition_size,
            persist_diagnostics: false,
            voltage_check: None,
            corruption_handler: None,
        }
    }

    /// Keeps the [`Diagnostics`] in the store under [`Key::DIAGNOSTICS`] so `resets` counts
    /// power cycles. Costs one record per initialization and compaction.
    pub const fn with_persisted_diagnostics(mut self) -> Self {
        self.persist_diagnostics = true;
        self
    }

    pub const fn with_voltage_check(mut self, check: FnCheckVoltage) -> Self {
        self.voltage_check = Some(check);
        self
    }

    pub const fn with_corruption_handler(mut self, handler: FnCorruptionHandler) -> Self {
        self.corruption_handler = Some(handler);
        self
    }
}

/// Outcome of [`Nvs::init_item`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemInit {
    /// The key already had a live value, it is returned unchanged.
    Existing(Vec<u8>),
    /// The key had no value, the default was written.
    Created,
}

/// A key-value store on exactly two flash pages. One page is active and holds an append-only
/// log of records, the other one is kept erased as the target of the next compaction.
///
/// All calls take `&mut self`: the store expects a single owner that serializes access, the
/// same way the flash only ever has one erase or program in flight.
pub struct Nvs<T: Platform> {
    pub(crate) hal: T,
    pub(crate) pages: Pages,
    pub(crate) index: ItemIndex,
    pub(crate) diagnostics: Diagnostics,
    pub(crate) guard: VoltageGuard,
    pub(crate) corruption_handler: Option<FnCorruptionHandler>,
    pub(crate) persist_diagnostics: bool,
    pub(crate) faulted: bool,
}

impl<T: Platform> Nvs<T> {
    /// Recovers the store from the partition at `partition_offset` and builds the in-memory
    /// index:
    /// 1. Decide which page is active. If an interrupted compaction left two active pages, the
    ///    one with the newer sequence wins
    /// 2. Erase the other page unless it is already blank
    /// 3. Scan the log of the active page, the latest valid record per key wins
    ///
    /// Records with invalid CRC32 values are skipped, counted and reported to the corruption
    /// handler.
    pub fn new(partition_offset: usize, partition_size: usize, hal: T) -> Result<Nvs<T>, Error> {
        Self::with_config(Config::new(partition_offset, partition_size), hal)
    }

    pub fn with_config(config: Config, hal: T) -> Result<Nvs<T>, Error> {
        if !config.partition_offset.is_multiple_of(T::ERASE_SIZE) {
            return Err(Error::InvalidPartitionOffset);
        }

        if config.partition_size == 0 || !config.partition_size.is_multiple_of(2 * T::ERASE_SIZE)
        {
            return Err(Error::InvalidPartitionSize);
        }

        let page_size = config.partition_size / 2;
        if u32::try_from(config.partition_offset + config.partition_size).is_err()
            || page_size < first_record_offset::<T>() + RECORD_HEADER_SIZE
        {
            return Err(Error::InvalidPartitionSize);
        }

        let mut nvs: Nvs<T> = Self {
            hal,
            pages: Pages::new(config.partition_offset, page_size),
            index: ItemIndex::new(),
            diagnostics: Diagnostics::default(),
            guard: VoltageGuard::new(config.voltage_check),
            corruption_handler: config.corruption_handler,
            persist_diagnostics: config.persist_diagnostics,
            faulted: false,
        };

        nvs.load_pages()?;

        Ok(nvs)
    }

    /// Get a value from the flash.
    ///
    /// Supported types are bool, signed and unsigned integers up to 64-bit width, String and
    /// `Vec<u8>` for the raw bytes.
    pub fn get<R>(&mut self, key: &Key) -> Result<R, Error>
    where
        Nvs<T>: Get<R>,
    {
        let result = Get::get(self, key);
        self.latch(result)
    }

    /// Set a value and write it to the flash. Writing the value that is already stored is a
    /// no-op.
    ///
    /// If the active page has no room left, the live records are compacted into the other page
    /// first. `FlashFull` is only returned if even that doesn't free enough space.
    ///
    /// Type support:
    ///  * bool, signed and unsigned integers up to 64-bit width: saved as little endian bytes
    ///  * &str and &[u8]: saved as is, a single value has to fit into one page
    pub fn set<R>(&mut self, key: &Key, value: R) -> Result<(), Error>
    where
        Nvs<T>: Set<R>,
    {
        if self.faulted {
            return Err(Error::FlashError);
        }

        let result = Set::set(self, key, value);
        self.latch(result)
    }

    /// Delete a key by appending a tombstone.
    ///
    /// Returns `KeyNotFound` if there is no live value.
    pub fn delete(&mut self, key: &Key) -> Result<(), Error> {
        if self.faulted {
            return Err(Error::FlashError);
        }

        let result = self.delete_key(key);
        self.latch(result)
    }

    /// Copies the live records into the other page and erases the current one. Happens
    /// implicitly whenever a write doesn't fit anymore.
    pub fn compact(&mut self) -> Result<(), Error> {
        if self.faulted {
            return Err(Error::FlashError);
        }

        let result = self.compact_pages(None);
        self.latch(result)
    }

    /// Compacts only if fewer than `min_free` bytes are left on the active page. Returns the
    /// free bytes afterwards.
    pub fn ensure_free(&mut self, min_free: usize) -> Result<usize, Error> {
        if self.faulted {
            return Err(Error::FlashError);
        }

        if self.pages.free_bytes::<T>() < min_free {
            let result = self.compact_pages(None);
            self.latch(result)?;
        }

        Ok(self.pages.free_bytes::<T>())
    }

    /// Length of the stored value, answered from memory.
    pub fn item_len(&self, key: &Key) -> Result<usize, Error> {
        self.index
            .live(key)
            .map(|(_, length)| length as usize)
            .ok_or(Error::KeyNotFound)
    }

    /// Reads `buf.len()` bytes of the value starting at `offset`. The whole record is still
    /// verified.
    pub fn read_at(&mut self, key: &Key, offset: usize, buf: &mut [u8]) -> Result<(), Error> {
        let result = self.read_into(key, offset, buf);
        self.latch(result)
    }

    /// Returns the live value of `key`, or writes `default` if there is none.
    pub fn init_item(&mut self, key: &Key, default: &[u8]) -> Result<ItemInit, Error> {
        match self.get::<Vec<u8>>(key) {
            Ok(value) => Ok(ItemInit::Existing(value)),
            Err(Error::KeyNotFound) => {
                self.set(key, default)?;
                Ok(ItemInit::Created)
            }
            Err(e) => Err(e),
        }
    }

    /// All keys with a live value, ordered by namespace, id and sub id.
    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.index.keys()
    }

    /// All keys with a live value in `namespace`.
    pub fn keys_in(&self, namespace: u8) -> impl Iterator<Item = Key> + '_ {
        self.keys().filter(move |key| key.namespace == namespace)
    }

    /// Free bytes on the active page.
    pub fn free_bytes(&self) -> usize {
        self.pages.free_bytes::<T>()
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics
    }

    /// Registers a check that is consulted before every erase and program. While it returns
    /// false, writes fail with `LowVoltage` and the flash stays untouched.
    pub fn set_voltage_check(&mut self, check: FnCheckVoltage) {
        self.guard.set(Some(check));
    }

    pub fn clear_voltage_check(&mut self) {
        self.guard.set(None);
    }

    /// Registers a handler that is called with page index and offset of every record that
    /// fails its checksum. Without one, corrupt records are silently skipped.
    pub fn set_corruption_handler(&mut self, handler: FnCorruptionHandler) {
        self.corruption_handler = Some(handler);
    }

    pub fn clear_corruption_handler(&mut self) {
        self.corruption_handler = None;
    }

    /// Erases both pages and forgets every key.
    pub fn erase_all(&mut self) -> Result<(), Error> {
        if self.faulted {
            return Err(Error::FlashError);
        }

        let result = self.erase_pages();
        self.latch(result)
    }

    fn latch<R>(&mut self, result: Result<R, Error>) -> Result<R, Error> {
        if let Err(Error::FlashError) = result {
            self.faulted = true;
        }
        result
    }
}
