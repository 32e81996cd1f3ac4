use crate::error::Error;

/// Called with the page index (0 or 1) and the offset inside that page whenever a record or
/// the free space of a page fails validation.
pub type FnCorruptionHandler = fn(page: usize, offset: usize);

pub(crate) const DIAGNOSTICS_SIZE: usize = 14;

/// Operational counters of the store.
///
/// `available`, `active` and `deleted` describe the most recent compaction. `resets` counts
/// initializations, which only spans power cycles with
/// [`Config::with_persisted_diagnostics`](crate::Config::with_persisted_diagnostics).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Diagnostics {
    /// Number of page compactions
    pub compacts: u32,
    /// Number of initializations
    pub resets: u16,
    /// Free bytes on the active page after the last compaction
    pub available: u16,
    /// Records copied by the last compaction
    pub active: u16,
    /// Records left behind by the last compaction: superseded, tombstones and corrupt ones
    pub deleted: u16,
    /// Checksum failures encountered
    pub bad_crc: u16,
}

impl Diagnostics {
    pub(crate) fn record_corruption(&mut self) {
        self.bad_crc = self.bad_crc.saturating_add(1);
    }

    pub(crate) fn record_reset(&mut self) {
        self.resets = self.resets.saturating_add(1);
    }

    pub(crate) fn record_compaction(&mut self, available: usize, copied: u32, discarded: u32) {
        self.compacts = self.compacts.saturating_add(1);
        self.available = saturate(available as u32);
        self.active = saturate(copied);
        self.deleted = saturate(discarded);
    }

    pub(crate) fn to_bytes(self) -> [u8; DIAGNOSTICS_SIZE] {
        let mut buf = [0u8; DIAGNOSTICS_SIZE];
        buf[0..4].copy_from_slice(&self.compacts.to_le_bytes());
        buf[4..6].copy_from_slice(&self.resets.to_le_bytes());
        buf[6..8].copy_from_slice(&self.available.to_le_bytes());
        buf[8..10].copy_from_slice(&self.active.to_le_bytes());
        buf[10..12].copy_from_slice(&self.deleted.to_le_bytes());
        buf[12..14].copy_from_slice(&self.bad_crc.to_le_bytes());
        buf
    }

    pub(crate) fn from_bytes(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() != DIAGNOSTICS_SIZE {
            return Err(Error::LengthMismatch(buf.len()));
        }

        let u16_at = |offset: usize| u16::from_le_bytes([buf[offset], buf[offset + 1]]);
        Ok(Self {
            compacts: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            resets: u16_at(4),
            available: u16_at(6),
            active: u16_at(8),
            deleted: u16_at(10),
            bad_crc: u16_at(12),
        })
    }
}

fn saturate(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}
