use alloc::vec;
use embedded_storage::nor_flash::NorFlash;

/// The raw block device the store lives on. Any `NorFlash` works as long as it also provides a
/// CRC32 implementation, see README.md for an example.
pub trait Platform: Crc + NorFlash {}

impl<T: Crc + NorFlash> Platform for T {}

pub type FnCrc32 = fn(init: u32, data: &[u8]) -> u32;

pub trait Crc {
    fn crc32(init: u32, data: &[u8]) -> u32;
}

impl<T: Crc> Crc for &mut T {
    fn crc32(init: u32, data: &[u8]) -> u32 {
        T::crc32(init, data)
    }
}

pub trait AlignedOps: Platform {
    fn align_read_ceil(size: usize) -> usize {
        align_ceil(size, Self::READ_SIZE)
    }

    fn align_read_floor(size: usize) -> usize {
        align_floor(size, Self::READ_SIZE)
    }

    fn align_write_ceil(size: usize) -> usize {
        align_ceil(size, Self::WRITE_SIZE)
    }

    fn align_write_floor(size: usize) -> usize {
        align_floor(size, Self::WRITE_SIZE)
    }

    /// Reads `bytes.len()` bytes from an arbitrary offset by widening the access to the
    /// enclosing `READ_SIZE` window.
    fn read_aligned(&mut self, offset: usize, bytes: &mut [u8]) -> Result<(), Self::Error> {
        if bytes.is_empty() {
            return Ok(());
        }

        if offset.is_multiple_of(Self::READ_SIZE) && bytes.len().is_multiple_of(Self::READ_SIZE) {
            return self.read(offset as u32, bytes);
        }

        let start = Self::align_read_floor(offset);
        let end = Self::align_read_ceil(offset + bytes.len());
        let mut buf = vec![0u8; end - start];
        self.read(start as u32, &mut buf)?;

        let skip = offset - start;
        bytes.copy_from_slice(&buf[skip..skip + bytes.len()]);
        Ok(())
    }

    /// Programs `bytes` at a `WRITE_SIZE` aligned offset. An unaligned trailer is padded with
    /// ones, which leaves the flash untouched, and skipped entirely if it is all ones anyway.
    fn write_aligned(&mut self, offset: usize, bytes: &[u8]) -> Result<(), Self::Error> {
        #[cfg(feature = "defmt")]
        defmt::trace!("write_aligned @{:#x}: [{}]", offset, bytes.len());

        if bytes.len().is_multiple_of(Self::WRITE_SIZE) {
            return self.write(offset as u32, bytes);
        }

        let pivot = Self::align_write_floor(bytes.len());
        let (head, trailer) = bytes.split_at(pivot);
        if !head.is_empty() {
            self.write(offset as u32, head)?;
        }

        if trailer.iter().any(|&e| e != 0xFF) {
            let mut buf = vec![0xFFu8; Self::WRITE_SIZE];
            buf[..trailer.len()].copy_from_slice(trailer);
            self.write((offset + pivot) as u32, &buf)?;
        }

        Ok(())
    }
}

#[inline(always)]
const fn align_ceil(size: usize, alignment: usize) -> usize {
    if alignment.is_power_of_two() {
        size.saturating_add(alignment - 1) & !(alignment - 1)
    } else {
        size.saturating_add(alignment - 1) / alignment * alignment
    }
}

#[inline(always)]
const fn align_floor(size: usize, alignment: usize) -> usize {
    if alignment.is_power_of_two() {
        size & !(alignment - 1)
    } else {
        size / alignment * alignment
    }
}

impl<T: Platform> AlignedOps for T {}

#[cfg(any(
    feature = "esp32",
    feature = "esp32s2",
    feature = "esp32s3",
    feature = "esp32c2",
    feature = "esp32c3",
    feature = "esp32c6",
    feature = "esp32h2",
))]
mod chip {
    use esp_storage::FlashStorage;

    use crate::platform::Crc;

    impl Crc for FlashStorage<'_> {
        fn crc32(init: u32, data: &[u8]) -> u32 {
            esp_hal::rom::crc::crc32_le(init, data)
        }
    }
}
