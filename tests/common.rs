#![allow(dead_code)]

// filename according to https://doc.rust-lang.org/book/ch11-03-test-organization.html
use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};
use std::cell::Cell;
use std::rc::Rc;
use two_page_nvs::{Key, Nvs};

pub const FLASH_SECTOR_SIZE: usize = 4096;
// Taken from https://github.com/esp-rs/esp-hal/blob/main/esp-storage/src/stub.rs
pub const WORD_SIZE: usize = 4;
pub const PAGE_HEADER_SIZE: usize = 16;
pub const RECORD_HEADER_SIZE: usize = 16;

/// Bytes a record with `len` bytes of payload occupies.
pub const fn record_size(len: usize) -> usize {
    (RECORD_HEADER_SIZE + len).div_ceil(WORD_SIZE) * WORD_SIZE
}

/// Room for records on an empty page.
pub const PAGE_CAPACITY: usize = FLASH_SECTOR_SIZE - PAGE_HEADER_SIZE;

#[derive(Default)]
pub struct Flash {
    pub buf: Vec<u8>,
    pub fail_after_operation: usize,
    /// Simulates a power cut: every erase or program after this many fails.
    pub fail_after_mutation: usize,
    /// The failing erase or program still changes the first half of its range.
    pub tear: bool,
    /// Inverts the byte at this address in every read, can be changed while a store holds the
    /// flash.
    pub read_disturb: Rc<Cell<Option<usize>>>,
    pub operations: Vec<Operation>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Operation {
    Read { offset: u32, len: usize },
    Write { offset: u32, len: usize },
    Erase { offset: u32, len: usize },
}

impl Flash {
    pub fn new(pages: usize) -> Self {
        Self {
            buf: vec![0xffu8; FLASH_SECTOR_SIZE * pages],
            fail_after_operation: usize::MAX,
            fail_after_mutation: usize::MAX,
            ..Default::default()
        }
    }

    pub fn new_with_fault(pages: usize, fail_after_operation: usize) -> Self {
        Self {
            fail_after_operation,
            ..Self::new(pages)
        }
    }

    /// Programs and erases fail after `mutations` successful ones. With `tear` the failing one
    /// is half applied.
    pub fn new_with_power_cut(pages: usize, mutations: usize, tear: bool) -> Self {
        Self {
            fail_after_mutation: mutations,
            tear,
            ..Self::new(pages)
        }
    }

    /// A flash that starts out with `buf` and never fails, like after a reboot.
    pub fn from_image(buf: Vec<u8>) -> Self {
        Self {
            buf,
            fail_after_operation: usize::MAX,
            fail_after_mutation: usize::MAX,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn disable_faults(&mut self) {
        self.fail_after_operation = usize::MAX;
        self.fail_after_mutation = usize::MAX;
    }

    pub fn erases(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Erase { .. }))
            .count()
    }

    pub fn mutations(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| !matches!(op, Operation::Read { .. }))
            .count()
    }

    pub fn dump_operations(&self) {
        println!("Operations:");
        for op in &self.operations {
            println!("  {:?}", op);
        }
    }

    fn power_cut(&self) -> bool {
        self.mutations() >= self.fail_after_mutation
    }
}

#[derive(Debug)]
pub struct FlashError;

impl NorFlashError for FlashError {
    fn kind(&self) -> NorFlashErrorKind {
        NorFlashErrorKind::Other
    }
}

impl ErrorType for Flash {
    type Error = FlashError;
}

impl ReadNorFlash for Flash {
    const READ_SIZE: usize = WORD_SIZE;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::READ_SIZE as _));

        println!(
            "    flash: read:  0x{offset:04X}[0x{:04X}] #{:>2}",
            bytes.len(),
            self.operations.len()
        );
        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }
        self.operations.push(Operation::Read {
            offset,
            len: bytes.len(),
        });

        let offset = offset as usize;
        bytes.copy_from_slice(&self.buf[offset..offset + bytes.len()]);
        if let Some(addr) = self.read_disturb.get()
            && (offset..offset + bytes.len()).contains(&addr)
        {
            bytes[addr - offset] ^= 0xFF;
        }
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl NorFlash for Flash {
    const WRITE_SIZE: usize = WORD_SIZE;

    const ERASE_SIZE: usize = FLASH_SECTOR_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        assert!(from.is_multiple_of(Self::ERASE_SIZE as _));
        assert!(to.is_multiple_of(Self::ERASE_SIZE as _));

        println!(
            "    flash: erase: {from:04X} - {to:04X} #{:>2}",
            self.operations.len()
        );

        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }

        if self.power_cut() {
            println!("    flash: POWER CUT");
            if self.tear {
                let half = from + (to - from) / 2;
                for addr in from..half {
                    self.buf[addr as usize] = 0xff;
                }
            }
            return Err(FlashError);
        }

        self.operations.push(Operation::Erase {
            offset: from,
            len: (to - from) as usize,
        });

        for addr in from..to {
            self.buf[addr as usize] = 0xff;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::WRITE_SIZE as _));
        assert!(bytes.len().is_multiple_of(Self::WRITE_SIZE as _));

        println!(
            "    flash: write: 0x{offset:04X}[0x{:04X}] #{:>2}",
            bytes.len(),
            self.operations.len()
        );

        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }
        assert!(!bytes.is_empty());

        let offset = offset as usize;

        if self.power_cut() {
            println!("    flash: POWER CUT");
            if self.tear {
                let half = bytes.len() / 2;
                for (i, &val) in bytes[..half].iter().enumerate() {
                    self.buf[offset + i] &= val;
                }
            }
            return Err(FlashError);
        }

        self.operations.push(Operation::Write {
            offset: offset as u32,
            len: bytes.len(),
        });

        for (i, &val) in bytes.iter().enumerate() {
            // like on NOR flash we can only flip bits from 1 to 0
            self.buf[offset + i] &= val;
        }
        Ok(())
    }
}

impl two_page_nvs::platform::Crc for Flash {
    fn crc32(init: u32, data: &[u8]) -> u32 {
        unsafe { libz_sys::crc32(init as u64, data.as_ptr(), data.len() as u32) as u32 }
    }
}

/// Two pages at the start of the flash.
pub fn open(flash: &mut Flash) -> Result<Nvs<&mut Flash>, two_page_nvs::error::Error> {
    Nvs::new(0, 2 * FLASH_SECTOR_SIZE, flash)
}

pub const STATE_ACTIVE: u32 = 0xFFFF_FFFC;
pub const STATE_COMPACTING: u32 = 0xFFFF_FFFE;
pub const PAGE_MAGIC: u32 = 0x5032_564E;
pub const KIND_VALUE: u8 = 0x01;
pub const KIND_TOMBSTONE: u8 = 0x02;

fn crc32(init: u32, data: &[u8]) -> u32 {
    <Flash as two_page_nvs::platform::Crc>::crc32(init, data)
}

/// Builds the raw bytes of one page, laid out the way the store writes them.
pub fn page_image(state: u32, sequence: u32, records: &[(Key, u8, &[u8])]) -> Vec<u8> {
    let mut page = vec![0xFFu8; FLASH_SECTOR_SIZE];

    let mut header = Vec::new();
    header.extend_from_slice(&state.to_le_bytes());
    header.extend_from_slice(&PAGE_MAGIC.to_le_bytes());
    header.extend_from_slice(&sequence.to_le_bytes());
    let crc = crc32(u32::MAX, &header[4..12]);
    header.extend_from_slice(&crc.to_le_bytes());
    page[..PAGE_HEADER_SIZE].copy_from_slice(&header);

    let mut offset = PAGE_HEADER_SIZE;
    for (key, kind, payload) in records {
        let record = encode_record(*key, *kind, payload);
        page[offset..offset + record.len()].copy_from_slice(&record);
        offset += record_size(payload.len());
    }

    page
}

pub fn encode_record(key: Key, kind: u8, payload: &[u8]) -> Vec<u8> {
    let mut record = Vec::new();
    record.push(key.namespace);
    record.push(kind);
    record.extend_from_slice(&key.id.to_le_bytes());
    record.extend_from_slice(&key.sub_id.to_le_bytes());
    record.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    let crc = crc32(crc32(u32::MAX, &record[..8]), payload);
    record.extend_from_slice(&crc.to_le_bytes());
    let header_crc = crc32(u32::MAX, &record[..12]);
    record.extend_from_slice(&header_crc.to_le_bytes());
    record.extend_from_slice(payload);
    record
}

/// Two pages as one flash image.
pub fn flash_image(first: Vec<u8>, second: Vec<u8>) -> Flash {
    let mut buf = first;
    buf.extend_from_slice(&second);
    Flash::from_image(buf)
}

pub fn blank_page() -> Vec<u8> {
    vec![0xFFu8; FLASH_SECTOR_SIZE]
}
