use crate::common::FLASH_SECTOR_SIZE;
use crate::common::Operation::{Erase, Read, Write};
use pretty_assertions::assert_eq;
use two_page_nvs::Key;

mod common;

fn ops_init() -> Vec<common::Operation> {
    vec![
        Read {
            offset: 0,
            len: FLASH_SECTOR_SIZE,
        },
        Read {
            offset: FLASH_SECTOR_SIZE as _,
            len: FLASH_SECTOR_SIZE,
        },
    ]
}

#[test]
fn single_primitive() {
    let mut flash = common::Flash::new(2);

    let mut nvs = common::open(&mut flash).unwrap();
    nvs.set(&Key::new(1, 1, 0), 0xAAu8).unwrap();
    assert_eq!(nvs.get::<u8>(&Key::new(1, 1, 0)).unwrap(), 0xAA);

    let ops_write = vec![
        // page header, formatted on the first write
        Write { offset: 0, len: 16 },
        // record header, then the payload padded to a word
        Write {
            offset: 16,
            len: 16,
        },
        Write {
            offset: 32,
            len: 4,
        },
    ];

    let ops_read = vec![Read {
        offset: 16,
        len: 20,
    }];

    assert_eq!(
        flash.operations,
        [ops_init(), ops_write, ops_read].concat()
    );
}

#[test]
fn aligned_record_is_a_single_write() {
    let mut flash = common::Flash::new(2);

    let mut nvs = common::open(&mut flash).unwrap();
    nvs.set(&Key::new(1, 1, 0), 0xAAAA_AAAAu32).unwrap();
    nvs.set(&Key::new(1, 2, 0), 0xBBBB_BBBBu32).unwrap();

    assert_eq!(
        flash.operations,
        [
            ops_init(),
            vec![
                Write { offset: 0, len: 16 },
                Write {
                    offset: 16,
                    len: 20
                },
                Write {
                    offset: 36,
                    len: 20
                },
            ]
        ]
        .concat()
    );
}

#[test]
fn unchanged_value() {
    let mut flash = common::Flash::new(2);

    let mut nvs = common::open(&mut flash).unwrap();
    nvs.set(&Key::new(1, 1, 0), 7u32).unwrap();
    nvs.set(&Key::new(1, 1, 0), 7u32).unwrap();
    drop(nvs);

    // init reads, header and record, then only the read of the live value
    assert_eq!(
        &flash.operations[4..],
        &[Read {
            offset: 16,
            len: 20
        }][..]
    );
}

#[test]
fn compaction() {
    let mut flash = common::Flash::new(2);

    let mut nvs = common::open(&mut flash).unwrap();
    nvs.set(&Key::new(1, 1, 0), 1u32).unwrap();
    nvs.set(&Key::new(1, 1, 0), 2u32).unwrap();
    nvs.compact().unwrap();
    drop(nvs);

    let second_page = FLASH_SECTOR_SIZE as u32;
    let ops_compaction = vec![
        Write {
            offset: second_page,
            len: 16,
        },
        // only the live record is read and copied
        Read {
            offset: 36,
            len: 20,
        },
        Write {
            offset: second_page + 16,
            len: 20,
        },
        // state word: compacting -> active
        Write {
            offset: second_page,
            len: 4,
        },
        Erase {
            offset: 0,
            len: FLASH_SECTOR_SIZE,
        },
    ];

    // init reads, header, first record, comparing read, second record
    assert_eq!(&flash.operations[6..], &ops_compaction[..]);
}
