mod common;

use crate::common::{FLASH_SECTOR_SIZE, Flash};
use pretty_assertions::assert_eq;
use two_page_nvs::error::Error;
use two_page_nvs::{Config, Diagnostics, Key, Nvs};

fn open_persisted(flash: &mut Flash) -> Result<Nvs<&mut Flash>, Error> {
    Nvs::with_config(
        Config::new(0, 2 * FLASH_SECTOR_SIZE).with_persisted_diagnostics(),
        flash,
    )
}

#[test]
fn counters_start_at_zero() {
    let mut flash = Flash::new(2);

    let nvs = common::open(&mut flash).unwrap();
    assert_eq!(
        nvs.diagnostics(),
        Diagnostics {
            resets: 1,
            ..Default::default()
        }
    );
}

#[test]
fn resets_survive_power_cycles() {
    let mut flash = Flash::new(2);

    for boot in 1..=3u16 {
        let nvs = open_persisted(&mut flash).unwrap();
        assert_eq!(nvs.diagnostics().resets, boot);
    }

    // without persistence only the current boot counts
    let nvs = common::open(&mut flash).unwrap();
    assert_eq!(nvs.diagnostics().resets, 1);
}

#[test]
fn diagnostics_key_is_reserved() {
    let mut flash = Flash::new(2);

    let mut nvs = open_persisted(&mut flash).unwrap();
    nvs.set(&Key::new(1, 1, 0), 1u8).unwrap();

    assert!(nvs.keys().any(|key| key == Key::DIAGNOSTICS));
    assert_eq!(nvs.set(&Key::DIAGNOSTICS, &[0u8; 14]), Err(Error::ReservedKey));
    assert_eq!(nvs.delete(&Key::DIAGNOSTICS), Err(Error::ReservedKey));
    assert_eq!(nvs.item_len(&Key::DIAGNOSTICS).unwrap(), 14);
}

#[test]
fn compaction_counters_are_persisted() {
    let mut flash = Flash::new(2);

    {
        let mut nvs = open_persisted(&mut flash).unwrap();
        nvs.set(&Key::new(1, 1, 0), 1u32).unwrap();
        nvs.set(&Key::new(1, 1, 0), 2u32).unwrap();
        nvs.compact().unwrap();

        let diagnostics = nvs.diagnostics();
        assert_eq!(diagnostics.compacts, 1);
        // the value and the counters themselves
        assert_eq!(diagnostics.active, 2);
        assert_eq!(diagnostics.deleted, 1);
    }

    let nvs = open_persisted(&mut flash).unwrap();
    let diagnostics = nvs.diagnostics();
    assert_eq!(diagnostics.compacts, 1);
    assert_eq!(diagnostics.resets, 2);
    assert_eq!(diagnostics.active, 2);
    assert_eq!(diagnostics.deleted, 1);
}

#[test]
fn bad_crc_accumulates_across_boots() {
    let mut flash = Flash::new(2);

    {
        let mut nvs = open_persisted(&mut flash).unwrap();
        nvs.set(&Key::new(1, 1, 0), "soon broken").unwrap();
    }

    // the diagnostics record comes first, the value second
    let value = common::PAGE_HEADER_SIZE + common::record_size(14);
    flash.buf[value + common::RECORD_HEADER_SIZE] ^= 0x10;

    {
        let nvs = open_persisted(&mut flash).unwrap();
        assert_eq!(nvs.diagnostics().bad_crc, 1);
    }

    // the record fails again on every scan until a compaction drops it
    {
        let mut nvs = open_persisted(&mut flash).unwrap();
        assert_eq!(nvs.diagnostics().bad_crc, 2);
        nvs.compact().unwrap();
    }

    let nvs = open_persisted(&mut flash).unwrap();
    assert_eq!(nvs.diagnostics().bad_crc, 2);
    assert_eq!(nvs.diagnostics().resets, 4);
    assert_eq!(nvs.keys().collect::<Vec<_>>(), vec![Key::DIAGNOSTICS]);
}
