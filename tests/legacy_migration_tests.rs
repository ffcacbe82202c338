// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! P12: opening a directory laid out in the legacy single-file `.fat` format
//! migrates it in place into the five-file layout, preserving every block.

use block_store::block_file::BlockFileContainer;
use block_store::Container;
use byteorder::{BigEndian, ByteOrder};
use std::fs;

#[test]
fn legacy_fat_layout_migrates_on_open() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("legacy");

    // Two 4-byte blocks already present in the data file, as the legacy
    // reader would have left them.
    let mut ctr = Vec::new();
    ctr.extend_from_slice(&1u32.to_be_bytes());
    ctr.extend_from_slice(&2u32.to_be_bytes());
    fs::write(format!("{}.ctr", prefix.display()), &ctr).unwrap();

    // `.fat`: one bitmap byte (bits 0 and 1 set) followed by the 16-byte
    // trailer (blockSize, size, maxOffset), all big-endian.
    let mut fat = vec![0b0000_0011u8];
    let mut trailer = [0u8; 16];
    BigEndian::write_u32(&mut trailer[0..4], 4);
    BigEndian::write_u32(&mut trailer[4..8], 2);
    BigEndian::write_i64(&mut trailer[8..16], 8);
    fat.extend_from_slice(&trailer);
    fs::write(format!("{}.fat", prefix.display()), &fat).unwrap();

    let mut c = BlockFileContainer::open(&prefix, 4);
    assert_eq!(c.size(), 2);
    assert_eq!(c.block_size(), 4);
    assert_eq!(
        u32::from_be_bytes(c.get(0, true).unwrap().as_bytes().try_into().unwrap()),
        1
    );
    assert_eq!(
        u32::from_be_bytes(c.get(4, true).unwrap().as_bytes().try_into().unwrap()),
        2
    );
    assert!(!std::path::Path::new(&format!("{}.fat", prefix.display())).exists());
}
