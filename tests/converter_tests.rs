// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use block_store::block::IdWidth;
use block_store::block_file::BlockFileContainer;
use block_store::container::ValueContainer;
use block_store::converter::{Codec, ConverterContainer};
use block_store::error::Result;

struct FixedWidthInt;

impl Codec<u32> for FixedWidthInt {
    fn encode(&self, value: &u32) -> Result<Vec<u8>> {
        Ok(value.to_be_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&bytes[..4]);
        Ok(u32::from_be_bytes(buf))
    }

    fn encoded_size(&self, _value: &u32) -> Option<usize> {
        Some(4)
    }
}

/// Scenario 5: a BlockFile wrapped with a 4-byte fixed-size integer codec
/// round-trips 42, and the converter's id codec matches the wrapped
/// container's.
#[test]
fn scenario_converter_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let inner = BlockFileContainer::open(dir.path().join("t"), 4);
    let inner_width = inner.id_codec().width;
    let mut c = ConverterContainer::new(inner, FixedWidthInt);

    let id = c.insert(&42u32, true).unwrap();
    assert_eq!(c.get(id, true).unwrap(), 42);
    assert_eq!(c.id_codec().width, inner_width);
    assert_eq!(inner_width, IdWidth::Eight);
}

#[test]
fn update_overwrites_and_remove_invalidates() {
    let dir = tempfile::tempdir().unwrap();
    let mut c = ConverterContainer::new(BlockFileContainer::open(dir.path().join("t"), 4), FixedWidthInt);
    let id = c.insert(&1, true).unwrap();
    c.update(id, &2, true).unwrap();
    assert_eq!(c.get(id, true).unwrap(), 2);
    c.remove(id).unwrap();
    assert!(!c.contains(id).unwrap());
}

#[test]
fn flush_array_of_blocks_inserts_every_value() {
    let dir = tempfile::tempdir().unwrap();
    let mut c = ConverterContainer::new(BlockFileContainer::open(dir.path().join("t"), 4), FixedWidthInt);
    let ids = c.flush_array_of_blocks(&[7, 8, 9]).unwrap();
    let got: Vec<u32> = ids.iter().map(|&id| c.get(id, true).unwrap()).collect();
    assert_eq!(got, vec![7, 8, 9]);
}
