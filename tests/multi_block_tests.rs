// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod common;

use block_store::block_file::BlockFileContainer;
use block_store::multi_block::MultiBlockContainer;
use block_store::{Block, Container};
use byteorder::{BigEndian, ByteOrder};

fn fresh(dir: &tempfile::TempDir) -> MultiBlockContainer<BlockFileContainer, BlockFileContainer> {
    let primary = BlockFileContainer::open(dir.path().join("primary"), 11);
    let secondary = BlockFileContainer::open(dir.path().join("secondary"), 11);
    MultiBlockContainer::new(primary, secondary).unwrap()
}

#[test]
fn insert_get_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    common::insert_get_roundtrip(&mut fresh(&dir), b"short");
}

#[test]
fn size_matches_ids() {
    let dir = tempfile::tempdir().unwrap();
    common::size_matches_ids(&mut fresh(&dir), b"x");
}

/// Scenario 4: B=11 (8-byte pointer, 3-byte payload), a 25-byte payload
/// chains across 9 physical blocks, and the tail pointer encodes -26.
#[test]
fn scenario_variable_size_chain() {
    let dir = tempfile::tempdir().unwrap();
    let mut c = fresh(&dir);
    let payload: Vec<u8> = (0..25u8).collect();
    let id = c.insert(&Block::from_bytes(payload.clone()), true).unwrap();
    assert_eq!(c.get(id, true).unwrap().into_bytes(), payload);

    // 9 chunks total: 1 head (in `primary`) + 8 tail links (in `secondary`).
    let mut secondary_peek = BlockFileContainer::open(dir.path().join("secondary"), 11);
    assert_eq!(secondary_peek.size(), 8);

    // The chain was grown tail-first, so the first id `secondary` ever
    // handed out (offset 0) is the chain's terminal block.
    let tail_block = secondary_peek.get(0, true).unwrap();
    let pointer = BigEndian::read_i64(&tail_block.as_bytes()[..8]);
    assert_eq!(pointer, -26);
}

#[test]
fn update_then_remove_round_trips_clean() {
    let dir = tempfile::tempdir().unwrap();
    let mut c = fresh(&dir);
    let payload: Vec<u8> = (0..25u8).collect();
    let id = c.insert(&Block::from_bytes(payload), true).unwrap();

    let shrunk = vec![1, 2];
    c.update(id, &Block::from_bytes(shrunk.clone()), true).unwrap();
    assert_eq!(c.get(id, true).unwrap().into_bytes(), shrunk);

    c.remove(id).unwrap();
    assert!(c.get(id, true).is_err());
}
