// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod common;

use block_store::memory::MemoryContainer;
use block_store::{Block, Container};

#[test]
fn insert_get_roundtrip() {
    common::insert_get_roundtrip(&mut MemoryContainer::new(), b"hello world");
}

#[test]
fn update_idempotence() {
    common::update_idempotence(&mut MemoryContainer::new(), b"first", b"second!!");
}

#[test]
fn remove_invalidation() {
    common::remove_invalidation(&mut MemoryContainer::new(), b"gone soon");
}

#[test]
fn reserve_disjointness() {
    common::reserve_disjointness(&mut MemoryContainer::new());
}

#[test]
fn size_matches_ids() {
    common::size_matches_ids(&mut MemoryContainer::new(), b"x");
}

#[test]
fn hole_reuse() {
    let mut c = MemoryContainer::new();
    let a = c.insert(&Block::from_bytes(vec![1]), true).unwrap();
    let _b = c.insert(&Block::from_bytes(vec![2]), true).unwrap();
    let _d = c.insert(&Block::from_bytes(vec![3]), true).unwrap();
    c.remove(a).unwrap();
    let reused = c.reserve(None).unwrap();
    assert_eq!(reused, a);
}

#[test]
fn cloned_handle_shares_state() {
    let mut c = MemoryContainer::new();
    let id = c.insert(&Block::from_bytes(vec![9, 9]), true).unwrap();
    let mut other = c.clone();
    assert_eq!(other.get(id, true).unwrap().as_bytes(), [9, 9]);
    other.update(id, &Block::from_bytes(vec![1]), true).unwrap();
    assert_eq!(c.get(id, true).unwrap().as_bytes(), [1]);
}
