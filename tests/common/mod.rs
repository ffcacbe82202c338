// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Property checks shared across every `Container` implementation. Each
//! function takes a fresh container and exercises one property; callers
//! instantiate it per concrete container backend.

use block_store::{Block, Container};

/// Fixed-size backends return a full `block_size()`-sized block from `get`,
/// padded with trailing zero bytes beyond what was written, so only the
/// leading `payload.len()` bytes are compared here.
pub fn insert_get_roundtrip<C: Container>(c: &mut C, payload: &[u8]) {
    let id = c.insert(&Block::from_bytes(payload.to_vec()), true).unwrap();
    assert_eq!(&c.get(id, true).unwrap().as_bytes()[..payload.len()], payload);
}

pub fn update_idempotence<C: Container>(c: &mut C, first: &[u8], second: &[u8]) {
    let id = c.insert(&Block::from_bytes(first.to_vec()), true).unwrap();
    c.update(id, &Block::from_bytes(second.to_vec()), true).unwrap();
    assert_eq!(&c.get(id, true).unwrap().as_bytes()[..second.len()], second);
}

pub fn remove_invalidation<C: Container>(c: &mut C, payload: &[u8]) {
    let id = c.insert(&Block::from_bytes(payload.to_vec()), true).unwrap();
    c.remove(id).unwrap();
    assert!(!c.contains(id).unwrap());
    assert!(!c.is_used(id).unwrap());
    assert!(c.get(id, true).is_err());
}

pub fn reserve_disjointness<C: Container>(c: &mut C) {
    let a = c.reserve(None).unwrap();
    let b = c.reserve(None).unwrap();
    assert_ne!(a, b);
}

pub fn size_matches_ids<C: Container>(c: &mut C, payload: &[u8]) {
    c.insert(&Block::from_bytes(payload.to_vec()), true).unwrap();
    c.insert(&Block::from_bytes(payload.to_vec()), true).unwrap();
    let ids: Vec<_> = c.ids().collect();
    assert_eq!(ids.len(), c.size());
}
