// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! An in-process [`Container`] over a `HashMap`. Used as a lightweight
//! fixture for exercising the decorators without touching a filesystem, and
//! as a minimal worked example of the `Container` contract.

use crate::block::{Block, Endian, Id, IdCodec, IdWidth};
use crate::container::Container;
use crate::error::{Result, StorageError};
use crate::metrics;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Slot {
    reserved: bool,
    updated: bool,
}

/// A thread-safe, in-memory [`Container`]. Ids are handed out sequentially
/// starting at 0; removed ids are recycled LIFO, mirroring the free-list
/// behavior of the file-backed containers (P5).
#[derive(Debug, Default, Clone)]
pub struct MemoryContainer {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    slots: HashMap<Id, Slot>,
    blocks: HashMap<Id, Block>,
    free_list: Vec<Id>,
    next_id: Id,
}

impl MemoryContainer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Container for MemoryContainer {
    fn id_codec(&self) -> IdCodec {
        IdCodec::new(IdWidth::Eight, Endian::Big)
    }

    fn block_size(&self) -> usize {
        usize::MAX
    }

    fn reserve(&mut self, _factory: Option<&mut dyn FnMut() -> Block>) -> Result<Id> {
        let mut inner = self.inner.write();
        let id = if let Some(id) = inner.free_list.pop() {
            id
        } else {
            let id = inner.next_id;
            inner.next_id += 1;
            id
        };
        inner.slots.insert(
            id,
            Slot {
                reserved: true,
                updated: false,
            },
        );
        metrics::CONTAINER_RESERVE_TOTAL
            .with_label_values(&["memory"])
            .inc();
        Ok(id)
    }

    fn contains(&mut self, id: Id) -> Result<bool> {
        Ok(self
            .inner
            .read()
            .slots
            .get(&id)
            .map(|s| s.updated)
            .unwrap_or(false))
    }

    fn is_used(&mut self, id: Id) -> Result<bool> {
        Ok(self
            .inner
            .read()
            .slots
            .get(&id)
            .map(|s| s.reserved)
            .unwrap_or(false))
    }

    fn get(&mut self, id: Id, _unfix: bool) -> Result<Block> {
        let inner = self.inner.read();
        if !inner.slots.get(&id).map(|s| s.updated).unwrap_or(false) {
            return Err(StorageError::NotFound(id));
        }
        Ok(inner.blocks.get(&id).expect("updated slot must have a block").clone())
    }

    fn update(&mut self, id: Id, block: &Block, _unfix: bool) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.slots.get_mut(&id) {
            Some(slot) if slot.reserved => slot.updated = true,
            _ => return Err(StorageError::NotFound(id)),
        }
        inner.blocks.insert(id, block.clone());
        metrics::BLOCK_SIZE_BYTES.observe(block.size() as f64);
        Ok(())
    }

    fn remove(&mut self, id: Id) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.slots.get(&id) {
            Some(s) if s.reserved => {}
            _ => return Err(StorageError::NotFound(id)),
        }
        inner.slots.remove(&id);
        inner.blocks.remove(&id);
        inner.free_list.push(id);
        metrics::CONTAINER_REMOVE_TOTAL
            .with_label_values(&["memory"])
            .inc();
        Ok(())
    }

    fn ids(&mut self) -> Box<dyn Iterator<Item = Id>> {
        let inner = self.inner.read();
        let mut ids: Vec<Id> = inner
            .slots
            .iter()
            .filter(|(_, s)| s.reserved)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        Box::new(ids.into_iter())
    }

    fn size(&mut self) -> usize {
        self.inner.read().slots.values().filter(|s| s.reserved).count()
    }

    fn reset(&mut self) -> Result<()> {
        let mut inner = self.inner.write();
        inner.slots.clear();
        inner.blocks.clear();
        inner.free_list.clear();
        inner.next_id = 0;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn delete(&mut self) -> Result<()> {
        self.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_disjointness() {
        let mut c = MemoryContainer::new();
        let a = c.reserve(None).unwrap();
        let b = c.reserve(None).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn insert_get_roundtrip() {
        let mut c = MemoryContainer::new();
        let block = Block::from_bytes(vec![1, 2, 3, 4]);
        let id = c.insert(&block, true).unwrap();
        assert_eq!(c.get(id, true).unwrap().as_bytes(), &[1, 2, 3, 4]);
    }

    #[test]
    fn remove_invalidates() {
        let mut c = MemoryContainer::new();
        let id = c.insert(&Block::from_bytes(vec![9]), true).unwrap();
        c.remove(id).unwrap();
        assert!(!c.contains(id).unwrap());
        assert!(!c.is_used(id).unwrap());
        assert!(c.get(id, true).is_err());
    }

    #[test]
    fn hole_reuse() {
        let mut c = MemoryContainer::new();
        let a = c.insert(&Block::from_bytes(vec![1]), true).unwrap();
        let _b = c.insert(&Block::from_bytes(vec![2]), true).unwrap();
        c.remove(a).unwrap();
        let c2 = c.reserve(None).unwrap();
        assert_eq!(a, c2);
    }

    #[test]
    fn size_matches_ids() {
        let mut c = MemoryContainer::new();
        for i in 0..5u8 {
            c.insert(&Block::from_bytes(vec![i]), true).unwrap();
        }
        assert_eq!(c.size(), c.ids().count());
    }
}
