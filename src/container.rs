// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The single trait every layer of the storage engine implements. Stacking
//! is plain type parameterization — `BufferedContainer<BlockFileContainer>`,
//! `MultiBlockContainer<BlockFileContainer, BlockFileContainer>` — rather
//! than inheritance.

use crate::block::{Block, Id, IdCodec};
use crate::error::Result;

/// A byte-block store keyed by opaque ids. Every container in this crate —
/// file-backed, raw-device, multi-block, buffered, in-memory — implements
/// this trait identically.
pub trait Container {
    /// The id width and byte order this container's ids are encoded with.
    fn id_codec(&self) -> IdCodec;

    /// The fixed physical block size this container stores, in bytes.
    /// Unbounded containers (the in-memory fixture) return `usize::MAX`.
    fn block_size(&self) -> usize;

    /// Reserves a fresh id in state `(R=1, U=0)`. `factory`, when given, is
    /// a thunk that *may* be invoked by decorators needing a materialized
    /// object to size the allocation; base containers ignore it.
    fn reserve(&mut self, factory: Option<&mut dyn FnMut() -> Block>) -> Result<Id>;

    /// `true` iff `id` is in state `U=1` (has been written at least once).
    ///
    /// Takes `&mut self` rather than `&self`: the file-backed containers
    /// lazily open their handles on first use (the "implicit reopen" rule), and
    /// probing a slot's state can be the first operation on a freshly
    /// constructed container.
    fn contains(&mut self, id: Id) -> Result<bool>;

    /// `true` iff `id` is in state `R=1` (reserved, with or without a write).
    fn is_used(&mut self, id: Id) -> Result<bool>;

    /// Returns the last-updated block for `id`. Requires `U=1`.
    fn get(&mut self, id: Id, unfix: bool) -> Result<Block>;

    /// Writes `block` at `id`, setting `U := 1`. Requires `R=1`.
    fn update(&mut self, id: Id, block: &Block, unfix: bool) -> Result<()>;

    /// Sets `(R,U) := (0,0)` and recycles `id` onto the free list.
    fn remove(&mut self, id: Id) -> Result<()>;

    /// Iterates `{i : R_i = 1}` in ascending order. Best-effort: the
    /// contract does not promise validity across a concurrent mutation: a
    /// caller that mutates mid-iteration must restart.
    fn ids(&mut self) -> Box<dyn Iterator<Item = Id>>;

    /// `|{i : R_i = 1}|`.
    fn size(&mut self) -> usize;

    /// Truncates all backing storage to empty, `size() == 0`.
    fn reset(&mut self) -> Result<()>;

    /// Synonym for `reset` at the container boundary (decorators may give
    /// `clear` extra behavior — evicting a cache, say).
    fn clear(&mut self) -> Result<()> {
        self.reset()
    }

    /// Flushes any buffered header/metadata and releases file handles.
    fn close(&mut self) -> Result<()>;

    /// Closes and removes all backing storage for this container.
    fn delete(&mut self) -> Result<()>;

    /// `reserve` then `update` in one call.
    fn insert(&mut self, block: &Block, unfix: bool) -> Result<Id> {
        let id = self.reserve(None)?;
        self.update(id, block, unfix)?;
        Ok(id)
    }

    /// Reverses one pin acquired by a prior `get`/`update` call made with
    /// `unfix == false`. Base containers that do not pin treat this as a
    /// no-op; [`crate::buffered::BufferedContainer`] gives it real meaning.
    fn unfix(&mut self, _id: Id) -> Result<()> {
        Ok(())
    }
}

/// A typed-value store keyed by opaque ids — the contract
/// [`crate::converter::ConverterContainer`] exposes over a wrapped
/// [`Container`].
pub trait ValueContainer<V> {
    fn id_codec(&self) -> IdCodec;

    fn reserve(&mut self, factory: Option<&mut dyn FnMut() -> V>) -> Result<Id>;
    fn contains(&mut self, id: Id) -> Result<bool>;
    fn is_used(&mut self, id: Id) -> Result<bool>;
    fn get(&mut self, id: Id, unfix: bool) -> Result<V>;
    fn update(&mut self, id: Id, value: &V, unfix: bool) -> Result<()>;
    fn remove(&mut self, id: Id) -> Result<()>;
    fn ids(&mut self) -> Box<dyn Iterator<Item = Id>>;
    fn size(&mut self) -> usize;
    fn clear(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
    fn delete(&mut self) -> Result<()>;

    fn insert(&mut self, value: &V, unfix: bool) -> Result<Id> {
        let id = self.reserve(None)?;
        self.update(id, value, unfix)?;
        Ok(id)
    }
}
