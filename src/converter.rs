// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Adapts a byte-block [`Container`] to a typed-value [`ValueContainer`] via
//! an injected codec.

use crate::block::{Block, Id, IdCodec};
use crate::container::{Container, ValueContainer};
use crate::error::Result;
use std::marker::PhantomData;

/// Encodes/decodes values of type `V` to and from bytes. `encoded_size` is an
/// optional fast path for fixed-size codecs that can report a value's
/// encoded length without actually encoding it.
pub trait Codec<V> {
    fn encode(&self, value: &V) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<V>;

    fn encoded_size(&self, _value: &V) -> Option<usize> {
        None
    }
}

/// The output-byte builder strategy. The three modes must produce
/// byte-identical output for the same input and codec — they exist only so
/// callers can hint which buffer strategy the inner container should
/// prefer, not to change the encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializationMode {
    ByteArray,
    ByteBuffer,
    Unsafe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConverterConfig {
    pub serialization_mode: SerializationMode,
    pub buffer_size: usize,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            serialization_mode: SerializationMode::ByteArray,
            buffer_size: 0,
        }
    }
}

/// Wraps a byte-block [`Container`] `C` behind a [`ValueContainer<V>`]
/// interface, using `Cd: Codec<V>` to move between the two.
pub struct ConverterContainer<C, Cd, V> {
    inner: C,
    codec: Cd,
    config: ConverterConfig,
    _value: PhantomData<fn() -> V>,
}

impl<C: Container, Cd: Codec<V>, V> ConverterContainer<C, Cd, V> {
    pub fn new(inner: C, codec: Cd) -> Self {
        Self::with_config(inner, codec, ConverterConfig::default())
    }

    pub fn with_config(inner: C, codec: Cd, config: ConverterConfig) -> Self {
        Self {
            inner,
            codec,
            config,
            _value: PhantomData,
        }
    }

    fn encode_block(&self, value: &V) -> Result<Block> {
        // The three serialization modes differ only in which buffer strategy
        // they'd use to assemble `bytes`; since the codec already hands back
        // a finished `Vec<u8>` there is nothing left for the mode to change,
        // so `config` only needs to be read here for the size hint.
        let mut bytes = self.codec.encode(value)?;
        if bytes.capacity() < self.config.buffer_size {
            bytes.reserve(self.config.buffer_size - bytes.capacity());
        }
        Ok(Block::from_bytes(bytes))
    }

    /// Encodes every value in `values` and submits a batch insert to the
    /// wrapped container. `C` has no batch-insert primitive in this crate, so
    /// this falls back to one `insert` per value — still useful as a single
    /// call site for callers that don't care about the underlying container.
    pub fn flush_array_of_blocks(&mut self, values: &[V]) -> Result<Vec<Id>> {
        values
            .iter()
            .map(|v| {
                let block = self.encode_block(v)?;
                self.inner.insert(&block, true)
            })
            .collect()
    }
}

impl<C: Container, Cd: Codec<V>, V> ValueContainer<V> for ConverterContainer<C, Cd, V> {
    fn id_codec(&self) -> IdCodec {
        self.inner.id_codec()
    }

    fn reserve(&mut self, factory: Option<&mut dyn FnMut() -> V>) -> Result<Id> {
        match factory {
            None => self.inner.reserve(None),
            Some(f) => {
                // Best-effort: the wrapped container's factory closure has no
                // way to propagate an encoding failure, so a value that fails
                // to encode here sizes the allocation as empty instead.
                let codec = &self.codec;
                let mut adapt = || -> Block {
                    let value = f();
                    codec
                        .encode(&value)
                        .map(Block::from_bytes)
                        .unwrap_or_else(|_| Block::from_bytes(Vec::new()))
                };
                self.inner.reserve(Some(&mut adapt))
            }
        }
    }

    fn contains(&mut self, id: Id) -> Result<bool> {
        self.inner.contains(id)
    }

    fn is_used(&mut self, id: Id) -> Result<bool> {
        self.inner.is_used(id)
    }

    fn get(&mut self, id: Id, unfix: bool) -> Result<V> {
        let block = self.inner.get(id, unfix)?;
        self.codec.decode(block.as_bytes())
    }

    fn update(&mut self, id: Id, value: &V, unfix: bool) -> Result<()> {
        let block = self.encode_block(value)?;
        self.inner.update(id, &block, unfix)
    }

    fn remove(&mut self, id: Id) -> Result<()> {
        self.inner.remove(id)
    }

    fn ids(&mut self) -> Box<dyn Iterator<Item = Id>> {
        self.inner.ids()
    }

    fn size(&mut self) -> usize {
        self.inner.size()
    }

    fn clear(&mut self) -> Result<()> {
        self.inner.clear()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }

    fn delete(&mut self) -> Result<()> {
        self.inner.delete()
    }

    fn insert(&mut self, value: &V, unfix: bool) -> Result<Id> {
        let block = self.encode_block(value)?;
        self.inner.insert(&block, unfix)
    }
}
