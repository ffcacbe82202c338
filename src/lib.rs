// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! A pluggable, layered block storage engine.
//!
//! The core abstraction is [`container::Container`]: a byte-block store
//! keyed by opaque ids, addressed through `reserve`/`get`/`update`/`remove`.
//! Every concrete storage strategy — an in-memory fixture
//! ([`memory::MemoryContainer`]), a fixed-record file
//! ([`block_file::BlockFileContainer`]), a raw sector device
//! ([`raw_access::RawAccessContainer`]) — implements it identically, and the
//! decorators ([`multi_block::MultiBlockContainer`],
//! [`buffered::BufferedContainer`], [`converter::ConverterContainer`]) wrap
//! one `Container` (or two, for chaining) to add a capability the base
//! containers don't have. Composition is plain type parameterization: stack
//! decorators by nesting generic parameters, not by subclassing.
//!
//! Errors propagate via [`error::StorageError`]; nothing in this crate
//! swallows or retries a failure internally.

pub mod bitset;
pub mod block;
pub mod block_file;
pub mod buffered;
pub mod container;
pub mod converter;
pub mod error;
pub mod fs_ops;
pub mod memory;
pub mod metrics;
pub mod multi_block;
pub mod raw_access;

pub use block::{Block, Id, IdCodec};
pub use container::{Container, ValueContainer};
pub use error::{Result, StorageError};
