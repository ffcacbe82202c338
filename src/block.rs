// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::error::{Result, StorageError};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Opaque, container-minted integer handle. Internally always carried as a
/// `u64`; a container's [`IdWidth`] bounds which values are legal for its
/// particular on-disk or on-device id codec.
pub type Id = u64;

/// Sentinel pointer reserved by the multi-block layer to mark a chain's last
/// physical block: the value `-1 - L` (as a signed 64-bit integer) encodes
/// the chain's logical length `L`. See [`crate::multi_block`].
pub const CHAIN_SENTINEL_BASE: i64 = -1;

pub fn encode_sentinel(logical_len: u64) -> Result<i64> {
    let len = i64::try_from(logical_len)?;
    len.checked_neg()
        .and_then(|n| n.checked_sub(1))
        .ok_or_else(|| StorageError::Other("logical length overflows sentinel encoding".into()))
}

pub fn decode_sentinel(pointer: i64) -> u64 {
    debug_assert!(pointer < 0, "decode_sentinel called on a non-terminal pointer");
    (-1 - pointer) as u64
}

/// The width, in bytes, of a container's id codec. A container exposes
/// exactly one of these widths and a fixed-size encoder/decoder for it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IdWidth {
    One = 1,
    Two = 2,
    Four = 4,
    Eight = 8,
}

impl IdWidth {
    pub fn bytes(self) -> usize {
        self as usize
    }

    pub fn max_value(self) -> u64 {
        match self {
            IdWidth::One => u8::MAX as u64,
            IdWidth::Two => u16::MAX as u64,
            IdWidth::Four => u32::MAX as u64,
            IdWidth::Eight => u64::MAX,
        }
    }
}

/// Byte order used by a fixed-size id codec. Block-file layouts are
/// big-endian; raw-device layouts are little-endian.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

/// Fixed-size codec for a container's id type, as exposed by a container's
/// `id_codec`.
#[derive(Copy, Clone, Debug)]
pub struct IdCodec {
    pub width: IdWidth,
    pub endian: Endian,
}

impl IdCodec {
    pub const fn new(width: IdWidth, endian: Endian) -> Self {
        Self { width, endian }
    }

    pub fn encode(&self, id: Id) -> Vec<u8> {
        let mut buf = vec![0u8; 8];
        match self.endian {
            Endian::Big => BigEndian::write_u64(&mut buf, id),
            Endian::Little => LittleEndian::write_u64(&mut buf, id),
        }
        let n = self.width.bytes();
        match self.endian {
            Endian::Big => buf[8 - n..].to_vec(),
            Endian::Little => buf[..n].to_vec(),
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Id> {
        let n = self.width.bytes();
        if bytes.len() < n {
            return Err(StorageError::Other("id buffer too short".into()));
        }
        let mut buf = [0u8; 8];
        match self.endian {
            Endian::Big => buf[8 - n..].copy_from_slice(&bytes[..n]),
            Endian::Little => buf[..n].copy_from_slice(&bytes[..n]),
        }
        Ok(match self.endian {
            Endian::Big => BigEndian::read_u64(&buf),
            Endian::Little => LittleEndian::read_u64(&buf),
        })
    }
}

/// A contiguous byte region: a backing buffer, an offset, and a size.
/// Immutable in identity — its bytes are mutated only by an owning
/// container, never through a `Block` handle shared across owners.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    buffer: Vec<u8>,
    offset: usize,
    size: usize,
}

impl Block {
    /// Builds a block view over `buffer[offset..offset+size]`.
    pub fn new(buffer: Vec<u8>, offset: usize, size: usize) -> Result<Self> {
        if offset.checked_add(size).map(|end| end > buffer.len()).unwrap_or(true) {
            return Err(StorageError::Other(format!(
                "block of size {size} at offset {offset} does not fit in a buffer of length {}",
                buffer.len()
            )));
        }
        Ok(Self { buffer, offset, size })
    }

    /// Wraps the entirety of `bytes` as a zero-offset block.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let size = bytes.len();
        Self { buffer: bytes, offset: 0, size }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[self.offset..self.offset + self.size]
    }

    pub fn into_bytes(self) -> Vec<u8> {
        if self.offset == 0 && self.size == self.buffer.len() {
            self.buffer
        } else {
            self.as_bytes().to_vec()
        }
    }

    /// Returns a block padded (or truncated) to exactly `len` bytes, copying
    /// into a scratch array only when the current view is shorter — the same
    /// "copy into scratch if the backing buffer is too small" rule the
    /// block-file container applies before writing a fixed-size slot.
    pub fn padded_to(&self, len: usize) -> Vec<u8> {
        let bytes = self.as_bytes();
        if bytes.len() == len {
            return bytes.to_vec();
        }
        let mut out = vec![0u8; len];
        let n = bytes.len().min(len);
        out[..n].copy_from_slice(&bytes[..n]);
        out
    }
}
