// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

/// Error taxonomy for every container in this crate.
///
/// Nothing here is locally recoverable: every variant is meant to propagate
/// to the caller via `?`. See the module-level docs in [`crate`] for the
/// propagation policy.
#[derive(Debug, Error)]
pub enum StorageError {
    /// `get`/`update`/`remove`/`unfix` targeted an id whose slot fails the
    /// required precondition.
    #[error("no such id: {0}")]
    NotFound(u64),

    /// `update` payload exceeds the container's block size.
    #[error("block of size {size} exceeds block size {block_size}")]
    TooLarge { size: usize, block_size: usize },

    /// Iterator `remove` without a preceding `next`, `unfix` of a non-fixed
    /// id, or any other call made outside of its required state.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// The codec collaborator failed to encode or decode a value.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Any I/O failure from the filesystem or raw-device collaborator.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),

    #[error("{0}")]
    Other(String),
}

impl PartialEq for StorageError {
    fn eq(&self, other: &Self) -> bool {
        use StorageError::*;
        match (self, other) {
            (NotFound(a), NotFound(b)) => a == b,
            (TooLarge { size: a, block_size: b }, TooLarge { size: c, block_size: d }) => {
                a == c && b == d
            }
            (IllegalState(a), IllegalState(b)) => a == b,
            (Encoding(a), Encoding(b)) => a == b,
            (Io(_), Io(_)) => true,
            (TryFromInt(_), TryFromInt(_)) => true,
            (Other(a), Other(b)) => a == b,
            _ => false,
        }
    }
}

impl From<StorageError> for String {
    fn from(e: StorageError) -> Self {
        e.to_string()
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
