// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Filesystem primitives as an injected collaborator. The default
//! implementation runs over `std::fs`/`std::io`; tests and alternative
//! backends (an in-memory scratch disk, say) can supply their own
//! [`FilesystemOps`] impl instead.
//!
//! No process-wide singleton is exposed: call [`std_filesystem_ops`] to
//! obtain one.

use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// A random-access file handle: seek, length, truncate/grow, read, write,
/// close.
pub trait RandomAccessFile {
    fn seek(&mut self, pos: u64) -> Result<()>;
    fn length(&mut self) -> Result<u64>;
    fn set_length(&mut self, len: u64) -> Result<()>;
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;
    fn write_all(&mut self, buf: &[u8]) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
    fn close(self) -> Result<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// Injected filesystem operations: open, existence checks, rename, delete.
pub trait FilesystemOps {
    type File: RandomAccessFile;

    fn open(&self, path: &Path, create: bool) -> Result<Self::File>;
    fn exists(&self, path: &Path) -> bool;
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;
    fn delete(&self, path: &Path) -> Result<()>;
}

/// A [`RandomAccessFile`] backed by `std::fs::File`.
pub struct StdRandomAccessFile {
    file: File,
}

impl RandomAccessFile for StdRandomAccessFile {
    fn seek(&mut self, pos: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    fn length(&mut self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_length(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        Read::read_exact(&mut self.file, buf)?;
        Ok(())
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        Write::write_all(&mut self.file, buf)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Write::flush(&mut self.file)?;
        Ok(())
    }
}

/// Default [`FilesystemOps`] over `std::fs`.
///
/// Usage:
/// ```no_run
/// use block_store::fs_ops::{std_filesystem_ops, FilesystemOps};
///
/// let fs = std_filesystem_ops();
/// let handle = fs.open(std::path::Path::new("/tmp/example.dat"), true).unwrap();
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFilesystemOps;

pub fn std_filesystem_ops() -> StdFilesystemOps {
    StdFilesystemOps
}

impl FilesystemOps for StdFilesystemOps {
    type File = StdRandomAccessFile;

    fn open(&self, path: &Path, create: bool) -> Result<Self::File> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(path)?;
        Ok(StdRandomAccessFile { file })
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        std::fs::rename(from, to)?;
        Ok(())
    }

    fn delete(&self, path: &Path) -> Result<()> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}
