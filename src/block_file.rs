// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Fixed-size block file backend: five coordinated files sharing a common
//! path prefix.
//!
//! ```text
//! <prefix>.mtd   metadata:      u32 blockSize, u32 size              (BE)
//! <prefix>.rbm   reserved bitmap, 1 bit per block, LSB-first in byte
//! <prefix>.ubm   updated bitmap,  same encoding
//! <prefix>.flt   free list: a stack of 8-byte signed BE offsets
//! <prefix>.ctr   data: fixed-size blocks back to back
//! ```
//!
//! A legacy single-file layout (`<prefix>.fat`) is migrated in place the
//! first time the container is opened against it (see `migrate_legacy_if_needed`).

use crate::bitset;
use crate::block::{Block, Endian, Id, IdCodec, IdWidth};
use crate::container::Container;
use crate::error::{Result, StorageError};
use crate::fs_ops::{std_filesystem_ops, FilesystemOps, RandomAccessFile, StdFilesystemOps};
use crate::metrics;
use byteorder::{BigEndian, ByteOrder};
use std::path::{Path, PathBuf};

const METADATA_TRAILER_LEN: u64 = 16; // blockSize:i32, size:i32, maxOffset:i64

struct Handles<H> {
    mtd: H,
    rbm: H,
    ubm: H,
    flt: H,
    ctr: H,
}

/// A fixed-size block store over five coordinated files.
pub struct BlockFileContainer<F: FilesystemOps = StdFilesystemOps> {
    fs: F,
    prefix: PathBuf,
    block_size: u32,
    handles: Option<Handles<F::File>>,
}

impl BlockFileContainer<StdFilesystemOps> {
    /// Opens (or creates) a block-file container at `prefix` with the given
    /// block size. `block_size` is only authoritative for a fresh store —
    /// an existing `.mtd` file overrides it on first use.
    pub fn open<P: AsRef<Path>>(prefix: P, block_size: u32) -> Self {
        Self::open_with(std_filesystem_ops(), prefix, block_size)
    }
}

impl<F: FilesystemOps> BlockFileContainer<F> {
    pub fn open_with<P: AsRef<Path>>(fs: F, prefix: P, block_size: u32) -> Self {
        Self {
            fs,
            prefix: prefix.as_ref().to_path_buf(),
            block_size,
            handles: None,
        }
    }

    fn path(&self, ext: &str) -> PathBuf {
        let mut p = self.prefix.clone();
        let name = p
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        p.set_file_name(format!("{}.{ext}", name.to_string_lossy()));
        p
    }

    fn read_whole(handle: &mut F::File) -> Result<Vec<u8>> {
        let len = handle.length()? as usize;
        let mut buf = vec![0u8; len];
        handle.seek(0)?;
        handle.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_whole(handle: &mut F::File, bytes: &[u8]) -> Result<()> {
        handle.set_length(bytes.len() as u64)?;
        handle.seek(0)?;
        handle.write_all(bytes)?;
        handle.flush()?;
        Ok(())
    }

    fn migrate_legacy_if_needed(&mut self) -> Result<()> {
        let fat_path = self.path("fat");
        let ubm_path = self.path("ubm");
        if !self.fs.exists(&fat_path) || self.fs.exists(&ubm_path) {
            return Ok(());
        }
        log::info!("migrating legacy block-file layout at {:?}", self.prefix);

        let mut fat = self.fs.open(&fat_path, false)?;
        let fat_len = fat.length()?;
        if fat_len < METADATA_TRAILER_LEN {
            return Err(StorageError::Other(
                "legacy .fat file shorter than its trailer".into(),
            ));
        }
        let mut trailer = [0u8; METADATA_TRAILER_LEN as usize];
        fat.seek(fat_len - METADATA_TRAILER_LEN)?;
        fat.read_exact(&mut trailer)?;
        let block_size = BigEndian::read_i32(&trailer[0..4]);
        let size = BigEndian::read_i32(&trailer[4..8]);
        // maxOffset occupies trailer[8..16]; superseded by the data file's
        // own length post-migration and not otherwise needed.

        fat.set_length(fat_len - METADATA_TRAILER_LEN)?;
        let bitmap_bytes = Self::read_whole(&mut fat)?;
        fat.close()?;
        self.fs.rename(&fat_path, &ubm_path)?;

        let mut rbm = self.fs.open(&self.path("rbm"), true)?;
        Self::write_whole(&mut rbm, &bitmap_bytes)?;
        rbm.close()?;

        let mut mtd = self.fs.open(&self.path("mtd"), true)?;
        let mut trailer_out = [0u8; 8];
        BigEndian::write_u32(&mut trailer_out[0..4], block_size as u32);
        BigEndian::write_u32(&mut trailer_out[4..8], size as u32);
        Self::write_whole(&mut mtd, &trailer_out)?;
        mtd.close()?;

        log::info!("legacy migration complete for {:?}", self.prefix);
        Ok(())
    }

    fn ensure_open(&mut self) -> Result<&mut Handles<F::File>> {
        if self.handles.is_none() {
            self.migrate_legacy_if_needed()?;

            let mtd_path = self.path("mtd");
            let fresh = !self.fs.exists(&mtd_path);

            let mut mtd = self.fs.open(&mtd_path, true)?;
            let rbm = self.fs.open(&self.path("rbm"), true)?;
            let ubm = self.fs.open(&self.path("ubm"), true)?;
            let flt = self.fs.open(&self.path("flt"), true)?;
            let ctr = self.fs.open(&self.path("ctr"), true)?;

            if fresh {
                let mut header = [0u8; 8];
                BigEndian::write_u32(&mut header[0..4], self.block_size);
                BigEndian::write_u32(&mut header[4..8], 0);
                Self::write_whole(&mut mtd, &header)?;
            } else {
                let header = Self::read_whole(&mut mtd)?;
                if header.len() >= 8 {
                    self.block_size = BigEndian::read_u32(&header[0..4]);
                }
            }

            self.handles = Some(Handles { mtd, rbm, ubm, flt, ctr });
            log::debug!("opened block-file container at {:?}", self.prefix);
        }
        Ok(self.handles.as_mut().expect("just initialized"))
    }

    fn num_blocks(&mut self) -> Result<u64> {
        let block_size = self.block_size as u64;
        let handles = self.ensure_open()?;
        Ok(handles.ctr.length()? / block_size)
    }

    fn set_reserved(&mut self, index: u64, value: bool) -> Result<()> {
        let handles = self.ensure_open()?;
        let mut bm = Self::read_whole(&mut handles.rbm)?;
        bitset::set_bit(&mut bm, index, value);
        Self::write_whole(&mut handles.rbm, &bm)
    }

    fn set_updated(&mut self, index: u64, value: bool) -> Result<()> {
        let handles = self.ensure_open()?;
        let mut bm = Self::read_whole(&mut handles.ubm)?;
        bitset::set_bit(&mut bm, index, value);
        Self::write_whole(&mut handles.ubm, &bm)
    }

    fn is_reserved_index(&mut self, index: u64) -> Result<bool> {
        let handles = self.ensure_open()?;
        let bm = Self::read_whole(&mut handles.rbm)?;
        Ok(bitset::get_bit(&bm, index))
    }

    fn is_updated_index(&mut self, index: u64) -> Result<bool> {
        let handles = self.ensure_open()?;
        let bm = Self::read_whole(&mut handles.ubm)?;
        Ok(bitset::get_bit(&bm, index))
    }

    fn is_reserved(&mut self, id: Id) -> Result<bool> {
        let block_size = self.block_size as u64;
        self.is_reserved_index(id / block_size)
    }

    fn is_updated(&mut self, id: Id) -> Result<bool> {
        let block_size = self.block_size as u64;
        self.is_updated_index(id / block_size)
    }

    fn push_free(&mut self, offset: Id) -> Result<()> {
        let handles = self.ensure_open()?;
        let mut buf = [0u8; 8];
        BigEndian::write_i64(&mut buf, offset as i64);
        let cur = handles.flt.length()?;
        handles.flt.seek(cur)?;
        handles.flt.write_all(&buf)?;
        handles.flt.flush()
    }

    fn pop_free(&mut self) -> Result<Option<Id>> {
        let handles = self.ensure_open()?;
        let len = handles.flt.length()?;
        if len < 8 {
            return Ok(None);
        }
        let mut buf = [0u8; 8];
        handles.flt.seek(len - 8)?;
        handles.flt.read_exact(&mut buf)?;
        handles.flt.set_length(len - 8)?;
        Ok(Some(BigEndian::read_i64(&buf) as u64))
    }

    fn write_metadata(&mut self) -> Result<()> {
        let size = self.size() as u32;
        let block_size = self.block_size;
        let handles = self.ensure_open()?;
        let mut header = [0u8; 8];
        BigEndian::write_u32(&mut header[0..4], block_size);
        BigEndian::write_u32(&mut header[4..8], size);
        Self::write_whole(&mut handles.mtd, &header)
    }
}

impl<F: FilesystemOps> Container for BlockFileContainer<F> {
    fn id_codec(&self) -> IdCodec {
        IdCodec::new(IdWidth::Eight, Endian::Big)
    }

    fn block_size(&self) -> usize {
        self.block_size as usize
    }

    fn reserve(&mut self, _factory: Option<&mut dyn FnMut() -> Block>) -> Result<Id> {
        let block_size = self.block_size as u64;
        let num_blocks = self.num_blocks()?;

        let offset = loop {
            match self.pop_free()? {
                Some(candidate) if candidate / block_size < num_blocks => break candidate,
                Some(_) => continue, // stale entry past the current tail, discard
                None => {
                    let handles = self.ensure_open()?;
                    let new_offset = handles.ctr.length()?;
                    handles.ctr.set_length(new_offset + block_size)?;
                    break new_offset;
                }
            }
        };

        let index = offset / block_size;
        self.set_reserved(index, true)?;
        metrics::CONTAINER_RESERVE_TOTAL
            .with_label_values(&["block_file"])
            .inc();
        Ok(offset)
    }

    fn contains(&mut self, id: Id) -> Result<bool> {
        self.is_updated(id)
    }

    fn is_used(&mut self, id: Id) -> Result<bool> {
        self.is_reserved(id)
    }

    fn get(&mut self, id: Id, _unfix: bool) -> Result<Block> {
        let block_size = self.block_size as usize;
        if !self.is_updated(id)? {
            return Err(StorageError::NotFound(id));
        }
        let handles = self.ensure_open()?;
        let mut buf = vec![0u8; block_size];
        handles.ctr.seek(id)?;
        handles.ctr.read_exact(&mut buf)?;
        Block::new(buf, 0, block_size)
    }

    fn update(&mut self, id: Id, block: &Block, _unfix: bool) -> Result<()> {
        let block_size = self.block_size as usize;
        if block.size() > block_size {
            return Err(StorageError::TooLarge {
                size: block.size(),
                block_size,
            });
        }
        if !self.is_reserved(id)? {
            return Err(StorageError::NotFound(id));
        }
        let bytes = block.padded_to(block_size);
        let handles = self.ensure_open()?;
        handles.ctr.seek(id)?;
        handles.ctr.write_all(&bytes)?;
        handles.ctr.flush()?;
        let index = id / block_size as u64;
        self.set_updated(index, true)?;
        metrics::BLOCK_SIZE_BYTES.observe(block.size() as f64);
        Ok(())
    }

    fn remove(&mut self, id: Id) -> Result<()> {
        let block_size = self.block_size as u64;
        if !self.is_reserved(id)? {
            return Err(StorageError::NotFound(id));
        }
        let index = id / block_size;
        let num_blocks = self.num_blocks()?;
        let tail_index = num_blocks - 1;

        self.set_reserved(index, false)?;
        self.set_updated(index, false)?;

        if index == tail_index {
            // Walk backwards to the new tail, compacting the data file and
            // both bitmaps to match (I5).
            let mut new_tail: Option<u64> = None;
            let mut i = index;
            while i > 0 {
                i -= 1;
                if self.is_reserved_index(i)? {
                    new_tail = Some(i);
                    break;
                }
            }
            let handles = self.ensure_open()?;
            match new_tail {
                Some(i) => {
                    handles.ctr.set_length((i + 1) * block_size)?;
                    let mut rbm = Self::read_whole(&mut handles.rbm)?;
                    let mut ubm = Self::read_whole(&mut handles.ubm)?;
                    bitset::truncate_to(&mut rbm, i + 1);
                    bitset::truncate_to(&mut ubm, i + 1);
                    Self::write_whole(&mut handles.rbm, &rbm)?;
                    Self::write_whole(&mut handles.ubm, &ubm)?;
                }
                None => {
                    handles.ctr.set_length(0)?;
                    Self::write_whole(&mut handles.rbm, &[])?;
                    Self::write_whole(&mut handles.ubm, &[])?;
                }
            }
        } else {
            self.push_free(id)?;
        }

        metrics::CONTAINER_REMOVE_TOTAL
            .with_label_values(&["block_file"])
            .inc();
        Ok(())
    }

    fn ids(&mut self) -> Box<dyn Iterator<Item = Id>> {
        let block_size = self.block_size as u64;
        let num_blocks = self.num_blocks().unwrap_or(0);
        let bm = self
            .ensure_open()
            .and_then(|h| Self::read_whole(&mut h.rbm))
            .unwrap_or_default();
        let ids: Vec<Id> = bitset::iter_set(&bm, num_blocks)
            .map(|i| i * block_size)
            .collect();
        Box::new(ids.into_iter())
    }

    fn size(&mut self) -> usize {
        let bm = self
            .ensure_open()
            .and_then(|h| Self::read_whole(&mut h.rbm))
            .unwrap_or_default();
        bitset::count_set(&bm)
    }

    fn reset(&mut self) -> Result<()> {
        let handles = self.ensure_open()?;
        handles.ctr.set_length(0)?;
        Self::write_whole(&mut handles.rbm, &[])?;
        Self::write_whole(&mut handles.ubm, &[])?;
        Self::write_whole(&mut handles.flt, &[])?;
        self.write_metadata()
    }

    fn close(&mut self) -> Result<()> {
        if self.handles.is_some() {
            self.write_metadata()?;
            self.handles = None;
            log::debug!("closed block-file container at {:?}", self.prefix);
        }
        Ok(())
    }

    fn delete(&mut self) -> Result<()> {
        self.close()?;
        for ext in ["mtd", "rbm", "ubm", "flt", "ctr", "fat"] {
            self.fs.delete(&self.path(ext))?;
        }
        Ok(())
    }
}
