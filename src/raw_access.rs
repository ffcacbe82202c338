// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Fixed-size block store over a raw sector device.
//!
//! ```text
//! sector 0            header: (size:u64, lastBlockIdx:i64, maxBlocks:u32,
//!                              maxFreeListSectors:u32, freeListSize:u32), LE
//! sectors 1..=M        free-list stack pages, M = maxFreeListSectors + 1
//! sectors M+1..=M+N    data region, N = maxBlocks
//! trailing sectors     reserved bitmap then updated bitmap, fully in-RAM
//!                      otherwise and only serialized here on close/open
//! ```
//!
//! Differs from [`crate::block_file::BlockFileContainer`] in several ways:
//! bitmaps live in memory rather than growing a
//! file per bit; the free list is paged through a single-sector write-back
//! cache instead of a whole-file read/write; `reset` never touches the
//! device; and a container forbids further use once `close`d rather than
//! implicitly reopening.

use crate::bitset;
use crate::block::{Block, Endian, Id, IdCodec, IdWidth};
use crate::container::Container;
use crate::error::{Result, StorageError};
use crate::metrics;
use byteorder::{ByteOrder, LittleEndian};

const HEADER_LEN: usize = 28;

/// The sector-addressable device a [`RawAccessContainer`] is built over.
/// `write` may span more than one sector at a time — `batch_insert` relies on
/// writing several payload sectors in a single contiguous call.
pub trait RawDevice {
    fn sector_size(&self) -> usize;
    fn num_sectors(&self) -> u64;
    fn read(&mut self, buf: &mut [u8], sector_idx: u64) -> Result<()>;
    fn write(&mut self, buf: &[u8], sector_idx: u64) -> Result<()>;
}

/// An in-memory [`RawDevice`], useful as a test fixture and as a worked
/// example of the trait, the raw-device analogue of [`crate::memory::MemoryContainer`].
pub struct MemoryRawDevice {
    sector_size: usize,
    bytes: Vec<u8>,
}

impl MemoryRawDevice {
    pub fn new(sector_size: usize, num_sectors: u64) -> Self {
        Self {
            sector_size,
            bytes: vec![0u8; sector_size * num_sectors as usize],
        }
    }
}

impl RawDevice for MemoryRawDevice {
    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn num_sectors(&self) -> u64 {
        (self.bytes.len() / self.sector_size) as u64
    }

    fn read(&mut self, buf: &mut [u8], sector_idx: u64) -> Result<()> {
        let start = sector_idx as usize * self.sector_size;
        let end = start + buf.len();
        if end > self.bytes.len() {
            return Err(StorageError::Other("read past the end of the device".into()));
        }
        buf.copy_from_slice(&self.bytes[start..end]);
        Ok(())
    }

    fn write(&mut self, buf: &[u8], sector_idx: u64) -> Result<()> {
        let start = sector_idx as usize * self.sector_size;
        let end = start + buf.len();
        if end > self.bytes.len() {
            return Err(StorageError::Other("write past the end of the device".into()));
        }
        self.bytes[start..end].copy_from_slice(buf);
        Ok(())
    }
}

struct FreeListPage {
    page: u64,
    bytes: Vec<u8>,
    dirty: bool,
}

pub struct RawAccessContainer<D> {
    device: D,
    sector_size: usize,
    max_blocks: u64,
    max_free_list_sectors: u64,
    last_block_idx: i64,
    free_list_size: u64,
    reserved: Vec<u8>,
    updated: Vec<u8>,
    free_list_cache: Option<FreeListPage>,
    closed: bool,
}

impl<D: RawDevice> RawAccessContainer<D> {
    /// Initializes a fresh container over `device`, sized for `max_blocks`
    /// data blocks and `max_free_list_sectors` free-list page sectors. Writes
    /// the header and (empty) bitmaps immediately so the device is
    /// consistent even if the caller never calls `close`.
    pub fn create(device: D, max_blocks: u32, max_free_list_sectors: u32) -> Result<Self> {
        let sector_size = device.sector_size();
        let mut container = Self {
            sector_size,
            max_blocks: max_blocks as u64,
            max_free_list_sectors: max_free_list_sectors as u64,
            last_block_idx: -1,
            free_list_size: 0,
            reserved: Vec::new(),
            updated: Vec::new(),
            free_list_cache: None,
            closed: false,
            device,
        };
        container.write_header()?;
        container.write_bitmaps()?;
        Ok(container)
    }

    /// Reopens a device previously written by [`Self::create`]/[`Container::close`],
    /// reading the header and trailing bitmaps back. The device self-describes
    /// `max_blocks`/`max_free_list_sectors`; no caller-supplied sizing is needed.
    pub fn open(mut device: D) -> Result<Self> {
        let sector_size = device.sector_size();
        let mut header = vec![0u8; HEADER_LEN];
        device.read(&mut header, 0)?;
        let size_count = LittleEndian::read_u64(&header[0..8]);
        let last_block_idx = LittleEndian::read_i64(&header[8..16]);
        let max_blocks = LittleEndian::read_u32(&header[16..20]) as u64;
        let max_free_list_sectors = LittleEndian::read_u32(&header[20..24]) as u64;
        let free_list_size = LittleEndian::read_u32(&header[24..28]) as u64;
        let _ = size_count; // re-derived from the bitmap on demand, not trusted blindly

        let mut container = Self {
            sector_size,
            max_blocks,
            max_free_list_sectors,
            last_block_idx,
            free_list_size,
            reserved: Vec::new(),
            updated: Vec::new(),
            free_list_cache: None,
            closed: false,
            device,
        };
        container.read_bitmaps()?;
        log::debug!("opened raw-access container, {} blocks in use", container.size());
        Ok(container)
    }

    fn m(&self) -> u64 {
        self.max_free_list_sectors + 1
    }

    fn data_sector(&self, id: Id) -> u64 {
        1 + self.m() + id
    }

    fn bitmap_bytes(&self) -> u64 {
        self.max_blocks.div_ceil(8)
    }

    fn trailing_start_sector(&self) -> u64 {
        1 + self.m() + self.max_blocks
    }

    fn trailing_sector_count(&self) -> u64 {
        (2 * self.bitmap_bytes()).div_ceil(self.sector_size as u64)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(StorageError::IllegalState(
                "raw-access container used after close".into(),
            ));
        }
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        let mut buf = vec![0u8; HEADER_LEN];
        LittleEndian::write_u64(&mut buf[0..8], bitset::count_set(&self.reserved) as u64);
        LittleEndian::write_i64(&mut buf[8..16], self.last_block_idx);
        LittleEndian::write_u32(&mut buf[16..20], self.max_blocks as u32);
        LittleEndian::write_u32(&mut buf[20..24], self.max_free_list_sectors as u32);
        LittleEndian::write_u32(&mut buf[24..28], self.free_list_size as u32);
        self.device.write(&buf, 0)
    }

    fn write_bitmaps(&mut self) -> Result<()> {
        let n = self.bitmap_bytes() as usize;
        let mut reserved = self.reserved.clone();
        reserved.resize(n, 0);
        let mut updated = self.updated.clone();
        updated.resize(n, 0);
        let mut buf = reserved;
        buf.extend_from_slice(&updated);
        buf.resize((self.trailing_sector_count() * self.sector_size as u64) as usize, 0);
        self.device.write(&buf, self.trailing_start_sector())
    }

    fn read_bitmaps(&mut self) -> Result<()> {
        let n = self.bitmap_bytes() as usize;
        let total = (self.trailing_sector_count() * self.sector_size as u64) as usize;
        let mut buf = vec![0u8; total];
        self.device.read(&mut buf, self.trailing_start_sector())?;
        self.reserved = buf[..n].to_vec();
        self.updated = buf[n..2 * n].to_vec();
        Ok(())
    }

    fn ids_per_page(&self) -> u64 {
        (self.sector_size / 8) as u64
    }

    fn free_list_page_sector(&self, page: u64) -> u64 {
        1 + page
    }

    fn load_free_list_page(&mut self, page: u64, may_flush: bool) -> Result<()> {
        if let Some(cache) = &self.free_list_cache {
            if cache.page == page {
                return Ok(());
            }
        }
        if may_flush {
            self.flush_free_list_cache()?;
        }
        let sector_size = self.sector_size;
        let mut bytes = vec![0u8; sector_size];
        self.device.read(&mut bytes, self.free_list_page_sector(page))?;
        self.free_list_cache = Some(FreeListPage {
            page,
            bytes,
            dirty: false,
        });
        Ok(())
    }

    fn flush_free_list_cache(&mut self) -> Result<()> {
        if let Some(cache) = &self.free_list_cache {
            if cache.dirty {
                self.device.write(&cache.bytes, self.free_list_page_sector(cache.page))?;
            }
        }
        if let Some(cache) = self.free_list_cache.as_mut() {
            cache.dirty = false;
        }
        Ok(())
    }

    fn push_free(&mut self, id: Id) -> Result<()> {
        let per_page = self.ids_per_page();
        let idx = self.free_list_size;
        let page = idx / per_page;
        let offset = ((idx % per_page) * 8) as usize;
        // Push may flush the current page before loading the target page.
        self.load_free_list_page(page, true)?;
        let cache = self.free_list_cache.as_mut().expect("just loaded");
        LittleEndian::write_i64(&mut cache.bytes[offset..offset + 8], id as i64);
        cache.dirty = true;
        self.free_list_size += 1;
        Ok(())
    }

    fn pop_free(&mut self) -> Result<Option<Id>> {
        if self.free_list_size == 0 {
            return Ok(None);
        }
        let per_page = self.ids_per_page();
        let idx = self.free_list_size - 1;
        let page = idx / per_page;
        let offset = ((idx % per_page) * 8) as usize;
        // Pop loads the target page without flushing: the current page's
        // contents are about to be dead regardless.
        self.load_free_list_page(page, false)?;
        let cache = self.free_list_cache.as_ref().expect("just loaded");
        let id = LittleEndian::read_i64(&cache.bytes[offset..offset + 8]) as u64;
        self.free_list_size -= 1;
        Ok(Some(id))
    }

    /// Reserves `n` contiguous ids in one step, marking the whole range
    /// `(R,U) := (1,1)` up front (unlike `reserve`, which leaves `U=0`).
    /// Returns the head id.
    pub fn batch_reserve(&mut self, n: u64) -> Result<Id> {
        self.ensure_open()?;
        let head = (self.last_block_idx + 1) as u64;
        if head + n > self.max_blocks {
            return Err(StorageError::Other("raw device exhausted".into()));
        }
        for i in 0..n {
            bitset::set_bit(&mut self.reserved, head + i, true);
            bitset::set_bit(&mut self.updated, head + i, true);
        }
        self.last_block_idx += n as i64;
        metrics::CONTAINER_RESERVE_TOTAL
            .with_label_values(&["raw_access"])
            .inc();
        Ok(head)
    }

    /// Writes `blocks` starting at `head` as one contiguous device write.
    /// `head` and the ids it spans must already be reserved (typically via
    /// a preceding `batch_reserve`).
    pub fn batch_insert(&mut self, head: Id, blocks: &[Block]) -> Result<()> {
        self.ensure_open()?;
        let sector_size = self.sector_size;
        let mut buf = Vec::with_capacity(blocks.len() * sector_size);
        for block in blocks {
            if block.size() > sector_size {
                return Err(StorageError::TooLarge {
                    size: block.size(),
                    block_size: sector_size,
                });
            }
            buf.extend_from_slice(&block.padded_to(sector_size));
            metrics::BLOCK_SIZE_BYTES.observe(block.size() as f64);
        }
        self.device.write(&buf, self.data_sector(head))
    }
}

impl<D: RawDevice> Container for RawAccessContainer<D> {
    fn id_codec(&self) -> IdCodec {
        IdCodec::new(IdWidth::Eight, Endian::Little)
    }

    fn block_size(&self) -> usize {
        self.sector_size
    }

    fn reserve(&mut self, _factory: Option<&mut dyn FnMut() -> Block>) -> Result<Id> {
        self.ensure_open()?;
        let id = loop {
            match self.pop_free()? {
                Some(candidate) if self.last_block_idx >= 0 && candidate <= self.last_block_idx as u64 => {
                    break candidate
                }
                Some(_) => continue,
                None => {
                    let candidate = (self.last_block_idx + 1) as u64;
                    if candidate >= self.max_blocks {
                        return Err(StorageError::Other("raw device exhausted".into()));
                    }
                    self.last_block_idx += 1;
                    break candidate;
                }
            }
        };
        bitset::set_bit(&mut self.reserved, id, true);
        metrics::CONTAINER_RESERVE_TOTAL
            .with_label_values(&["raw_access"])
            .inc();
        Ok(id)
    }

    fn contains(&mut self, id: Id) -> Result<bool> {
        self.ensure_open()?;
        Ok(bitset::get_bit(&self.updated, id))
    }

    fn is_used(&mut self, id: Id) -> Result<bool> {
        self.ensure_open()?;
        Ok(bitset::get_bit(&self.reserved, id))
    }

    fn get(&mut self, id: Id, _unfix: bool) -> Result<Block> {
        self.ensure_open()?;
        if !bitset::get_bit(&self.updated, id) {
            return Err(StorageError::NotFound(id));
        }
        let mut buf = vec![0u8; self.sector_size];
        self.device.read(&mut buf, self.data_sector(id))?;
        Block::new(buf, 0, self.sector_size)
    }

    fn update(&mut self, id: Id, block: &Block, _unfix: bool) -> Result<()> {
        self.ensure_open()?;
        if block.size() > self.sector_size {
            return Err(StorageError::TooLarge {
                size: block.size(),
                block_size: self.sector_size,
            });
        }
        if !bitset::get_bit(&self.reserved, id) {
            return Err(StorageError::NotFound(id));
        }
        let bytes = block.padded_to(self.sector_size);
        self.device.write(&bytes, self.data_sector(id))?;
        bitset::set_bit(&mut self.updated, id, true);
        metrics::BLOCK_SIZE_BYTES.observe(block.size() as f64);
        Ok(())
    }

    fn remove(&mut self, id: Id) -> Result<()> {
        self.ensure_open()?;
        if !bitset::get_bit(&self.reserved, id) {
            return Err(StorageError::NotFound(id));
        }
        bitset::set_bit(&mut self.reserved, id, false);
        bitset::set_bit(&mut self.updated, id, false);

        if self.last_block_idx >= 0 && id == self.last_block_idx as u64 {
            let mut i = self.last_block_idx;
            let mut new_tail = -1i64;
            while i > 0 {
                i -= 1;
                if bitset::get_bit(&self.reserved, i as u64) {
                    new_tail = i;
                    break;
                }
            }
            self.last_block_idx = new_tail;
        } else {
            self.push_free(id)?;
        }

        metrics::CONTAINER_REMOVE_TOTAL
            .with_label_values(&["raw_access"])
            .inc();
        Ok(())
    }

    fn ids(&mut self) -> Box<dyn Iterator<Item = Id>> {
        let limit = (self.last_block_idx + 1).max(0) as u64;
        let ids: Vec<Id> = bitset::iter_set(&self.reserved, limit).collect();
        Box::new(ids.into_iter())
    }

    fn size(&mut self) -> usize {
        bitset::count_set(&self.reserved)
    }

    fn reset(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.reserved.clear();
        self.updated.clear();
        self.free_list_size = 0;
        self.free_list_cache = None;
        self.last_block_idx = -1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.flush_free_list_cache()?;
        self.write_header()?;
        self.write_bitmaps()?;
        self.closed = true;
        log::debug!("closed raw-access container");
        Ok(())
    }

    fn delete(&mut self) -> Result<()> {
        // A raw device has no files to remove; closing is the only
        // meaningful teardown, matching "forbid use after close" below.
        self.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> RawAccessContainer<MemoryRawDevice> {
        let device = MemoryRawDevice::new(64, 64);
        RawAccessContainer::create(device, 16, 2).unwrap()
    }

    #[test]
    fn reserve_disjointness() {
        let mut c = fresh();
        let a = c.reserve(None).unwrap();
        let b = c.reserve(None).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn insert_get_roundtrip() {
        let mut c = fresh();
        let id = c.insert(&Block::from_bytes(vec![1, 2, 3]), true).unwrap();
        assert_eq!(c.get(id, true).unwrap().as_bytes()[..3], [1, 2, 3]);
    }

    #[test]
    fn remove_invalidates_and_reuses() {
        let mut c = fresh();
        let a = c.insert(&Block::from_bytes(vec![1]), true).unwrap();
        let _b = c.insert(&Block::from_bytes(vec![2]), true).unwrap();
        c.remove(a).unwrap();
        assert!(!c.contains(a).unwrap());
        assert!(c.get(a, true).is_err());
        let reused = c.reserve(None).unwrap();
        assert_eq!(reused, a);
    }

    #[test]
    fn tail_removal_shrinks_last_block_idx_without_truncating_device() {
        let mut c = fresh();
        let ids: Vec<Id> = (0..4).map(|i| c.insert(&Block::from_bytes(vec![i as u8]), true).unwrap()).collect();
        c.remove(*ids.last().unwrap()).unwrap();
        assert_eq!(c.last_block_idx, 2);
    }

    #[test]
    fn reset_does_not_touch_the_device() {
        let mut c = fresh();
        let id = c.insert(&Block::from_bytes(vec![9]), true).unwrap();
        c.reset().unwrap();
        assert_eq!(c.size(), 0);
        // The device's own bytes for that sector are untouched by reset;
        // only bookkeeping was cleared.
        let mut raw = vec![0u8; 64];
        c.device.read(&mut raw, c.data_sector(id)).unwrap();
        assert_eq!(raw[0], 9);
    }

    #[test]
    fn close_then_use_is_illegal_state() {
        let mut c = fresh();
        c.close().unwrap();
        assert!(c.reserve(None).is_err());
    }

    #[test]
    fn batch_reserve_marks_reserved_and_updated() {
        let mut c = fresh();
        let head = c.batch_reserve(3).unwrap();
        for id in head..head + 3 {
            assert!(c.contains(id).unwrap());
            assert!(c.is_used(id).unwrap());
        }
    }

    #[test]
    fn batch_insert_writes_contiguous_sectors() {
        let mut c = fresh();
        let head = c.batch_reserve(2).unwrap();
        let blocks = vec![Block::from_bytes(vec![1]), Block::from_bytes(vec![2])];
        c.batch_insert(head, &blocks).unwrap();
        assert_eq!(c.get(head, true).unwrap().as_bytes()[0], 1);
        assert_eq!(c.get(head + 1, true).unwrap().as_bytes()[0], 2);
    }

    #[test]
    fn open_after_close_recovers_state() {
        let device = MemoryRawDevice::new(64, 64);
        let mut c = RawAccessContainer::create(device, 16, 2).unwrap();
        let id = c.insert(&Block::from_bytes(vec![7, 7, 7]), true).unwrap();
        // Swap the device out from under `c` via close+reopen using the
        // same backing device to simulate a process restart.
        c.close().unwrap();
        let device = c.device;
        let mut reopened = RawAccessContainer::open(device).unwrap();
        assert!(reopened.contains(id).unwrap());
        assert_eq!(reopened.get(id, true).unwrap().as_bytes()[..3], [7, 7, 7]);
    }
}
