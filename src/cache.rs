//! Block Cache (C5) — per-open-file LRU of recently touched plaintext
//! blocks, with explicit buffer recycling through the pools owned by a
//! [`crate::content::ContentTranslator`].
//!
//! Grounded in `cffuse/block_cache.go`. Capacity follows SPEC_FULL §4.5
//! (`min(4, floor(32KiB / PBS))`), **not** the Go source's `128*1024 /
//! PlainBS` — that divergence is deliberate, see DESIGN.md.
//!
//! The `lru` crate has no built-in eviction callback (unlike
//! `hashicorp/golang-lru`'s `NewWithEvict`), so eviction is driven
//! explicitly: `LruCache::push` returns the evicted entry when the cache is
//! full, and that entry is routed back through the pool here.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::pool::BufferPools;

/// `min(4, floor(32 KiB / plain_bs))`, always at least 1 for the legal
/// `PlainBS` values (2048..16384).
pub fn cache_capacity(plain_bs: usize) -> usize {
    ((32 * 1024) / plain_bs).clamp(1, 4)
}

pub struct BlockCache {
    lru: LruCache<u64, Vec<u8>>,
    pools: Arc<BufferPools>,
}

impl BlockCache {
    pub fn new(plain_bs: usize, pools: Arc<BufferPools>) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity(plain_bs)).expect("capacity is >= 1");
        Self { lru: LruCache::new(capacity), pools }
    }

    pub fn get(&mut self, block_no: u64) -> Option<Vec<u8>> {
        self.lru.get(&block_no).cloned()
    }

    /// Cache `content` under `block_no`. `need_copy` mirrors the Go
    /// source's distinction: set it when `content` points at memory the
    /// caller only has transient access to (e.g. the slice handed in by a
    /// `write` call), so the cached copy is pool-owned and safe to keep
    /// past the call.
    pub fn put(&mut self, block_no: u64, content: &[u8], need_copy: bool) {
        let buf = if need_copy {
            let mut owned = self.pools.plain_block.get();
            owned.extend_from_slice(content);
            owned
        } else {
            content.to_vec()
        };
        if let Some((_, evicted)) = self.lru.push(block_no, buf) {
            self.return_to_pool(evicted);
        }
    }

    pub fn remove(&mut self, block_no: u64) {
        if let Some(buf) = self.lru.pop(&block_no) {
            self.return_to_pool(buf);
        }
    }

    /// Evict everything, returning pool-owned buffers to the pool. Called
    /// when the owning entry's ref count drops to zero.
    pub fn purge(&mut self) {
        while let Some((_, buf)) = self.lru.pop_lru() {
            self.return_to_pool(buf);
        }
    }

    fn return_to_pool(&self, buf: Vec<u8>) {
        // Only buffers allocated at full plain_bs capacity are pool-owned;
        // copies made for transient data (need_copy == false, borrowed
        // straight off a caller's slice via to_vec()) are not.
        if buf.capacity() == self.pools.plain_block.capacity() {
            self.pools.plain_block.put(buf);
        }
    }
}
