//! Open-File Registry (C4) — maps a backing `(device, inode)` pair to a
//! shared, reference-counted per-file state record.
//!
//! Grounded in `cffuse/entry_table.go`: `QIno`, `nodeEntry`, `entrytable`,
//! and the `countingMutex` trick for `write_op_count`. Per Design Notes item
//! 2, this is owned by the filesystem instance rather than a process-wide
//! `static` — each `CfCryptFs` gets its own `Registry`, and every
//! `FileHandle` holds an `Arc<NodeEntry>` for as long as it is open.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::cache::BlockCache;
use crate::header::FileHeader;
use crate::pool::BufferPools;

/// Qualified inode identifier: the pair (backing device id, backing inode
/// number). Two files collide here, and therefore share a [`NodeEntry`],
/// exactly when they are hard links to the same backing inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QIno {
    pub dev: u64,
    pub ino: u64,
}

/// `content_lock` guarded by a write-acquire counter, so `write()` doubles
/// as the registry's global write-operation counter increment. Mirrors
/// `countingMutex.Lock()` in the Go source.
pub struct ContentLock {
    lock: RwLock<()>,
    op_counter: Arc<AtomicU64>,
}

impl ContentLock {
    fn new(op_counter: Arc<AtomicU64>) -> Self {
        Self { lock: RwLock::new(()), op_counter }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().expect("content_lock poisoned")
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, ()> {
        let guard = self.lock.write().expect("content_lock poisoned");
        self.op_counter.fetch_add(1, Ordering::SeqCst);
        guard
    }
}

pub struct NodeEntry {
    ref_count: AtomicUsize,
    pub content_lock: ContentLock,
    pub header_lock: RwLock<Option<FileHeader>>,
    pub block_cache: Mutex<BlockCache>,
}

impl NodeEntry {
    fn new(op_counter: Arc<AtomicU64>, plain_bs: usize, pools: Arc<BufferPools>) -> Self {
        Self {
            ref_count: AtomicUsize::new(0),
            content_lock: ContentLock::new(op_counter),
            header_lock: RwLock::new(None),
            block_cache: Mutex::new(BlockCache::new(plain_bs, pools)),
        }
    }
}

/// Process-wide (per-mount) singleton, keyed by `QIno`. `register`/
/// `unregister` are the only operations that touch the table lock; runtime
/// reads and writes on an entry go through its own per-entry locks.
pub struct Registry {
    write_op_count: Arc<AtomicU64>,
    table: Mutex<HashMap<QIno, Arc<NodeEntry>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self { write_op_count: Arc::new(AtomicU64::new(0)), table: Mutex::new(HashMap::new()) }
    }

    /// Returns the monotonic write-operation counter, incremented on every
    /// `content_lock.write()` call across every entry in this registry.
    /// Best-effort only (§9): used for the consecutive-write heuristic, not
    /// an authoritative log.
    pub fn write_op_count(&self) -> u64 {
        self.write_op_count.load(Ordering::SeqCst)
    }

    /// Increment `ref_count` for `qi`, creating the entry if absent.
    pub fn register(&self, qi: QIno, plain_bs: usize, pools: Arc<BufferPools>) -> Arc<NodeEntry> {
        let mut table = self.table.lock().expect("registry table poisoned");
        let entry = table
            .entry(qi)
            .or_insert_with(|| Arc::new(NodeEntry::new(self.write_op_count.clone(), plain_bs, pools)))
            .clone();
        entry.ref_count.fetch_add(1, Ordering::SeqCst);
        entry
    }

    /// Decrement `ref_count` for `qi`; on reaching zero, purge the block
    /// cache (returning buffers to the pool) and drop the entry.
    pub fn unregister(&self, qi: QIno) {
        let mut table = self.table.lock().expect("registry table poisoned");
        let Some(entry) = table.get(&qi) else { return };
        let previous = entry.ref_count.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 {
            entry.block_cache.lock().expect("block cache poisoned").purge();
            table.remove(&qi);
        }
    }

    #[cfg(test)]
    pub fn entry_count(&self) -> usize {
        self.table.lock().unwrap().len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pools() -> Arc<BufferPools> {
        Arc::new(BufferPools::new(256, 256 + 16 + 16, 1024))
    }

    #[test]
    fn register_creates_and_unregister_removes_at_zero() {
        let reg = Registry::new();
        let qi = QIno { dev: 1, ino: 1 };
        let _a = reg.register(qi, 256, pools());
        let _b = reg.register(qi, 256, pools());
        assert_eq!(reg.entry_count(), 1);
        reg.unregister(qi);
        assert_eq!(reg.entry_count(), 1);
        reg.unregister(qi);
        assert_eq!(reg.entry_count(), 0);
    }

    #[test]
    fn distinct_qinos_get_distinct_entries() {
        let reg = Registry::new();
        reg.register(QIno { dev: 1, ino: 1 }, 256, pools());
        reg.register(QIno { dev: 1, ino: 2 }, 256, pools());
        assert_eq!(reg.entry_count(), 2);
    }

    #[test]
    fn write_op_count_increments_on_write_acquire_only() {
        let reg = Registry::new();
        let qi = QIno { dev: 1, ino: 1 };
        let entry = reg.register(qi, 256, pools());
        assert_eq!(reg.write_op_count(), 0);
        {
            let _r = entry.content_lock.read();
        }
        assert_eq!(reg.write_op_count(), 0);
        {
            let _w = entry.content_lock.write();
        }
        assert_eq!(reg.write_op_count(), 1);
    }
}
