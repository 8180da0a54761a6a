//! Buffer pools (§5) — four size-keyed pools (plaintext block, ciphertext
//! block, plaintext request, ciphertext request) so steady-state I/O does
//! not allocate on every operation.
//!
//! Grounded directly in `internal/contcrypter/content_crypter.go`'s
//! `cBlockPool`/`pBlockPool`/`CReqPool`/`PReqPool` (backed there by
//! `sync.Pool`); here a plain mutex-guarded free list plays the same role.
//! Get/put is explicit, matching the Design Notes: "Where the target
//! language has GC, the pool is still recommended for throughput". Buffers
//! returned to the pool must be exactly the pool's native capacity — the
//! block cache's eviction callback enforces this by checking `capacity()`
//! before calling `put` (see `cache.rs`).

use std::sync::Mutex;

/// A pool of same-capacity byte buffers.
pub struct BufferPool {
    capacity: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, free: Mutex::new(Vec::new()) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get a zero-length buffer with at least `capacity()` bytes reserved.
    pub fn get(&self) -> Vec<u8> {
        let mut free = self.free.lock().expect("pool mutex poisoned");
        free.pop().unwrap_or_else(|| Vec::with_capacity(self.capacity))
    }

    /// Return a buffer to the pool. Only buffers allocated at exactly the
    /// pool's native capacity are accepted; anything else (a copy made for
    /// transient data) is silently dropped rather than pooled, per §5.
    pub fn put(&self, mut buf: Vec<u8>) {
        if buf.capacity() != self.capacity {
            return;
        }
        buf.clear();
        self.free.lock().expect("pool mutex poisoned").push(buf);
    }
}

/// The four pools a `ContentTranslator` keeps, sized for one filesystem's
/// `PBS`/`CipherBS` and a configured maximum request size.
pub struct BufferPools {
    pub plain_block: BufferPool,
    pub cipher_block: BufferPool,
    pub plain_request: BufferPool,
    pub cipher_request: BufferPool,
}

impl BufferPools {
    pub fn new(plain_bs: usize, cipher_bs: usize, max_request: usize) -> Self {
        Self {
            plain_block: BufferPool::new(plain_bs),
            cipher_block: BufferPool::new(cipher_bs),
            plain_request: BufferPool::new(max_request),
            cipher_request: BufferPool::new(max_request),
        }
    }
}
