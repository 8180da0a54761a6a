//! File Handle (C6) — orchestrates C1 (through C2's codec), C2, C3, C4 and
//! C5 into the read/write/truncate/chmod/release surface SPEC_FULL §4.6
//! describes. Every plaintext-offset operation lands here; nothing above
//! this layer ever touches the backing file descriptor directly.
//!
//! Grounded in `original_source/cffuse/file.go` and `file_truncate.go`.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::content::ContentTranslator;
use crate::error::{CfError, Result};
use crate::header::{FileHeader, HEADER_LEN};
use crate::registry::{NodeEntry, QIno, Registry};

pub struct FileHandle {
    fd: File,
    fd_lock: RwLock<()>,
    released: AtomicBool,
    qino: QIno,
    ent: Arc<NodeEntry>,
    registry: Arc<Registry>,
    content: Arc<ContentTranslator>,
    last_written_offset: AtomicI64,
    last_op_count: AtomicU64,
}

/// `fstat`'s dev/ino pair, used to key the open-file registry.
fn fstat_qino(fd: &File) -> Result<QIno> {
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::fstat(fd.as_raw_fd(), &mut st) };
    if rc != 0 {
        return Err(CfError::Backing(std::io::Error::last_os_error()));
    }
    Ok(QIno { dev: st.st_dev as u64, ino: st.st_ino as u64 })
}

fn fstat_size(fd: &File) -> Result<u64> {
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::fstat(fd.as_raw_fd(), &mut st) };
    if rc != 0 {
        return Err(CfError::Backing(std::io::Error::last_os_error()));
    }
    Ok(st.st_size as u64)
}

/// Best-effort preallocation so a write never runs out of disk space in
/// the middle of a block, leaving a partially-written (and therefore
/// unauthenticatable) block behind. A platform where `posix_fallocate` is
/// unsupported for the backing filesystem is treated as a no-op, matching
/// SPEC_FULL §4.6 ("on systems where preallocation is unsupported, this
/// step is a no-op").
fn prealloc(fd: &File, offset: i64, len: i64) -> Result<()> {
    let rc = unsafe { libc::posix_fallocate(fd.as_raw_fd(), offset, len) };
    match rc {
        0 => Ok(()),
        libc::EOPNOTSUPP | libc::ENOSYS => Ok(()),
        libc::ENOSPC => Err(CfError::PreallocFailed("no space left on device".into())),
        other => Err(CfError::PreallocFailed(format!("posix_fallocate errno {other}"))),
    }
}

impl FileHandle {
    /// Wrap an already-open backing file descriptor. `mode` is only used
    /// when `init_header` is true, to build a fresh header for a file that
    /// was just created.
    pub fn open(
        fd: File,
        registry: Arc<Registry>,
        content: Arc<ContentTranslator>,
        init_header: Option<u32>,
    ) -> Result<Self> {
        let qino = fstat_qino(&fd)?;
        let ent = registry.register(qino, content.plain_bs(), content.pools());
        let handle = Self {
            fd,
            fd_lock: RwLock::new(()),
            released: AtomicBool::new(false),
            qino,
            ent,
            registry,
            content,
            last_written_offset: AtomicI64::new(-1),
            last_op_count: AtomicU64::new(0),
        };
        if let Some(mode) = init_header {
            handle.init_header(mode)?;
        }
        Ok(handle)
    }

    fn check_released(&self) -> Result<()> {
        if self.released.load(Ordering::SeqCst) {
            return Err(CfError::UseAfterRelease);
        }
        Ok(())
    }

    fn init_header(&self, mode: u32) -> Result<()> {
        let header = FileHeader::new(mode)?;
        let packed = header.pack();
        *self.ent.header_lock.write().expect("header lock poisoned") = Some(header);
        let _fd_guard = self.fd_lock.read().expect("fd lock poisoned");
        let _content_guard = self.ent.content_lock.write();
        self.fd.write_at(&packed, 0).map_err(CfError::Backing)?;
        Ok(())
    }

    /// Load the header from the backing file if it has not been loaded
    /// yet. No-op once `header_lock` already holds a value.
    fn load_header(&self) -> Result<()> {
        {
            let guard = self.ent.header_lock.read().expect("header lock poisoned");
            if guard.is_some() {
                return Ok(());
            }
        }
        let mut buf = vec![0u8; HEADER_LEN];
        let n = self.fd.read_at(&mut buf, 0).map_err(CfError::Backing)?;
        buf.truncate(n);
        let header = FileHeader::parse(&buf).inspect_err(|_| {
            warn!(ino = self.qino.ino, "header parse failed");
        })?;
        *self.ent.header_lock.write().expect("header lock poisoned") = Some(header);
        Ok(())
    }

    fn file_id(&self) -> [u8; 16] {
        self.ent
            .header_lock
            .read()
            .expect("header lock poisoned")
            .as_ref()
            .expect("load_header must run first")
            .file_id
    }

    fn current_mode(&self) -> u32 {
        self.ent
            .header_lock
            .read()
            .expect("header lock poisoned")
            .as_ref()
            .expect("load_header must run first")
            .mode
    }

    // ── Read ─────────────────────────────────────────────────────────────

    pub fn read(&self, plain_off: u64, length: usize) -> Result<Vec<u8>> {
        self.check_released()?;
        self.load_header()?;
        self.read_internal(plain_off, length, true)
    }

    /// Shared by `read` and the read-modify-write path in `write`, which
    /// disables caching of freshly read blocks (they are about to be
    /// overwritten anyway).
    fn read_internal(&self, plain_off: u64, length: usize, cache: bool) -> Result<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let intra = self.content.explode(plain_off, length);
        let mut blocks: Vec<Option<Vec<u8>>> = vec![None; intra.len()];

        let mut cache_guard = self.ent.block_cache.lock().expect("block cache poisoned");
        let mut left = 0usize;
        while left < intra.len() {
            match cache_guard.get(intra[left].block_no) {
                Some(b) => blocks[left] = Some(b),
                None => break,
            }
            left += 1;
        }
        let mut right = intra.len() - 1;
        while right > left {
            match cache_guard.get(intra[right].block_no) {
                Some(b) => blocks[right] = Some(b),
                None => break,
            }
            right -= 1;
        }
        drop(cache_guard);

        if left <= right {
            let first_block = intra[left].block_no;
            let last_block = intra[right].block_no;
            let cipher_len = self.content.cipher_bs() as u64 * (last_block - first_block + 1);
            let cipher_off = self.content.cipher_off_of_block(first_block);

            let mut ciphertext = vec![0u8; cipher_len as usize];
            let fd_guard = self.fd_lock.read().expect("fd lock poisoned");
            let n = self.fd.read_at(&mut ciphertext, cipher_off).map_err(CfError::Backing)?;
            drop(fd_guard);
            ciphertext.truncate(n);

            let file_id = self.file_id();
            let plain_blocks = self.content.decrypt_blocks(&ciphertext, first_block, &file_id).map_err(|e| {
                if let CfError::BlockAuthFailed { block_no } = e {
                    warn!(ino = self.qino.ino, block_no, "block authentication failed");
                }
                e
            })?;

            let mut cache_guard = self.ent.block_cache.lock().expect("block cache poisoned");
            for (i, block) in plain_blocks.into_iter().enumerate() {
                let idx = left + i;
                if idx >= blocks.len() {
                    break;
                }
                if cache {
                    cache_guard.put(intra[idx].block_no, &block, false);
                }
                blocks[idx] = Some(block);
            }
        }

        let mut plaintext = Vec::new();
        for block in blocks.into_iter().flatten() {
            plaintext.extend_from_slice(&block);
        }
        let skip = intra[0].skip;
        let want_len = skip + length;
        let out = if plaintext.len() > want_len {
            plaintext[skip..want_len].to_vec()
        } else if plaintext.len() > skip {
            plaintext[skip..].to_vec()
        } else {
            Vec::new()
        };
        Ok(out)
    }

    // ── Write ────────────────────────────────────────────────────────────

    fn is_consecutive_write(&self, off: u64) -> bool {
        let op_count = self.registry.write_op_count();
        let last_off = self.last_written_offset.load(Ordering::SeqCst);
        op_count == self.last_op_count.load(Ordering::SeqCst) + 1 && last_off >= 0 && off as i64 == last_off + 1
    }

    pub fn write(&self, data: &[u8], plain_off: u64) -> Result<usize> {
        self.check_released()?;
        let _content_guard = self.ent.content_lock.write();
        if !self.is_consecutive_write(plain_off) {
            self.pad_hole(plain_off)?;
        }
        let n = self.write_internal(data, plain_off)?;
        self.last_op_count.store(self.registry.write_op_count(), Ordering::SeqCst);
        self.last_written_offset.store(plain_off as i64 + data.len() as i64 - 1, Ordering::SeqCst);
        Ok(n)
    }

    fn write_internal(&self, data: &[u8], plain_off: u64) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        self.load_header()?;
        let intra = self.content.explode(plain_off, data.len());
        let mut to_encrypt = Vec::with_capacity(intra.len());
        let mut cursor = 0usize;

        for block in &intra {
            let slice = &data[cursor..cursor + block.length];
            cursor += block.length;

            let merged = if block.partial {
                let cached = self.ent.block_cache.lock().expect("block cache poisoned").get(block.block_no);
                let old = match cached {
                    Some(b) => b,
                    None => self.read_internal(self.content.plain_off_of_block(block.block_no), self.content.plain_bs(), false)?,
                };
                ContentTranslator::rewrite_block(&old, slice, block.skip)
            } else {
                slice.to_vec()
            };

            self.ent.block_cache.lock().expect("block cache poisoned").put(block.block_no, &merged, true);
            to_encrypt.push(merged);
        }

        let file_id = self.file_id();
        let ciphertext = self.content.encrypt_blocks(&to_encrypt, intra[0].block_no, &file_id)?;
        let cipher_off = self.content.cipher_off_of_block(intra[0].block_no);

        let fd_guard = self.fd_lock.read().expect("fd lock poisoned");
        prealloc(&self.fd, cipher_off as i64, ciphertext.len() as i64)?;
        self.fd.write_at(&ciphertext, cipher_off).map_err(CfError::Backing)?;
        drop(fd_guard);

        Ok(data.len())
    }

    /// If writing at `target_off` would skip at least one whole block past
    /// the current end of file, zero-pad the current last block so the
    /// resulting ciphertext hole lands only on fully unreachable blocks.
    fn pad_hole(&self, target_off: u64) -> Result<()> {
        let fd_guard = self.fd_lock.read().expect("fd lock poisoned");
        let cipher_size = fstat_size(&self.fd)?;
        drop(fd_guard);
        let plain_size = self.content.cipher_size_to_plain_size(cipher_size);
        let next_block = self.content.plain_off_to_block(plain_size);
        let target_block = self.content.plain_off_to_block(target_off);
        if target_block <= next_block {
            return Ok(());
        }
        self.zero_pad(plain_size)
    }

    /// Zero-pad a file of `plain_size` bytes up to the next block
    /// boundary. No-op if already aligned.
    fn zero_pad(&self, plain_size: u64) -> Result<()> {
        let last_len = plain_size % self.content.plain_bs() as u64;
        if last_len == 0 {
            return Ok(());
        }
        let missing = self.content.plain_bs() as u64 - last_len;
        let pad = vec![0u8; missing as usize];
        self.write_internal(&pad, plain_size)?;
        Ok(())
    }

    // ── Truncate ─────────────────────────────────────────────────────────

    pub fn truncate(&self, new_size: u64) -> Result<()> {
        self.check_released()?;
        let _content_guard = self.ent.content_lock.write();

        if new_size == 0 {
            let fd_guard = self.fd_lock.read().expect("fd lock poisoned");
            ftruncate_backing(&self.fd, HEADER_LEN as u64)?;
            drop(fd_guard);
            return Ok(());
        }

        let fd_guard = self.fd_lock.read().expect("fd lock poisoned");
        let old_size = self.content.cipher_size_to_plain_size(fstat_size(&self.fd)?);
        drop(fd_guard);

        if new_size == old_size {
            return Ok(());
        }
        if new_size > old_size {
            return self.truncate_grow(old_size, new_size);
        }

        let block_no = self.content.plain_off_to_block(new_size);
        let cipher_off = self.content.cipher_off_of_block(block_no);
        let plain_off = self.content.plain_off_of_block(block_no);
        let last_len = new_size - plain_off;

        let tail = if last_len > 0 { self.read_internal(plain_off, last_len as usize, false)? } else { Vec::new() };

        let fd_guard = self.fd_lock.read().expect("fd lock poisoned");
        ftruncate_backing(&self.fd, cipher_off)?;
        drop(fd_guard);

        if last_len > 0 {
            self.write_internal(&tail, plain_off)?;
        }
        Ok(())
    }

    fn truncate_grow(&self, old_size: u64, new_size: u64) -> Result<()> {
        debug_assert!(new_size > old_size);
        let n1 = if old_size > 0 { self.content.plain_off_to_block(old_size - 1) } else { 0 };
        let new_eof = new_size - 1;
        let n2 = self.content.plain_off_to_block(new_eof);

        if n1 == n2 {
            self.write_internal(&[0u8], new_eof)?;
            return Ok(());
        }

        self.zero_pad(old_size)?;
        if new_size % self.content.plain_bs() as u64 == 0 {
            let cipher_size = self.content.plain_size_to_cipher_size(new_size);
            let fd_guard = self.fd_lock.read().expect("fd lock poisoned");
            ftruncate_backing(&self.fd, cipher_size)?;
            drop(fd_guard);
            return Ok(());
        }
        self.write_internal(&[0u8], new_eof)?;
        Ok(())
    }

    // ── Metadata ─────────────────────────────────────────────────────────

    pub fn chmod(&self, mode: u32) -> Result<()> {
        self.check_released()?;
        self.load_header()?;
        {
            let mut guard = self.ent.header_lock.write().expect("header lock poisoned");
            let header = guard.as_mut().expect("load_header just ran");
            header.mode = mode | (libc::S_IFREG as u32);
        }
        let packed = self.ent.header_lock.read().expect("header lock poisoned").as_ref().unwrap().pack();
        let _content_guard = self.ent.content_lock.write();
        let fd_guard = self.fd_lock.read().expect("fd lock poisoned");
        self.fd.write_at(&packed, 0).map_err(CfError::Backing)?;
        Ok(())
    }

    /// `(size, mode)` in plaintext terms: backing stat size translated
    /// through C2, header mode substituted for the backing mode bits.
    pub fn get_attr(&self) -> Result<(u64, u32)> {
        self.check_released()?;
        let fd_guard = self.fd_lock.read().expect("fd lock poisoned");
        let cipher_size = fstat_size(&self.fd)?;
        drop(fd_guard);
        let _content_guard = self.ent.content_lock.read();
        let plain_size = self.content.cipher_size_to_plain_size(cipher_size);
        self.load_header()?;
        Ok((plain_size, self.current_mode()))
    }

    pub fn fsync(&self) -> Result<()> {
        self.check_released()?;
        let fd_guard = self.fd_lock.read().expect("fd lock poisoned");
        let rc = unsafe { libc::fsync(self.fd.as_raw_fd()) };
        drop(fd_guard);
        if rc != 0 {
            return Err(CfError::Backing(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    pub fn release(&self) {
        let guard = self.fd_lock.write().expect("fd lock poisoned");
        if self.released.swap(true, Ordering::SeqCst) {
            panic!("ino{}: double release", self.qino.ino);
        }
        // Closed here so the descriptor is freed as soon as release()
        // returns, not whenever the handle's allocation happens to drop.
        // The eventual `File` drop will see an already-closed fd and
        // silently no-op (std ignores close() errors on drop).
        unsafe {
            libc::close(self.fd.as_raw_fd());
        }
        drop(guard);
        self.registry.unregister(self.qino);
    }
}

fn ftruncate_backing(fd: &File, len: u64) -> Result<()> {
    let rc = unsafe { libc::ftruncate(fd.as_raw_fd(), len as libc::off_t) };
    if rc != 0 {
        return Err(CfError::Backing(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{BlockCodec, CipherFamily};
    use tempfile::tempdir;

    fn open_handle(path: &std::path::Path, registry: Arc<Registry>, plain_bs: usize, init: Option<u32>) -> FileHandle {
        let fd = std::fs::OpenOptions::new().read(true).write(true).create(true).truncate(init.is_some()).open(path).unwrap();
        let codec = BlockCodec::new(CipherFamily::Aes256, &[3u8; 32]).unwrap();
        let content = Arc::new(ContentTranslator::new(codec, plain_bs, 1 << 20));
        FileHandle::open(fd, registry, content, init).unwrap()
    }

    #[test]
    fn write_then_read_back_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        let registry = Arc::new(Registry::new());
        let handle = open_handle(&path, registry, 256, Some(0o100644));
        handle.write(b"hello world", 0).unwrap();
        let got = handle.read(0, 11).unwrap();
        assert_eq!(&got, b"hello world");
    }

    #[test]
    fn unaligned_write_spanning_blocks_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        let registry = Arc::new(Registry::new());
        let handle = open_handle(&path, registry, 64, Some(0o100644));
        let data: Vec<u8> = (0..200u32).map(|i| (i % 251) as u8).collect();
        handle.write(&data, 50).unwrap();
        let got = handle.read(50, 200).unwrap();
        assert_eq!(got, data);
    }

    #[test]
    fn truncate_to_zero_then_grow_reads_zeros() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        let registry = Arc::new(Registry::new());
        let handle = open_handle(&path, registry, 128, Some(0o100644));
        handle.write(b"some content here", 0).unwrap();
        handle.truncate(0).unwrap();
        handle.truncate(300).unwrap();
        let got = handle.read(0, 300).unwrap();
        assert_eq!(got, vec![0u8; 300]);
    }

    #[test]
    fn chmod_persists_across_header_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        let registry = Arc::new(Registry::new());
        let handle = open_handle(&path, registry.clone(), 128, Some(0o100644));
        handle.chmod(0o600).unwrap();
        let (_, mode) = handle.get_attr().unwrap();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn operations_after_release_fail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        let registry = Arc::new(Registry::new());
        let handle = open_handle(&path, registry, 128, Some(0o100644));
        handle.release();
        assert!(matches!(handle.read(0, 1), Err(CfError::UseAfterRelease)));
    }
}
