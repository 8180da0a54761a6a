//! Content Translator (C2) — offset arithmetic between plaintext and
//! ciphertext coordinates, range explosion into per-block operations, and
//! batch block encrypt/decrypt.
//!
//! Grounded in `internal/contcrypter/content_crypter.go` (block layout,
//! `makeSign`/tag keying, all-zero sparse-hole short-circuit) and
//! `internal/contcrypter/content_partial.go` (the offset formulas and
//! `ExplodePlainRange`/`RewriteBlock`). Never performs I/O — `handle.rs`
//! owns every `pread`/`pwrite`.

use std::sync::Arc;

use hmac::{Hmac, Mac};

use crate::crypto::{constant_time_eq, BlockCodec};
use crate::error::{CfError, Result};
use crate::header::HEADER_LEN;
use crate::pool::BufferPools;

type HmacMd5 = Hmac<md5::Md5>;

pub const TAG_LEN: usize = 16;

/// One block-sized slice of a larger plaintext byte range, as produced by
/// [`ContentTranslator::explode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntraBlock {
    pub block_no: u64,
    /// Offset within the block where this slice begins.
    pub skip: usize,
    /// Number of payload bytes covered within the block.
    pub length: usize,
    /// True unless the slice covers the whole block (`skip == 0` and
    /// `skip + length == plain_bs`).
    pub partial: bool,
}

pub struct ContentTranslator {
    codec: BlockCodec,
    plain_bs: usize,
    cipher_bs: usize,
    pub pools: Arc<BufferPools>,
}

impl ContentTranslator {
    pub fn new(codec: BlockCodec, plain_bs: usize, max_request: usize) -> Self {
        let cipher_bs = plain_bs + codec.block_size() + TAG_LEN;
        let pools = Arc::new(BufferPools::new(plain_bs, cipher_bs, max_request));
        Self { codec, plain_bs, cipher_bs, pools }
    }

    /// Returns the shared buffer pools, so callers (e.g. the open-file
    /// registry's block cache) recycle the same plaintext-block buffers
    /// this translator hands out.
    pub fn pools(&self) -> Arc<BufferPools> {
        self.pools.clone()
    }

    pub fn plain_bs(&self) -> usize {
        self.plain_bs
    }

    pub fn cipher_bs(&self) -> usize {
        self.cipher_bs
    }

    /// Per-block ciphertext overhead: `CipherBS - PBS`.
    pub fn block_overhead(&self) -> u64 {
        (self.cipher_bs - self.plain_bs) as u64
    }

    // ── Offset algebra (§3) ─────────────────────────────────────────────

    pub fn plain_off_to_block(&self, plain_off: u64) -> u64 {
        plain_off / self.plain_bs as u64
    }

    pub fn cipher_off_of_block(&self, block_no: u64) -> u64 {
        HEADER_LEN as u64 + block_no * self.cipher_bs as u64
    }

    pub fn plain_off_of_block(&self, block_no: u64) -> u64 {
        block_no * self.plain_bs as u64
    }

    pub fn cipher_size_to_plain_size(&self, cipher_size: u64) -> u64 {
        if cipher_size <= HEADER_LEN as u64 {
            return 0;
        }
        let blocks = (cipher_size - HEADER_LEN as u64 - 1) / self.cipher_bs as u64 + 1;
        cipher_size - HEADER_LEN as u64 - blocks * self.block_overhead()
    }

    pub fn plain_size_to_cipher_size(&self, plain_size: u64) -> u64 {
        if plain_size == 0 {
            return HEADER_LEN as u64;
        }
        let blocks = (plain_size - 1) / self.plain_bs as u64 + 1;
        HEADER_LEN as u64 + plain_size + blocks * self.block_overhead()
    }

    // ── Range explosion ─────────────────────────────────────────────────

    /// Split `[plain_off, plain_off+length)` into consecutive per-block
    /// slices. Empty ranges explode to an empty sequence.
    pub fn explode(&self, plain_off: u64, length: usize) -> Vec<IntraBlock> {
        let mut out = Vec::new();
        if length == 0 {
            return out;
        }
        let mut remaining = length;
        let mut off = plain_off;
        while remaining > 0 {
            let block_no = off / self.plain_bs as u64;
            let skip = (off % self.plain_bs as u64) as usize;
            let avail = self.plain_bs - skip;
            let take = remaining.min(avail);
            let partial = skip > 0 || take < self.plain_bs;
            out.push(IntraBlock { block_no, skip, length: take, partial });
            remaining -= take;
            off += take as u64;
        }
        out
    }

    // ── Batch encrypt/decrypt ────────────────────────────────────────────

    /// Encrypt a run of consecutive plaintext blocks starting at
    /// `first_block_no`. Every block but the last must be full `plain_bs`;
    /// the last may be shorter (end-of-file). Returns the concatenated
    /// `iv || payload || tag` units.
    pub fn encrypt_blocks(
        &self,
        blocks: &[Vec<u8>],
        first_block_no: u64,
        file_id: &[u8],
    ) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(
            blocks.iter().map(|b| b.len() + self.codec.block_size() + TAG_LEN).sum(),
        );
        for (i, block) in blocks.iter().enumerate() {
            let block_no = first_block_no + i as u64;
            let iv_payload = self.codec.encrypt(block)?;
            let tag = block_tag(block_no, file_id, &iv_payload);
            out.extend_from_slice(&iv_payload);
            out.extend_from_slice(&tag);
        }
        Ok(out)
    }

    /// Decrypt a run of consecutive ciphertext units starting at
    /// `first_block_no`. The input is split into `cipher_bs`-sized units;
    /// the last may be shorter. A full-size all-zero unit decodes to a
    /// zero plaintext block without authentication (sparse-hole policy); a
    /// short all-zero tail is authenticated normally (and will fail, since
    /// a real block always carries a tag).
    pub fn decrypt_blocks(
        &self,
        ciphertext: &[u8],
        first_block_no: u64,
        file_id: &[u8],
    ) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        let mut offset = 0usize;
        let mut block_no = first_block_no;
        let bs = self.codec.block_size();
        while offset < ciphertext.len() {
            let remaining = ciphertext.len() - offset;
            let unit_len = remaining.min(self.cipher_bs);
            let unit = &ciphertext[offset..offset + unit_len];

            if unit_len == self.cipher_bs && unit.iter().all(|&b| b == 0) {
                out.push(vec![0u8; self.plain_bs]);
            } else {
                if unit_len < bs + TAG_LEN {
                    return Err(CfError::BlockAuthFailed { block_no });
                }
                let (iv_payload, tag) = unit.split_at(unit_len - TAG_LEN);
                let expected = block_tag(block_no, file_id, iv_payload);
                if !constant_time_eq(&expected, tag) {
                    return Err(CfError::BlockAuthFailed { block_no });
                }
                out.push(self.codec.decrypt(iv_payload)?);
            }

            offset += unit_len;
            block_no += 1;
        }
        Ok(out)
    }

    /// Overlay `new` onto `old` starting at `skip`, extending the result to
    /// `max(old.len(), skip + new.len())`. Missing leading bytes (when
    /// `old` is shorter than `skip`) come out zeroed, matching the sparse
    /// hole convention used everywhere else in this crate.
    pub fn rewrite_block(old: &[u8], new: &[u8], skip: usize) -> Vec<u8> {
        let result_len = old.len().max(skip + new.len());
        let mut result = vec![0u8; result_len];
        result[..old.len()].copy_from_slice(old);
        result[skip..skip + new.len()].copy_from_slice(new);
        result
    }
}

fn block_tag(block_no: u64, file_id: &[u8], data: &[u8]) -> [u8; TAG_LEN] {
    let mut key = Vec::with_capacity(8 + file_id.len());
    key.extend_from_slice(&block_no.to_be_bytes());
    key.extend_from_slice(file_id);
    let mut mac = HmacMd5::new_from_slice(&key).expect("HMAC accepts keys of any length");
    mac.update(data);
    let out = mac.finalize().into_bytes();
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&out);
    tag
}
