//! Block Codec (C1) — encrypts/decrypts a single fixed-size plaintext block
//! under a keyed, length-preserving transform.
//!
//! The master key's length selects the cipher family; the family is a
//! closed tag, not a dynamically loaded strategy, matching how the rest of
//! this codebase picks a concrete implementation from a small fixed set
//! rather than through dynamic dispatch. CBC is used whenever the input is
//! already block-aligned (no padding mode is needed); CFB covers the
//! trailing partial block of a file. Both branches must stay exactly as
//! specified — this crate is a format-compatible reimplementation, and the
//! CBC/CFB split is part of the on-disk format.

use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, BlockSizeUser, KeyIvInit};
use cfb_mode::cipher::AsyncStreamCipher;
use des::Des;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{CfError, Result};

/// AES/DES native block size in bytes. Also the IV length for every family.
pub const AES_BLOCK_SIZE: usize = 16;
pub const DES_BLOCK_SIZE: usize = 8;

/// Closed set of cipher families selected by master-key length.
///
/// Mirrors the Design Notes' "tagged variant with a single encrypt/decrypt
/// capability": there is deliberately no trait object here, just a plain
/// enum match, so every call site sees one of four concrete ciphers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherFamily {
    Aes128,
    Aes192,
    Aes256,
    /// Legacy, compatibility-only cipher. New filesystems should reject it
    /// at configuration time if policy requires.
    Des,
}

impl CipherFamily {
    /// Select a family from a master-key length. 16/24/32 bytes pick an AES
    /// variant; 8 bytes picks DES.
    pub fn from_key_len(len: usize) -> Result<Self> {
        match len {
            16 => Ok(CipherFamily::Aes128),
            24 => Ok(CipherFamily::Aes192),
            32 => Ok(CipherFamily::Aes256),
            8 => Ok(CipherFamily::Des),
            _ => Err(CfError::KeyInvalid(format!(
                "unsupported master key length {len} (want 8, 16, 24, or 32 bytes)"
            ))),
        }
    }

    pub fn from_str_name(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "AES128" => Ok(CipherFamily::Aes128),
            "AES192" => Ok(CipherFamily::Aes192),
            "AES256" => Ok(CipherFamily::Aes256),
            "DES" => Ok(CipherFamily::Des),
            other => Err(CfError::ConfigInvalid(format!("unknown crypt type {other:?}"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CipherFamily::Aes128 => "AES128",
            CipherFamily::Aes192 => "AES192",
            CipherFamily::Aes256 => "AES256",
            CipherFamily::Des => "DES",
        }
    }

    pub fn key_len(&self) -> usize {
        match self {
            CipherFamily::Aes128 => 16,
            CipherFamily::Aes192 => 24,
            CipherFamily::Aes256 => 32,
            CipherFamily::Des => 8,
        }
    }

    /// Native block size of the underlying cipher. Also the IV length.
    pub fn block_size(&self) -> usize {
        match self {
            CipherFamily::Des => DES_BLOCK_SIZE,
            _ => AES_BLOCK_SIZE,
        }
    }
}

/// The Block Codec (C1). Stateless and re-entrant beyond holding the key.
pub struct BlockCodec {
    family: CipherFamily,
    key: Zeroizing<Vec<u8>>,
}

impl BlockCodec {
    pub fn new(family: CipherFamily, key: &[u8]) -> Result<Self> {
        if key.len() != family.key_len() {
            return Err(CfError::KeyInvalid(format!(
                "key length {} does not match {} (want {})",
                key.len(),
                family.name(),
                family.key_len()
            )));
        }
        Ok(Self { family, key: Zeroizing::new(key.to_vec()) })
    }

    /// Build a codec directly from a master key, inferring the family from
    /// its length.
    pub fn from_master_key(key: &[u8]) -> Result<Self> {
        let family = CipherFamily::from_key_len(key.len())?;
        Self::new(family, key)
    }

    pub fn family(&self) -> CipherFamily {
        self.family
    }

    pub fn block_size(&self) -> usize {
        self.family.block_size()
    }

    pub fn len_after_encrypted(&self, plain_len: usize) -> usize {
        plain_len + self.block_size()
    }

    pub fn len_after_decrypted(&self, cipher_len: usize) -> usize {
        cipher_len.saturating_sub(self.block_size())
    }

    /// Encrypt `src` into `dest`, with `dest[..block_size] = iv` already
    /// filled in by the caller and `dest[block_size..]` sized to
    /// `src.len()`. CBC when `src.len()` is a multiple of the native block
    /// size, CFB otherwise — this branch is part of the on-disk format and
    /// must not be changed.
    pub fn encrypt_with_iv(&self, dest: &mut [u8], src: &[u8], iv: &[u8]) -> Result<()> {
        let bs = self.block_size();
        debug_assert_eq!(iv.len(), bs);
        debug_assert_eq!(dest.len(), src.len());
        let mut buf = src.to_vec();
        if src.len() % bs == 0 {
            cbc_encrypt_in_place(self.family, &self.key, iv, &mut buf)?;
        } else {
            cfb_encrypt_in_place(self.family, &self.key, iv, &mut buf)?;
        }
        dest.copy_from_slice(&buf);
        Ok(())
    }

    /// Encrypt `plaintext`, generating a fresh random IV. Returns
    /// `iv || ciphertext`, i.e. `len(plaintext) + block_size()` bytes.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let bs = self.block_size();
        let mut iv = vec![0u8; bs];
        rand::rngs::OsRng
            .try_fill_bytes(&mut iv)
            .map_err(|e| CfError::EntropyUnavailable(e.to_string()))?;
        let mut out = vec![0u8; bs + plaintext.len()];
        out[..bs].copy_from_slice(&iv);
        self.encrypt_with_iv(&mut out[bs..], plaintext, &iv)?;
        Ok(out)
    }

    /// Inverse of [`encrypt`]. `src` must be at least `block_size()` bytes
    /// (the prepended IV); anything shorter fails with `TooShort`.
    pub fn decrypt(&self, src: &[u8]) -> Result<Vec<u8>> {
        let bs = self.block_size();
        if src.len() < bs {
            return Err(CfError::TooShort);
        }
        let (iv, payload) = src.split_at(bs);
        let mut buf = payload.to_vec();
        if buf.len() % bs == 0 {
            cbc_decrypt_in_place(self.family, &self.key, iv, &mut buf)?;
        } else {
            cfb_decrypt_in_place(self.family, &self.key, iv, &mut buf)?;
        }
        Ok(buf)
    }
}

/// Constant-time byte-slice comparison, used everywhere a tag or MAC is
/// checked so that timing does not leak how many leading bytes matched.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Generate `n` cryptographically random bytes from the process-wide RNG.
/// Used for file IDs and header construction (C3).
pub fn random_bytes(n: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    rand::rngs::OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| CfError::EntropyUnavailable(e.to_string()))?;
    Ok(buf)
}

// ── CBC / CFB dispatch ──────────────────────────────────────────────────────
//
// No padding is ever applied: CBC is only selected when the input is
// already a multiple of the cipher's block size (see `encrypt_with_iv`),
// and CFB is a genuine stream mode. Each helper dispatches on the closed
// `CipherFamily` tag to a monomorphic inner function; there is no trait
// object in this path.

fn cbc_encrypt_in_place(family: CipherFamily, key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()> {
    match family {
        CipherFamily::Aes128 => cbc_encrypt_generic::<Aes128>(key, iv, buf),
        CipherFamily::Aes192 => cbc_encrypt_generic::<Aes192>(key, iv, buf),
        CipherFamily::Aes256 => cbc_encrypt_generic::<Aes256>(key, iv, buf),
        CipherFamily::Des => cbc_encrypt_generic::<Des>(key, iv, buf),
    }
}

fn cbc_decrypt_in_place(family: CipherFamily, key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()> {
    match family {
        CipherFamily::Aes128 => cbc_decrypt_generic::<Aes128>(key, iv, buf),
        CipherFamily::Aes192 => cbc_decrypt_generic::<Aes192>(key, iv, buf),
        CipherFamily::Aes256 => cbc_decrypt_generic::<Aes256>(key, iv, buf),
        CipherFamily::Des => cbc_decrypt_generic::<Des>(key, iv, buf),
    }
}

fn cfb_encrypt_in_place(family: CipherFamily, key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()> {
    match family {
        CipherFamily::Aes128 => cfb_encrypt_generic::<Aes128>(key, iv, buf),
        CipherFamily::Aes192 => cfb_encrypt_generic::<Aes192>(key, iv, buf),
        CipherFamily::Aes256 => cfb_encrypt_generic::<Aes256>(key, iv, buf),
        CipherFamily::Des => cfb_encrypt_generic::<Des>(key, iv, buf),
    }
}

fn cfb_decrypt_in_place(family: CipherFamily, key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()> {
    match family {
        CipherFamily::Aes128 => cfb_decrypt_generic::<Aes128>(key, iv, buf),
        CipherFamily::Aes192 => cfb_decrypt_generic::<Aes192>(key, iv, buf),
        CipherFamily::Aes256 => cfb_decrypt_generic::<Aes256>(key, iv, buf),
        CipherFamily::Des => cfb_decrypt_generic::<Des>(key, iv, buf),
    }
}

fn cbc_encrypt_generic<C>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()>
where
    C: cipher::BlockCipher + cipher::BlockSizeUser + cipher::KeyInit + Clone,
{
    let mut enc = cbc::Encryptor::<C>::new_from_slices(key, iv)
        .map_err(|e| CfError::KeyInvalid(e.to_string()))?;
    // Every call site hands us a buffer that is already block-aligned.
    for chunk in buf.chunks_exact_mut(cbc::Encryptor::<C>::block_size()) {
        enc.encrypt_block_mut(cipher::generic_array::GenericArray::from_mut_slice(chunk));
    }
    Ok(())
}

fn cbc_decrypt_generic<C>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()>
where
    C: cipher::BlockCipher + cipher::BlockSizeUser + cipher::KeyInit + Clone,
{
    let mut dec = cbc::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|e| CfError::KeyInvalid(e.to_string()))?;
    for chunk in buf.chunks_exact_mut(cbc::Decryptor::<C>::block_size()) {
        dec.decrypt_block_mut(cipher::generic_array::GenericArray::from_mut_slice(chunk));
    }
    Ok(())
}

fn cfb_encrypt_generic<C>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()>
where
    C: cipher::BlockCipher + cipher::BlockSizeUser + cipher::KeyInit + Clone,
{
    let enc = cfb_mode::Encryptor::<C>::new_from_slices(key, iv)
        .map_err(|e| CfError::KeyInvalid(e.to_string()))?;
    enc.encrypt(buf);
    Ok(())
}

fn cfb_decrypt_generic<C>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()>
where
    C: cipher::BlockCipher + cipher::BlockSizeUser + cipher::KeyInit + Clone,
{
    let dec = cfb_mode::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|e| CfError::KeyInvalid(e.to_string()))?;
    dec.decrypt(buf);
    Ok(())
}
