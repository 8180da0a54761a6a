//! Name Codec (C7) — per-component filename encryption and symlink-target
//! encryption.
//!
//! Grounded in `original_source/internal/namecrypter/name_crypter.go`. Name
//! encryption always runs under AES-256 regardless of the filesystem's
//! content cipher family: the master key is repeated and truncated to 32
//! bytes, exactly as the Go source pads `key` before constructing its
//! `AesCrypter`.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use zeroize::Zeroizing;

use crate::crypto::{BlockCodec, CipherFamily};
use crate::error::{CfError, Result};

type HmacMd5 = Hmac<md5::Md5>;

/// Names the filesystem surface (C8) must refuse to create, encrypt, or
/// resolve through the name codec. `.cfcryptfs.key.tmp` is a supplement
/// beyond the two names the Go source reserves, covering a safe in-place
/// key-rotation write that overwrites `.cfcryptfs.key` only after it lands.
pub const RESERVED_NAMES: [&str; 3] = [".cfcryptfs.cfg", ".cfcryptfs.key", ".cfcryptfs.key.tmp"];

pub fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

pub struct NameCodec {
    codec: BlockCodec,
    key: Zeroizing<Vec<u8>>,
    plain_path: bool,
}

impl NameCodec {
    /// `plain_path` selects pass-through mode: names and paths are returned
    /// unchanged (reserved-name rejection still happens at C8), and the
    /// codec itself is still constructed so a later re-key doesn't need a
    /// different type.
    pub fn new(master_key: &[u8], plain_path: bool) -> Result<Self> {
        let mut key = master_key.to_vec();
        if key.is_empty() {
            return Err(CfError::KeyInvalid("empty master key".into()));
        }
        while key.len() < 32 {
            let doubled = key.clone();
            key.extend_from_slice(&doubled);
        }
        key.truncate(32);
        let codec = BlockCodec::new(CipherFamily::Aes256, &key)?;
        Ok(Self { codec, key: Zeroizing::new(key), plain_path })
    }

    pub fn plain_path(&self) -> bool {
        self.plain_path
    }

    fn path_iv(&self, path: &str) -> [u8; 16] {
        let mut mac = HmacMd5::new_from_slice(&self.key).expect("HMAC accepts keys of any length");
        mac.update(path.as_bytes());
        let out = mac.finalize().into_bytes();
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&out);
        iv
    }

    /// Encrypt one path component. `path` is the component's full
    /// plaintext path (used only to derive the IV, not stored), so the
    /// same leaf name under two different parents encrypts differently.
    pub fn encrypt_name(&self, path: &str, name: &str) -> Result<String> {
        if path.is_empty() && name.is_empty() {
            return Ok(String::new());
        }
        let iv = self.path_iv(path);
        let mut ciphertext = vec![0u8; name.len()];
        self.codec.encrypt_with_iv(&mut ciphertext, name.as_bytes(), &iv)?;
        let mut packed = Vec::with_capacity(iv.len() + ciphertext.len());
        packed.extend_from_slice(&iv);
        packed.extend_from_slice(&ciphertext);
        Ok(URL_SAFE.encode(packed))
    }

    pub fn decrypt_name(&self, encoded: &str) -> Result<String> {
        if encoded.is_empty() {
            return Ok(String::new());
        }
        let packed = URL_SAFE.decode(encoded).map_err(|e| CfError::NameInvalid(e.to_string()))?;
        if packed.len() <= 16 {
            return Err(CfError::NameInvalid("encrypted name shorter than one IV".into()));
        }
        let plain = self.codec.decrypt(&packed)?;
        String::from_utf8(plain).map_err(|e| CfError::NameInvalid(e.to_string()))
    }

    /// Encrypt every component of a `/`-joined relative path independently,
    /// each keyed off its own growing plaintext prefix.
    pub fn encrypt_path(&self, path: &str) -> Result<String> {
        if self.plain_path || path.is_empty() || path == "." {
            return Ok(path.to_string());
        }
        let mut plain_prefix = String::new();
        let mut cipher_components = Vec::new();
        for component in path.split('/') {
            if !plain_prefix.is_empty() {
                plain_prefix.push('/');
            }
            plain_prefix.push_str(component);
            cipher_components.push(self.encrypt_name(&plain_prefix, component)?);
        }
        Ok(cipher_components.join("/"))
    }

    pub fn decrypt_path(&self, path: &str) -> Result<String> {
        if self.plain_path || path.is_empty() || path == "." {
            return Ok(path.to_string());
        }
        let mut plain_components = Vec::with_capacity(path.matches('/').count() + 1);
        for component in path.split('/') {
            plain_components.push(self.decrypt_name(component)?);
        }
        Ok(plain_components.join("/"))
    }

    /// Symlink targets are encrypted with a fresh random IV each time,
    /// unlike regular names: the target is arbitrary data, not bound to
    /// any path, so there is nothing meaningful to derive an IV from.
    pub fn encrypt_link(&self, target: &str) -> Result<String> {
        let ct = self.codec.encrypt(target.as_bytes())?;
        Ok(URL_SAFE.encode(ct))
    }

    pub fn decrypt_link(&self, encoded: &str) -> Result<String> {
        let packed = URL_SAFE.decode(encoded).map_err(|e| CfError::NameInvalid(e.to_string()))?;
        let plain = self.codec.decrypt(&packed)?;
        String::from_utf8(plain).map_err(|e| CfError::NameInvalid(e.to_string()))
    }
}
