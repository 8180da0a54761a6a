//! File Header (C3) — the first `HeaderLen` bytes of every non-empty
//! backing file: version, random file ID, mode bits, integrity tag.
//!
//! Byte layout (big-endian, 50 bytes total):
//!
//! ```text
//! Offset  Size  Field
//!    0      2   version   (current value 0)
//!    2     16   file_id   random, generated once per file
//!   18      4   mode      POSIX mode, regular-file bit included
//!   22     12   reserved  zero
//!   34     16   tag       keyed hash of bytes [0..34), key = file_id
//! ```
//!
//! `tag` authenticates the rest of the header under a key derived from the
//! header's own `file_id` — this binds the header to itself, not to any
//! other file, which is enough since there is exactly one header per file.

use byteorder::{BigEndian, ByteOrder};
use hmac::{Hmac, Mac};

use crate::crypto::{constant_time_eq, random_bytes};
use crate::error::{CfError, Result};

pub const FILE_ID_LEN: usize = 16;
pub const TAG_LEN: usize = 16;
const VERSION_LEN: usize = 2;
const MODE_LEN: usize = 4;
const RESERVED_LEN: usize = 12;
const SIGNED_LEN: usize = VERSION_LEN + FILE_ID_LEN + MODE_LEN + RESERVED_LEN; // 34
pub const HEADER_LEN: usize = SIGNED_LEN + TAG_LEN; // 50

pub const CURRENT_VERSION: u16 = 0;

type HmacMd5 = Hmac<md5::Md5>;

#[derive(Debug, Clone)]
pub struct FileHeader {
    pub version: u16,
    pub file_id: [u8; FILE_ID_LEN],
    pub mode: u32,
}

impl FileHeader {
    /// A fresh header for a newly created file: random file ID, current
    /// version, caller-supplied mode.
    pub fn new(mode: u32) -> Result<Self> {
        let id = random_bytes(FILE_ID_LEN)?;
        let mut file_id = [0u8; FILE_ID_LEN];
        file_id.copy_from_slice(&id);
        Ok(Self { version: CURRENT_VERSION, file_id, mode })
    }

    /// Serialize and append the keyed-hash tag.
    pub fn pack(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN];
        BigEndian::write_u16(&mut buf[0..2], self.version);
        buf[2..2 + FILE_ID_LEN].copy_from_slice(&self.file_id);
        BigEndian::write_u32(&mut buf[18..22], self.mode);
        // buf[22..34] stays zero — the reserved region.
        let tag = sign(&self.file_id, &buf[..SIGNED_LEN]);
        buf[SIGNED_LEN..HEADER_LEN].copy_from_slice(&tag);
        buf
    }

    /// Parse and authenticate a packed header. Requires an exact
    /// `HEADER_LEN`-byte input, a matching tag, and the current version.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() != HEADER_LEN {
            return Err(CfError::HeaderCorrupt(format!(
                "expected {HEADER_LEN} bytes, got {}",
                buf.len()
            )));
        }
        let file_id: [u8; FILE_ID_LEN] = buf[2..2 + FILE_ID_LEN]
            .try_into()
            .expect("slice length checked above");

        let expected = sign(&file_id, &buf[..SIGNED_LEN]);
        let stored = &buf[SIGNED_LEN..HEADER_LEN];
        if !constant_time_eq(&expected, stored) {
            return Err(CfError::HeaderCorrupt("tag mismatch".into()));
        }

        let version = BigEndian::read_u16(&buf[0..2]);
        if version != CURRENT_VERSION {
            return Err(CfError::HeaderCorrupt(format!(
                "unsupported header version {version}"
            )));
        }
        let mode = BigEndian::read_u32(&buf[18..22]);
        Ok(Self { version, file_id, mode })
    }
}

fn sign(file_id: &[u8], data: &[u8]) -> [u8; TAG_LEN] {
    let mut mac = HmacMd5::new_from_slice(file_id).expect("HMAC accepts keys of any length");
    mac.update(data);
    let out = mac.finalize().into_bytes();
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&out);
    tag
}
