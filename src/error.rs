//! Crate-wide error taxonomy.
//!
//! Every fallible operation in C1–C8 returns `Result<_, CfError>`. The only
//! panics in non-test code are documented programming errors (double
//! release, see `handle.rs`) — everything a caller can trigger by feeding
//! bad input or a corrupt backing file comes back through here.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CfError {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("key invalid: {0}")]
    KeyInvalid(String),

    #[error("file header corrupt: {0}")]
    HeaderCorrupt(String),

    #[error("block {block_no} failed authentication")]
    BlockAuthFailed { block_no: u64 },

    #[error("name invalid: {0}")]
    NameInvalid(String),

    /// A reserved name (`.cfcryptfs.cfg`, `.cfcryptfs.key`, …) was used as
    /// the target of a create-type operation (create, mkdir, symlink,
    /// rename-to, link-to). Distinct from [`CfError::NameInvalid`] so it
    /// maps to `EPERM` rather than `EACCES` — matching the original's
    /// `encryptPath` returning `os.ErrPermission` on creation while
    /// `Access`/lookup paths return `fuse.EACCES`.
    #[error("{0} is a reserved name")]
    ReservedNameOnCreate(String),

    #[error("operation attempted on a released file handle")]
    UseAfterRelease,

    #[error("backing store I/O error: {0}")]
    Backing(#[from] io::Error),

    #[error("preallocation failed: {0}")]
    PreallocFailed(String),

    #[error("ciphertext too short to contain an IV")]
    TooShort,

    #[error("system RNG unavailable: {0}")]
    EntropyUnavailable(String),
}

impl CfError {
    /// Map to the POSIX errno a C8 caller (or a future FUSE binding) would
    /// surface. Mirrors `fuse.ToStatus`/`fuse.EINVAL`-style mapping in the
    /// Go source's `file_header.go`/`fs.go`.
    pub fn to_errno(&self) -> i32 {
        match self {
            CfError::ConfigInvalid(_) => libc::EINVAL,
            CfError::KeyInvalid(_) => libc::EINVAL,
            CfError::HeaderCorrupt(_) => libc::EIO,
            CfError::BlockAuthFailed { .. } => libc::EIO,
            CfError::NameInvalid(_) => libc::EACCES,
            CfError::ReservedNameOnCreate(_) => libc::EPERM,
            CfError::UseAfterRelease => libc::EBADF,
            CfError::Backing(e) => e.raw_os_error().unwrap_or(libc::EIO),
            CfError::PreallocFailed(_) => libc::ENOSPC,
            CfError::TooShort => libc::EIO,
            CfError::EntropyUnavailable(_) => libc::EIO,
        }
    }
}

pub type Result<T> = std::result::Result<T, CfError>;
