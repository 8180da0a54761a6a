//! # cfcryptfs — transparent block-level encrypted overlay filesystem core
//!
//! Format guarantees:
//! - Every non-empty backing file starts with a fixed 50-byte header:
//!   version, random file ID, mode bits, a keyed-hash tag binding the rest
//!   of the header to that file ID.
//! - Plaintext is split into fixed-size blocks; each is stored as
//!   `iv || ciphertext || tag`, CBC for full blocks, CFB for the trailing
//!   partial block, tag keyed by block index and file ID. No padding.
//! - A full-size all-zero ciphertext unit decodes to a zero plaintext block
//!   without authentication (sparse holes); a short all-zero tail still
//!   authenticates normally.
//! - Filenames are optionally encrypted per path component with an IV
//!   derived from the component's full plaintext path; symlink targets use
//!   a fresh random IV instead.
//! - This crate stops at the in-process filesystem surface (`fs::CfCryptFs`).
//!   Kernel-facing FUSE binding, daemonization, and key-at-rest management
//!   are intentionally out of scope.

pub mod cache;
pub mod config;
pub mod content;
pub mod crypto;
pub mod error;
pub mod fs;
pub mod handle;
pub mod header;
pub mod namecode;
pub mod pool;
pub mod registry;

pub use cache::{cache_capacity, BlockCache};
pub use config::{BlockSize, FsConfig, FsConfigFile};
pub use content::{ContentTranslator, IntraBlock};
pub use crypto::{BlockCodec, CipherFamily};
pub use error::{CfError, Result};
pub use fs::{CfCryptFs, DirEntry};
pub use handle::FileHandle;
pub use header::FileHeader;
pub use namecode::NameCodec;
pub use pool::{BufferPool, BufferPools};
pub use registry::{QIno, Registry};
