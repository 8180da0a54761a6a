//! Filesystem Surface (C8) — maps namespace operations (open, create,
//! lookup, directory listing, rename, links, permission bits) onto the
//! backing directory, translating paths through C7 and routing regular-file
//! data operations through C6.
//!
//! Grounded in `original_source/cffuse/fs.go`. Expressed as a plain struct
//! rather than a trait bound to any kernel-facing binding crate: a FUSE (or
//! other) adapter is a thin wrapper translating kernel requests into calls
//! here and mapping `CfError::to_errno()` back out. That adapter is out of
//! scope for this crate.

use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::FsConfig;
use crate::content::ContentTranslator;
use crate::crypto::BlockCodec;
use crate::error::{CfError, Result};
use crate::handle::FileHandle;
use crate::namecode::{self, NameCodec};
use crate::registry::Registry;

pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

pub struct CfCryptFs {
    config: FsConfig,
    content: Arc<ContentTranslator>,
    names: NameCodec,
    registry: Arc<Registry>,
}

impl CfCryptFs {
    pub fn new(config: FsConfig, master_key: &[u8], max_request: usize) -> Result<Self> {
        let codec = BlockCodec::from_master_key(master_key)?;
        let content = Arc::new(ContentTranslator::new(codec, config.block_size.bytes(), max_request));
        let names = NameCodec::new(master_key, !config.encrypt_paths)?;
        Ok(Self { config, content, names, registry: Arc::new(Registry::new()) })
    }

    /// Translate a plaintext relative path into the path on the backing
    /// filesystem. In plain-path mode every component is checked against
    /// the reserved names (they are never encrypted, so a collision here
    /// is a real collision); in encrypted-path mode a collision would
    /// require the ciphertext to happen to spell a reserved name, which
    /// C7's callers don't need to guard against.
    ///
    /// Query paths (open, stat, readdir, access, unlink, rename/link
    /// source, …) hit a reserved name with `NameInvalid` → `EACCES`.
    fn backing_path(&self, path: &str) -> Result<PathBuf> {
        self.resolve_backing_path(path, false)
    }

    /// Same translation, but for operations that create a new directory
    /// entry (create, mkdir, symlink, rename/link destination). A reserved
    /// name here is `ReservedNameOnCreate` → `EPERM`, matching the
    /// original's `encryptPath` returning `os.ErrPermission` on creation
    /// while lookup paths return `fuse.EACCES`.
    fn backing_path_for_create(&self, path: &str) -> Result<PathBuf> {
        self.resolve_backing_path(path, true)
    }

    fn resolve_backing_path(&self, path: &str, is_create: bool) -> Result<PathBuf> {
        let trimmed = path.trim_start_matches('/');
        let encoded = if self.names.plain_path() {
            for component in trimmed.split('/') {
                if namecode::is_reserved(component) {
                    return Err(if is_create {
                        CfError::ReservedNameOnCreate(component.to_string())
                    } else {
                        CfError::NameInvalid(format!("{component} is reserved"))
                    });
                }
            }
            trimmed.to_string()
        } else {
            self.names.encrypt_path(trimmed)?
        };
        Ok(self.config.backing_dir.join(encoded))
    }

    fn open_backing(path: &Path, flags: i32) -> Result<File> {
        OpenOptions::new().read(true).write(true).custom_flags(flags).open(path).map_err(CfError::Backing)
    }

    fn create_backing(path: &Path, flags: i32, mode: u32) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .custom_flags(flags)
            .mode(mode)
            .open(path)
            .map_err(CfError::Backing)
    }

    // ── Open / create ────────────────────────────────────────────────────

    pub fn open(&self, path: &str, flags: i32) -> Result<FileHandle> {
        let backing = self.backing_path(path)?;
        let fd = Self::open_backing(&backing, mangle_open_flags(flags))?;
        FileHandle::open(fd, self.registry.clone(), self.content.clone(), None)
    }

    pub fn create(&self, path: &str, flags: i32, mode: u32) -> Result<FileHandle> {
        let backing = self.backing_path_for_create(path)?;
        let fd = Self::create_backing(&backing, mangle_open_flags(flags), self.config.backing_file_mode)?;
        FileHandle::open(fd, self.registry.clone(), self.content.clone(), Some(mode | libc::S_IFREG as u32))
    }

    // ── Attributes ───────────────────────────────────────────────────────

    pub fn get_attr(&self, path: &str) -> Result<(u64, u32)> {
        let backing = self.backing_path(path)?;
        let meta = fs::symlink_metadata(&backing).map_err(CfError::Backing)?;
        if meta.file_type().is_dir() {
            return Ok((meta.len(), meta.mode()));
        }
        if meta.file_type().is_symlink() {
            return Ok((meta.len(), meta.mode()));
        }
        let fd = Self::open_backing(&backing, libc::O_RDONLY)?;
        let handle = FileHandle::open(fd, self.registry.clone(), self.content.clone(), None)?;
        let result = handle.get_attr();
        handle.release();
        result
    }

    pub fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        let backing = self.backing_path(path)?;
        let meta = fs::symlink_metadata(&backing).map_err(CfError::Backing)?;
        if meta.file_type().is_dir() || meta.file_type().is_symlink() {
            return fs::set_permissions(&backing, fs::Permissions::from_mode(mode)).map_err(CfError::Backing);
        }
        let fd = Self::open_backing(&backing, libc::O_RDWR)?;
        let handle = FileHandle::open(fd, self.registry.clone(), self.content.clone(), None)?;
        let result = handle.chmod(mode);
        handle.release();
        result
    }

    pub fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        let backing = self.backing_path(path)?;
        let c_path =
            CString::new(backing.as_os_str().as_bytes()).map_err(|_| CfError::NameInvalid("path contains NUL byte".into()))?;
        let rc = unsafe { libc::lchown(c_path.as_ptr(), uid, gid) };
        if rc != 0 {
            return Err(CfError::Backing(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    pub fn access(&self, path: &str, caller_uid: u32, caller_gid: u32, request_mask: u32) -> Result<bool> {
        let backing = self.backing_path(path)?;
        let meta = fs::symlink_metadata(&backing).map_err(CfError::Backing)?;
        Ok(access_check(meta.mode(), meta.uid(), meta.gid(), caller_uid, caller_gid, request_mask))
    }

    pub fn statfs(&self, path: &str) -> Result<libc::statvfs> {
        let backing = self.backing_path(path)?;
        let c_path =
            CString::new(backing.as_os_str().as_bytes()).map_err(|_| CfError::NameInvalid("path contains NUL byte".into()))?;
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if rc != 0 {
            return Err(CfError::Backing(std::io::Error::last_os_error()));
        }
        Ok(stat)
    }

    // ── Directories ──────────────────────────────────────────────────────

    pub fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        let backing = self.backing_path_for_create(path)?;
        fs::DirBuilder::new().mode(mode).create(&backing).map_err(CfError::Backing)
    }

    pub fn rmdir(&self, path: &str) -> Result<()> {
        let backing = self.backing_path(path)?;
        fs::remove_dir(&backing).map_err(CfError::Backing)
    }

    /// Enumerate a directory's entries, decrypting names as needed.
    /// Reserved names are always skipped (they are stored literally on
    /// disk regardless of path-encryption mode); undecodable encrypted
    /// names are skipped rather than surfaced as an error, matching §7's
    /// "name-decode failures in readdir skip the entry".
    pub fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let backing = self.backing_path(path)?;
        let mut out = Vec::new();
        for entry in fs::read_dir(&backing).map_err(CfError::Backing)? {
            let entry = entry.map_err(CfError::Backing)?;
            let raw_name = match entry.file_name().into_string() {
                Ok(n) => n,
                Err(_) => continue,
            };
            if namecode::is_reserved(&raw_name) {
                continue;
            }
            let name = if self.names.plain_path() {
                raw_name
            } else {
                match self.names.decrypt_name(&raw_name) {
                    Ok(n) => n,
                    Err(_) => continue,
                }
            };
            let is_dir = entry.file_type().map_err(CfError::Backing)?.is_dir();
            out.push(DirEntry { name, is_dir });
        }
        Ok(out)
    }

    // ── Links ────────────────────────────────────────────────────────────

    pub fn symlink(&self, target: &str, link_path: &str) -> Result<()> {
        let backing = self.backing_path_for_create(link_path)?;
        let encoded = if self.names.plain_path() { target.to_string() } else { self.names.encrypt_link(target)? };
        std::os::unix::fs::symlink(&encoded, &backing).map_err(CfError::Backing)
    }

    pub fn readlink(&self, link_path: &str) -> Result<String> {
        let backing = self.backing_path(link_path)?;
        let encoded = fs::read_link(&backing).map_err(CfError::Backing)?;
        let encoded = encoded.to_str().ok_or_else(|| CfError::NameInvalid("non-utf8 link target".into()))?;
        if self.names.plain_path() {
            Ok(encoded.to_string())
        } else {
            self.names.decrypt_link(encoded)
        }
    }

    pub fn link(&self, old_path: &str, new_path: &str) -> Result<()> {
        let old_backing = self.backing_path(old_path)?;
        let new_backing = self.backing_path_for_create(new_path)?;
        fs::hard_link(&old_backing, &new_backing).map_err(CfError::Backing)
    }

    pub fn unlink(&self, path: &str) -> Result<()> {
        let backing = self.backing_path(path)?;
        fs::remove_file(&backing).map_err(CfError::Backing)
    }

    /// Cross-device atomic rename is out of scope (non-goal); this is a
    /// plain `rename(2)`, atomic only within one backing filesystem.
    pub fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        let old_backing = self.backing_path(old_path)?;
        let new_backing = self.backing_path_for_create(new_path)?;
        fs::rename(&old_backing, &new_backing).map_err(CfError::Backing)
    }
}

/// `O_WRONLY -> O_RDWR` (read-modify-write needs read access), `O_APPEND`
/// stripped (append offsets are computed by C6, not the kernel).
fn mangle_open_flags(flags: i32) -> i32 {
    let mut mangled = flags;
    if mangled & libc::O_ACCMODE == libc::O_WRONLY {
        mangled = (mangled & !libc::O_ACCMODE) | libc::O_RDWR;
    }
    mangled &= !libc::O_APPEND;
    mangled
}

/// Unix permission-triplet check: owner bits if the caller is the owner,
/// group bits if the caller shares the group, else other bits. Root gets the
/// union of all three triplets rather than an unconditional pass.
pub fn access_check(file_mode: u32, file_uid: u32, file_gid: u32, caller_uid: u32, caller_gid: u32, request_mask: u32) -> bool {
    let mask = if caller_uid == 0 {
        // Root does not bypass the check outright: its effective
        // permission set is the union of all three triplets, and that
        // union still has to contain the requested bits (see
        // original_source/cffuse/fs.go's `Access`).
        ((file_mode >> 6) & 0o7) | ((file_mode >> 3) & 0o7) | (file_mode & 0o7)
    } else if caller_uid == file_uid {
        (file_mode >> 6) & 0o7
    } else if caller_gid == file_gid {
        (file_mode >> 3) & 0o7
    } else {
        file_mode & 0o7
    };
    mask & request_mask == request_mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BlockSize;
    use tempfile::tempdir;

    fn fs_at(dir: &Path, encrypt_paths: bool) -> CfCryptFs {
        let config = FsConfig {
            backing_dir: dir.to_path_buf(),
            cipher_family: crate::crypto::CipherFamily::Aes256,
            block_size: BlockSize::B4K,
            encrypt_paths,
            allow_other: false,
            backing_file_mode: 0o600,
        };
        CfCryptFs::new(config, &[7u8; 32], 1 << 20).unwrap()
    }

    #[test]
    fn mangle_flags_rewrites_wronly_and_strips_append() {
        let mangled = mangle_open_flags(libc::O_WRONLY | libc::O_APPEND);
        assert_eq!(mangled & libc::O_ACCMODE, libc::O_RDWR);
        assert_eq!(mangled & libc::O_APPEND, 0);
    }

    #[test]
    fn access_check_root_gets_union_of_triplets_not_unconditional_pass() {
        // Root still goes through `mode>>6&7 | mode>>3&7 | mode&7`, not a
        // blanket true: a mode-000 file has an empty union, so even X_OK
        // must fail for root.
        assert!(!access_check(0o000, 1, 1, 0, 0, 0o1));
        // Owner-only read bit is enough for root to pass a read check even
        // though root is neither the owner nor in the group.
        assert!(access_check(0o400, 1, 1, 0, 0, 0o4));
        // Union across all three triplets: write only in the group bits,
        // execute only in the other bits.
        assert!(access_check(0o010 | 0o001, 1, 1, 0, 0, 0o3));
    }

    #[test]
    fn access_check_owner_group_other_triplets() {
        let mode = 0o640;
        assert!(access_check(mode, 10, 10, 10, 20, 0o6));
        assert!(access_check(mode, 10, 10, 11, 10, 0o4));
        assert!(!access_check(mode, 10, 10, 11, 20, 0o1));
    }

    #[test]
    fn create_write_read_round_trip_through_fs_surface() {
        let dir = tempdir().unwrap();
        let fs = fs_at(dir.path(), true);
        let handle = fs.create("greeting.txt", libc::O_RDWR, 0o644).unwrap();
        handle.write(b"hi there", 0).unwrap();
        let got = handle.read(0, 8).unwrap();
        assert_eq!(&got, b"hi there");
        handle.release();

        let backing_names: Vec<_> = fs::read_dir(dir.path()).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert!(!backing_names.iter().any(|n| n == "greeting.txt"), "plaintext name must not appear on disk");
    }

    #[test]
    fn reserved_name_is_refused_in_plain_path_mode() {
        let dir = tempdir().unwrap();
        let fs = fs_at(dir.path(), false);
        let err = fs.create(".cfcryptfs.cfg", libc::O_RDWR, 0o644).unwrap_err();
        assert!(matches!(err, CfError::ReservedNameOnCreate(_)));
        assert_eq!(err.to_errno(), libc::EPERM);
    }

    #[test]
    fn reserved_name_query_yields_eacces_not_eperm() {
        let dir = tempdir().unwrap();
        let fs = fs_at(dir.path(), false);
        let err = fs.get_attr(".cfcryptfs.cfg").unwrap_err();
        assert!(matches!(err, CfError::NameInvalid(_)));
        assert_eq!(err.to_errno(), libc::EACCES);
    }

    #[test]
    fn reserved_name_is_refused_for_other_create_operations() {
        let dir = tempdir().unwrap();
        let fs = fs_at(dir.path(), false);
        assert_eq!(fs.mkdir(".cfcryptfs.key", 0o755).unwrap_err().to_errno(), libc::EPERM);
        assert_eq!(fs.symlink("target", ".cfcryptfs.key.tmp").unwrap_err().to_errno(), libc::EPERM);

        fs.create("real.txt", libc::O_RDWR, 0o644).unwrap().release();
        assert_eq!(fs.rename("real.txt", ".cfcryptfs.cfg").unwrap_err().to_errno(), libc::EPERM);
        assert_eq!(fs.link("real.txt", ".cfcryptfs.cfg").unwrap_err().to_errno(), libc::EPERM);
    }

    #[test]
    fn read_dir_decrypts_names_and_skips_reserved() {
        let dir = tempdir().unwrap();
        let fs = fs_at(dir.path(), true);
        fs.create("one.txt", libc::O_RDWR, 0o644).unwrap().release();
        fs.create("two.txt", libc::O_RDWR, 0o644).unwrap().release();
        std::fs::write(dir.path().join(".cfcryptfs.cfg"), b"{}").unwrap();

        let mut names: Vec<_> = fs.read_dir("").unwrap().into_iter().map(|e| e.name).collect();
        names.sort();
        assert_eq!(names, vec!["one.txt".to_string(), "two.txt".to_string()]);
    }

    #[test]
    fn symlink_target_is_hidden_on_disk_but_readlink_recovers_it() {
        let dir = tempdir().unwrap();
        let fs = fs_at(dir.path(), true);
        fs.symlink("/etc/passwd", "link").unwrap();
        let backing = dir.path().join(fs.names.encrypt_path("link").unwrap());
        let raw = std::fs::read_link(&backing).unwrap();
        assert_ne!(raw.to_str().unwrap(), "/etc/passwd");
        assert_eq!(fs.readlink("link").unwrap(), "/etc/passwd");
    }
}
