//! End-to-end scenarios against a real backing directory (`tempfile`), real
//! file descriptors, real syscalls — no mock filesystem. Covers the six
//! scenarios in SPEC_FULL §8.

use std::path::Path;
use std::sync::Arc;

use cfcryptfs::config::BlockSize;
use cfcryptfs::crypto::CipherFamily;
use cfcryptfs::{CfCryptFs, CfError, FsConfig};

/// Plain-path mode so these tests can address a file's backing path
/// directly by name; name encryption itself is covered in `fs.rs`'s own
/// unit tests.
fn fs_at(dir: &Path, block_size: BlockSize, master_key: &[u8]) -> CfCryptFs {
    let cipher_family = CipherFamily::from_key_len(master_key.len()).unwrap();
    let config = FsConfig {
        backing_dir: dir.to_path_buf(),
        cipher_family,
        block_size,
        encrypt_paths: false,
        allow_other: false,
        backing_file_mode: 0o600,
    };
    CfCryptFs::new(config, master_key, 1 << 20).unwrap()
}

/// Scenario 1: round-trip a small file, and check the exact backing size
/// formula (`HeaderLen + PBS + BS + 16`) for a single AES block.
#[test]
fn scenario_round_trip_small_file() {
    let dir = tempfile::tempdir().unwrap();
    let fs = fs_at(dir.path(), BlockSize::B2K, &[1u8; 32]);

    let handle = fs.create("a.txt", libc::O_RDWR, 0o644).unwrap();
    handle.write(b"hello world", 0).unwrap();
    handle.release();

    let handle = fs.open("a.txt", libc::O_RDWR).unwrap();
    let got = handle.read(0, 11).unwrap();
    assert_eq!(&got, b"hello world");
    handle.release();

    let backing = dir.path().join("a.txt");
    let size = std::fs::metadata(&backing).unwrap().len();
    // Per §3's `plain_size_to_cipher_size`: the written range (11 bytes)
    // never touches a full PBS block, so the on-disk last block is only as
    // long as what was actually written (11 bytes), not padded out to
    // PBS — `HeaderLen + plain + 1*(BS+16)`, not `HeaderLen + PBS + BS+16`.
    assert_eq!(size, 50 + 11 + (16 + 16));
}

/// Scenario 2: a write that spans two blocks at a non-aligned offset, and
/// the resulting backing file size.
#[test]
fn scenario_non_aligned_write_across_two_blocks() {
    let dir = tempfile::tempdir().unwrap();

    // `FsConfig`/`BlockSize` only expose the four canonical PBS values, and
    // SPEC_FULL's scenario 2 uses PBS=256, so this is driven directly
    // through `ContentTranslator`/`FileHandle` instead of through `CfCryptFs`.
    use cfcryptfs::content::ContentTranslator;
    use cfcryptfs::crypto::BlockCodec;
    use cfcryptfs::registry::Registry;
    use cfcryptfs::FileHandle;

    let path = dir.path().join("f");
    let fd = std::fs::OpenOptions::new().read(true).write(true).create(true).open(&path).unwrap();
    let codec = BlockCodec::new(CipherFamily::Aes256, &[9u8; 32]).unwrap();
    let content = Arc::new(ContentTranslator::new(codec, 256, 1 << 20));
    let registry = Arc::new(Registry::new());
    let handle = FileHandle::open(fd, registry, content, Some(0o100644)).unwrap();

    let data: Vec<u8> = (0..300u32).map(|i| (i * 37 % 251) as u8).collect();
    handle.write(&data, 500).unwrap();
    let got = handle.read(500, 300).unwrap();
    assert_eq!(got, data);
    handle.release();

    let size = std::fs::metadata(&path).unwrap().len();
    // §3: blocks = floor((800-1)/256)+1 = 4, cipher = HeaderLen + plain +
    // blocks*(BS+16) = 50 + 800 + 4*32.
    assert_eq!(size, 50 + 800 + 4 * (16 + 16));
}

/// Scenario 3: flipping a byte inside a block's ciphertext payload makes
/// any overlapping read fail authentication with `EIO`.
#[test]
fn scenario_tampering_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let fs = fs_at(dir.path(), BlockSize::B2K, &[3u8; 32]);

    let handle = fs.create("t.bin", libc::O_RDWR, 0o644).unwrap();
    handle.write(&vec![0x42u8; 4096], 0).unwrap();
    handle.release();

    let backing = dir.path().join("t.bin");
    let mut bytes = std::fs::read(&backing).unwrap();
    let tamper_offset = 50 + 16 + 100; // inside block 0's payload, past its IV
    bytes[tamper_offset] ^= 0xFF;
    std::fs::write(&backing, &bytes).unwrap();

    let handle = fs.open("t.bin", libc::O_RDWR).unwrap();
    let err = handle.read(0, 100).unwrap_err();
    assert!(matches!(err, CfError::BlockAuthFailed { block_no: 0 }));
    assert_eq!(err.to_errno(), libc::EIO);
    handle.release();
}

/// Scenario 4: writing past the current end of file leaves a sparse hole
/// that reads back as zeros, without ever materializing ciphertext for it.
#[test]
fn scenario_sparse_hole() {
    let dir = tempfile::tempdir().unwrap();
    let fs = fs_at(dir.path(), BlockSize::B2K, &[4u8; 32]);
    let pbs = 2048u64;

    let handle = fs.create("sparse.bin", libc::O_RDWR, 0o644).unwrap();
    handle.write(&[0xAB], 3 * pbs).unwrap();

    let (size, _mode) = handle.get_attr().unwrap();
    assert_eq!(size, 3 * pbs + 1);

    let zeros = handle.read(0, (3 * pbs) as usize).unwrap();
    assert_eq!(zeros, vec![0u8; (3 * pbs) as usize]);

    let tail = handle.read(3 * pbs, 1).unwrap();
    assert_eq!(tail, vec![0xAB]);
    handle.release();
}

/// Scenario 5: truncate down, then grow across a block boundary.
#[test]
fn scenario_truncate_then_grow() {
    let dir = tempfile::tempdir().unwrap();
    let fs = fs_at(dir.path(), BlockSize::B2K, &[5u8; 32]);

    let handle = fs.create("tg.bin", libc::O_RDWR, 0o644).unwrap();
    let original: Vec<u8> = (0..10 * 1024u32).map(|i| (i % 256) as u8).collect();
    handle.write(&original, 0).unwrap();

    handle.truncate(100).unwrap();
    let (size, _) = handle.get_attr().unwrap();
    assert_eq!(size, 100);
    let got = handle.read(0, 100).unwrap();
    assert_eq!(got, original[..100]);

    handle.truncate(1 << 20).unwrap();
    let (size, _) = handle.get_attr().unwrap();
    assert_eq!(size, 1 << 20);
    let tail = handle.read(100, (1 << 20) - 100).unwrap();
    assert_eq!(tail, vec![0u8; (1 << 20) - 100]);
    handle.release();
}

/// Scenario 6: 20 threads each write a disjoint slice of one file
/// concurrently; writes serialize per inode, so the final read is exactly
/// the concatenation with no interleaving corruption.
#[test]
fn scenario_parallel_writers_one_inode() {
    let dir = tempfile::tempdir().unwrap();
    let fs = fs_at(dir.path(), BlockSize::B4K, &[6u8; 32]);

    const SLICE: usize = 545;
    const WRITERS: usize = 20;

    let handle = fs.create("shared.bin", libc::O_RDWR, 0o644).unwrap();
    handle.write(&vec![0u8; SLICE * WRITERS], 0).unwrap();

    std::thread::scope(|scope| {
        for i in 0..WRITERS {
            let handle = &handle;
            scope.spawn(move || {
                let payload = vec![(i + 1) as u8; SLICE];
                handle.write(&payload, (i * SLICE) as u64).unwrap();
            });
        }
    });

    let got = handle.read(0, SLICE * WRITERS).unwrap();
    for i in 0..WRITERS {
        let slice = &got[i * SLICE..(i + 1) * SLICE];
        assert!(slice.iter().all(|&b| b == (i + 1) as u8), "writer {i}'s slice was corrupted");
    }
    handle.release();
}
