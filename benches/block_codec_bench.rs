use criterion::{black_box, criterion_group, criterion_main, Criterion};
use cfcryptfs::{BlockCodec, CipherFamily};

fn bench_block_codec(c: &mut Criterion) {
    let aes256 = BlockCodec::new(CipherFamily::Aes256, &[7u8; 32]).unwrap();
    let plaintext_4k = vec![0x5au8; 4096];
    let ciphertext_4k = aes256.encrypt(&plaintext_4k).unwrap();

    c.bench_function("aes256_encrypt_4k_block", |b| b.iter(|| aes256.encrypt(black_box(&plaintext_4k)).unwrap()));
    c.bench_function("aes256_decrypt_4k_block", |b| b.iter(|| aes256.decrypt(black_box(&ciphertext_4k)).unwrap()));

    let des = BlockCodec::new(CipherFamily::Des, &[3u8; 8]).unwrap();
    let plaintext_2k = vec![0x5au8; 2048];
    c.bench_function("des_encrypt_2k_block", |b| b.iter(|| des.encrypt(black_box(&plaintext_2k)).unwrap()));
}

criterion_group!(benches, bench_block_codec);
criterion_main!(benches);
