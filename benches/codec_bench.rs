use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dedupimg::cd::sector::{reconstruct_ecc, reconstruct_prefix, suffix_is_correct};
use dedupimg::cd::{EccLayout, SectorMode, SECTOR_SIZE};
use dedupimg::codec::{get_codec, Codec, CompressionKind};
use dedupimg::{CreateOptions, Image, MediaType};
use std::io::Cursor;

fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 7) ^ (i >> 9)) as u8).collect()
}

fn bench_compression(c: &mut Criterion) {
    let data = sample(256 * 1024);
    let lzma = get_codec(CompressionKind::Lzma);
    let subchannel = get_codec(CompressionKind::LzmaSubchannelTransform);

    c.bench_function("lzma_compress_256k", |b| b.iter(|| lzma.compress(black_box(&data)).unwrap()));
    c.bench_function("lzma_subchannel_compress_256k", |b| {
        b.iter(|| subchannel.compress(black_box(&data[..96 * 2048])).unwrap())
    });
}

fn bench_cd_sector(c: &mut Criterion) {
    let mut sector = vec![0u8; SECTOR_SIZE];
    reconstruct_prefix(&mut sector, SectorMode::Mode1, 150);
    sector[16..16 + 2048].copy_from_slice(&sample(2048));

    c.bench_function("mode1_reconstruct_ecc", |b| {
        b.iter(|| reconstruct_ecc(black_box(&mut sector), EccLayout::Mode1))
    });
    c.bench_function("mode1_check_suffix", |b| b.iter(|| suffix_is_correct(black_box(&sector))));
}

fn bench_dedup_write(c: &mut Criterion) {
    let sector = sample(512);

    c.bench_function("write_1024_identical_sectors", |b| {
        b.iter(|| {
            let mut img = Image::create(
                Cursor::new(Vec::new()),
                MediaType::GENERIC_HDD,
                CreateOptions::default(),
                1024,
                512,
            )
            .unwrap();
            for lba in 0..1024 {
                img.write_sector(lba, black_box(&sector)).unwrap();
            }
            img.close().unwrap();
        })
    });
}

criterion_group!(benches, bench_compression, bench_cd_sector, bench_dedup_write);
criterion_main!(benches);
