use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use xfg_marker::pe::X64_HASH_LOAD_PREFIX;
use xfg_marker::synth::{SyntheticModule, CODE_RVA};
use xfg_marker::xfg::find_hash_loads;
use xfg_marker::{AddressWidth, MarkerConfig, XfgMarker};

/// Pseudo-random code with a hash load every `every` bytes.
fn code_buffer(len: usize, every: usize) -> Vec<u8> {
    let mut state = 0x9E37_79B9_7F4A_7C15u64;
    let mut buf: Vec<u8> = (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect();
    let mut i = 0;
    while i + 10 <= len {
        buf[i..i + 2].copy_from_slice(&X64_HASH_LOAD_PREFIX);
        i += every;
    }
    buf
}

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash-load-scan");
    for (name, every) in [("sparse", 4096), ("dense", 64)] {
        let data = code_buffer(8 * 1024 * 1024, every);
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_function(name, |b| {
            b.iter(|| find_hash_loads(&data, &X64_HASH_LOAD_PREFIX).count())
        });
    }
    group.finish();
}

fn bench_run(c: &mut Criterion) {
    let mut module =
        SyntheticModule::new(0x1_4000_0000, AddressWidth::Bits64).code_size(0x40_0000);
    for i in 0..2000u32 {
        let rva = CODE_RVA + 0x100 + i * 0x80;
        module = module
            .xfg_function(rva, (i as u64 % 64) << 8)
            .hash_load(rva + 0x20, (i as u64 % 64) << 8);
    }
    let marker = XfgMarker::new(AddressWidth::Bits64);
    let config = MarkerConfig::default();

    c.bench_function("run-2000-entries", |b| {
        b.iter_batched(
            || module.build(),
            |mut host| marker.run(&mut host, &config),
            BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, bench_scan, bench_run);
criterion_main!(benches);
