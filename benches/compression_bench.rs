use boxrs::filter::chain::{DeflateBuilder, FilterChain, LzmaBuilder, XorBuilder};
use boxrs::io::{MemorySource, Source, END_OF_STREAM};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn drain(mut source: Box<dyn Source + '_>) -> usize {
    let mut total = 0;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = source.read(&mut buf).unwrap();
        if n == END_OF_STREAM {
            break;
        }
        total += n;
    }
    total
}

fn bench_filters(c: &mut Criterion) {
    let data = vec![0u8; 1024 * 1024];

    c.bench_function("deflate_apply_1mb", |b| {
        b.iter(|| {
            let mut chain = FilterChain::new(vec![Box::new(DeflateBuilder::new(6))]);
            let applied = chain.apply(Box::new(MemorySource::new(black_box(&data)))).unwrap();
            drain(applied)
        })
    });

    c.bench_function("lzma_apply_1mb", |b| {
        b.iter(|| {
            let mut chain = FilterChain::new(vec![Box::new(LzmaBuilder::new(6))]);
            let applied = chain.apply(Box::new(MemorySource::new(black_box(&data)))).unwrap();
            drain(applied)
        })
    });

    c.bench_function("xor_apply_1mb", |b| {
        b.iter(|| {
            let mut chain = FilterChain::new(vec![Box::new(XorBuilder::new(b"benchmarkkey".to_vec()))]);
            let applied = chain.apply(Box::new(MemorySource::new(black_box(&data)))).unwrap();
            drain(applied)
        })
    });
}

criterion_group!(benches, bench_filters);
criterion_main!(benches);
