use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use cryptfs_microbench::config::Config;
use cryptfs_microbench::suite::prefetch_targets;

fn bench_urandom_prefetch(c: &mut Criterion) {
    let cfg = Config::default();
    let targets = prefetch_targets(cfg.prefetch()).expect("could not open entropy source");

    let mut group = c.benchmark_group("urandom_prefetch");
    group.throughput(Throughput::Bytes(cfg.prefetch().request_size() as u64));
    for target in &targets {
        group.bench_function(target.entry().to_string(), |b| {
            b.iter(|| black_box(target.request()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_urandom_prefetch);
criterion_main!(benches);
