use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use mirrorbuf::{page_size, SpscQueue};

fn queue(c: &mut Criterion) {
    let q = SpscQueue::with_capacity(page_size() * 64).unwrap();

    let mut group = c.benchmark_group("spsc_queue");
    group.throughput(Throughput::Elements(1));

    group.bench_function("prepare_commit_consume/64", |b| {
        b.iter(|| {
            let slot = q.try_prepare(64).unwrap();
            slot[0] = 0xAB;
            q.commit(64);
            q.consume(64);
        })
    });

    group.bench_function("prepare_commit_consume/512", |b| {
        b.iter(|| {
            let slot = q.try_prepare(512).unwrap();
            slot[0] = 0xAB;
            q.commit(512);
            q.consume(512);
        })
    });

    group.finish();
}

criterion_group!(benches, queue);
criterion_main!(benches);
