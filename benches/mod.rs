use criterion::{criterion_group, criterion_main};


criterion_group!(
    benches,
    session::bench_route,
    session::bench_publish_lifecycle,
    session::bench_subscribe_lifecycle
);
criterion_main!(benches);
