use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tallow_core::encoding::{parse, simplify, Layout, SignatureCache};

const ENCODINGS: &[(&str, &str)] = &[
    ("setter", "v24@0:8i16"),
    ("rect", "{CGRect={CGPoint=dd}{CGSize=dd}}16@0:8"),
    ("qualified", "Vv40@0:8r*16^{__CFString=}24@?32"),
    ("nested", "v@:[4{Pair=\"first\"i\"second\"(U=cd)}]b5"),
];

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    for (name, encoding) in ENCODINGS {
        group.bench_with_input(BenchmarkId::new("tolerant", name), encoding, |b, enc| {
            b.iter(|| parse(black_box(enc)));
        });
    }
    group.finish();
}

fn bench_cache(c: &mut Criterion) {
    let cache = SignatureCache::new();
    c.bench_function("cache_hit", |b| {
        b.iter(|| cache.method(black_box("v24@0:8i16")).unwrap());
    });
}

fn bench_layout(c: &mut Criterion) {
    let layout = Layout::native();
    let sig = parse("{CGRect={CGPoint=dd}{CGSize=dd}}16@0:8");
    c.bench_function("size_of_rect", |b| {
        b.iter(|| layout.size_of(black_box(sig.return_type())));
    });
}

fn bench_simplify(c: &mut Criterion) {
    c.bench_function("simplify_nested", |b| {
        b.iter(|| simplify(black_box("v@:[4{Pair=\"first\"i\"second\"(U=cd)}]b5")));
    });
}

criterion_group!(benches, bench_parse, bench_cache, bench_layout, bench_simplify);
criterion_main!(benches);
