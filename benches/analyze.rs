use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use mflu::{CscBuilder, CscMatrix};

#[derive(Debug)]
struct Case {
    name: String,
    a: CscMatrix<f64>,
    order: Vec<usize>,
    nnz: usize,
}

fn banded(n: usize, bandwidth: usize) -> CscMatrix<f64> {
    let mut b = CscBuilder::new(n, n);
    for i in 0..n {
        b.push(i, i, 4.0 + (i % 7) as f64).unwrap();
        for k in 1..=bandwidth {
            if i >= k {
                b.push(i, i - k, -1.0 / k as f64).unwrap();
                b.push(i - k, i, 1.0 / (k + 1) as f64).unwrap();
            }
        }
    }
    b.build().unwrap()
}

fn arrow(n: usize) -> CscMatrix<f64> {
    let mut b = CscBuilder::new(n, n);
    for i in 0..n - 1 {
        b.push(i, i, 10.0).unwrap();
        b.push(i, n - 1, 1.0).unwrap();
        b.push(n - 1, i, 1.0).unwrap();
    }
    b.push(n - 1, n - 1, 5.0).unwrap();
    b.build().unwrap()
}

fn cases() -> Vec<Case> {
    let mut cases = Vec::new();
    for (name, a) in [
        ("banded-1k-b3".to_string(), banded(1000, 3)),
        ("banded-4k-b5".to_string(), banded(4000, 5)),
        ("arrow-2k".to_string(), arrow(2000)),
    ] {
        let n = a.dim.ncols;
        let nnz = a.nnz();
        cases.push(Case {
            name,
            a,
            order: (0..n).collect(),
            nnz,
        });
    }
    cases
}

fn bench_symbolic(c: &mut Criterion) {
    let cases = cases();
    let mut group = c.benchmark_group("lu/symbolic");

    for case in &cases {
        group.throughput(Throughput::Elements(case.nnz as u64));
        group.bench_with_input(BenchmarkId::from_parameter(&case.name), case, |b, case| {
            b.iter(|| {
                let symbolic = mflu::symbolic_factor(&case.a, &case.order).expect("symbolic");
                black_box(symbolic);
            });
        });
    }

    group.finish();
}

fn bench_numeric(c: &mut Criterion) {
    let cases = cases();
    let mut group = c.benchmark_group("lu/numeric");

    for case in &cases {
        group.throughput(Throughput::Elements(case.nnz as u64));
        let symbolic = mflu::symbolic_factor(&case.a, &case.order).expect("symbolic");
        group.bench_with_input(BenchmarkId::from_parameter(&case.name), case, |b, case| {
            b.iter(|| {
                let f = mflu::numeric_factor(&case.a, &symbolic, 1.0, 0, 1).expect("numeric");
                black_box(f);
            });
        });
    }

    group.finish();
}

criterion_group!(lu_analyze, bench_symbolic, bench_numeric);
criterion_main!(lu_analyze);
