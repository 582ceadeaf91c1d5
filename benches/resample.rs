use criterion::{black_box, Criterion};

use mzfeatures::arrayops::ArrayPair;
use mzfeatures::resample::Resampler;

fn profile_spectrum(n: usize) -> (Vec<f64>, Vec<f32>) {
    let mz: Vec<f64> = (0..n).map(|i| 400.0 + i as f64 * 0.004).collect();
    let intensity = mz
        .iter()
        .map(|x| {
            let phase = (x * 7.0).fract() - 0.5;
            (1e4 * (-0.5 * (phase / 0.02).powi(2)).exp()) as f32 + 5.0
        })
        .collect();
    (mz, intensity)
}

fn resampling(c: &mut Criterion) {
    let (mz, intensity) = profile_spectrum(250_000);
    let pair = ArrayPair::wrap(&mz, &intensity);
    let resampler = Resampler::new(pair.min_mz, pair.max_mz, 36.0);
    let rows: Vec<ArrayPair> = (0..64).map(|_| pair.borrow()).collect();
    let refs: Vec<&ArrayPair> = rows.iter().collect();

    c.bench_function("resample_spectrum", |b| {
        b.iter(|| black_box(resampler.resample(&pair).unwrap()))
    });

    c.bench_function("zero_order_spectrum", |b| {
        b.iter(|| black_box(resampler.zero_order(&pair).unwrap()))
    });

    c.bench_function("resample_window", |b| {
        b.iter(|| black_box(resampler.resample_matrix(&refs, false).unwrap()))
    });
}

criterion::criterion_group!(benches, resampling);
criterion::criterion_main!(benches);
