use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mmcore::prelude::*;
use ndarray::Array1;

fn spend(n: usize) -> Array1<f64> {
    Array1::from_shape_fn(n, |t| 100.0 + 50.0 * ((t as f64) * 0.3).sin())
}

/// Adstock followed by Hill saturation of a single spend series
fn benchmark_channel(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_transform");
    for n in [365, 3650, 36500] {
        let x = spend(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &x, |b, x| {
            b.iter(|| {
                let adstocked = geometric_adstock(&black_box(x).view(), black_box(0.5));
                hill_saturation(&adstocked.view(), 1.0, 200.0)
            });
        });
    }
    group.finish();
}

/// Full feature construction over a dataset of 20 channels and three years of days
fn benchmark_dataset(c: &mut Criterion) {
    let n = 3 * 365;
    let start = chrono::NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
    let dates = (0..n)
        .map(|t| start + chrono::Duration::days(t as i64))
        .collect();
    let series = (0..20)
        .map(|j| ChannelSeries::new(format!("spend_{}", j), spend(n) * (j as f64 + 1.0)).unwrap())
        .collect();
    let dataset = Dataset::from_parts(dates, spend(n), series).unwrap();
    let params: Vec<TransformParams> = (0..20)
        .map(|j| TransformParams::new(format!("spend_{}", j), 0.05 * j as f64, 1.0))
        .collect();

    c.bench_function("transform_dataset", |b| {
        b.iter(|| transform_dataset(black_box(&dataset), black_box(&params)).unwrap());
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .measurement_time(std::time::Duration::from_secs(10))
        .noise_threshold(0.10);
    targets = benchmark_channel, benchmark_dataset
}
criterion_main!(benches);
