#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use mmcore::prelude::*;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

pub fn names(channels: &[&str]) -> Vec<String> {
    channels.iter().map(|c| c.to_string()).collect()
}

/// Already saturated features in [0.1, 0.9] and sales `intercept + x . coefs + noise`
pub fn linear_problem(
    seed: u64,
    n: usize,
    channels: &[&str],
    coefs: &[f64],
    intercept: f64,
    noise: f64,
) -> (FeatureMatrix, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let x = Array2::from_shape_fn((n, channels.len()), |_| rng.gen_range(0.1..0.9));
    let eps = Normal::new(0.0, noise).unwrap();
    let y = Array1::from_shape_fn(n, |t| {
        intercept + (0..channels.len()).map(|j| coefs[j] * x[[t, j]]).sum::<f64>() + eps.sample(&mut rng)
    });
    let index = ChannelIndex::new(names(channels)).unwrap();
    (FeatureMatrix::new(index, x).unwrap(), y)
}

/// Two nearly collinear channels: `x_tiktok = x_facebook + N(0, 0.005)`, true effects 1.0 and 3.5
pub fn confounded_problem(seed: u64, n: usize) -> (FeatureMatrix, Array1<f64>) {
    confounded_with_effects(seed, n, 1.0, 3.5)
}

/// Same collinear design with chosen true effects of facebook and tiktok
pub fn confounded_with_effects(seed: u64, n: usize, facebook: f64, tiktok: f64) -> (FeatureMatrix, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let jitter = Normal::new(0.0, 0.005).unwrap();
    let noise = Normal::new(0.0, 0.05).unwrap();
    let mut x = Array2::zeros((n, 2));
    for t in 0..n {
        let base: f64 = rng.gen_range(0.1..0.9);
        x[[t, 0]] = base;
        x[[t, 1]] = base + jitter.sample(&mut rng);
    }
    let y = Array1::from_shape_fn(n, |t| 10.0 + facebook * x[[t, 0]] + tiktok * x[[t, 1]] + noise.sample(&mut rng));
    let index = ChannelIndex::new(names(&["spend_facebook", "spend_tiktok"])).unwrap();
    (FeatureMatrix::new(index, x).unwrap(), y)
}

/// Daily spend and sales generated through the transform engine
pub fn synthetic_dataset(seed: u64, n: usize) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
    let dates: Vec<NaiveDate> = (0..n).map(|t| start + Duration::days(t as i64)).collect();

    let tv = Array1::from_shape_fn(n, |_| rng.gen_range(50.0..150.0));
    let search = Array1::from_shape_fn(n, |_| rng.gen_range(20.0..60.0));
    let tv_sat = hill_saturation(&geometric_adstock(&tv.view(), 0.5).view(), 1.0, 200.0);
    let search_sat = hill_saturation(&geometric_adstock(&search.view(), 0.1).view(), 1.0, 45.0);
    let noise = Normal::new(0.0, 1.0).unwrap();
    let sales = Array1::from_shape_fn(n, |t| {
        100.0 + 30.0 * tv_sat[t] + 20.0 * search_sat[t] + noise.sample(&mut rng)
    });

    let series = vec![
        ChannelSeries::new("spend_tv", tv).unwrap(),
        ChannelSeries::new("spend_search", search).unwrap(),
    ];
    Dataset::from_parts(dates, sales, series).unwrap()
}

pub fn write_dataset_csv(path: &std::path::Path, dataset: &Dataset) {
    let mut writer = csv::Writer::from_path(path).unwrap();
    let mut header = vec!["date".to_string(), "sales".to_string()];
    header.extend(dataset.channels().iter().cloned());
    writer.write_record(&header).unwrap();
    for (t, date) in dataset.dates().iter().enumerate() {
        let mut row = vec![date.format("%Y-%m-%d").to_string(), dataset.sales()[t].to_string()];
        for series in dataset.series() {
            row.push(series.spend()[t].to_string());
        }
        writer.write_record(&row).unwrap();
    }
    writer.flush().unwrap();
}
