//! End-to-end run on a synthetic two-channel dataset.
//!
//! `cargo run --release --example pipeline [settings.toml]`
//!
//! Without an argument the demo writes a dataset, an experiment and a settings file to
//! `demos/output/` and runs on those.

use std::fs;
use std::path::Path;

use eyre::Result;
use mmcore::prelude::*;
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

const FOLDER: &str = "demos/output";

fn main() -> Result<()> {
    let settings_path = match std::env::args().nth(1) {
        Some(path) => path,
        None => generate(Path::new(FOLDER), 365)?,
    };
    let settings = read_settings(&settings_path)?;
    let result = fit(settings)?;

    let posterior = result.final_posterior();
    println!("Model fitted with {}{}", posterior.method(), if posterior.degraded() { " (fallback)" } else { "" });
    for summary in posterior.summary() {
        println!(
            "{:<24} {:>10.4} [{:>10.4}, {:>10.4}]",
            summary.parameter, summary.mean, summary.hdi_low, summary.hdi_high
        );
    }
    println!();
    for c in &result.allocation.channels {
        println!("{:<16} {:>10.2} -> {:>10.2}", c.channel, c.old_spend, c.new_spend);
    }
    println!("Projected revenue lift: {:.2}", result.allocation.projected_revenue_lift);
    Ok(())
}

/// Write the synthetic inputs and return the settings path
fn generate(folder: &Path, days: usize) -> Result<String> {
    fs::create_dir_all(folder)?;
    let mut rng = StdRng::seed_from_u64(2024);
    let noise = Normal::new(0.0, 2.0)?;

    let tv = Array1::from_shape_fn(days, |_| rng.gen_range(500.0..1500.0));
    let tiktok = Array1::from_shape_fn(days, |_| rng.gen_range(100.0..400.0));
    let tv_sat = hill_saturation(&geometric_adstock(&tv.view(), 0.6).view(), 1.0, 2500.0);
    let tiktok_sat = hill_saturation(&geometric_adstock(&tiktok.view(), 0.2).view(), 1.0, 300.0);

    let start = chrono::NaiveDate::from_ymd_opt(2023, 1, 1).ok_or_else(|| eyre::eyre!("invalid start date"))?;
    let data_path = folder.join("features.csv");
    let mut writer = csv::Writer::from_path(&data_path)?;
    writer.write_record(["date", "sales", "spend_tv", "spend_tiktok"])?;
    for t in 0..days {
        let date = start + chrono::Duration::days(t as i64);
        let sales = 1000.0 + 400.0 * tv_sat[t] + 250.0 * tiktok_sat[t] + noise.sample(&mut rng);
        writer.write_record([
            date.format("%Y-%m-%d").to_string(),
            format!("{:.2}", sales),
            format!("{:.2}", tv[t]),
            format!("{:.2}", tiktok[t]),
        ])?;
    }
    writer.flush()?;

    let evidence_path = folder.join("experiment.json");
    fs::write(
        &evidence_path,
        r#"{
  "channel": "spend_tiktok",
  "point_estimate": 250.0,
  "standard_error": 25.0,
  "description": "Geo holdout on TikTok",
  "granularity": "daily"
}
"#,
    )?;

    let settings_path = folder.join("settings.toml");
    fs::write(
        &settings_path,
        format!(
            r#"[paths]
data = "{}"
evidence = "{}"
output = "{}"

[config]
seed = 22

[[channels]]
channel = "spend_tv"
alpha = 0.6
kappa = 2500.0

[[channels]]
channel = "spend_tiktok"
alpha = 0.2
kappa = 300.0

[model]
coefficient_scale = 1000.0
"#,
            data_path.display(),
            evidence_path.display(),
            folder.join("results").display()
        ),
    )?;
    Ok(settings_path.display().to_string())
}
