use std::path::Path;
use std::time::Instant;

use eyre::{Result, WrapErr};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::calibration::{calibrate, check_evidence, read_evidence};
use crate::inference::{InferenceEngine, ModelSpec};
use crate::optimizer::{optimize_budget, response_curves, response_curves_from_means, BudgetAllocation, BudgetProblem};
use crate::routines::data::{read_dataset, Dataset};
use crate::routines::logger;
use crate::routines::output::{self, CALIBRATED_SUMMARY_FILE, POSTERIOR_SUMMARY_FILE};
use crate::routines::settings::{write_settings_to_file, Settings};
use crate::structs::features::FeatureMatrix;
use crate::structs::posterior::PosteriorEstimate;
use crate::transform::transform_dataset;

/// Everything a full run produced
#[derive(Debug, Clone)]
pub struct RunResult {
    pub dataset: Dataset,
    pub features: FeatureMatrix,
    pub posterior: PosteriorEstimate,
    pub calibrated: Option<PosteriorEstimate>,
    pub allocation: BudgetAllocation,
}

impl RunResult {
    /// The estimate the allocation was computed from
    pub fn final_posterior(&self) -> &PosteriorEstimate {
        self.calibrated.as_ref().unwrap_or(&self.posterior)
    }
}

/// Primary entrypoint
///
/// Reads the dataset, builds the features, checks the experiment evidence when one is
/// configured, fits the model, calibrates it, and reallocates the average daily budget
/// using the calibrated posterior if there is one. Outputs are written to `paths.output` when `config.output` is set.
pub fn fit(settings: Settings) -> Result<RunResult> {
    let now = Instant::now();
    settings.validate()?;
    logger::setup_log(&settings).wrap_err("Failed to set up logging")?;
    tracing::info!("Starting mmcore");
    if settings.config.output {
        write_settings_to_file(&settings).wrap_err("Failed to write settings")?;
    }
    let mut rng = StdRng::seed_from_u64(settings.config.seed);
    let output = &settings.paths.output;

    let (dataset, features) = prepare_features(&settings)?;
    let evidence = match &settings.paths.evidence {
        Some(path) => {
            let evidence = read_evidence(path).wrap_err_with(|| format!("Failed to read evidence from {}", path))?;
            check_evidence(&evidence, &features, settings.config.granularity)?;
            Some(evidence)
        }
        None => None,
    };
    if settings.config.output {
        output::write_features(output, &dataset, &features)?;
    }

    let spec = ModelSpec::default_for(&features, dataset.sales(), settings.model.coefficient_scale)?;
    let engine = InferenceEngine::from_settings(&settings.inference);
    let posterior = engine
        .run(&spec, &features, dataset.sales(), &mut rng)
        .wrap_err("Model fit failed")?;
    if posterior.degraded() {
        tracing::warn!("Posterior produced by the fallback sampler");
    }
    log_coefficients("Posterior", &posterior);
    if settings.config.output {
        output::write_summary(output, POSTERIOR_SUMMARY_FILE, &posterior)?;
        output::write_samples(output, "posterior_samples.csv", &posterior)?;
    }

    let calibrated = match &evidence {
        Some(evidence) => {
            let estimate = calibrate(
                &engine,
                &spec,
                &features,
                dataset.sales(),
                evidence,
                settings.config.granularity,
                &mut rng,
            )
            .wrap_err("Calibration failed")?;
            log_coefficients("Calibrated posterior", &estimate);
            if settings.config.output {
                output::write_summary(output, CALIBRATED_SUMMARY_FILE, &estimate)?;
                output::write_samples(output, "calibrated_samples.csv", &estimate)?;
            }
            Some(estimate)
        }
        None => None,
    };

    let chosen = calibrated.as_ref().unwrap_or(&posterior);
    let curves = response_curves(chosen, &features)?;
    let problem = BudgetProblem::new(curves, &dataset.average_spend(), &settings.optimizer)?;
    let allocation = optimize_budget(&problem, &settings.optimizer)?;
    log_allocation(&allocation);
    if settings.config.output {
        output::write_allocation(output, &allocation)?;
    }

    tracing::info!("Total time: {:.2?}", now.elapsed());
    Ok(RunResult {
        dataset,
        features,
        posterior,
        calibrated,
        allocation,
    })
}

/// Reallocate the budget from a persisted posterior summary
///
/// The features are rebuilt from the configured dataset so the optimizer uses the same
/// half-saturation points the model was trained with.
pub fn optimize_from_summary(settings: Settings, summary_path: impl AsRef<Path>) -> Result<BudgetAllocation> {
    settings.validate()?;
    logger::setup_log(&settings).wrap_err("Failed to set up logging")?;
    let summary_path = summary_path.as_ref();

    let (dataset, features) = prepare_features(&settings)?;
    let summary = output::read_summary(summary_path)
        .wrap_err_with(|| format!("Failed to read posterior summary {}", summary_path.display()))?;
    let means = output::coefficient_means(&summary);
    let curves = response_curves_from_means(&means, &features)?;
    let problem = BudgetProblem::new(curves, &dataset.average_spend(), &settings.optimizer)?;
    let allocation = optimize_budget(&problem, &settings.optimizer)?;
    log_allocation(&allocation);
    if settings.config.output {
        output::write_allocation(&settings.paths.output, &allocation)?;
    }
    Ok(allocation)
}

fn prepare_features(settings: &Settings) -> Result<(Dataset, FeatureMatrix)> {
    let span = tracing::info_span!("transform");
    let _enter = span.enter();
    let dataset = read_dataset(&settings.paths.data, &settings.channel_names())
        .wrap_err_with(|| format!("Failed to read dataset {}", settings.paths.data))?;
    let features = transform_dataset(&dataset, &settings.channels)?;
    tracing::info!(
        "Built {} feature columns over {} days",
        features.ncols(),
        features.nrows()
    );
    Ok((dataset, features))
}

fn log_coefficients(label: &str, estimate: &PosteriorEstimate) {
    for (channel, mean) in estimate.coefficient_means() {
        tracing::info!("{} coefficient of {}: {:.4}", label, channel, mean);
    }
}

fn log_allocation(allocation: &BudgetAllocation) {
    for c in &allocation.channels {
        tracing::info!(
            "{:<20} | {:>12.2} | {:>12.2} | {:>+7.1}%",
            c.channel,
            c.old_spend,
            c.new_spend,
            c.delta_percent.unwrap_or(0.0)
        );
    }
    tracing::info!("Projected revenue lift: {:.2}", allocation.projected_revenue_lift);
}
