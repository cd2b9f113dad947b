use std::path::Path;

use config::Config as eConfig;
use serde_derive::{Deserialize, Serialize};

use crate::calibration::Granularity;
use crate::error::{MmmError, Result};
use crate::inference::InferenceSettings;
use crate::optimizer::OptimizerSettings;
use crate::routines::output::OutputFile;
use crate::structs::channel::ChannelIndex;
use crate::transform::TransformParams;

/// Settings of a modeling run
///
/// Read from a TOML file, every value can be overridden from the environment, e.g.
/// `MMM__CONFIG__SEED=7` or `MMM__INFERENCE__METHOD=mcmc`.
#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub paths: Paths,
    #[serde(default)]
    pub config: Config,
    #[serde(default)]
    pub log: Log,
    /// Transform parameters, one entry per modeled channel; their order is the channel order
    pub channels: Vec<TransformParams>,
    #[serde(default)]
    pub model: Model,
    #[serde(default)]
    pub inference: InferenceSettings,
    #[serde(default)]
    pub optimizer: OptimizerSettings,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Paths {
    /// Feature dataset with `date`, `sales` and one spend column per channel
    pub data: String,
    /// Experiment evidence (JSON); calibration runs only when set
    pub evidence: Option<String>,
    #[serde(default = "default_output")]
    pub output: String,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub granularity: Granularity,
    #[serde(default = "default_true")]
    pub output: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            seed: default_seed(),
            granularity: Granularity::default(),
            output: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Log {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_file")]
    pub file: String,
}

impl Default for Log {
    fn default() -> Self {
        Log {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Model {
    /// Scale of the half-normal prior on uncalibrated channel coefficients
    #[serde(default = "default_coefficient_scale")]
    pub coefficient_scale: f64,
}

impl Default for Model {
    fn default() -> Self {
        Model {
            coefficient_scale: default_coefficient_scale(),
        }
    }
}

impl Settings {
    /// Channel identifiers in configured order
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.channel.clone()).collect()
    }

    /// Check the settings for consistency before any work starts
    pub fn validate(&self) -> Result<()> {
        ChannelIndex::new(self.channel_names())?;
        for params in &self.channels {
            params.validate()?;
        }
        if !(self.model.coefficient_scale.is_finite() && self.model.coefficient_scale > 0.0) {
            return Err(MmmError::configuration(format!(
                "Coefficient prior scale must be positive, got {}",
                self.model.coefficient_scale
            )));
        }
        let advi = &self.inference.advi;
        if advi.iterations == 0 || advi.draws == 0 || advi.grad_samples == 0 {
            return Err(MmmError::configuration(
                "ADVI iterations, draws and grad_samples must be positive",
            ));
        }
        if !(advi.learning_rate.is_finite() && advi.learning_rate > 0.0) {
            return Err(MmmError::configuration("ADVI learning rate must be positive"));
        }
        let mcmc = &self.inference.mcmc;
        if mcmc.draws == 0 || mcmc.chains == 0 {
            return Err(MmmError::configuration("MCMC draws and chains must be positive"));
        }
        self.optimizer.validate()?;
        Ok(())
    }
}

/// Read and validate settings from a TOML file, applying `MMM__` environment overrides
pub fn read_settings(path: impl AsRef<Path>) -> Result<Settings> {
    let path = path.as_ref();
    let parsed = eConfig::builder()
        .add_source(config::File::from(path).format(config::FileFormat::Toml))
        .add_source(
            config::Environment::with_prefix("MMM")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| MmmError::configuration(format!("Could not read {}: {}", path.display(), e)))?;

    let settings: Settings = parsed
        .try_deserialize()
        .map_err(|e| MmmError::configuration(format!("Invalid settings in {}: {}", path.display(), e)))?;
    settings.validate()?;
    Ok(settings)
}

/// Echo the settings to `settings.json` in the output folder
pub fn write_settings_to_file(settings: &Settings) -> Result<()> {
    let outputfile = OutputFile::new(&settings.paths.output, "settings.json")?;
    serde_json::to_writer_pretty(outputfile.file(), settings)?;
    tracing::debug!("Settings written to {:?}", outputfile.relative_path());
    Ok(())
}

// *********************************
// Default values for deserializing
// *********************************
fn default_true() -> bool {
    true
}

fn default_seed() -> u64 {
    42
}

fn default_output() -> String {
    "outputs".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "mmm.log".to_string()
}

fn default_coefficient_scale() -> f64 {
    10.0
}
