//! Calibration engine: anchors one channel's effect on an external experiment.
//!
//! The coefficient prior of the measured channel is replaced by `Normal(point_estimate,
//! standard_error)` and the inference engine is run again. Every other channel keeps its prior.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use ndarray::Array1;
use rand::rngs::StdRng;
use serde_derive::{Deserialize, Serialize};

use crate::error::{MmmError, Result};
use crate::inference::{CoefficientPrior, InferenceEngine, ModelSpec};
use crate::structs::features::FeatureMatrix;
use crate::structs::posterior::PosteriorEstimate;

/// Time unit that spend, sales and effect sizes refer to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Granularity::Daily => write!(f, "daily"),
            Granularity::Weekly => write!(f, "weekly"),
            Granularity::Monthly => write!(f, "monthly"),
        }
    }
}

/// Result of an external experiment on one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentEvidence {
    pub channel: String,
    #[serde(alias = "experiment_roas")]
    pub point_estimate: f64,
    #[serde(alias = "std_error")]
    pub standard_error: f64,
    #[serde(default)]
    pub description: String,
    pub granularity: Granularity,
}

impl ExperimentEvidence {
    /// The informative prior this evidence stands for
    pub fn prior(&self) -> CoefficientPrior {
        CoefficientPrior::Normal {
            mean: self.point_estimate,
            sd: self.standard_error,
        }
    }

    /// Check the evidence on its own and against the model's unit convention
    pub fn validate(&self, model_granularity: Granularity) -> Result<()> {
        if !self.point_estimate.is_finite() {
            return Err(MmmError::configuration(format!(
                "Experiment on {} has a non-finite point estimate",
                self.channel
            )));
        }
        if !(self.standard_error.is_finite() && self.standard_error > 0.0) {
            return Err(MmmError::configuration(format!(
                "Experiment on {} needs a positive standard error, got {}",
                self.channel, self.standard_error
            )));
        }
        if self.granularity != model_granularity {
            return Err(MmmError::configuration(format!(
                "Experiment on {} is measured per {} period but the model is {}",
                self.channel, self.granularity, model_granularity
            )));
        }
        Ok(())
    }
}

/// Read one evidence record from a JSON file
pub fn read_evidence(path: impl AsRef<Path>) -> Result<ExperimentEvidence> {
    let file = File::open(path.as_ref())?;
    let evidence: ExperimentEvidence = serde_json::from_reader(BufReader::new(file))?;
    Ok(evidence)
}

/// Validate evidence against the feature set it will calibrate, returning the channel identifier
///
/// Run this before any inference so a bad record fails without wasted work.
pub fn check_evidence(
    evidence: &ExperimentEvidence,
    features: &FeatureMatrix,
    model_granularity: Granularity,
) -> Result<String> {
    let j = features.channels().resolve(&evidence.channel)?;
    evidence.validate(model_granularity)?;
    Ok(features.channels().names()[j].clone())
}

/// Re-run inference with the evidence's channel anchored on the experiment
///
/// The channel is resolved by identifier before any modeling work; `spec` itself is not modified.
pub fn calibrate(
    engine: &InferenceEngine,
    spec: &ModelSpec,
    features: &FeatureMatrix,
    sales: &Array1<f64>,
    evidence: &ExperimentEvidence,
    model_granularity: Granularity,
    rng: &mut StdRng,
) -> Result<PosteriorEstimate> {
    let channel = check_evidence(evidence, features, model_granularity)?;

    let span = tracing::info_span!("calibration", channel = %channel);
    let _enter = span.enter();
    tracing::info!(
        "Anchoring {} on Normal({}, {}){}",
        channel,
        evidence.point_estimate,
        evidence.standard_error,
        if evidence.description.is_empty() {
            String::new()
        } else {
            format!(": {}", evidence.description)
        }
    );

    let calibrated_spec = spec.with_prior(&channel, evidence.prior())?;
    let estimate = engine.run(&calibrated_spec, features, sales, rng)?;
    let coef = estimate.coefficient(&channel)?;
    tracing::info!(
        "Calibrated {} coefficient: mean {:.4}, sd {:.4}",
        channel,
        coef.mean(),
        coef.sd()
    );
    Ok(estimate.with_calibrated_channel(&channel))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evidence() -> ExperimentEvidence {
        ExperimentEvidence {
            channel: "spend_tiktok".to_string(),
            point_estimate: 3.5,
            standard_error: 0.2,
            description: "geo holdout".to_string(),
            granularity: Granularity::Daily,
        }
    }

    #[test]
    fn legacy_keys_accepted() {
        let json = r#"{"channel": "spend_tiktok", "experiment_roas": 3.5, "std_error": 0.2,
                       "granularity": "weekly"}"#;
        let e: ExperimentEvidence = serde_json::from_str(json).unwrap();
        assert_eq!(e.point_estimate, 3.5);
        assert_eq!(e.standard_error, 0.2);
        assert_eq!(e.granularity, Granularity::Weekly);
        assert!(e.description.is_empty());
    }

    #[test]
    fn granularity_is_required() {
        let json = r#"{"channel": "spend_tiktok", "point_estimate": 3.5, "standard_error": 0.2}"#;
        assert!(serde_json::from_str::<ExperimentEvidence>(json).is_err());
    }

    #[test]
    fn unit_mismatch_rejected() {
        let err = evidence().validate(Granularity::Weekly).unwrap_err();
        assert!(matches!(err, MmmError::Configuration(_)));
    }

    #[test]
    fn non_positive_standard_error_rejected() {
        let mut e = evidence();
        e.standard_error = 0.0;
        assert!(e.validate(Granularity::Daily).is_err());
        e.standard_error = f64::NAN;
        assert!(e.validate(Granularity::Daily).is_err());
    }

    #[test]
    fn prior_centered_on_experiment() {
        assert_eq!(
            evidence().prior(),
            CoefficientPrior::Normal { mean: 3.5, sd: 0.2 }
        );
    }
}
