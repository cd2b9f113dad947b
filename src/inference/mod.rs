//! Inference engine: fits the regression of sales on the media features.
//!
//! A fast approximate strategy runs first. If it fails (a non-finite objective, a numerical
//! breakdown, or unusable draws) the engine escalates to an exact sampler and marks the
//! resulting estimate as degraded. Strategies are plugged in through [PosteriorApproximation].

pub mod advi;
pub mod mala;
pub mod map;
pub mod model;

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use serde_derive::{Deserialize, Serialize};

use crate::error::{MmmError, Result};
use crate::structs::features::FeatureMatrix;
use crate::structs::posterior::{InferenceMethod, PosteriorEstimate};

pub use advi::Advi;
pub use mala::Mala;
pub use model::{CoefficientPrior, ModelSpec, NormalPrior, RegressionProblem};

/// Draws in the unconstrained parameter space of a [RegressionProblem]
///
/// Rows are grouped by chain.
#[derive(Debug, Clone)]
pub struct Draws {
    values: Array2<f64>,
    chains: usize,
}

impl Draws {
    pub fn new(values: Array2<f64>, chains: usize) -> Self {
        Draws {
            values,
            chains: chains.max(1),
        }
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn chains(&self) -> usize {
        self.chains
    }
}

/// Why a strategy could not produce a posterior
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceFailure {
    pub method: InferenceMethod,
    pub reason: String,
}

impl InferenceFailure {
    pub fn new(method: InferenceMethod, reason: impl Into<String>) -> Self {
        InferenceFailure {
            method,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for InferenceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.method, self.reason)
    }
}

impl std::error::Error for InferenceFailure {}

/// A way of approximating the posterior of a [RegressionProblem]
pub trait PosteriorApproximation: Send + Sync {
    fn method(&self) -> InferenceMethod;

    fn approximate(&self, problem: &RegressionProblem, rng: &mut StdRng) -> std::result::Result<Draws, InferenceFailure>;
}

/// Configuration of the inference engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct InferenceSettings {
    /// Strategy tried first
    pub method: InferenceMethod,
    /// Fall back to the sampler when the variational strategy fails
    pub escalate: bool,
    pub advi: Advi,
    pub mcmc: Mala,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        InferenceSettings {
            method: InferenceMethod::Advi,
            escalate: true,
            advi: Advi::default(),
            mcmc: Mala::default(),
        }
    }
}

/// Runs a primary strategy and, optionally, a fallback when it fails
pub struct InferenceEngine {
    primary: Box<dyn PosteriorApproximation>,
    fallback: Option<Box<dyn PosteriorApproximation>>,
}

impl InferenceEngine {
    pub fn new(primary: Box<dyn PosteriorApproximation>, fallback: Option<Box<dyn PosteriorApproximation>>) -> Self {
        InferenceEngine { primary, fallback }
    }

    pub fn from_settings(settings: &InferenceSettings) -> Self {
        match settings.method {
            InferenceMethod::Advi => {
                let fallback: Option<Box<dyn PosteriorApproximation>> = if settings.escalate {
                    Some(Box::new(settings.mcmc))
                } else {
                    None
                };
                InferenceEngine::new(Box::new(settings.advi), fallback)
            }
            InferenceMethod::Mcmc => InferenceEngine::new(Box::new(settings.mcmc), None),
        }
    }

    /// Fit the regression and return its posterior
    ///
    /// `spec` must name the same channels, in the same order, as `features`.
    pub fn run(
        &self,
        spec: &ModelSpec,
        features: &FeatureMatrix,
        sales: &Array1<f64>,
        rng: &mut StdRng,
    ) -> Result<PosteriorEstimate> {
        let problem = RegressionProblem::new(spec, features, sales)?;
        let span = tracing::info_span!("inference", method = %self.primary.method());
        let _enter = span.enter();
        tracing::info!(
            "Fitting {} coefficients on {} observations",
            features.ncols(),
            features.nrows()
        );

        let primary_failure = match self.attempt(self.primary.as_ref(), &problem, features, rng) {
            Ok(estimate) => return Ok(estimate),
            Err(failure) => failure,
        };

        let fallback = match &self.fallback {
            Some(fallback) => fallback,
            None => {
                tracing::error!("Inference failed: {}", primary_failure);
                return Err(MmmError::Convergence {
                    primary: primary_failure.to_string(),
                    fallback: None,
                });
            }
        };

        tracing::warn!(
            "{} failed ({}), escalating to {}",
            primary_failure.method,
            primary_failure.reason,
            fallback.method()
        );
        match self.attempt(fallback.as_ref(), &problem, features, rng) {
            Ok(estimate) => Ok(estimate.mark_degraded()),
            Err(fallback_failure) => {
                tracing::error!("Fallback inference failed as well: {}", fallback_failure);
                Err(MmmError::Convergence {
                    primary: primary_failure.to_string(),
                    fallback: Some(fallback_failure.to_string()),
                })
            }
        }
    }

    fn attempt(
        &self,
        strategy: &dyn PosteriorApproximation,
        problem: &RegressionProblem,
        features: &FeatureMatrix,
        rng: &mut StdRng,
    ) -> std::result::Result<PosteriorEstimate, InferenceFailure> {
        let method = strategy.method();
        let draws = strategy.approximate(problem, rng)?;
        let values = draws.values();
        if values.nrows() == 0 || values.ncols() != problem.dim() {
            return Err(InferenceFailure::new(
                method,
                format!("returned draws of shape {:?}", values.dim()),
            ));
        }

        let mut constrained = Array2::<f64>::zeros(values.dim());
        for (row, mut out) in values.axis_iter(Axis(0)).zip(constrained.axis_iter_mut(Axis(0))) {
            out.assign(&problem.constrain(row));
        }
        if constrained.iter().any(|v| !v.is_finite()) {
            return Err(InferenceFailure::new(method, "posterior draws are not finite"));
        }

        let estimate = PosteriorEstimate::from_draws(features.channels().clone(), &constrained, draws.chains(), method)
            .map_err(|e| InferenceFailure::new(method, e.to_string()))?;
        tracing::info!(
            "{} produced {} draws, sigma = {:.4}",
            method,
            estimate.n_draws(),
            estimate.sigma().mean()
        );
        Ok(estimate)
    }
}
