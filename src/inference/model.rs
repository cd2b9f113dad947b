//! Bayesian linear regression with non-negative media effects.
//!
//! ```text
//! intercept ~ Normal(mean(y), sd(y))
//! coef_c    ~ HalfNormal(scale)            (or an informative Normal after calibration)
//! sigma     ~ HalfNormal(sd(y))
//! y_t       ~ Normal(intercept + sum_c coef_c * x_tc, sigma)
//! ```
//!
//! Inference runs on a standardized target and in an unconstrained space: half-normal
//! coefficients and `sigma` are represented by their logarithms.

use ndarray::{Array1, Array2, ArrayView1};
use serde_derive::{Deserialize, Serialize};

use crate::error::{MmmError, Result};
use crate::structs::channel::ChannelIndex;
use crate::structs::features::FeatureMatrix;

/// Log-scale parameters are evaluated inside `[-LOG_SCALE_LIMIT, LOG_SCALE_LIMIT]`, outside
/// of it a quadratic wall pulls them back.
pub const LOG_SCALE_LIMIT: f64 = 20.0;
const WALL_STIFFNESS: f64 = 1e3;

/// Prior on the coefficient of a single channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CoefficientPrior {
    /// Non-negative support, the default for media effects
    HalfNormal { scale: f64 },
    /// Informative prior, e.g. centered on an experimental measurement
    Normal { mean: f64, sd: f64 },
}

impl CoefficientPrior {
    fn validate(&self, channel: &str) -> Result<()> {
        let ok = match self {
            CoefficientPrior::HalfNormal { scale } => scale.is_finite() && *scale > 0.0,
            CoefficientPrior::Normal { mean, sd } => mean.is_finite() && sd.is_finite() && *sd > 0.0,
        };
        if !ok {
            return Err(MmmError::configuration(format!(
                "Invalid prior for {}: {:?}",
                channel, self
            )));
        }
        Ok(())
    }

    fn standardized(&self, y_sd: f64) -> CoefficientPrior {
        match *self {
            CoefficientPrior::HalfNormal { scale } => CoefficientPrior::HalfNormal { scale: scale / y_sd },
            CoefficientPrior::Normal { mean, sd } => CoefficientPrior::Normal {
                mean: mean / y_sd,
                sd: sd / y_sd,
            },
        }
    }

    fn is_positive(&self) -> bool {
        matches!(self, CoefficientPrior::HalfNormal { .. })
    }
}

/// Normal prior given by location and scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalPrior {
    pub mean: f64,
    pub sd: f64,
}

/// Priors of the regression, with coefficient priors keyed by channel identifier
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    channels: ChannelIndex,
    intercept: NormalPrior,
    coefficients: Vec<CoefficientPrior>,
    sigma_scale: f64,
}

impl ModelSpec {
    /// Default priors: data-centered intercept and noise priors, half-normal media effects
    pub fn default_for(features: &FeatureMatrix, sales: &Array1<f64>, coef_scale: f64) -> Result<Self> {
        let (mean, sd) = target_moments(sales.view())?;
        let channels = features.channels().clone();
        let coefficients = vec![CoefficientPrior::HalfNormal { scale: coef_scale }; channels.len()];
        let spec = ModelSpec {
            channels,
            intercept: NormalPrior { mean, sd },
            coefficients,
            sigma_scale: sd,
        };
        spec.validate()?;
        Ok(spec)
    }

    fn validate(&self) -> Result<()> {
        if self.coefficients.len() != self.channels.len() {
            return Err(MmmError::configuration(format!(
                "{} coefficient priors for {} channels",
                self.coefficients.len(),
                self.channels.len()
            )));
        }
        for (channel, prior) in self.channels.iter().zip(self.coefficients.iter()) {
            prior.validate(channel)?;
        }
        if !(self.intercept.sd > 0.0 && self.intercept.mean.is_finite()) {
            return Err(MmmError::configuration("Intercept prior needs a positive scale"));
        }
        if !(self.sigma_scale > 0.0 && self.sigma_scale.is_finite()) {
            return Err(MmmError::configuration("Noise prior needs a positive scale"));
        }
        Ok(())
    }

    pub fn channels(&self) -> &ChannelIndex {
        &self.channels
    }

    pub fn intercept(&self) -> NormalPrior {
        self.intercept
    }

    pub fn sigma_scale(&self) -> f64 {
        self.sigma_scale
    }

    /// Prior on a channel's coefficient
    pub fn prior(&self, channel: &str) -> Result<&CoefficientPrior> {
        let j = self.channels.resolve(channel)?;
        Ok(&self.coefficients[j])
    }

    /// Copy of this model with one channel's coefficient prior replaced
    ///
    /// The receiver is left unchanged.
    pub fn with_prior(&self, channel: &str, prior: CoefficientPrior) -> Result<ModelSpec> {
        let j = self.channels.resolve(channel)?;
        prior.validate(channel)?;
        let mut spec = self.clone();
        spec.coefficients[j] = prior;
        Ok(spec)
    }
}

/// Mean and (population) standard deviation of the target
pub fn target_moments(sales: ArrayView1<f64>) -> Result<(f64, f64)> {
    let mean = sales
        .mean()
        .ok_or_else(|| MmmError::validation("Sales series is empty"))?;
    let sd = sales.std(0.0);
    if !(sd > 0.0 && sd.is_finite()) {
        return Err(MmmError::validation(
            "Sales has zero variance, the regression is not identifiable",
        ));
    }
    Ok((mean, sd))
}

/// The regression posterior, standardized and unconstrained
///
/// Parameter vector layout: `[intercept, u_1 .. u_K, log_sigma]`, where `u_c` is the
/// coefficient itself for normal priors and its logarithm for half-normal priors.
#[derive(Debug, Clone)]
pub struct RegressionProblem {
    x: Array2<f64>,
    y: Array1<f64>,
    y_mean: f64,
    y_sd: f64,
    intercept: NormalPrior,
    coefficients: Vec<CoefficientPrior>,
    sigma_scale: f64,
}

impl RegressionProblem {
    pub fn new(spec: &ModelSpec, features: &FeatureMatrix, sales: &Array1<f64>) -> Result<Self> {
        spec.validate()?;
        spec.channels().ensure_same_order(features.channels())?;
        if sales.len() != features.nrows() {
            return Err(MmmError::validation(format!(
                "Sales has {} observations but the feature matrix has {} rows",
                sales.len(),
                features.nrows()
            )));
        }
        let (y_mean, y_sd) = target_moments(sales.view())?;
        let y = sales.mapv(|v| (v - y_mean) / y_sd);

        Ok(RegressionProblem {
            x: features.matrix().to_owned(),
            y,
            y_mean,
            y_sd,
            intercept: NormalPrior {
                mean: (spec.intercept.mean - y_mean) / y_sd,
                sd: spec.intercept.sd / y_sd,
            },
            coefficients: spec.coefficients.iter().map(|p| p.standardized(y_sd)).collect(),
            sigma_scale: spec.sigma_scale / y_sd,
        })
    }

    /// Number of unconstrained parameters
    pub fn dim(&self) -> usize {
        self.coefficients.len() + 2
    }

    pub fn n_obs(&self) -> usize {
        self.y.len()
    }

    /// A reasonable point to start optimization or sampling from
    pub fn initial_point(&self) -> Array1<f64> {
        let mut z = Array1::zeros(self.dim());
        z[0] = self.intercept.mean;
        for (j, prior) in self.coefficients.iter().enumerate() {
            z[j + 1] = match prior {
                CoefficientPrior::HalfNormal { .. } => 0.1f64.ln(),
                CoefficientPrior::Normal { mean, .. } => *mean,
            };
        }
        z[self.dim() - 1] = 0.5f64.ln();
        z
    }

    /// Indices of parameters represented on the log scale
    fn log_scale(&self, i: usize) -> bool {
        if i == 0 {
            false
        } else if i == self.dim() - 1 {
            true
        } else {
            self.coefficients[i - 1].is_positive()
        }
    }

    /// Log posterior density (up to a constant) and its gradient at `z`
    pub fn log_density(&self, z: ArrayView1<f64>) -> (f64, Array1<f64>) {
        let p = self.dim();
        let k = p - 2;

        let mut wall = 0.0;
        let mut wall_grad = Array1::<f64>::zeros(p);
        let mut zc = z.to_owned();
        for i in 0..p {
            if self.log_scale(i) {
                let excess = z[i].abs() - LOG_SCALE_LIMIT;
                if excess > 0.0 {
                    wall -= 0.5 * WALL_STIFFNESS * excess * excess;
                    wall_grad[i] = -WALL_STIFFNESS * excess * z[i].signum();
                    zc[i] = z[i].clamp(-LOG_SCALE_LIMIT, LOG_SCALE_LIMIT);
                }
            }
        }

        let b0 = zc[0];
        let beta: Array1<f64> = (0..k)
            .map(|j| if self.log_scale(j + 1) { zc[j + 1].exp() } else { zc[j + 1] })
            .collect();
        let sigma = zc[p - 1].exp();
        let inv_var = 1.0 / (sigma * sigma);

        let mu = self.x.dot(&beta) + b0;
        let resid = &self.y - &mu;
        let ss = resid.dot(&resid);
        let n = self.n_obs() as f64;

        let mut lp = -n * zc[p - 1] - 0.5 * ss * inv_var;
        let mut grad = Array1::<f64>::zeros(p);

        // intercept
        let d0 = b0 - self.intercept.mean;
        lp -= 0.5 * d0 * d0 / (self.intercept.sd * self.intercept.sd);
        grad[0] = resid.sum() * inv_var - d0 / (self.intercept.sd * self.intercept.sd);

        // coefficients
        let xr = self.x.t().dot(&resid) * inv_var;
        for (j, prior) in self.coefficients.iter().enumerate() {
            let b = beta[j];
            let (prior_lp, prior_grad) = match *prior {
                CoefficientPrior::HalfNormal { scale } => {
                    (-0.5 * b * b / (scale * scale), -b / (scale * scale))
                }
                CoefficientPrior::Normal { mean, sd } => {
                    let d = b - mean;
                    (-0.5 * d * d / (sd * sd), -d / (sd * sd))
                }
            };
            lp += prior_lp;
            let dbeta = xr[j] + prior_grad;
            grad[j + 1] = if prior.is_positive() {
                // log-Jacobian of beta = exp(u)
                lp += zc[j + 1];
                dbeta * b + 1.0
            } else {
                dbeta
            };
        }

        // noise scale, half-normal prior plus log-Jacobian
        let c = self.sigma_scale;
        lp += -0.5 * sigma * sigma / (c * c) + zc[p - 1];
        grad[p - 1] = -n + ss * inv_var - sigma * sigma / (c * c) + 1.0;

        for i in 0..p {
            if wall_grad[i] != 0.0 {
                // clamped coordinates only feel the wall
                grad[i] = wall_grad[i];
            }
        }

        (lp + wall, grad)
    }

    /// Diagonal of the negative Hessian of the log density, by central differences of the gradient
    pub fn curvature(&self, z: ArrayView1<f64>) -> Array1<f64> {
        let p = self.dim();
        let mut h = Array1::zeros(p);
        for i in 0..p {
            let step = 1e-5 * z[i].abs().max(1.0);
            let mut up = z.to_owned();
            let mut down = z.to_owned();
            up[i] += step;
            down[i] -= step;
            let (_, g_up) = self.log_density(up.view());
            let (_, g_down) = self.log_density(down.view());
            h[i] = -(g_up[i] - g_down[i]) / (2.0 * step);
        }
        h
    }

    /// Map an unconstrained parameter vector to `[intercept, coef_1 .. coef_K, sigma]` in
    /// the original units of the target
    pub fn constrain(&self, z: ArrayView1<f64>) -> Array1<f64> {
        let p = self.dim();
        let mut out = Array1::zeros(p);
        out[0] = self.y_mean + self.y_sd * z[0];
        for j in 0..p - 2 {
            let b = if self.log_scale(j + 1) { z[j + 1].exp() } else { z[j + 1] };
            out[j + 1] = self.y_sd * b;
        }
        out[p - 1] = self.y_sd * z[p - 1].exp();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn problem(prior: CoefficientPrior) -> RegressionProblem {
        let channels = ChannelIndex::new(vec!["spend_a".to_string(), "spend_b".to_string()]).unwrap();
        let x = array![[0.1, 0.5], [0.4, 0.2], [0.8, 0.9], [0.3, 0.3], [0.6, 0.1]];
        let features = FeatureMatrix::new(channels, x).unwrap();
        let sales = array![10.0, 12.5, 15.0, 11.0, 13.2];
        let spec = ModelSpec::default_for(&features, &sales, 10.0)
            .unwrap()
            .with_prior("spend_b", prior)
            .unwrap();
        RegressionProblem::new(&spec, &features, &sales).unwrap()
    }

    #[test]
    fn gradient_matches_finite_differences() {
        for prior in [
            CoefficientPrior::HalfNormal { scale: 10.0 },
            CoefficientPrior::Normal { mean: 3.5, sd: 0.2 },
        ] {
            let prob = problem(prior);
            let z = array![0.2, -0.7, 0.4, -0.3];
            let (_, grad) = prob.log_density(z.view());
            for i in 0..prob.dim() {
                let h = 1e-6;
                let mut up = z.clone();
                let mut down = z.clone();
                up[i] += h;
                down[i] -= h;
                let fd = (prob.log_density(up.view()).0 - prob.log_density(down.view()).0) / (2.0 * h);
                assert!(
                    (fd - grad[i]).abs() < 1e-4 * (1.0 + fd.abs()),
                    "component {}: {} vs {}",
                    i,
                    fd,
                    grad[i]
                );
            }
        }
    }

    #[test]
    fn constrain_restores_units() {
        let prob = problem(CoefficientPrior::HalfNormal { scale: 10.0 });
        let z = array![0.0, 0.0, 1.0f64.ln() + 0.5, 0.0];
        let theta = prob.constrain(z.view());
        assert!((theta[0] - prob.y_mean).abs() < 1e-12);
        assert!((theta[1] - prob.y_sd).abs() < 1e-12);
        assert!((theta[2] - prob.y_sd * 0.5f64.exp()).abs() < 1e-12);
        assert!((theta[3] - prob.y_sd).abs() < 1e-12);
    }

    #[test]
    fn wall_keeps_density_finite() {
        let prob = problem(CoefficientPrior::HalfNormal { scale: 10.0 });
        let z = array![0.0, 400.0, 0.0, -300.0];
        let (lp, grad) = prob.log_density(z.view());
        assert!(lp.is_finite());
        assert!(grad.iter().all(|g| g.is_finite()));
        assert!(grad[1] < 0.0 && grad[3] > 0.0);
    }

    #[test]
    fn constant_sales_rejected() {
        let channels = ChannelIndex::new(vec!["spend_a".to_string()]).unwrap();
        let features = FeatureMatrix::new(channels, array![[0.1], [0.2]]).unwrap();
        let err = ModelSpec::default_for(&features, &array![5.0, 5.0], 10.0).unwrap_err();
        assert!(matches!(err, MmmError::Validation(_)));
    }

    #[test]
    fn reordered_features_rejected() {
        let channels = ChannelIndex::new(vec!["spend_a".to_string(), "spend_b".to_string()]).unwrap();
        let features = FeatureMatrix::new(channels, array![[0.1, 0.2], [0.3, 0.1]]).unwrap();
        let sales = array![1.0, 2.0];
        let spec = ModelSpec::default_for(&features, &sales, 10.0).unwrap();
        let swapped = ChannelIndex::new(vec!["spend_b".to_string(), "spend_a".to_string()]).unwrap();
        let other = FeatureMatrix::new(swapped, array![[0.2, 0.1], [0.1, 0.3]]).unwrap();
        let err = RegressionProblem::new(&spec, &other, &sales).unwrap_err();
        assert!(matches!(err, MmmError::Configuration(_)));
    }

    #[test]
    fn with_prior_leaves_original_untouched() {
        let channels = ChannelIndex::new(vec!["spend_a".to_string()]).unwrap();
        let features = FeatureMatrix::new(channels, array![[0.1], [0.2], [0.5]]).unwrap();
        let spec = ModelSpec::default_for(&features, &array![1.0, 2.0, 4.0], 10.0).unwrap();
        let calibrated = spec
            .with_prior("spend_a_saturated", CoefficientPrior::Normal { mean: 3.5, sd: 0.2 })
            .unwrap();
        assert_eq!(
            spec.prior("spend_a").unwrap(),
            &CoefficientPrior::HalfNormal { scale: 10.0 }
        );
        assert_eq!(
            calibrated.prior("spend_a").unwrap(),
            &CoefficientPrior::Normal { mean: 3.5, sd: 0.2 }
        );
    }
}
