use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde_derive::{Deserialize, Serialize};

use crate::error::{MmmError, Result};
use crate::structs::channel::ChannelIndex;

/// Mass of the reported highest-density interval
pub const HDI_PROB: f64 = 0.94;

/// Name of the posterior parameter holding a channel's coefficient
pub fn coefficient_name(channel: &str) -> String {
    format!("coef_{}", channel)
}

pub const INTERCEPT: &str = "intercept";
pub const SIGMA: &str = "sigma";

/// Strategy that produced a posterior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceMethod {
    /// Mean-field variational inference
    Advi,
    /// Markov chain Monte Carlo
    Mcmc,
}

impl std::fmt::Display for InferenceMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InferenceMethod::Advi => write!(f, "ADVI"),
            InferenceMethod::Mcmc => write!(f, "MCMC"),
        }
    }
}

/// What a parameter represents in the regression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterKind {
    Intercept,
    Coefficient(String),
    Sigma,
}

impl ParameterKind {
    /// Recognize a parameter from its summary name
    pub fn from_name(name: &str) -> Option<ParameterKind> {
        match name {
            INTERCEPT => Some(ParameterKind::Intercept),
            SIGMA => Some(ParameterKind::Sigma),
            _ => name
                .strip_prefix("coef_")
                .filter(|c| !c.is_empty())
                .map(|c| ParameterKind::Coefficient(c.to_string())),
        }
    }
}

/// Flat summary row of one parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSummary {
    pub parameter: String,
    pub mean: f64,
    pub sd: f64,
    #[serde(rename = "hdi_3%")]
    pub hdi_low: f64,
    #[serde(rename = "hdi_97%")]
    pub hdi_high: f64,
    pub r_hat: Option<f64>,
}

/// Posterior draws of one parameter plus their summary
#[derive(Debug, Clone)]
pub struct ParameterPosterior {
    kind: ParameterKind,
    samples: Array1<f64>,
    summary: ParameterSummary,
}

impl ParameterPosterior {
    pub fn kind(&self) -> &ParameterKind {
        &self.kind
    }

    pub fn name(&self) -> &str {
        &self.summary.parameter
    }

    pub fn samples(&self) -> &Array1<f64> {
        &self.samples
    }

    pub fn summary(&self) -> &ParameterSummary {
        &self.summary
    }

    pub fn mean(&self) -> f64 {
        self.summary.mean
    }

    pub fn sd(&self) -> f64 {
        self.summary.sd
    }
}

/// Approximate posterior of the regression, produced once by an inference run
///
/// Immutable after construction; calibration produces a separate estimate.
#[derive(Debug, Clone)]
pub struct PosteriorEstimate {
    channels: ChannelIndex,
    parameters: Vec<ParameterPosterior>,
    method: InferenceMethod,
    degraded: bool,
    calibrated_channel: Option<String>,
}

impl PosteriorEstimate {
    /// Build an estimate from draws in original units
    ///
    /// `draws` has one row per draw and the columns `intercept`, one coefficient per channel in
    /// `channels` order, then `sigma`. Rows are grouped by chain, `chains` groups of equal size.
    pub fn from_draws(
        channels: ChannelIndex,
        draws: &Array2<f64>,
        chains: usize,
        method: InferenceMethod,
    ) -> Result<Self> {
        let k = channels.len();
        if draws.ncols() != k + 2 {
            return Err(MmmError::configuration(format!(
                "Expected {} posterior columns for {} channels, got {}",
                k + 2,
                k,
                draws.ncols()
            )));
        }
        if draws.nrows() == 0 {
            return Err(MmmError::Convergence {
                primary: "no posterior draws were produced".to_string(),
                fallback: None,
            });
        }
        let chains = chains.max(1);
        if draws.nrows() % chains != 0 {
            return Err(MmmError::configuration(format!(
                "{} draws cannot be split into {} equal chains",
                draws.nrows(),
                chains
            )));
        }

        let kinds = std::iter::once(ParameterKind::Intercept)
            .chain(channels.iter().map(|c| ParameterKind::Coefficient(c.clone())))
            .chain(std::iter::once(ParameterKind::Sigma));

        let parameters = kinds
            .zip(draws.axis_iter(Axis(1)))
            .map(|(kind, column)| {
                let name = match &kind {
                    ParameterKind::Intercept => INTERCEPT.to_string(),
                    ParameterKind::Coefficient(c) => coefficient_name(c),
                    ParameterKind::Sigma => SIGMA.to_string(),
                };
                let summary = summarize(name, column, chains);
                ParameterPosterior {
                    kind,
                    samples: column.to_owned(),
                    summary,
                }
            })
            .collect();

        Ok(PosteriorEstimate {
            channels,
            parameters,
            method,
            degraded: false,
            calibrated_channel: None,
        })
    }

    pub(crate) fn mark_degraded(mut self) -> Self {
        self.degraded = true;
        self
    }

    pub(crate) fn with_calibrated_channel(mut self, channel: &str) -> Self {
        self.calibrated_channel = Some(channel.to_string());
        self
    }

    pub fn channels(&self) -> &ChannelIndex {
        &self.channels
    }

    pub fn parameters(&self) -> &[ParameterPosterior] {
        &self.parameters
    }

    pub fn method(&self) -> InferenceMethod {
        self.method
    }

    /// True when the approximate strategy failed and the sampler produced this estimate
    pub fn degraded(&self) -> bool {
        self.degraded
    }

    pub fn calibrated_channel(&self) -> Option<&str> {
        self.calibrated_channel.as_deref()
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterPosterior> {
        self.parameters.iter().find(|p| p.name() == name)
    }

    pub fn intercept(&self) -> &ParameterPosterior {
        &self.parameters[0]
    }

    pub fn sigma(&self) -> &ParameterPosterior {
        &self.parameters[self.parameters.len() - 1]
    }

    /// Posterior of a channel's coefficient, looked up by channel identifier
    pub fn coefficient(&self, channel: &str) -> Result<&ParameterPosterior> {
        let j = self.channels.resolve(channel)?;
        Ok(&self.parameters[j + 1])
    }

    /// Posterior mean of every channel coefficient, keyed by channel identifier
    pub fn coefficient_means(&self) -> Vec<(String, f64)> {
        self.channels
            .iter()
            .zip(self.parameters[1..].iter())
            .map(|(c, p)| (c.clone(), p.mean()))
            .collect()
    }

    pub fn summary(&self) -> Vec<ParameterSummary> {
        self.parameters.iter().map(|p| p.summary.clone()).collect()
    }

    pub fn n_draws(&self) -> usize {
        self.parameters[0].samples.len()
    }
}

fn summarize(parameter: String, samples: ArrayView1<f64>, chains: usize) -> ParameterSummary {
    let mean = samples.mean().unwrap_or(f64::NAN);
    let sd = if samples.len() > 1 { samples.std(1.0) } else { 0.0 };
    let (hdi_low, hdi_high) = hdi(samples, HDI_PROB);
    let r_hat = if chains > 1 {
        gelman_rubin(samples, chains)
    } else {
        None
    };
    ParameterSummary {
        parameter,
        mean,
        sd,
        hdi_low,
        hdi_high,
        r_hat,
    }
}

/// Narrowest interval containing `prob` of the samples
pub fn hdi(samples: ArrayView1<f64>, prob: f64) -> (f64, f64) {
    let mut sorted: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    let width = ((prob * n as f64).ceil() as usize).clamp(1, n);
    let mut best = (sorted[0], sorted[width - 1]);
    for i in 1..=(n - width) {
        let candidate = (sorted[i], sorted[i + width - 1]);
        if candidate.1 - candidate.0 < best.1 - best.0 {
            best = candidate;
        }
    }
    best
}

/// Potential scale reduction factor over equally long chains
pub fn gelman_rubin(samples: ArrayView1<f64>, chains: usize) -> Option<f64> {
    let n = samples.len() / chains;
    if chains < 2 || n < 2 {
        return None;
    }
    let split = samples.to_owned().into_shape((chains, n)).ok()?;
    let chain_means = split.mean_axis(Axis(1))?;
    let chain_vars = split.var_axis(Axis(1), 1.0);
    let w = chain_vars.mean()?;
    if w <= 0.0 {
        return None;
    }
    let b = n as f64 * chain_means.var(1.0);
    let var_plus = (n as f64 - 1.0) / n as f64 * w + b / n as f64;
    Some((var_plus / w).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn hdi_of_uniform_grid() {
        let samples = Array1::linspace(0.0, 1.0, 101);
        let (lo, hi) = hdi(samples.view(), 0.94);
        assert!((hi - lo - 0.94).abs() < 0.011);
    }

    #[test]
    fn hdi_prefers_dense_region() {
        let samples = array![0.0, 10.0, 10.1, 10.2, 10.3, 10.4, 10.5, 10.6, 10.7, 10.8];
        let (lo, hi) = hdi(samples.view(), 0.9);
        assert_eq!((lo, hi), (10.0, 10.8));
    }

    #[test]
    fn identical_chains_have_unit_rhat() {
        let chain = array![1.0, 2.0, 3.0, 4.0, 5.0];
        let samples = ndarray::concatenate![Axis(0), chain, chain];
        let r = gelman_rubin(samples.view(), 2).unwrap();
        assert!((r - (0.8f64).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn separated_chains_have_large_rhat() {
        let samples = array![0.0, 0.1, -0.1, 0.05, 10.0, 10.1, 9.9, 10.05];
        assert!(gelman_rubin(samples.view(), 2).unwrap() > 5.0);
    }

    #[test]
    fn coefficients_looked_up_by_channel() {
        let channels = ChannelIndex::new(vec!["spend_a".to_string(), "spend_b".to_string()]).unwrap();
        let draws = array![[10.0, 1.0, 2.0, 0.5], [12.0, 1.2, 2.2, 0.7]];
        let post = PosteriorEstimate::from_draws(channels, &draws, 1, InferenceMethod::Advi).unwrap();
        assert!((post.coefficient("spend_b").unwrap().mean() - 2.1).abs() < 1e-12);
        assert!((post.intercept().mean() - 11.0).abs() < 1e-12);
        assert!((post.sigma().mean() - 0.6).abs() < 1e-12);
        assert_eq!(post.parameter("coef_spend_a").unwrap().name(), "coef_spend_a");
        assert!(post.coefficient("spend_c").is_err());
        assert!(!post.degraded());
    }

    #[test]
    fn kinds_parsed_from_names() {
        assert_eq!(ParameterKind::from_name("sigma"), Some(ParameterKind::Sigma));
        assert_eq!(
            ParameterKind::from_name("coef_spend_tv"),
            Some(ParameterKind::Coefficient("spend_tv".to_string()))
        );
        assert_eq!(ParameterKind::from_name("coef_"), None);
        assert_eq!(ParameterKind::from_name("lp"), None);
    }

    #[test]
    fn wrong_column_count_rejected() {
        let channels = ChannelIndex::new(vec!["spend_a".to_string()]).unwrap();
        let draws = array![[10.0, 1.0]];
        assert!(PosteriorEstimate::from_draws(channels, &draws, 1, InferenceMethod::Mcmc).is_err());
    }
}
