//! Transform engine: raw spend -> adstocked -> saturated feature series.
//!
//! Every channel is transformed independently, so channels are processed in parallel.
//! Within a channel the adstock recursion runs sequentially in time order.

pub mod adstock;
pub mod saturation;

use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;
use serde_derive::{Deserialize, Serialize};

use crate::error::{MmmError, Result};
use crate::routines::data::Dataset;
use crate::structs::channel::{ChannelIndex, ChannelSeries};
use crate::structs::features::FeatureMatrix;

pub use adstock::{geometric_adstock, steady_state_adstock};
pub use saturation::{hill, hill_derivative, hill_saturation};

/// Decay rate of the geometric adstock, in `[0, 1)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdstockParams {
    alpha: f64,
}

impl AdstockParams {
    pub fn new(alpha: f64) -> Result<Self> {
        if !(0.0..1.0).contains(&alpha) {
            return Err(MmmError::configuration(format!(
                "Adstock decay must lie in [0, 1), got {}",
                alpha
            )));
        }
        Ok(AdstockParams { alpha })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

/// Hill saturation slope and half-saturation point, both strictly positive
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SaturationParams {
    slope: f64,
    kappa: f64,
}

impl SaturationParams {
    pub fn new(slope: f64, kappa: f64) -> Result<Self> {
        if !(slope.is_finite() && slope > 0.0) {
            return Err(MmmError::configuration(format!(
                "Saturation slope must be positive, got {}",
                slope
            )));
        }
        if !(kappa.is_finite() && kappa > 0.0) {
            return Err(MmmError::configuration(format!(
                "Half-saturation point must be positive, got {}",
                kappa
            )));
        }
        Ok(SaturationParams { slope, kappa })
    }

    pub fn slope(&self) -> f64 {
        self.slope
    }

    pub fn kappa(&self) -> f64 {
        self.kappa
    }

    pub fn apply(&self, x: f64) -> f64 {
        hill(x, self.slope, self.kappa)
    }
}

/// Configured transform of one channel
///
/// `kappa` is optional: when absent it is estimated as the mean of the adstocked series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformParams {
    pub channel: String,
    pub alpha: f64,
    #[serde(default = "default_slope")]
    pub slope: f64,
    #[serde(default)]
    pub kappa: Option<f64>,
}

impl TransformParams {
    pub fn new(channel: impl Into<String>, alpha: f64, slope: f64) -> Self {
        TransformParams {
            channel: channel.into(),
            alpha,
            slope,
            kappa: None,
        }
    }

    pub fn with_kappa(mut self, kappa: f64) -> Self {
        self.kappa = Some(kappa);
        self
    }

    /// Check the ranges of the fixed parts of the configuration
    pub fn validate(&self) -> Result<()> {
        AdstockParams::new(self.alpha)?;
        SaturationParams::new(self.slope, self.kappa.unwrap_or(1.0))?;
        Ok(())
    }
}

fn default_slope() -> f64 {
    1.0
}

/// Fully resolved transform of a channel, as used to build its feature column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelTransform {
    pub channel: String,
    pub adstock: AdstockParams,
    pub saturation: SaturationParams,
}

impl ChannelTransform {
    /// Saturated response to a spend held constant at `spend`
    pub fn steady_state_response(&self, spend: f64) -> f64 {
        self.saturation
            .apply(steady_state_adstock(spend, self.adstock.alpha()))
    }

    /// Derivative of [ChannelTransform::steady_state_response] with respect to spend
    pub fn steady_state_marginal(&self, spend: f64) -> f64 {
        let alpha = self.adstock.alpha();
        hill_derivative(
            steady_state_adstock(spend, alpha),
            self.saturation.slope(),
            self.saturation.kappa(),
        ) / (1.0 - alpha)
    }
}

/// Output of transforming one channel
#[derive(Debug, Clone)]
pub struct TransformedChannel {
    pub transform: ChannelTransform,
    pub adstocked: Array1<f64>,
    pub saturated: Array1<f64>,
}

/// Adstock then saturate a single channel
pub fn transform_channel(series: &ChannelSeries, params: &TransformParams) -> Result<TransformedChannel> {
    let adstock = AdstockParams::new(params.alpha)?;
    let adstocked = geometric_adstock(&series.spend().view(), adstock.alpha());

    let kappa = match params.kappa {
        Some(kappa) => kappa,
        None => {
            let mean = adstocked.mean().unwrap_or(0.0);
            if mean > 0.0 {
                mean
            } else {
                tracing::warn!(
                    "Channel {} has no spend, half-saturation point defaults to 1.0",
                    series.channel()
                );
                1.0
            }
        }
    };
    let saturation = SaturationParams::new(params.slope, kappa)?;
    let saturated = hill_saturation(&adstocked.view(), saturation.slope(), saturation.kappa());

    Ok(TransformedChannel {
        transform: ChannelTransform {
            channel: series.channel().to_string(),
            adstock,
            saturation,
        },
        adstocked,
        saturated,
    })
}

/// Transform every channel of the dataset into the model's feature matrix
///
/// Parameters are matched to series by channel identifier. The column order of the
/// resulting matrix is the channel order of the dataset.
pub fn transform_dataset(dataset: &Dataset, params: &[TransformParams]) -> Result<FeatureMatrix> {
    let channels = dataset.channels();
    let mut resolved: Vec<&TransformParams> = Vec::with_capacity(channels.len());
    for series in dataset.series() {
        let p = params
            .iter()
            .find(|p| p.channel == series.channel())
            .ok_or_else(|| {
                MmmError::configuration(format!(
                    "No transform parameters configured for channel {}",
                    series.channel()
                ))
            })?;
        resolved.push(p);
    }
    for p in params {
        if channels.position(&p.channel).is_none() {
            return Err(MmmError::configuration(format!(
                "Transform parameters given for {}, which is not in the dataset",
                p.channel
            )));
        }
    }

    let outputs: Vec<TransformedChannel> = dataset
        .series()
        .par_iter()
        .zip(resolved.par_iter())
        .map(|(series, params)| transform_channel(series, params))
        .collect::<Result<Vec<_>>>()?;

    for out in &outputs {
        tracing::debug!(
            "{}: alpha = {}, slope = {}, kappa = {:.4}",
            out.transform.channel,
            out.transform.adstock.alpha(),
            out.transform.saturation.slope(),
            out.transform.saturation.kappa()
        );
    }

    let n = dataset.len();
    let k = outputs.len();
    let mut adstocked = Array2::zeros((n, k));
    let mut saturated = Array2::zeros((n, k));
    for (j, out) in outputs.iter().enumerate() {
        adstocked.index_axis_mut(Axis(1), j).assign(&out.adstocked);
        saturated.index_axis_mut(Axis(1), j).assign(&out.saturated);
    }
    let transforms = outputs.into_iter().map(|o| o.transform).collect();

    FeatureMatrix::from_transforms(ChannelIndex::clone(channels), adstocked, saturated, transforms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn alpha_out_of_range_rejected() {
        assert!(AdstockParams::new(1.0).is_err());
        assert!(AdstockParams::new(-0.1).is_err());
        assert!(AdstockParams::new(0.0).is_ok());
    }

    #[test]
    fn kappa_defaults_to_adstocked_mean() {
        let series = ChannelSeries::new("spend_tv", array![10.0, 0.0, 0.0, 10.0]).unwrap();
        let out = transform_channel(&series, &TransformParams::new("spend_tv", 0.5, 1.0)).unwrap();
        let expected = (10.0 + 5.0 + 2.5 + 11.25) / 4.0;
        assert!((out.transform.saturation.kappa() - expected).abs() < 1e-12);
    }

    #[test]
    fn explicit_kappa_is_kept() {
        let series = ChannelSeries::new("spend_tv", array![100.0, 0.0]).unwrap();
        let params = TransformParams::new("spend_tv", 0.0, 1.0).with_kappa(100.0);
        let out = transform_channel(&series, &params).unwrap();
        assert_eq!(out.saturated[0], 0.5);
    }

    #[test]
    fn silent_channel_gets_unit_kappa() {
        let series = ChannelSeries::new("spend_radio", array![0.0, 0.0, 0.0]).unwrap();
        let out = transform_channel(&series, &TransformParams::new("spend_radio", 0.3, 1.0)).unwrap();
        assert_eq!(out.transform.saturation.kappa(), 1.0);
    }

    #[test]
    fn steady_state_marginal_matches_finite_difference() {
        let t = ChannelTransform {
            channel: "c".to_string(),
            adstock: AdstockParams::new(0.4).unwrap(),
            saturation: SaturationParams::new(1.5, 80.0).unwrap(),
        };
        let x = 37.0;
        let h = 1e-4;
        let fd = (t.steady_state_response(x + h) - t.steady_state_response(x - h)) / (2.0 * h);
        assert!((fd - t.steady_state_marginal(x)).abs() < 1e-8);
    }
}
