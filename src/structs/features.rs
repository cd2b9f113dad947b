use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{MmmError, Result};
use crate::structs::channel::{ChannelIndex, ADSTOCK_SUFFIX, SATURATED_SUFFIX};
use crate::transform::ChannelTransform;

/// Model design matrix: one saturated feature column per channel
///
/// Rows are time steps, columns follow `channels`. Anything that later pairs a value with a
/// column (coefficients, priors, transform parameters) goes through the [ChannelIndex].
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    channels: ChannelIndex,
    saturated: Array2<f64>,
    adstocked: Option<Array2<f64>>,
    transforms: Vec<ChannelTransform>,
}

impl FeatureMatrix {
    /// Wrap an already transformed design matrix
    ///
    /// Features built this way carry no transform parameters and cannot feed the budget optimizer.
    pub fn new(channels: ChannelIndex, saturated: Array2<f64>) -> Result<Self> {
        Self::check(&channels, &saturated)?;
        Ok(FeatureMatrix {
            channels,
            saturated,
            adstocked: None,
            transforms: Vec::new(),
        })
    }

    pub(crate) fn from_transforms(
        channels: ChannelIndex,
        adstocked: Array2<f64>,
        saturated: Array2<f64>,
        transforms: Vec<ChannelTransform>,
    ) -> Result<Self> {
        Self::check(&channels, &saturated)?;
        if adstocked.dim() != saturated.dim() {
            return Err(MmmError::validation(format!(
                "Adstocked matrix has shape {:?}, saturated has {:?}",
                adstocked.dim(),
                saturated.dim()
            )));
        }
        for (name, t) in channels.iter().zip(transforms.iter()) {
            if name != &t.channel {
                return Err(MmmError::configuration(format!(
                    "Transform for {} stored in the column of {}",
                    t.channel, name
                )));
            }
        }
        if transforms.len() != channels.len() {
            return Err(MmmError::configuration(format!(
                "{} transforms given for {} channels",
                transforms.len(),
                channels.len()
            )));
        }
        Ok(FeatureMatrix {
            channels,
            saturated,
            adstocked: Some(adstocked),
            transforms,
        })
    }

    fn check(channels: &ChannelIndex, saturated: &Array2<f64>) -> Result<()> {
        if saturated.ncols() != channels.len() {
            return Err(MmmError::configuration(format!(
                "Feature matrix has {} columns but {} channels are named",
                saturated.ncols(),
                channels.len()
            )));
        }
        if saturated.nrows() == 0 {
            return Err(MmmError::validation("Feature matrix has no rows"));
        }
        if let Some(((t, j), v)) = saturated.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(MmmError::validation(format!(
                "Feature {} at row {} is {}",
                channels.names()[j],
                t,
                v
            )));
        }
        Ok(())
    }

    pub fn channels(&self) -> &ChannelIndex {
        &self.channels
    }

    /// Saturated design matrix, time steps by channels
    pub fn matrix(&self) -> ArrayView2<'_, f64> {
        self.saturated.view()
    }

    pub fn adstocked(&self) -> Option<ArrayView2<'_, f64>> {
        self.adstocked.as_ref().map(|a| a.view())
    }

    pub fn nrows(&self) -> usize {
        self.saturated.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.saturated.ncols()
    }

    /// Saturated feature column of a channel
    pub fn column(&self, channel: &str) -> Result<ArrayView1<'_, f64>> {
        let j = self.channels.resolve(channel)?;
        Ok(self.saturated.index_axis(Axis(1), j))
    }

    /// Resolved transform parameters of a channel, when the features came out of the transform engine
    pub fn transform(&self, channel: &str) -> Option<&ChannelTransform> {
        self.transforms.iter().find(|t| t.channel == channel)
    }

    pub fn transforms(&self) -> &[ChannelTransform] {
        &self.transforms
    }

    /// Names of the derived feature columns, in the fixed output order
    ///
    /// For every channel: `<channel>`, `<channel>_adstock`, `<channel>_saturated`.
    pub fn column_names(&self) -> Vec<String> {
        self.channels
            .iter()
            .flat_map(|c| {
                vec![
                    c.clone(),
                    format!("{}{}", c, ADSTOCK_SUFFIX),
                    format!("{}{}", c, SATURATED_SUFFIX),
                ]
            })
            .collect()
    }
}
