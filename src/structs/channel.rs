use ndarray::Array1;
use serde_derive::{Deserialize, Serialize};

use crate::error::{MmmError, Result};

/// Suffix of the saturated feature column derived from a channel
pub const SATURATED_SUFFIX: &str = "_saturated";
/// Suffix of the adstocked feature column derived from a channel
pub const ADSTOCK_SUFFIX: &str = "_adstock";

/// Spend of a single media channel over the study's time index
///
/// The channel identifier is the name of the spend column, e.g. `spend_tiktok`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSeries {
    channel: String,
    spend: Array1<f64>,
}

impl ChannelSeries {
    /// Create a new series, rejecting negative or non-finite spend
    pub fn new(channel: impl Into<String>, spend: Array1<f64>) -> Result<Self> {
        let channel = channel.into();
        if let Some((t, v)) = spend
            .iter()
            .enumerate()
            .find(|(_, v)| !v.is_finite() || **v < 0.0)
        {
            return Err(MmmError::validation(format!(
                "Spend of {} at index {} is {}, expected a finite non-negative value",
                channel, t, v
            )));
        }
        Ok(ChannelSeries { channel, spend })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn spend(&self) -> &Array1<f64> {
        &self.spend
    }

    pub fn len(&self) -> usize {
        self.spend.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spend.is_empty()
    }

    /// Average spend per time step
    pub fn mean(&self) -> f64 {
        self.spend.mean().unwrap_or(0.0)
    }
}

/// Ordered set of channel identifiers
///
/// Carried next to every column-ordered structure (features, coefficients) so that a
/// channel is always looked up by name, never assumed to sit at a fixed position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelIndex {
    names: Vec<String>,
}

impl ChannelIndex {
    pub fn new(names: Vec<String>) -> Result<Self> {
        if names.is_empty() {
            return Err(MmmError::configuration("At least one channel is required"));
        }
        for (i, name) in names.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(MmmError::configuration(format!(
                    "Channel at position {} has an empty name",
                    i
                )));
            }
            if names[..i].contains(name) {
                return Err(MmmError::configuration(format!(
                    "Channel {} is listed more than once",
                    name
                )));
            }
        }
        Ok(ChannelIndex { names })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.names.iter()
    }

    /// Column position of a channel identifier
    pub fn position(&self, channel: &str) -> Option<usize> {
        self.names.iter().position(|name| name == channel)
    }

    /// Resolve a channel given either its identifier or one of its derived feature column names
    pub fn resolve(&self, name: &str) -> Result<usize> {
        if let Some(idx) = self.position(name) {
            return Ok(idx);
        }
        let stripped = name
            .strip_suffix(SATURATED_SUFFIX)
            .or_else(|| name.strip_suffix(ADSTOCK_SUFFIX));
        stripped.and_then(|base| self.position(base)).ok_or_else(|| {
            MmmError::configuration(format!(
                "Channel {} is not part of the feature set; known channels are {:?}",
                name, self.names
            ))
        })
    }

    /// Fail unless `other` names exactly the same channels in the same order
    pub fn ensure_same_order(&self, other: &ChannelIndex) -> Result<()> {
        if self.names != other.names {
            return Err(MmmError::configuration(format!(
                "Channel order mismatch: features are {:?} but coefficients are {:?}",
                self.names, other.names
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn index() -> ChannelIndex {
        ChannelIndex::new(vec![
            "spend_facebook".to_string(),
            "spend_google_search".to_string(),
            "spend_tiktok".to_string(),
        ])
        .unwrap()
    }

    #[test]
    fn resolve_accepts_feature_column_names() {
        let idx = index();
        assert_eq!(idx.resolve("spend_tiktok").unwrap(), 2);
        assert_eq!(idx.resolve("spend_tiktok_saturated").unwrap(), 2);
        assert_eq!(idx.resolve("spend_facebook_adstock").unwrap(), 0);
    }

    #[test]
    fn resolve_unknown_channel_is_configuration_error() {
        let err = index().resolve("spend_radio").unwrap_err();
        assert!(matches!(err, MmmError::Configuration(_)));
    }

    #[test]
    fn duplicate_channels_rejected() {
        let err = ChannelIndex::new(vec!["a".to_string(), "a".to_string()]).unwrap_err();
        assert!(matches!(err, MmmError::Configuration(_)));
    }

    #[test]
    fn reordered_index_is_a_mismatch() {
        let a = index();
        let mut names = a.names().to_vec();
        names.swap(0, 1);
        let b = ChannelIndex::new(names).unwrap();
        assert!(a.ensure_same_order(&b).is_err());
        assert!(a.ensure_same_order(&a.clone()).is_ok());
    }

    #[test]
    fn negative_spend_rejected() {
        assert!(ChannelSeries::new("spend_tv", array![1.0, -0.5]).is_err());
        let s = ChannelSeries::new("spend_tv", array![1.0, 3.0]).unwrap();
        assert_eq!(s.mean(), 2.0);
    }
}
