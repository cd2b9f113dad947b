use std::path::Path;

use chrono::NaiveDate;
use csv::ReaderBuilder;
use ndarray::Array1;
use ndarray_stats::QuantileExt;

use crate::error::{DataQualityWarning, MmmError, Result};
use crate::structs::channel::{ChannelIndex, ChannelSeries};

pub const DATE_COLUMN: &str = "date";
pub const SALES_COLUMN: &str = "sales";

/// Observed sales and per-channel spend over a common date index
#[derive(Debug, Clone)]
pub struct Dataset {
    dates: Vec<NaiveDate>,
    sales: Array1<f64>,
    channels: ChannelIndex,
    series: Vec<ChannelSeries>,
    warnings: Vec<DataQualityWarning>,
}

impl Dataset {
    /// Assemble a dataset from in-memory parts
    pub fn from_parts(dates: Vec<NaiveDate>, sales: Array1<f64>, series: Vec<ChannelSeries>) -> Result<Self> {
        if dates.is_empty() {
            return Err(MmmError::validation("Dataset has no rows"));
        }
        if sales.len() != dates.len() {
            return Err(MmmError::validation(format!(
                "Sales has {} values for {} dates",
                sales.len(),
                dates.len()
            )));
        }
        for s in &series {
            if s.len() != dates.len() {
                return Err(MmmError::validation(format!(
                    "{} has {} values for {} dates",
                    s.channel(),
                    s.len(),
                    dates.len()
                )));
            }
        }
        if let Some(w) = dates.windows(2).find(|w| w[1] <= w[0]) {
            return Err(MmmError::validation(format!(
                "Dates must be strictly increasing, found {} followed by {}",
                w[0], w[1]
            )));
        }
        if let Some(v) = sales.iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(MmmError::validation(format!(
                "Sales must be finite and non-negative, found {}",
                v
            )));
        }
        let channels = ChannelIndex::new(series.iter().map(|s| s.channel().to_string()).collect())?;
        Ok(Dataset {
            dates,
            sales,
            channels,
            series,
            warnings: Vec::new(),
        })
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn sales(&self) -> &Array1<f64> {
        &self.sales
    }

    pub fn channels(&self) -> &ChannelIndex {
        &self.channels
    }

    pub fn series(&self) -> &[ChannelSeries] {
        &self.series
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelSeries> {
        self.series.iter().find(|s| s.channel() == name)
    }

    pub fn warnings(&self) -> &[DataQualityWarning] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Mean spend per channel, in channel order
    pub fn average_spend(&self) -> Vec<(String, f64)> {
        self.series
            .iter()
            .map(|s| (s.channel().to_string(), s.mean()))
            .collect()
    }
}

/// Read a dataset with columns `date`, `sales` and one spend column per channel
///
/// All missing columns are reported at once. Negative numbers are clipped to zero and
/// reported as [DataQualityWarning]s.
pub fn read_dataset(path: impl AsRef<Path>, channels: &[String]) -> Result<Dataset> {
    let path = path.as_ref();
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();

    let mut required: Vec<&str> = vec![DATE_COLUMN, SALES_COLUMN];
    required.extend(channels.iter().map(|c| c.as_str()));
    let missing: Vec<&str> = required
        .iter()
        .filter(|c| !headers.iter().any(|h| h == *c))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(MmmError::validation(format!(
            "Missing required columns in {}: {:?}",
            path.display(),
            missing
        )));
    }
    let col = |name: &str| headers.iter().position(|h| h == name).unwrap_or_default();
    let date_idx = col(DATE_COLUMN);
    let numeric: Vec<(String, usize)> = std::iter::once(SALES_COLUMN.to_string())
        .chain(channels.iter().cloned())
        .map(|name| {
            let idx = col(&name);
            (name, idx)
        })
        .collect();

    let mut dates = Vec::new();
    let mut values: Vec<Vec<f64>> = vec![Vec::new(); numeric.len()];
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let raw_date = record.get(date_idx).unwrap_or_default();
        let date = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d").map_err(|e| {
            MmmError::validation(format!(
                "Row {}: could not parse date {:?} ({})",
                row + 1,
                raw_date,
                e
            ))
        })?;
        dates.push(date);
        for (k, (name, idx)) in numeric.iter().enumerate() {
            let raw = record.get(*idx).unwrap_or_default();
            let value: f64 = raw.parse().map_err(|_| {
                MmmError::validation(format!(
                    "Row {}: column {} holds {:?}, expected a number",
                    row + 1,
                    name,
                    raw
                ))
            })?;
            if !value.is_finite() {
                return Err(MmmError::validation(format!(
                    "Row {}: column {} is not finite",
                    row + 1,
                    name
                )));
            }
            values[k].push(value);
        }
    }
    if dates.is_empty() {
        return Err(MmmError::validation(format!("{} contains no rows", path.display())));
    }

    let mut warnings = Vec::new();
    let mut columns: Vec<Array1<f64>> = Vec::with_capacity(numeric.len());
    for ((name, _), raw) in numeric.iter().zip(values) {
        let (clean, warning) = clip_negative(name, Array1::from(raw));
        if let Some(w) = warning {
            tracing::warn!("{}", w);
            warnings.push(w);
        }
        columns.push(clean);
    }

    let mut columns = columns.into_iter();
    let sales = columns.next().unwrap_or_default();
    let series = channels
        .iter()
        .zip(columns)
        .map(|(name, spend)| ChannelSeries::new(name.clone(), spend))
        .collect::<Result<Vec<_>>>()?;

    let mut dataset = Dataset::from_parts(dates, sales, series)?;
    dataset.warnings = warnings;
    tracing::info!(
        "Read {} rows for {} channels from {}",
        dataset.len(),
        dataset.channels().len(),
        path.display()
    );
    Ok(dataset)
}

/// Clip negative values to zero, reporting how many were affected
pub fn clip_negative(column: &str, mut values: Array1<f64>) -> (Array1<f64>, Option<DataQualityWarning>) {
    let has_negative = values.min().map(|m| *m < 0.0).unwrap_or(false);
    if !has_negative {
        return (values, None);
    }
    let count = values.iter().filter(|v| **v < 0.0).count();
    values.mapv_inplace(|v| v.max(0.0));
    (
        values,
        Some(DataQualityWarning {
            column: column.to_string(),
            count,
        }),
    )
}
