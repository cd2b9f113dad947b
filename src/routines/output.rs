use std::fs::{create_dir_all, File, OpenOptions};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, WriterBuilder};

use crate::error::{MmmError, Result};
use crate::optimizer::BudgetAllocation;
use crate::routines::data::{Dataset, DATE_COLUMN, SALES_COLUMN};
use crate::structs::features::FeatureMatrix;
use crate::structs::posterior::{ParameterKind, ParameterSummary, PosteriorEstimate};

pub const FEATURES_FILE: &str = "features.csv";
pub const POSTERIOR_SUMMARY_FILE: &str = "posterior_summary.csv";
pub const CALIBRATED_SUMMARY_FILE: &str = "calibrated_summary.csv";
pub const ALLOCATION_FILE: &str = "budget_allocation";

/// Contains all the necessary information of an output file
#[derive(Debug)]
pub struct OutputFile {
    file: File,
    relative_path: PathBuf,
}

impl OutputFile {
    pub fn new(folder: &str, file_name: &str) -> Result<Self> {
        let relative_path = Path::new(&folder).join(file_name);

        if let Some(parent) = relative_path.parent() {
            create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&relative_path)?;

        Ok(OutputFile {
            file,
            relative_path,
        })
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn file_owned(self) -> File {
        self.file
    }

    pub fn relative_path(&self) -> &Path {
        &self.relative_path
    }
}

/// Writes the model-ready dataset: date, sales, then raw, adstocked and saturated spend per channel
pub fn write_features(folder: &str, dataset: &Dataset, features: &FeatureMatrix) -> Result<PathBuf> {
    let adstocked = features.adstocked().ok_or_else(|| {
        MmmError::configuration("Feature matrix carries no adstocked series to write")
    })?;
    features.channels().ensure_same_order(dataset.channels())?;

    let outputfile = OutputFile::new(folder, FEATURES_FILE)?;
    let mut writer = WriterBuilder::new()
        .has_headers(true)
        .from_writer(outputfile.file());

    let mut header = vec![DATE_COLUMN.to_string(), SALES_COLUMN.to_string()];
    header.extend(features.column_names());
    writer.write_record(&header)?;

    let saturated = features.matrix();
    for (t, date) in dataset.dates().iter().enumerate() {
        let mut row = vec![date.format("%Y-%m-%d").to_string(), dataset.sales()[t].to_string()];
        for (j, series) in dataset.series().iter().enumerate() {
            row.push(series.spend()[t].to_string());
            row.push(adstocked[[t, j]].to_string());
            row.push(saturated[[t, j]].to_string());
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;
    tracing::debug!("Features written to {:?}", outputfile.relative_path());
    Ok(outputfile.relative_path().to_path_buf())
}

/// Writes one row per parameter: `parameter,mean,sd,hdi_3%,hdi_97%,r_hat`
pub fn write_summary(folder: &str, file_name: &str, estimate: &PosteriorEstimate) -> Result<PathBuf> {
    let outputfile = OutputFile::new(folder, file_name)?;
    let mut writer = WriterBuilder::new()
        .has_headers(true)
        .from_writer(outputfile.file());
    for summary in estimate.summary() {
        writer.serialize(summary)?;
    }
    writer.flush()?;
    tracing::info!("Posterior summary written to {:?}", outputfile.relative_path());
    Ok(outputfile.relative_path().to_path_buf())
}

/// Writes the posterior draws, one column per parameter
pub fn write_samples(folder: &str, file_name: &str, estimate: &PosteriorEstimate) -> Result<PathBuf> {
    let outputfile = OutputFile::new(folder, file_name)?;
    let mut writer = WriterBuilder::new()
        .has_headers(true)
        .from_writer(outputfile.file());

    let parameters = estimate.parameters();
    writer.write_record(parameters.iter().map(|p| p.name()))?;
    for i in 0..estimate.n_draws() {
        writer.write_record(parameters.iter().map(|p| p.samples()[i].to_string()))?;
    }
    writer.flush()?;
    tracing::debug!("Posterior samples written to {:?}", outputfile.relative_path());
    Ok(outputfile.relative_path().to_path_buf())
}

/// Writes the allocation as `budget_allocation.csv` (per channel) and `budget_allocation.json` (full report)
pub fn write_allocation(folder: &str, allocation: &BudgetAllocation) -> Result<(PathBuf, PathBuf)> {
    let csvfile = OutputFile::new(folder, &format!("{}.csv", ALLOCATION_FILE))?;
    let mut writer = WriterBuilder::new()
        .has_headers(true)
        .from_writer(csvfile.file());
    for channel in &allocation.channels {
        writer.serialize(channel)?;
    }
    writer.flush()?;

    let jsonfile = OutputFile::new(folder, &format!("{}.json", ALLOCATION_FILE))?;
    serde_json::to_writer_pretty(jsonfile.file(), allocation)?;
    tracing::info!("Budget allocation written to {:?}", csvfile.relative_path());
    Ok((
        csvfile.relative_path().to_path_buf(),
        jsonfile.relative_path().to_path_buf(),
    ))
}

/// Reads a summary table written by [write_summary]
pub fn read_summary(path: impl AsRef<Path>) -> Result<Vec<ParameterSummary>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path.as_ref())?;
    let rows = reader
        .deserialize()
        .collect::<std::result::Result<Vec<ParameterSummary>, csv::Error>>()?;
    if rows.is_empty() {
        return Err(MmmError::validation(format!(
            "{} holds no parameters",
            path.as_ref().display()
        )));
    }
    Ok(rows)
}

/// Coefficient means from summary rows, keyed by channel identifier
pub fn coefficient_means(summary: &[ParameterSummary]) -> Vec<(String, f64)> {
    summary
        .iter()
        .filter_map(|row| match ParameterKind::from_name(&row.parameter) {
            Some(ParameterKind::Coefficient(channel)) => Some((channel, row.mean)),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::channel::ChannelIndex;
    use crate::structs::posterior::InferenceMethod;
    use ndarray::array;

    #[test]
    fn summary_survives_a_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().to_str().unwrap();
        let channels = ChannelIndex::new(vec!["spend_tv".to_string(), "spend_search".to_string()]).unwrap();
        let draws = array![
            [10.0, 1.0, 2.0, 0.5],
            [11.0, 1.5, 2.5, 0.6],
            [12.0, 2.0, 3.0, 0.7],
            [13.0, 2.5, 3.5, 0.8]
        ];
        let estimate = PosteriorEstimate::from_draws(channels, &draws, 2, InferenceMethod::Mcmc).unwrap();
        let path = write_summary(folder, POSTERIOR_SUMMARY_FILE, &estimate).unwrap();

        let header = std::fs::read_to_string(&path).unwrap();
        assert!(header.starts_with("parameter,mean,sd,hdi_3%,hdi_97%,r_hat"));

        let summary = read_summary(&path).unwrap();
        assert_eq!(summary.len(), 4);
        assert_eq!(summary[0].parameter, "intercept");
        assert!(summary[0].r_hat.is_some());
        assert_eq!(
            coefficient_means(&summary),
            vec![("spend_tv".to_string(), 1.75), ("spend_search".to_string(), 2.75)]
        );
    }

    #[test]
    fn output_file_creates_folders() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let out = OutputFile::new(nested.to_str().unwrap(), "x.csv").unwrap();
        assert!(out.relative_path().exists());
    }
}
