use std::fmt;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, MmmError>;

/// Errors raised by the modeling pipeline
///
/// Validation and configuration failures are raised before any modeling work starts.
/// A convergence failure means neither posterior approximation produced a usable result.
#[derive(Debug)]
pub enum MmmError {
    /// Input data is missing required fields or contains unusable values
    Validation(String),
    /// The requested run is inconsistent with the data or with itself
    Configuration(String),
    /// Both the approximate and the sampling strategies failed
    Convergence {
        primary: String,
        fallback: Option<String>,
    },
    Io(std::io::Error),
    Csv(csv::Error),
    Json(serde_json::Error),
}

impl MmmError {
    pub fn validation(msg: impl Into<String>) -> Self {
        MmmError::Validation(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        MmmError::Configuration(msg.into())
    }
}

impl fmt::Display for MmmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MmmError::Validation(msg) => write!(f, "Validation error: {}", msg),
            MmmError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            MmmError::Convergence { primary, fallback } => match fallback {
                Some(fallback) => write!(
                    f,
                    "Convergence error: approximate inference failed ({}) and sampling failed ({})",
                    primary, fallback
                ),
                None => write!(
                    f,
                    "Convergence error: inference failed ({}) and no fallback was configured",
                    primary
                ),
            },
            MmmError::Io(err) => write!(f, "I/O error: {}", err),
            MmmError::Csv(err) => write!(f, "CSV error: {}", err),
            MmmError::Json(err) => write!(f, "JSON error: {}", err),
        }
    }
}

impl std::error::Error for MmmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MmmError::Io(err) => Some(err),
            MmmError::Csv(err) => Some(err),
            MmmError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MmmError {
    fn from(err: std::io::Error) -> Self {
        MmmError::Io(err)
    }
}

impl From<csv::Error> for MmmError {
    fn from(err: csv::Error) -> Self {
        MmmError::Csv(err)
    }
}

impl From<serde_json::Error> for MmmError {
    fn from(err: serde_json::Error) -> Self {
        MmmError::Json(err)
    }
}

/// Negative values found in an input column and clipped to zero
///
/// Not an error: processing continues, the warning is logged and kept on the dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DataQualityWarning {
    pub column: String,
    pub count: usize,
}

impl fmt::Display for DataQualityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} negative value(s) found in {}, clipped to 0",
            self.count, self.column
        )
    }
}
