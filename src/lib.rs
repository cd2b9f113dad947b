//! mmcore: marketing-mix modeling core.
//!
//! Spend series are turned into saturated media features ([transform]), regressed on sales
//! with a Bayesian model ([inference]), optionally anchored on an experiment ([calibration]),
//! and finally used to reallocate a budget ([optimizer]).

pub mod calibration;
pub mod entrypoints;
pub mod error;
pub mod inference;
pub mod optimizer;
pub mod routines;
pub mod structs;
pub mod transform;

pub mod prelude {
    pub use crate::calibration::{calibrate, check_evidence, read_evidence, ExperimentEvidence, Granularity};
    pub use crate::entrypoints::{fit, optimize_from_summary, RunResult};
    pub use crate::error::{DataQualityWarning, MmmError};
    pub use crate::inference::{
        Advi, CoefficientPrior, Draws, InferenceEngine, InferenceFailure, InferenceSettings, Mala, ModelSpec,
        PosteriorApproximation, RegressionProblem,
    };
    pub use crate::optimizer::{
        optimize_budget, response_curves, BudgetAllocation, BudgetProblem, OptimizerSettings, ResponseCurve,
        SolverStatus, SpendBounds,
    };
    pub use crate::routines::data::{read_dataset, Dataset};
    pub use crate::routines::settings::{read_settings, Settings};
    pub use crate::structs::channel::{ChannelIndex, ChannelSeries};
    pub use crate::structs::features::FeatureMatrix;
    pub use crate::structs::posterior::{InferenceMethod, PosteriorEstimate};
    pub use crate::transform::{
        geometric_adstock, hill_saturation, transform_dataset, AdstockParams, ChannelTransform, SaturationParams,
        TransformParams,
    };
}
