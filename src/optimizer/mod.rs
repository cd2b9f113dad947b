//! Budget optimizer: reallocates a fixed total budget across channels.
//!
//! Each channel's modeled revenue at a constant daily spend `x` is
//! `coefficient * hill(x / (1 - alpha))`, using the posterior mean coefficient and the exact
//! transform parameters the features were built with.

mod solver;

use serde_derive::{Deserialize, Serialize};

use crate::error::{MmmError, Result};
use crate::structs::features::FeatureMatrix;
use crate::structs::posterior::PosteriorEstimate;
use crate::transform::ChannelTransform;

/// Steady-state revenue response of one channel
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseCurve {
    pub channel: String,
    pub coefficient: f64,
    pub transform: ChannelTransform,
}

impl ResponseCurve {
    pub fn new(coefficient: f64, transform: ChannelTransform) -> Self {
        ResponseCurve {
            channel: transform.channel.clone(),
            coefficient,
            transform,
        }
    }

    /// Modeled revenue at a constant spend
    pub fn revenue(&self, spend: f64) -> f64 {
        self.coefficient * self.transform.steady_state_response(spend)
    }

    /// Derivative of [ResponseCurve::revenue] with respect to spend
    pub fn marginal(&self, spend: f64) -> f64 {
        self.coefficient * self.transform.steady_state_marginal(spend)
    }
}

/// Pair posterior mean coefficients with the transforms of the feature matrix, by channel
pub fn response_curves(estimate: &PosteriorEstimate, features: &FeatureMatrix) -> Result<Vec<ResponseCurve>> {
    response_curves_from_means(&estimate.coefficient_means(), features)
}

/// Same as [response_curves], for coefficient means read back from a summary table
pub fn response_curves_from_means(means: &[(String, f64)], features: &FeatureMatrix) -> Result<Vec<ResponseCurve>> {
    features
        .channels()
        .iter()
        .map(|channel| {
            let coefficient = means
                .iter()
                .find(|(c, _)| c == channel)
                .map(|(_, m)| *m)
                .ok_or_else(|| {
                    MmmError::configuration(format!("No coefficient estimate for channel {}", channel))
                })?;
            let transform = features.transform(channel).ok_or_else(|| {
                MmmError::configuration(format!(
                    "No transform parameters recorded for channel {}",
                    channel
                ))
            })?;
            Ok(ResponseCurve::new(coefficient, transform.clone()))
        })
        .collect()
}

/// Optimizer configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OptimizerSettings {
    /// Lower spend bound as a multiple of the baseline
    pub lower_ratio: f64,
    /// Upper spend bound as a multiple of the baseline
    pub upper_ratio: f64,
    /// Total budget; the sum of the baseline when absent
    pub total_budget: Option<f64>,
    pub max_iterations: u64,
    pub tolerance: f64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        OptimizerSettings {
            lower_ratio: 0.5,
            upper_ratio: 1.5,
            total_budget: None,
            max_iterations: 100,
            tolerance: 1e-6,
        }
    }
}

impl OptimizerSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.lower_ratio >= 0.0 && self.upper_ratio >= self.lower_ratio && self.upper_ratio.is_finite()) {
            return Err(MmmError::configuration(format!(
                "Spend bounds need 0 <= lower_ratio <= upper_ratio, got {} and {}",
                self.lower_ratio, self.upper_ratio
            )));
        }
        if !(self.tolerance > 0.0 && self.tolerance.is_finite()) {
            return Err(MmmError::configuration("Optimizer tolerance must be positive"));
        }
        if self.max_iterations == 0 {
            return Err(MmmError::configuration("Optimizer needs at least one iteration"));
        }
        if let Some(budget) = self.total_budget {
            if !(budget.is_finite() && budget > 0.0) {
                return Err(MmmError::configuration(format!(
                    "Total budget must be positive, got {}",
                    budget
                )));
            }
        }
        Ok(())
    }
}

/// Spend bounds of one channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpendBounds {
    pub lower: f64,
    pub upper: f64,
}

/// A budget reallocation instance
#[derive(Debug, Clone)]
pub struct BudgetProblem {
    curves: Vec<ResponseCurve>,
    baseline: Vec<f64>,
    total_budget: f64,
    bounds: Vec<SpendBounds>,
}

impl BudgetProblem {
    /// Build a problem with bounds `[lower_ratio, upper_ratio] * baseline`
    ///
    /// `baseline` is keyed by channel and must cover every curve.
    pub fn new(curves: Vec<ResponseCurve>, baseline: &[(String, f64)], settings: &OptimizerSettings) -> Result<Self> {
        settings.validate()?;
        let baseline = curves
            .iter()
            .map(|curve| {
                baseline
                    .iter()
                    .find(|(c, _)| *c == curve.channel)
                    .map(|(_, s)| *s)
                    .ok_or_else(|| {
                        MmmError::configuration(format!("No baseline spend for channel {}", curve.channel))
                    })
            })
            .collect::<Result<Vec<f64>>>()?;
        let bounds = baseline
            .iter()
            .map(|b| SpendBounds {
                lower: b * settings.lower_ratio,
                upper: b * settings.upper_ratio,
            })
            .collect();
        let total_budget = settings.total_budget.unwrap_or_else(|| baseline.iter().sum());
        BudgetProblem::with_bounds(curves, baseline, total_budget, bounds)
    }

    /// Build a problem with explicit bounds, in the order of `curves`
    pub fn with_bounds(
        curves: Vec<ResponseCurve>,
        baseline: Vec<f64>,
        total_budget: f64,
        bounds: Vec<SpendBounds>,
    ) -> Result<Self> {
        if curves.is_empty() {
            return Err(MmmError::configuration("Nothing to optimize: no channels"));
        }
        if baseline.len() != curves.len() || bounds.len() != curves.len() {
            return Err(MmmError::configuration(format!(
                "{} channels but {} baseline values and {} bounds",
                curves.len(),
                baseline.len(),
                bounds.len()
            )));
        }
        if let Some((curve, b)) = curves
            .iter()
            .zip(&bounds)
            .find(|(_, b)| !(b.lower >= 0.0 && b.upper >= b.lower && b.upper.is_finite()))
        {
            return Err(MmmError::configuration(format!(
                "Invalid spend bounds for {}: [{}, {}]",
                curve.channel, b.lower, b.upper
            )));
        }
        if let Some((curve, s)) = curves.iter().zip(&baseline).find(|(_, s)| !(s.is_finite() && **s >= 0.0)) {
            return Err(MmmError::configuration(format!(
                "Baseline spend of {} must be non-negative, got {}",
                curve.channel, s
            )));
        }
        if !(total_budget.is_finite() && total_budget > 0.0) {
            return Err(MmmError::configuration(format!(
                "Total budget must be positive, got {}",
                total_budget
            )));
        }
        let lower: f64 = bounds.iter().map(|b| b.lower).sum();
        let upper: f64 = bounds.iter().map(|b| b.upper).sum();
        if lower > total_budget || upper < total_budget {
            return Err(MmmError::configuration(format!(
                "Budget {} cannot be met within the spend bounds (total between {} and {})",
                total_budget, lower, upper
            )));
        }
        Ok(BudgetProblem {
            curves,
            baseline,
            total_budget,
            bounds,
        })
    }

    pub fn curves(&self) -> &[ResponseCurve] {
        &self.curves
    }

    pub fn baseline(&self) -> &[f64] {
        &self.baseline
    }

    pub fn total_budget(&self) -> f64 {
        self.total_budget
    }

    pub fn bounds(&self) -> &[SpendBounds] {
        &self.bounds
    }

    /// Modeled revenue of an allocation given in channel order
    pub fn revenue(&self, spend: &[f64]) -> f64 {
        solver::total_revenue(&self.curves, spend)
    }
}

/// How the solver finished
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverStatus {
    pub converged: bool,
    pub message: String,
    pub iterations: u64,
}

impl std::fmt::Display for SolverStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} iterations)",
            self.message, self.iterations
        )
    }
}

/// Old and new spend of one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelAllocation {
    pub channel: String,
    pub old_spend: f64,
    pub new_spend: f64,
    /// Relative change in percent, absent when the old spend is zero
    pub delta_percent: Option<f64>,
}

/// Proposed reallocation with its projected effect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetAllocation {
    pub channels: Vec<ChannelAllocation>,
    pub total_budget: f64,
    pub baseline_revenue: f64,
    pub optimized_revenue: f64,
    pub projected_revenue_lift: f64,
    pub status: SolverStatus,
}

impl BudgetAllocation {
    pub fn new_spend(&self, channel: &str) -> Option<f64> {
        self.channels
            .iter()
            .find(|c| c.channel == channel)
            .map(|c| c.new_spend)
    }
}

/// Find the revenue-maximizing allocation of the problem's budget
///
/// The returned allocation always sums to the budget and respects every bound. It never has
/// lower modeled revenue than the baseline projected onto the constraints.
pub fn optimize_budget(problem: &BudgetProblem, settings: &OptimizerSettings) -> Result<BudgetAllocation> {
    settings.validate()?;
    let span = tracing::info_span!("optimizer");
    let _enter = span.enter();

    let lower: Vec<f64> = problem.bounds.iter().map(|b| b.lower).collect();
    let upper: Vec<f64> = problem.bounds.iter().map(|b| b.upper).collect();
    let budget = problem.total_budget;

    let start = solver::project(&problem.baseline, &lower, &upper, budget);
    let start_revenue = problem.revenue(&start);
    tracing::info!(
        "Optimizing a budget of {:.2} over {} channels, initial revenue {:.4}",
        budget,
        problem.curves.len(),
        start_revenue
    );

    let outcome = solver::solve(
        &problem.curves,
        &start,
        &lower,
        &upper,
        budget,
        settings.max_iterations,
        settings.tolerance,
    );
    let mut spend = solver::project(&outcome.spend, &lower, &upper, budget);
    let mut message = outcome.message;
    if problem.revenue(&spend) < start_revenue {
        tracing::warn!("Optimized allocation is worse than the starting point, keeping the starting point");
        spend = start;
        message = format!("{}; starting point kept", message);
    }

    let status = SolverStatus {
        converged: outcome.converged,
        message,
        iterations: outcome.iterations,
    };
    if status.converged {
        tracing::info!("Budget optimizer: {}", status);
    } else {
        tracing::warn!("Budget optimizer did not converge: {}", status);
    }

    let baseline_revenue = problem.revenue(&problem.baseline);
    let optimized_revenue = problem.revenue(&spend);
    let channels = problem
        .curves
        .iter()
        .zip(problem.baseline.iter().zip(&spend))
        .map(|(curve, (&old, &new))| ChannelAllocation {
            channel: curve.channel.clone(),
            old_spend: old,
            new_spend: new,
            delta_percent: if old > 0.0 {
                Some((new - old) / old * 100.0)
            } else {
                None
            },
        })
        .collect();

    Ok(BudgetAllocation {
        channels,
        total_budget: budget,
        baseline_revenue,
        optimized_revenue,
        projected_revenue_lift: optimized_revenue - baseline_revenue,
        status,
    })
}
