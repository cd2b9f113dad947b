use std::cell::RefCell;
use std::rc::Rc;

use argmin::core::{CostFunction, Error, Executor, Gradient};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;

use super::ResponseCurve;

const INNER_ITERS: u64 = 200;
const INNER_GRAD_TOLERANCE: f64 = 1e-10;
const FRACTION_FLOOR: f64 = 1e-9;
const PROJECTION_STEPS: usize = 200;

/// Outcome of the constrained search, before reporting
#[derive(Debug, Clone)]
pub(crate) struct SolverOutcome {
    pub spend: Vec<f64>,
    pub converged: bool,
    pub iterations: u64,
    pub message: String,
}

/// Augmented Lagrangian of the budget problem for fixed multiplier and penalty
///
/// Free spends are `x = lo + (hi - lo) * sigmoid(z)`, spend and revenue are scaled by the
/// budget and the revenue at the starting point respectively. The best point evaluated so far
/// is kept so an interrupted inner solve still makes progress.
#[derive(Clone)]
struct Lagrangian<'a> {
    curves: &'a [ResponseCurve],
    free: &'a [usize],
    lower: &'a [f64],
    upper: &'a [f64],
    fixed_total: f64,
    budget: f64,
    revenue_scale: f64,
    multiplier: f64,
    penalty: f64,
    best: Rc<RefCell<Option<(f64, Vec<f64>)>>>,
}

impl Lagrangian<'_> {
    fn spend(&self, z: &[f64]) -> Vec<f64> {
        self.free
            .iter()
            .zip(z)
            .map(|(&j, &zj)| self.lower[j] + (self.upper[j] - self.lower[j]) * sigmoid(zj))
            .collect()
    }

    fn violation(&self, x: &[f64]) -> f64 {
        (self.fixed_total + x.iter().sum::<f64>() - self.budget) / self.budget
    }
}

impl CostFunction for Lagrangian<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, z: &Self::Param) -> Result<Self::Output, Error> {
        let x = self.spend(z);
        let revenue: f64 = self
            .free
            .iter()
            .zip(&x)
            .map(|(&j, &xj)| self.curves[j].revenue(xj))
            .sum();
        let c = self.violation(&x);
        let value = -revenue / self.revenue_scale - self.multiplier * c + 0.5 * self.penalty * c * c;
        if !value.is_finite() {
            return Err(Error::msg("budget objective is not finite"));
        }
        let mut best = self.best.borrow_mut();
        if best.as_ref().map_or(true, |(v, _)| value < *v) {
            *best = Some((value, z.clone()));
        }
        Ok(value)
    }
}

impl Gradient for Lagrangian<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, z: &Self::Param) -> Result<Self::Gradient, Error> {
        let x = self.spend(z);
        let c = self.violation(&x);
        let dc = (-self.multiplier + self.penalty * c) / self.budget;
        Ok(self
            .free
            .iter()
            .zip(z)
            .zip(&x)
            .map(|((&j, &zj), &xj)| {
                let s = sigmoid(zj);
                let dx_dz = (self.upper[j] - self.lower[j]) * s * (1.0 - s);
                (-self.curves[j].marginal(xj) / self.revenue_scale + dc) * dx_dz
            })
            .collect())
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn logit(p: f64) -> f64 {
    let p = p.clamp(FRACTION_FLOOR, 1.0 - FRACTION_FLOOR);
    (p / (1.0 - p)).ln()
}

/// Total modeled revenue of an allocation
pub(crate) fn total_revenue(curves: &[ResponseCurve], spend: &[f64]) -> f64 {
    curves.iter().zip(spend).map(|(c, &x)| c.revenue(x)).sum()
}

/// Euclidean projection onto `{sum(x) = budget, lower <= x <= upper}`
///
/// Finds the shift `tau` with `sum(clamp(x - tau, lower, upper)) = budget` by bisection.
/// The set must be non-empty.
pub(crate) fn project(x: &[f64], lower: &[f64], upper: &[f64], budget: f64) -> Vec<f64> {
    let shifted = |tau: f64| -> Vec<f64> {
        x.iter()
            .zip(lower.iter().zip(upper))
            .map(|(&xi, (&lo, &hi))| (xi - tau).clamp(lo, hi))
            .collect()
    };
    // every coordinate at its upper bound at tau_low, at its lower bound at tau_high
    let mut tau_low = x
        .iter()
        .zip(upper)
        .map(|(xi, hi)| xi - hi)
        .fold(f64::INFINITY, f64::min);
    let mut tau_high = x
        .iter()
        .zip(lower)
        .map(|(xi, lo)| xi - lo)
        .fold(f64::NEG_INFINITY, f64::max);
    for _ in 0..PROJECTION_STEPS {
        let mid = 0.5 * (tau_low + tau_high);
        let total: f64 = shifted(mid).iter().sum();
        if total > budget {
            tau_low = mid;
        } else {
            tau_high = mid;
        }
        if tau_high - tau_low <= f64::EPSILON * tau_high.abs().max(1.0) {
            break;
        }
    }
    shifted(0.5 * (tau_low + tau_high))
}

/// Maximize total revenue under the budget equality and the spend bounds
pub(crate) fn solve(
    curves: &[ResponseCurve],
    start: &[f64],
    lower: &[f64],
    upper: &[f64],
    budget: f64,
    max_outer: u64,
    tolerance: f64,
) -> SolverOutcome {
    let free: Vec<usize> = (0..curves.len()).filter(|&j| upper[j] > lower[j]).collect();
    let fixed_total: f64 = (0..curves.len())
        .filter(|j| !free.contains(j))
        .map(|j| lower[j])
        .sum();

    let mut spend = start.to_vec();
    if free.is_empty() {
        return SolverOutcome {
            spend,
            converged: true,
            iterations: 0,
            message: "all channels are fixed by their bounds".to_string(),
        };
    }

    let mut z: Vec<f64> = free
        .iter()
        .map(|&j| logit((start[j] - lower[j]) / (upper[j] - lower[j])))
        .collect();
    let revenue_scale = total_revenue(curves, start).abs().max(f64::MIN_POSITIVE.sqrt());

    let mut multiplier = 0.0;
    let mut penalty = 10.0;
    let mut previous_violation = f64::INFINITY;
    let mut message = format!("reached {} outer iterations", max_outer);
    let mut converged = false;
    let mut iterations = 0;

    for outer in 0..max_outer {
        iterations = outer + 1;
        let op = Lagrangian {
            curves,
            free: &free,
            lower,
            upper,
            fixed_total,
            budget,
            revenue_scale,
            multiplier,
            penalty,
            best: Rc::new(RefCell::new(None)),
        };
        let before = op.spend(&z);
        match inner(op.clone(), z.clone()) {
            Ok(next) => z = next,
            Err(e) => {
                tracing::debug!("Inner solve {} made no progress: {}", outer, e);
            }
        }

        let x = op.spend(&z);
        let violation = op.violation(&x);
        let step = x
            .iter()
            .zip(&before)
            .map(|(a, b)| (a - b).abs() / budget)
            .fold(0.0, f64::max);
        tracing::debug!(
            "Outer iteration {}: violation {:.3e}, step {:.3e}, penalty {:.1e}",
            outer,
            violation,
            step,
            penalty
        );

        if violation.abs() < tolerance && step < tolerance {
            converged = true;
            message = format!("converged after {} outer iterations", iterations);
            break;
        }
        multiplier -= penalty * violation;
        if violation.abs() > 0.25 * previous_violation {
            penalty = (penalty * 10.0).min(1e12);
        }
        previous_violation = violation.abs();
    }

    for (&j, &zj) in free.iter().zip(&z) {
        spend[j] = lower[j] + (upper[j] - lower[j]) * sigmoid(zj);
    }
    for j in 0..curves.len() {
        if upper[j] <= lower[j] {
            spend[j] = lower[j];
        }
    }

    SolverOutcome {
        spend,
        converged,
        iterations,
        message,
    }
}

fn inner(op: Lagrangian<'_>, z0: Vec<f64>) -> Result<Vec<f64>, Error> {
    let best = Rc::clone(&op.best);
    let linesearch = MoreThuenteLineSearch::new();
    let solver = LBFGS::new(linesearch, 10).with_tolerance_grad(INNER_GRAD_TOLERANCE)?;
    match Executor::new(op, solver)
        .configure(|state| state.param(z0).max_iters(INNER_ITERS))
        .run()
    {
        Ok(res) => res
            .state()
            .best_param
            .clone()
            .ok_or_else(|| Error::msg("inner solve returned no parameters")),
        Err(e) => {
            let best = best.borrow();
            match best.as_ref() {
                Some((_, z)) => {
                    tracing::debug!("Inner solve interrupted ({}), keeping its best point", e);
                    Ok(z.clone())
                }
                None => Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_hits_budget_and_bounds() {
        let x = project(&[10.0, 90.0, 40.0], &[20.0, 20.0, 20.0], &[60.0, 60.0, 60.0], 120.0);
        assert!((x.iter().sum::<f64>() - 120.0).abs() < 1e-9);
        assert!(x.iter().all(|v| *v >= 20.0 && *v <= 60.0));
        assert!((x[1] - 60.0).abs() < 1e-9);
    }

    #[test]
    fn feasible_point_is_kept() {
        let x = project(&[30.0, 70.0], &[25.0, 25.0], &[75.0, 75.0], 100.0);
        assert!((x[0] - 30.0).abs() < 1e-9 && (x[1] - 70.0).abs() < 1e-9);
    }

    #[test]
    fn logit_inverts_sigmoid() {
        for p in [0.1, 0.5, 0.9] {
            assert!((sigmoid(logit(p)) - p).abs() < 1e-12);
        }
    }
}
