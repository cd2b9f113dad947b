use argmin::core::{CostFunction, Error, Executor, Gradient};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::neldermead::NelderMead;
use argmin::solver::quasinewton::LBFGS;
use ndarray::{Array1, ArrayView1};

use super::model::RegressionProblem;

/// Posterior mode with the diagonal Laplace scale around it
#[derive(Debug, Clone)]
pub struct Mode {
    pub location: Array1<f64>,
    /// Per-coordinate posterior scale in the unconstrained space
    pub scale: Array1<f64>,
    pub log_density: f64,
}

/// Negative log posterior per observation, so gradients stay of order one
struct NegLogPosterior<'a> {
    problem: &'a RegressionProblem,
}

impl CostFunction for NegLogPosterior<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, z: &Self::Param) -> Result<Self::Output, Error> {
        let (lp, _) = self.problem.log_density(ArrayView1::from(z));
        if !lp.is_finite() {
            return Err(Error::msg("log posterior is not finite"));
        }
        Ok(-lp / self.problem.n_obs() as f64)
    }
}

impl Gradient for NegLogPosterior<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, z: &Self::Param) -> Result<Self::Gradient, Error> {
        let (_, grad) = self.problem.log_density(ArrayView1::from(z));
        let n = self.problem.n_obs() as f64;
        if grad.iter().any(|g| !g.is_finite()) {
            return Err(Error::msg("gradient of the log posterior is not finite"));
        }
        Ok(grad.iter().map(|g| -g / n).collect())
    }
}

const MAX_ITERS: u64 = 1000;
const GRAD_TOLERANCE: f64 = 1e-8;
const SIMPLEX_ITERS: u64 = 5000;
const MIN_SCALE: f64 = 1e-8;
const MAX_SCALE: f64 = 10.0;

/// Find the posterior mode with L-BFGS, starting from `start`
///
/// When the quasi-Newton search breaks down (e.g. its line search fails), the mode is searched
/// again with Nelder-Mead from the same start.
pub fn find_mode(problem: &RegressionProblem, start: &Array1<f64>) -> Result<Mode, String> {
    let location = match quasi_newton(problem, start) {
        Ok(location) => location,
        Err(e) => {
            tracing::debug!("L-BFGS mode search failed ({}), retrying with Nelder-Mead", e);
            simplex(problem, start).map_err(|e2| format!("mode search failed: {}; {}", e, e2))?
        }
    };

    let (log_density, _) = problem.log_density(location.view());
    if !log_density.is_finite() || location.iter().any(|v| !v.is_finite()) {
        return Err("mode search ended at a non-finite point".to_string());
    }

    let scale = problem.curvature(location.view()).mapv(|h| {
        if h.is_finite() && h > 0.0 {
            (1.0 / h.sqrt()).clamp(MIN_SCALE, MAX_SCALE)
        } else {
            1.0
        }
    });

    Ok(Mode {
        location,
        scale,
        log_density,
    })
}

fn quasi_newton(problem: &RegressionProblem, start: &Array1<f64>) -> Result<Array1<f64>, Error> {
    let op = NegLogPosterior { problem };
    let linesearch = MoreThuenteLineSearch::new();
    let solver = LBFGS::new(linesearch, 10).with_tolerance_grad(GRAD_TOLERANCE)?;

    let res = Executor::new(op, solver)
        .configure(|state| state.param(start.to_vec()).max_iters(MAX_ITERS))
        .run()?;
    tracing::debug!(
        "Mode search stopped after {} iterations ({:?})",
        res.state().iter,
        res.state().termination_status
    );
    res.state()
        .best_param
        .as_ref()
        .map(|p| Array1::from(p.clone()))
        .ok_or_else(|| Error::msg("L-BFGS returned no parameters"))
}

fn simplex(problem: &RegressionProblem, start: &Array1<f64>) -> Result<Array1<f64>, Error> {
    let op = NegLogPosterior { problem };
    let solver = NelderMead::new(initial_simplex(start)).with_sd_tolerance(1e-12)?;
    let res = Executor::new(op, solver)
        .configure(|state| state.max_iters(SIMPLEX_ITERS))
        .run()?;
    res.state()
        .best_param
        .as_ref()
        .map(|p| Array1::from(p.clone()))
        .ok_or_else(|| Error::msg("Nelder-Mead returned no parameters"))
}

fn initial_simplex(start: &Array1<f64>) -> Vec<Vec<f64>> {
    let mut vertices = vec![start.to_vec()];
    for i in 0..start.len() {
        let mut vertex = start.to_vec();
        vertex[i] += 0.1 * start[i].abs().max(1.0);
        vertices.push(vertex);
    }
    vertices
}
