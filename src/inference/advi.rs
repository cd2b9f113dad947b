use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use serde_derive::{Deserialize, Serialize};

use super::map::find_mode;
use super::model::RegressionProblem;
use super::{Draws, InferenceFailure, PosteriorApproximation};
use crate::structs::posterior::InferenceMethod;

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;
const LOG_SD_BOUND: f64 = 10.0;

/// Automatic differentiation variational inference with a mean-field Gaussian family
///
/// The family is centered on the posterior mode and whitened by the Laplace scales, then
/// fitted by stochastic gradient ascent on the ELBO with Adam and reparameterization gradients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Advi {
    pub iterations: usize,
    pub draws: usize,
    pub learning_rate: f64,
    pub grad_samples: usize,
}

impl Default for Advi {
    fn default() -> Self {
        Advi {
            iterations: 1000,
            draws: 1000,
            learning_rate: 0.05,
            grad_samples: 1,
        }
    }
}

impl PosteriorApproximation for Advi {
    fn method(&self) -> InferenceMethod {
        InferenceMethod::Advi
    }

    fn approximate(&self, problem: &RegressionProblem, rng: &mut StdRng) -> Result<Draws, InferenceFailure> {
        let fail = |reason: String| InferenceFailure::new(InferenceMethod::Advi, reason);
        if self.iterations == 0 || self.draws == 0 || self.grad_samples == 0 {
            return Err(fail("iterations, draws and gradient samples must be positive".to_string()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(fail(format!("invalid learning rate {}", self.learning_rate)));
        }

        let mode = find_mode(problem, &problem.initial_point()).map_err(fail)?;
        let p = problem.dim();
        let center = &mode.location;
        let scale = &mode.scale;

        let mut mu = Array1::<f64>::zeros(p);
        let mut omega = Array1::<f64>::zeros(p);
        let mut adam_mu = Adam::new(p);
        let mut adam_omega = Adam::new(p);
        let mut elbo_trace = 0.0;

        for it in 0..self.iterations {
            let mut g_mu = Array1::<f64>::zeros(p);
            let mut g_omega = Array1::<f64>::zeros(p);
            let mut elbo = 0.0;
            let sd = omega.mapv(f64::exp);

            for _ in 0..self.grad_samples {
                let eps: Array1<f64> = (0..p).map(|_| StandardNormal.sample(rng)).collect();
                let w = &mu + &(&sd * &eps);
                let z = center + &(scale * &w);
                let (lp, grad_z) = problem.log_density(z.view());
                if !lp.is_finite() || grad_z.iter().any(|g| !g.is_finite()) {
                    return Err(fail(format!("ELBO is not finite at iteration {}", it)));
                }
                let grad_w = scale * &grad_z;
                g_omega = g_omega + &(&grad_w * &eps * &sd) + 1.0;
                g_mu = g_mu + &grad_w;
                elbo += lp + omega.sum();
            }
            let m = self.grad_samples as f64;
            g_mu /= m;
            g_omega /= m;
            elbo /= m;

            let lr = self.learning_rate / (1.0 + it as f64 / 250.0).sqrt();
            adam_mu.ascend(&mut mu, &g_mu, lr);
            adam_omega.ascend(&mut omega, &g_omega, lr);
            omega.mapv_inplace(|v| v.clamp(-LOG_SD_BOUND, LOG_SD_BOUND));

            if mu.iter().chain(omega.iter()).any(|v| !v.is_finite()) {
                return Err(fail(format!("variational parameters diverged at iteration {}", it)));
            }
            elbo_trace = if it == 0 { elbo } else { 0.9 * elbo_trace + 0.1 * elbo };
            if (it + 1) % 100 == 0 {
                tracing::debug!("ADVI iteration {}: smoothed ELBO = {:.4}", it + 1, elbo_trace);
            }
        }
        tracing::info!("ADVI finished {} iterations, smoothed ELBO = {:.4}", self.iterations, elbo_trace);

        let sd = omega.mapv(f64::exp);
        let mut draws = Array2::<f64>::zeros((self.draws, p));
        for mut row in draws.rows_mut() {
            let eps: Array1<f64> = (0..p).map(|_| StandardNormal.sample(rng)).collect();
            let z = center + &(scale * &(&mu + &(&sd * &eps)));
            row.assign(&z);
        }
        Ok(Draws::new(draws, 1))
    }
}

/// Adam state for one block of parameters
struct Adam {
    m: Array1<f64>,
    v: Array1<f64>,
    t: i32,
}

impl Adam {
    fn new(p: usize) -> Self {
        Adam {
            m: Array1::zeros(p),
            v: Array1::zeros(p),
            t: 0,
        }
    }

    fn ascend(&mut self, theta: &mut Array1<f64>, grad: &Array1<f64>, lr: f64) {
        self.t += 1;
        self.m = &self.m * BETA1 + &(grad * (1.0 - BETA1));
        self.v = &self.v * BETA2 + &(grad.mapv(|g| g * g) * (1.0 - BETA2));
        let m_hat = &self.m / (1.0 - BETA1.powi(self.t));
        let v_hat = &self.v / (1.0 - BETA2.powi(self.t));
        *theta += &(m_hat / (v_hat.mapv(f64::sqrt) + ADAM_EPS) * lr);
    }
}
