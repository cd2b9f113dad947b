use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;
use serde_derive::{Deserialize, Serialize};

use super::map::find_mode;
use super::model::RegressionProblem;
use super::{Draws, InferenceFailure, PosteriorApproximation};
use crate::structs::posterior::InferenceMethod;

const TARGET_ACCEPTANCE: f64 = 0.574;
const INITIAL_STEP: f64 = 0.5;
const START_JITTER: f64 = 0.5;

/// Metropolis-adjusted Langevin sampler with a diagonal preconditioner
///
/// Chains run in parallel, each seeded from the caller's generator and started from its own
/// jittered point. The step size is adapted during the tuning phase only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Mala {
    pub draws: usize,
    pub tune: usize,
    pub chains: usize,
}

impl Default for Mala {
    fn default() -> Self {
        Mala {
            draws: 500,
            tune: 500,
            chains: 4,
        }
    }
}

struct Chain {
    draws: Array2<f64>,
    acceptance: f64,
}

impl PosteriorApproximation for Mala {
    fn method(&self) -> InferenceMethod {
        InferenceMethod::Mcmc
    }

    fn approximate(&self, problem: &RegressionProblem, rng: &mut StdRng) -> Result<Draws, InferenceFailure> {
        let fail = |reason: String| InferenceFailure::new(InferenceMethod::Mcmc, reason);
        if self.draws == 0 || self.chains == 0 {
            return Err(fail("draws and chains must be positive".to_string()));
        }

        let (start, scale) = match find_mode(problem, &problem.initial_point()) {
            Ok(mode) => (mode.location, mode.scale),
            Err(e) => {
                tracing::debug!("No mode for the sampler to start from ({}), using the default start", e);
                (problem.initial_point(), Array1::ones(problem.dim()))
            }
        };

        let seeds: Vec<u64> = (0..self.chains).map(|_| rng.gen()).collect();
        let chains: Vec<Chain> = seeds
            .par_iter()
            .enumerate()
            .map(|(c, seed)| {
                self.run_chain(problem, &start, &scale, *seed)
                    .map_err(|e| format!("chain {}: {}", c, e))
            })
            .collect::<Result<Vec<_>, String>>()
            .map_err(fail)?;

        for (c, chain) in chains.iter().enumerate() {
            tracing::debug!("Chain {} acceptance rate {:.3}", c, chain.acceptance);
        }
        if let Some((c, _)) = chains.iter().enumerate().find(|(_, ch)| ch.acceptance == 0.0) {
            return Err(fail(format!("chain {} never accepted a proposal", c)));
        }

        let p = problem.dim();
        let mut draws = Array2::<f64>::zeros((self.chains * self.draws, p));
        for (c, chain) in chains.iter().enumerate() {
            draws
                .slice_mut(ndarray::s![c * self.draws..(c + 1) * self.draws, ..])
                .assign(&chain.draws);
        }
        Ok(Draws::new(draws, self.chains))
    }
}

impl Mala {
    fn run_chain(
        &self,
        problem: &RegressionProblem,
        center: &Array1<f64>,
        scale: &Array1<f64>,
        seed: u64,
    ) -> Result<Chain, String> {
        let mut rng = StdRng::seed_from_u64(seed);
        let p = problem.dim();
        let precond = scale.mapv(|s| s * s);

        let jitter: Array1<f64> = (0..p).map(|_| StandardNormal.sample(&mut rng)).collect();
        let mut z = center + &(scale * &jitter * START_JITTER);
        let (mut lp, mut grad) = problem.log_density(z.view());
        if !lp.is_finite() {
            return Err("log density is not finite at the starting point".to_string());
        }

        let mut log_step = INITIAL_STEP.ln();
        let mut draws = Array2::<f64>::zeros((self.draws, p));
        let mut accepted = 0usize;

        for it in 0..(self.tune + self.draws) {
            let h = log_step.exp();
            let noise: Array1<f64> = (0..p).map(|_| StandardNormal.sample(&mut rng)).collect();
            let proposal = langevin_mean(z.view(), grad.view(), &precond, h) + &(scale * &noise * h);
            let (lp_new, grad_new) = problem.log_density(proposal.view());

            let log_accept = if lp_new.is_finite() && grad_new.iter().all(|g| g.is_finite()) {
                let forward_mean = langevin_mean(z.view(), grad.view(), &precond, h);
                let backward_mean = langevin_mean(proposal.view(), grad_new.view(), &precond, h);
                let forward = transition_log_density(&proposal, &forward_mean, &precond, h);
                let backward = transition_log_density(&z, &backward_mean, &precond, h);
                lp_new - lp + backward - forward
            } else {
                f64::NEG_INFINITY
            };
            let accept_prob = log_accept.min(0.0).exp();

            if rng.gen::<f64>() < accept_prob {
                z = proposal;
                lp = lp_new;
                grad = grad_new;
                if it >= self.tune {
                    accepted += 1;
                }
            }

            if it < self.tune {
                let rate = 1.0 / (it as f64 + 1.0).powf(0.6);
                log_step += rate * (accept_prob - TARGET_ACCEPTANCE);
            } else {
                draws.row_mut(it - self.tune).assign(&z);
            }
        }

        Ok(Chain {
            draws,
            acceptance: accepted as f64 / self.draws as f64,
        })
    }
}

fn langevin_mean(z: ArrayView1<f64>, grad: ArrayView1<f64>, precond: &Array1<f64>, h: f64) -> Array1<f64> {
    &z + &(precond * &grad * (0.5 * h * h))
}

fn transition_log_density(to: &Array1<f64>, mean: &Array1<f64>, precond: &Array1<f64>, h: f64) -> f64 {
    let diff = to - mean;
    -0.5 * diff
        .iter()
        .zip(precond.iter())
        .map(|(d, m)| d * d / (h * h * m))
        .sum::<f64>()
}
