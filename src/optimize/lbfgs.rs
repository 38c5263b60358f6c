//! Limited-memory BFGS with a capped step length (`alglib_lbfgs_pca`).

use crate::err::Result;
use crate::stress::Stress;

use super::{backtracking_line_search, run_descent, OptimizationResult, Optimizer, Precision};

/// L-BFGS with `memory` (s, y) pairs retained and a hard cap on the step
/// length per iteration, matching the source optimizer's step cap of
/// `0.1` map units.
#[derive(Debug, Clone, Copy)]
pub struct LbfgsPca {
    pub memory: usize,
    pub step_cap: f64,
}

impl Default for LbfgsPca {
    fn default() -> Self {
        LbfgsPca {
            memory: 1,
            step_cap: 0.1,
        }
    }
}

impl Optimizer for LbfgsPca {
    fn name(&self) -> &'static str {
        "alglib_lbfgs_pca"
    }

    fn optimize(
        &self,
        stress: &Stress,
        coords: &mut [f64],
        precision: Precision,
    ) -> Result<OptimizationResult> {
        let memory = self.memory.max(1);
        let step_cap = self.step_cap;
        let mut history: Vec<(Vec<f64>, Vec<f64>)> = Vec::with_capacity(memory);
        let mut prev: Option<(Vec<f64>, Vec<f64>)> = None;

        run_descent(stress, coords, precision, move |stress, coords, grad, value, _it| {
            // Two-loop recursion over the retained (s, y) pairs.
            let n = grad.len();
            let mut q = grad.clone();
            let mut alphas = vec![0.0; history.len()];
            let mut rhos = vec![0.0; history.len()];
            for (idx, (s, y)) in history.iter().enumerate().rev() {
                let rho = 1.0 / dot(y, s).max(1e-12);
                rhos[idx] = rho;
                let alpha = rho * dot(s, &q);
                alphas[idx] = alpha;
                for i in 0..n {
                    q[i] -= alpha * y[i];
                }
            }
            let gamma = history
                .last()
                .map(|(s, y)| dot(s, y) / dot(y, y).max(1e-12))
                .unwrap_or(1.0);
            let mut z: Vec<f64> = q.iter().map(|v| v * gamma).collect();
            for (idx, (s, y)) in history.iter().enumerate() {
                let beta = rhos[idx] * dot(y, &z);
                for i in 0..n {
                    z[i] += s[i] * (alphas[idx] - beta);
                }
            }
            let direction: Vec<f64> = z.iter().map(|v| -v).collect();

            let (new_coords, step_norm) =
                backtracking_line_search(stress, coords, value, grad, &direction, Some(step_cap));

            let s: Vec<f64> = new_coords.iter().zip(coords).map(|(a, b)| a - b).collect();
            let new_grad = stress.gradient(&new_coords);
            let y: Vec<f64> = new_grad.iter().zip(grad).map(|(a, b)| a - b).collect();
            if dot(&y, &s) > 1e-10 {
                if let Some(p) = prev.replace((s, y)) {
                    history.push(p);
                    if history.len() > memory {
                        history.remove(0);
                    }
                }
            }

            Ok((new_coords, step_norm))
        })
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
