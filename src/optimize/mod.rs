//! The numerical optimizer driver: gradient-based minimization of the
//! stress objective, with a fixed contract (§4.6) that both supported
//! methods satisfy.

mod cg;
mod lbfgs;

pub use cg::CgPca;
pub use lbfgs::LbfgsPca;

use std::time::{Duration, Instant};

use crate::err::{ErrorKind, Result};
use crate::stress::Stress;

/// Termination precision tier. Each tier fixes the gradient-norm
/// (`eps_g`) and step-norm (`eps_x`) thresholds the kernel stops at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    VeryRough,
    Rough,
    Fine,
}

impl Precision {
    pub fn eps_g(&self) -> f64 {
        match self {
            Precision::VeryRough => 1.0,
            Precision::Rough => 0.5,
            Precision::Fine => 1e-10,
        }
    }

    pub fn eps_x(&self) -> f64 {
        match self {
            Precision::VeryRough => 0.1,
            Precision::Rough => 1e-3,
            Precision::Fine => 0.0,
        }
    }

    /// A hard cap on iterations so that a `Fine` run (whose epsilons are
    /// effectively zero) still terminates.
    pub fn max_iterations(&self) -> usize {
        match self {
            Precision::VeryRough => 100,
            Precision::Rough => 1_000,
            Precision::Fine => 10_000,
        }
    }
}

/// Outcome of one optimizer run.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub initial_stress: f64,
    pub final_stress: f64,
    pub iterations: usize,
    pub stress_evals: usize,
    pub termination_report: String,
    pub elapsed: Duration,
}

/// Contract shared by every optimization method: minimize `stress` in
/// place over `coords`, under `precision`'s termination schedule.
pub trait Optimizer {
    /// Human-readable method name, as recorded in `.ace` projections.
    fn name(&self) -> &'static str;

    fn optimize(
        &self,
        stress: &Stress,
        coords: &mut [f64],
        precision: Precision,
    ) -> Result<OptimizationResult>;
}

/// Shared driver loop: evaluate `value_and_gradient`, hand off to
/// `step` for one iteration's direction and line search, and apply the
/// termination schedule. `step` returns `(new_coords, step_norm)`.
pub(super) fn run_descent(
    stress: &Stress,
    coords: &mut [f64],
    precision: Precision,
    mut step: impl FnMut(&Stress, &[f64], &[f64], f64, usize) -> Result<(Vec<f64>, f64)>,
) -> Result<OptimizationResult> {
    let start = Instant::now();
    let (initial_value, mut grad) = stress.value_and_gradient(coords);
    if !initial_value.is_finite() || grad.iter().any(|g| !g.is_finite()) {
        return Err(ErrorKind::OptimizationError(
            "non-finite stress or gradient at start of optimization".into(),
        ));
    }
    let initial_stress = initial_value;
    let mut value = initial_value;
    let mut stress_evals = 1usize;
    let mut iterations = 0usize;
    let mut termination = "max_iterations".to_string();

    for it in 0..precision.max_iterations() {
        iterations = it;
        let grad_norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
        if grad_norm <= precision.eps_g() {
            termination = "eps_g".to_string();
            break;
        }
        let (new_coords, step_norm) = step(stress, coords, &grad, value, it)?;
        let (new_value, new_grad) = stress.value_and_gradient(&new_coords);
        stress_evals += 1;
        if !new_value.is_finite() || new_grad.iter().any(|g| !g.is_finite()) {
            return Err(ErrorKind::OptimizationError(
                "non-finite stress or gradient during optimization".into(),
            ));
        }
        coords.copy_from_slice(&new_coords);
        value = new_value;
        grad = new_grad;
        if step_norm <= precision.eps_x() {
            termination = "eps_x".to_string();
            break;
        }
    }

    Ok(OptimizationResult {
        initial_stress,
        final_stress: value,
        iterations: iterations + 1,
        stress_evals,
        termination_report: termination,
        elapsed: start.elapsed(),
    })
}

/// Backtracking (Armijo) line search along `direction`, optionally
/// capped to a maximum step length.
pub(super) fn backtracking_line_search(
    stress: &Stress,
    coords: &[f64],
    value: f64,
    grad: &[f64],
    direction: &[f64],
    step_cap: Option<f64>,
) -> (Vec<f64>, f64) {
    const C1: f64 = 1e-4;
    let directional_derivative: f64 = grad.iter().zip(direction).map(|(g, d)| g * d).sum();
    let dir_norm = direction.iter().map(|d| d * d).sum::<f64>().sqrt();
    let mut alpha = match step_cap {
        Some(cap) if dir_norm > 0.0 => (cap / dir_norm).min(1.0),
        _ => 1.0,
    };
    if dir_norm == 0.0 {
        return (coords.to_vec(), 0.0);
    }
    for _ in 0..40 {
        let candidate: Vec<f64> = coords
            .iter()
            .zip(direction)
            .map(|(c, d)| c + alpha * d)
            .collect();
        let candidate_value = stress.value(&candidate);
        if candidate_value.is_finite() && candidate_value <= value + C1 * alpha * directional_derivative
        {
            let step_norm = (alpha * dir_norm).min(dir_norm);
            return (candidate, step_norm);
        }
        alpha *= 0.5;
    }
    (coords.to_vec(), 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table_distances::{DistanceEntry, TableDistances};
    use std::collections::HashSet;

    fn simple_stress() -> Stress {
        let td = TableDistances {
            regular: vec![DistanceEntry {
                point_1: 0,
                point_2: 1,
                distance: 5.0,
            }],
            less_than: vec![],
        };
        Stress::new(td, 2, 1, HashSet::new(), HashSet::new())
    }

    #[test]
    fn lbfgs_reduces_stress() {
        let stress = simple_stress();
        let mut coords = vec![0.0, 1.0];
        let result = LbfgsPca::default()
            .optimize(&stress, &mut coords, Precision::Rough)
            .unwrap();
        assert!(result.final_stress <= result.initial_stress);
        assert!(result.final_stress < 1.0);
    }

    #[test]
    fn cg_reduces_stress() {
        let stress = simple_stress();
        let mut coords = vec![0.0, 1.0];
        let result = CgPca::default()
            .optimize(&stress, &mut coords, Precision::Rough)
            .unwrap();
        assert!(result.final_stress <= result.initial_stress);
        assert!(result.final_stress < 1.0);
    }
}
