//! Nonlinear conjugate gradient, Polak-Ribiere variant, no step cap
//! (`alglib_cg_pca`).

use crate::err::Result;
use crate::stress::Stress;

use super::{backtracking_line_search, run_descent, OptimizationResult, Optimizer, Precision};

#[derive(Debug, Clone, Copy, Default)]
pub struct CgPca;

impl Optimizer for CgPca {
    fn name(&self) -> &'static str {
        "alglib_cg_pca"
    }

    fn optimize(
        &self,
        stress: &Stress,
        coords: &mut [f64],
        precision: Precision,
    ) -> Result<OptimizationResult> {
        let mut prev_grad: Option<Vec<f64>> = None;
        let mut prev_direction: Option<Vec<f64>> = None;

        run_descent(stress, coords, precision, move |stress, coords, grad, value, _it| {
            let direction: Vec<f64> = match (&prev_grad, &prev_direction) {
                (Some(pg), Some(pd)) => {
                    // Polak-Ribiere beta, clamped to >= 0 (restart on negative).
                    let numerator: f64 = grad
                        .iter()
                        .zip(pg.iter())
                        .map(|(g, pgv)| g * (g - pgv))
                        .sum();
                    let denom: f64 = pg.iter().map(|v| v * v).sum::<f64>().max(1e-12);
                    let beta = (numerator / denom).max(0.0);
                    grad.iter()
                        .zip(pd.iter())
                        .map(|(g, d)| -g + beta * d)
                        .collect()
                }
                _ => grad.iter().map(|g| -g).collect(),
            };

            let (new_coords, step_norm) =
                backtracking_line_search(stress, coords, value, grad, &direction, None);

            prev_grad = Some(grad.to_vec());
            prev_direction = Some(direction);

            Ok((new_coords, step_norm))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table_distances::{DistanceEntry, TableDistances};
    use std::collections::HashSet;

    #[test]
    fn converges_close_to_target_distance() {
        let td = TableDistances {
            regular: vec![DistanceEntry {
                point_1: 0,
                point_2: 1,
                distance: 3.0,
            }],
            less_than: vec![],
        };
        let stress = Stress::new(td, 2, 1, HashSet::new(), HashSet::new());
        let mut coords = vec![0.0, 0.2];
        let result = CgPca::default()
            .optimize(&stress, &mut coords, Precision::Fine)
            .unwrap();
        assert!(result.final_stress < 1e-6);
    }
}
