//! The stress objective and its gradient.

use std::collections::HashSet;

use crate::table_distances::{DistanceEntry, TableDistances};

/// `1 / (1 + e^-x)`.
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Multiplier inside the less-than penalty's sigmoid soft-gate.
pub const SIGMOID_MULTIPLIER: f64 = 10.0;

/// Map distances of exactly zero are clamped to this value before
/// dividing by them, matching the source library's numerical guard.
const MIN_DISTANCE: f64 = 1e-5;

/// The stress objective over a chart's table distances, together with
/// the point masks that modulate its gradient.
#[derive(Debug, Clone)]
pub struct Stress {
    table_distances: TableDistances,
    num_points: usize,
    num_dims: usize,
    /// Points whose gradient is forced to zero in every dimension.
    pub unmovable: HashSet<usize>,
    /// Points whose gradient is forced to zero only in the last dimension.
    pub unmovable_in_last_dimension: HashSet<usize>,
}

impl Stress {
    pub fn new(
        table_distances: TableDistances,
        num_points: usize,
        num_dims: usize,
        unmovable: HashSet<usize>,
        unmovable_in_last_dimension: HashSet<usize>,
    ) -> Stress {
        Stress {
            table_distances,
            num_points,
            num_dims,
            unmovable,
            unmovable_in_last_dimension,
        }
    }

    pub fn num_dims(&self) -> usize {
        self.num_dims
    }

    pub fn num_points(&self) -> usize {
        self.num_points
    }

    pub fn table_distances(&self) -> &TableDistances {
        &self.table_distances
    }

    pub fn table_distances_mut(&mut self) -> &mut TableDistances {
        &mut self.table_distances
    }

    fn row(&self, coords: &[f64], point: usize) -> &[f64] {
        &coords[point * self.num_dims..(point + 1) * self.num_dims]
    }

    fn map_distance(&self, coords: &[f64], p1: usize, p2: usize) -> f64 {
        self.row(coords, p1)
            .iter()
            .zip(self.row(coords, p2))
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    /// Objective value at `coords` (a flattened `num_points * num_dims`
    /// coordinate vector).
    pub fn value(&self, coords: &[f64]) -> f64 {
        let mut total = 0.0;
        for e in &self.table_distances.regular {
            let d = self.map_distance(coords, e.point_1, e.point_2);
            total += (e.distance - d).powi(2);
        }
        for e in &self.table_distances.less_than {
            let d = self.map_distance(coords, e.point_1, e.point_2);
            let u = e.distance - d + 1.0;
            total += u.powi(2) * sigmoid(SIGMOID_MULTIPLIER * u);
        }
        total
    }

    /// Sum of just the terms that involve `point` (used by the grid test).
    pub fn contribution(&self, point: usize, coords: &[f64]) -> f64 {
        let mut total = 0.0;
        for e in &self.table_distances.regular {
            if e.point_1 == point || e.point_2 == point {
                let d = self.map_distance(coords, e.point_1, e.point_2);
                total += (e.distance - d).powi(2);
            }
        }
        for e in &self.table_distances.less_than {
            if e.point_1 == point || e.point_2 == point {
                let d = self.map_distance(coords, e.point_1, e.point_2);
                let u = e.distance - d + 1.0;
                total += u.powi(2) * sigmoid(SIGMOID_MULTIPLIER * u);
            }
        }
        total
    }

    fn accumulate_gradient(&self, coords: &[f64], grad: &mut [f64], e: &DistanceEntry, weight_fn: impl Fn(f64, f64) -> f64) {
        let d = self.map_distance(coords, e.point_1, e.point_2).max(MIN_DISTANCE);
        let weight = weight_fn(e.distance, d);
        for dim in 0..self.num_dims {
            let pi = coords[e.point_1 * self.num_dims + dim];
            let pj = coords[e.point_2 * self.num_dims + dim];
            let delta = weight / d * (pj - pi);
            if !(self.unmovable.contains(&e.point_1)
                || (dim == self.num_dims - 1 && self.unmovable_in_last_dimension.contains(&e.point_1)))
            {
                grad[e.point_1 * self.num_dims + dim] += delta;
            }
            if !(self.unmovable.contains(&e.point_2)
                || (dim == self.num_dims - 1 && self.unmovable_in_last_dimension.contains(&e.point_2)))
            {
                grad[e.point_2 * self.num_dims + dim] -= delta;
            }
        }
    }

    /// Analytic gradient at `coords`.
    pub fn gradient(&self, coords: &[f64]) -> Vec<f64> {
        let mut grad = vec![0.0; coords.len()];
        for e in &self.table_distances.regular {
            self.accumulate_gradient(coords, &mut grad, e, |target, d| 2.0 * (target - d));
        }
        for e in &self.table_distances.less_than {
            self.accumulate_gradient(coords, &mut grad, e, |target, d| {
                let u = target - d + 1.0;
                let s = sigmoid(SIGMOID_MULTIPLIER * u);
                2.0 * u * s + SIGMOID_MULTIPLIER * u * u * s * (1.0 - s)
            });
        }
        grad
    }

    /// Value and gradient computed together (avoids walking the entry
    /// lists twice in the optimizer's hot loop).
    pub fn value_and_gradient(&self, coords: &[f64]) -> (f64, Vec<f64>) {
        (self.value(coords), self.gradient(coords))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table_distances::DistanceEntry;
    use float_cmp::approx_eq;

    fn one_regular_pair(target: f64) -> Stress {
        let td = TableDistances {
            regular: vec![DistanceEntry {
                point_1: 0,
                point_2: 1,
                distance: target,
            }],
            less_than: vec![],
        };
        Stress::new(td, 2, 1, HashSet::new(), HashSet::new())
    }

    #[test]
    fn zero_stress_when_map_distance_matches_target() {
        let stress = one_regular_pair(2.0);
        let coords = vec![0.0, 2.0];
        assert_eq!(stress.value(&coords), 0.0);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let td = TableDistances {
            regular: vec![DistanceEntry {
                point_1: 0,
                point_2: 1,
                distance: 2.5,
            }],
            less_than: vec![DistanceEntry {
                point_1: 1,
                point_2: 2,
                distance: 1.0,
            }],
        };
        let stress = Stress::new(td, 3, 2, HashSet::new(), HashSet::new());
        let coords = vec![0.0, 0.0, 1.3, -0.7, 2.1, 0.4];
        let analytic = stress.gradient(&coords);
        let h = 1e-6;
        for i in 0..coords.len() {
            let mut plus = coords.clone();
            plus[i] += h;
            let mut minus = coords.clone();
            minus[i] -= h;
            let numeric = (stress.value(&plus) - stress.value(&minus)) / (2.0 * h);
            assert!(
                approx_eq!(f64, numeric, analytic[i], epsilon = 1e-4),
                "dim {i}: numeric {numeric} vs analytic {}",
                analytic[i]
            );
        }
    }

    #[test]
    fn unmovable_point_has_zero_gradient() {
        let mut unmovable = HashSet::new();
        unmovable.insert(0);
        let td = TableDistances {
            regular: vec![DistanceEntry {
                point_1: 0,
                point_2: 1,
                distance: 5.0,
            }],
            less_than: vec![],
        };
        let stress = Stress::new(td, 2, 1, unmovable, HashSet::new());
        let grad = stress.gradient(&[0.0, 1.0]);
        assert_eq!(grad[0], 0.0);
        assert_ne!(grad[1], 0.0);
    }

    #[test]
    fn unmovable_in_last_dimension_zeros_only_that_axis() {
        let mut last_dim = HashSet::new();
        last_dim.insert(0);
        let td = TableDistances {
            regular: vec![DistanceEntry {
                point_1: 0,
                point_2: 1,
                distance: 5.0,
            }],
            less_than: vec![],
        };
        let stress = Stress::new(td, 2, 2, HashSet::new(), last_dim);
        let grad = stress.gradient(&[0.0, 0.0, 1.0, 1.0]);
        assert_eq!(grad[1], 0.0); // last dim of point 0
        assert_ne!(grad[0], 0.0); // first dim still free
    }

    #[test]
    fn less_than_penalty_vanishes_once_far_enough_apart() {
        let td = TableDistances {
            regular: vec![],
            less_than: vec![DistanceEntry {
                point_1: 0,
                point_2: 1,
                distance: 2.0,
            }],
        };
        let stress = Stress::new(td, 2, 1, HashSet::new(), HashSet::new());
        // map distance far beyond target+1 -> sigmoid gate closes, stress -> 0
        let far = stress.value(&[0.0, 20.0]);
        assert!(far < 1e-6);
    }
}
