//! Per-point displacement probe: is a point trapped in a local minimum,
//! or hemisphering on the wrong side of the map? (§4.11)

use std::collections::HashSet;

use crate::layout::Layout;
use crate::optimize::{Optimizer, Precision};
use crate::stress::Stress;

/// Default grid walk step, in map units.
pub const DEFAULT_GRID_STEP: f64 = 0.1;
/// A move whose resulting stress differs by more than this is "trapped".
pub const TRAPPED_STRESS_THRESHOLD: f64 = 0.25;
/// A same-stress move farther than this is "hemisphering".
pub const HEMISPHERING_DISTANCE_THRESHOLD: f64 = 1.0;

/// Outcome of probing a single point.
#[derive(Debug, Clone, PartialEq)]
pub enum GridTestResult {
    /// No table distances touch this point, or it is unmovable/disconnected.
    Excluded,
    /// The grid walk found no materially better position.
    Normal,
    /// A materially better minimum exists elsewhere.
    Trapped { better_position: Vec<f64>, delta_stress: f64 },
    /// A same-stress alternative exists on the other side of the map.
    Hemisphering { better_position: Vec<f64>, delta_stress: f64 },
}

impl GridTestResult {
    pub fn better_position(&self) -> Option<&[f64]> {
        match self {
            GridTestResult::Trapped { better_position, .. }
            | GridTestResult::Hemisphering { better_position, .. } => Some(better_position),
            _ => None,
        }
    }
}

/// The grid-test outcome for every point of a layout.
#[derive(Debug, Clone, Default)]
pub struct GridTest {
    pub results: Vec<GridTestResult>,
}

impl GridTest {
    /// Move each trapped/hemisphering point to its better location when
    /// that move actually reduced stress.
    pub fn apply(&self, layout: &mut Layout) {
        for (point, result) in self.results.iter().enumerate() {
            let (better, delta) = match result {
                GridTestResult::Trapped { better_position, delta_stress }
                | GridTestResult::Hemisphering { better_position, delta_stress } => {
                    (better_position, *delta_stress)
                }
                _ => continue,
            };
            if delta < 0.0 {
                layout.set_point(point, better);
            }
        }
    }
}

fn walk_grid(
    stress: &Stress,
    layout: &Layout,
    point: usize,
    grid_step: f64,
) -> Option<(Vec<f64>, f64)> {
    let num_dims = layout.num_dims();
    let entries = stress.table_distances().entries_for_point(point);
    if entries.is_empty() {
        return None;
    }

    let mut min_box = vec![f64::INFINITY; num_dims];
    let mut max_box = vec![f64::NEG_INFINITY; num_dims];
    for &(partner, distance, _) in &entries {
        if !layout.point_has_coordinates(partner) {
            continue;
        }
        for d in 0..num_dims {
            let center = layout.coordinate(partner, d);
            min_box[d] = min_box[d].min(center - distance);
            max_box[d] = max_box[d].max(center + distance);
        }
    }
    if min_box.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let base_coords = layout.as_flat().to_vec();
    let current_contribution = stress.contribution(point, &base_coords);

    let steps: Vec<usize> = (0..num_dims)
        .map(|d| (((max_box[d] - min_box[d]) / grid_step).ceil() as usize).max(1))
        .collect();

    let mut best: Option<(Vec<f64>, f64)> = None;
    let mut index = vec![0usize; num_dims];
    loop {
        let candidate: Vec<f64> = (0..num_dims)
            .map(|d| min_box[d] + grid_step * index[d] as f64)
            .collect();
        let mut probe = base_coords.clone();
        probe[point * num_dims..(point + 1) * num_dims].copy_from_slice(&candidate);
        let contribution = stress.contribution(point, &probe);
        if best.as_ref().map_or(true, |(_, c)| contribution < *c) {
            best = Some((candidate, contribution));
        }

        let mut d = 0;
        loop {
            if d == num_dims {
                return best.map(|(pos, contrib)| (pos, contrib - current_contribution));
            }
            index[d] += 1;
            if index[d] <= steps[d] {
                break;
            }
            index[d] = 0;
            d += 1;
        }
    }
}

/// Run the grid test for every point not in `excluded` (unmovable or
/// explicitly disconnected), using `optimizer` to rough-optimize any
/// candidate position that beats the current one.
pub fn run(
    stress: &Stress,
    layout: &Layout,
    excluded: &HashSet<usize>,
    optimizer: &dyn Optimizer,
    grid_step: f64,
) -> GridTest {
    let num_points = layout.num_points();
    let mut results = Vec::with_capacity(num_points);
    for point in 0..num_points {
        if excluded.contains(&point) || !layout.point_has_coordinates(point) {
            results.push(GridTestResult::Excluded);
            continue;
        }
        let current_full_stress = stress.value(layout.as_flat());
        match walk_grid(stress, layout, point, grid_step) {
            None => results.push(GridTestResult::Excluded),
            Some((candidate, contribution_delta)) if contribution_delta < 0.0 => {
                let mut probe_coords = layout.as_flat().to_vec();
                probe_coords[point * layout.num_dims()..(point + 1) * layout.num_dims()]
                    .copy_from_slice(&candidate);
                let _ = optimizer.optimize(stress, &mut probe_coords, Precision::Rough);
                let new_stress = stress.value(&probe_coords);
                let delta_stress = new_stress - current_full_stress;
                let moved = probe_coords[point * layout.num_dims()..(point + 1) * layout.num_dims()]
                    .to_vec();
                let move_distance: f64 = moved
                    .iter()
                    .zip(layout.row(point))
                    .map(|(a, b)| (a - b).powi(2))
                    .sum::<f64>()
                    .sqrt();
                if delta_stress.abs() > TRAPPED_STRESS_THRESHOLD {
                    results.push(GridTestResult::Trapped {
                        better_position: moved,
                        delta_stress,
                    });
                } else if move_distance > HEMISPHERING_DISTANCE_THRESHOLD {
                    results.push(GridTestResult::Hemisphering {
                        better_position: moved,
                        delta_stress,
                    });
                } else {
                    results.push(GridTestResult::Normal);
                }
            }
            Some(_) => results.push(GridTestResult::Normal),
        }
    }
    GridTest { results }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimize::CgPca;
    use crate::table_distances::{DistanceEntry, TableDistances};

    #[test]
    fn point_without_table_distances_is_excluded() {
        let td = TableDistances::default();
        let stress = Stress::new(td, 2, 1, HashSet::new(), HashSet::new());
        let layout = Layout::from_flat(2, 1, vec![0.0, 1.0]);
        let result = run(&stress, &layout, &HashSet::new(), &CgPca, DEFAULT_GRID_STEP);
        assert_eq!(result.results[0], GridTestResult::Excluded);
    }

    #[test]
    fn excluded_points_are_not_probed() {
        let td = TableDistances {
            regular: vec![DistanceEntry {
                point_1: 0,
                point_2: 1,
                distance: 3.0,
            }],
            less_than: vec![],
        };
        let stress = Stress::new(td, 2, 1, HashSet::new(), HashSet::new());
        let layout = Layout::from_flat(2, 1, vec![0.0, 3.0]);
        let mut excluded = HashSet::new();
        excluded.insert(0);
        excluded.insert(1);
        let result = run(&stress, &layout, &excluded, &CgPca, DEFAULT_GRID_STEP);
        assert_eq!(result.results, vec![GridTestResult::Excluded, GridTestResult::Excluded]);
    }

    #[test]
    fn apply_only_moves_points_with_negative_delta() {
        let mut layout = Layout::from_flat(1, 1, vec![0.0]);
        let results = vec![GridTestResult::Trapped {
            better_position: vec![5.0],
            delta_stress: -1.0,
        }];
        GridTest { results }.apply(&mut layout);
        assert_eq!(layout.coordinate(0, 0), 5.0);
    }
}
