//! PCA-based dimension annealing: project a higher-dimensional layout
//! down to the target number of dimensions via truncated SVD.

use std::collections::HashSet;

use nalgebra::DMatrix;

use crate::err::{ErrorKind, Result};
use crate::layout::Layout;

/// Project `layout` (currently `source_dims`-dimensional) down to
/// `target_dims` dimensions using PCA (mean-centered truncated SVD).
///
/// Disconnected points are temporarily treated as zero so the SVD
/// converges, and are restored to `NaN` in the returned layout.
pub fn project(layout: &Layout, target_dims: usize, disconnected: &HashSet<usize>) -> Result<Layout> {
    let n = layout.num_points();
    let source_dims = layout.num_dims();
    if target_dims > source_dims {
        return Err(ErrorKind::InvalidData(format!(
            "dimension annealing target {target_dims} exceeds source {source_dims}"
        )));
    }

    let mut data = vec![0.0; n * source_dims];
    for p in 0..n {
        if disconnected.contains(&p) {
            continue;
        }
        for d in 0..source_dims {
            data[p * source_dims + d] = layout.coordinate(p, d);
        }
    }

    let connected_count = n - disconnected.len();
    if connected_count == 0 {
        return Ok(Layout::new_disconnected(n, target_dims));
    }

    let mut means = vec![0.0; source_dims];
    for p in 0..n {
        if disconnected.contains(&p) {
            continue;
        }
        for d in 0..source_dims {
            means[d] += data[p * source_dims + d];
        }
    }
    for m in &mut means {
        *m /= connected_count as f64;
    }
    for p in 0..n {
        if disconnected.contains(&p) {
            continue;
        }
        for d in 0..source_dims {
            data[p * source_dims + d] -= means[d];
        }
    }

    let matrix = DMatrix::from_row_slice(n, source_dims, &data);
    let svd = matrix.svd(true, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| ErrorKind::OptimizationError("SVD failed to produce V^T".into()))?;

    // rows of v_t are the principal directions; take the first target_dims.
    let mut projected = vec![0.0; n * target_dims];
    for p in 0..n {
        for out_d in 0..target_dims {
            let mut acc = 0.0;
            for d in 0..source_dims {
                acc += matrix[(p, d)] * v_t[(out_d, d)];
            }
            projected[p * target_dims + out_d] = acc;
        }
    }

    let mut result = Layout::from_flat(n, target_dims, projected);
    for &p in disconnected {
        result.disconnect_point(p);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projecting_to_same_dims_preserves_variance_order() {
        // points spread mostly along one axis
        let coords = vec![
            0.0, 0.0, 0.0, //
            1.0, 0.01, 0.0, //
            2.0, -0.01, 0.0, //
            3.0, 0.02, 0.0, //
        ];
        let layout = Layout::from_flat(4, 3, coords);
        let projected = project(&layout, 1, &HashSet::new()).unwrap();
        // first dimension should capture most of the spread
        let spread: f64 = (0..4)
            .map(|p| projected.coordinate(p, 0).powi(2))
            .sum();
        assert!(spread > 1.0);
    }

    #[test]
    fn disconnected_points_remain_disconnected_after_projection() {
        let coords = vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0];
        let mut disconnected = HashSet::new();
        disconnected.insert(1);
        let layout = Layout::from_flat(3, 2, coords);
        let projected = project(&layout, 1, &disconnected).unwrap();
        assert!(!projected.point_has_coordinates(1));
        assert!(projected.point_has_coordinates(0));
    }
}
