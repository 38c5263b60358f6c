//! Row-major point coordinates in R^d.

use std::collections::HashSet;

/// Row-major coordinates for `num_points` points in `num_dims` dimensions.
/// A row that is entirely `NaN` means "disconnected / no coordinates".
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    num_points: usize,
    num_dims: usize,
    coords: Vec<f64>,
}

impl Layout {
    /// A layout with every point disconnected (all-`NaN` rows).
    pub fn new_disconnected(num_points: usize, num_dims: usize) -> Layout {
        Layout {
            num_points,
            num_dims,
            coords: vec![f64::NAN; num_points * num_dims],
        }
    }

    /// Build from a flat row-major buffer.
    pub fn from_flat(num_points: usize, num_dims: usize, coords: Vec<f64>) -> Layout {
        assert_eq!(coords.len(), num_points * num_dims);
        Layout {
            num_points,
            num_dims,
            coords,
        }
    }

    pub fn num_points(&self) -> usize {
        self.num_points
    }

    pub fn num_dims(&self) -> usize {
        self.num_dims
    }

    pub fn as_flat(&self) -> &[f64] {
        &self.coords
    }

    pub fn as_flat_mut(&mut self) -> &mut [f64] {
        &mut self.coords
    }

    pub fn into_flat(self) -> Vec<f64> {
        self.coords
    }

    pub fn coordinate(&self, point: usize, dim: usize) -> f64 {
        self.coords[point * self.num_dims + dim]
    }

    pub fn set_coordinate(&mut self, point: usize, dim: usize, value: f64) {
        self.coords[point * self.num_dims + dim] = value;
    }

    pub fn row(&self, point: usize) -> &[f64] {
        &self.coords[point * self.num_dims..(point + 1) * self.num_dims]
    }

    pub fn row_mut(&mut self, point: usize) -> &mut [f64] {
        let d = self.num_dims;
        &mut self.coords[point * d..(point + 1) * d]
    }

    /// True iff no coordinate of `point`'s row is `NaN`.
    pub fn point_has_coordinates(&self, point: usize) -> bool {
        self.row(point).iter().all(|v| !v.is_nan())
    }

    /// Euclidean distance between two points; `NaN` if either is
    /// disconnected.
    pub fn distance(&self, p1: usize, p2: usize) -> f64 {
        self.row(p1)
            .iter()
            .zip(self.row(p2))
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    /// Per-dimension `(min, max)` over connected points only.
    pub fn bounding_box(&self) -> Option<(Vec<f64>, Vec<f64>)> {
        let mut min = vec![f64::INFINITY; self.num_dims];
        let mut max = vec![f64::NEG_INFINITY; self.num_dims];
        let mut any = false;
        for p in 0..self.num_points {
            if !self.point_has_coordinates(p) {
                continue;
            }
            any = true;
            for d in 0..self.num_dims {
                let v = self.coordinate(p, d);
                if v < min[d] {
                    min[d] = v;
                }
                if v > max[d] {
                    max[d] = v;
                }
            }
        }
        any.then_some((min, max))
    }

    /// `sqrt(sum of side_k^2)` of the bounding box of connected points;
    /// `0.0` if there are none.
    pub fn bounding_box_diagonal(&self) -> f64 {
        match self.bounding_box() {
            Some((min, max)) => min
                .iter()
                .zip(&max)
                .map(|(a, b)| (b - a).powi(2))
                .sum::<f64>()
                .sqrt(),
            None => 0.0,
        }
    }

    /// Replace a point's row with new coordinates.
    pub fn set_point(&mut self, point: usize, coords: &[f64]) {
        self.row_mut(point).copy_from_slice(coords);
    }

    /// Mark a point disconnected (all-`NaN` row).
    pub fn disconnect_point(&mut self, point: usize) {
        self.row_mut(point).iter_mut().for_each(|v| *v = f64::NAN);
    }
}

/// Scoped guard implementing §4.7: coordinates of disconnected points are
/// zeroed for the duration of a numerical kernel call (which cannot
/// tolerate `NaN` input) and are unconditionally restored to `NaN` when
/// the guard drops — including on an unwinding panic.
pub struct DisconnectedGuard<'a> {
    layout: &'a mut Layout,
    points: Vec<usize>,
}

impl<'a> DisconnectedGuard<'a> {
    /// Zero the coordinates of every point in `disconnected`.
    pub fn new(layout: &'a mut Layout, disconnected: &HashSet<usize>) -> DisconnectedGuard<'a> {
        let mut points: Vec<usize> = disconnected.iter().copied().collect();
        points.sort_unstable();
        for &p in &points {
            layout.row_mut(p).iter_mut().for_each(|v| *v = 0.0);
        }
        DisconnectedGuard { layout, points }
    }

    pub fn layout(&mut self) -> &mut Layout {
        self.layout
    }
}

impl Drop for DisconnectedGuard<'_> {
    fn drop(&mut self) {
        for &p in &self.points {
            self.layout.disconnect_point(p);
        }
    }
}
