//! Seeded uniform samplers used to pick initial layouts.

use std::sync::Mutex;

use rand::distributions::Uniform;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::err::{ErrorKind, Result};

/// A line in R^2, used to keep randomized points on one side of a
/// border (map-degradation resolver support).
#[derive(Debug, Clone, Copy)]
pub struct LineSide {
    /// A point on the line.
    pub origin: [f64; 2],
    /// The line's direction vector.
    pub direction: [f64; 2],
    /// `true` keeps points where the cross product is `>= 0`.
    pub positive_side: bool,
}

impl LineSide {
    fn side_sign(&self, point: &[f64]) -> f64 {
        let dx = point[0] - self.origin[0];
        let dy = point[1] - self.origin[1];
        self.direction[0] * dy - self.direction[1] * dx
    }

    /// Reflect `point` across the line if it fell on the wrong side.
    pub fn fix(&self, mut point: Vec<f64>) -> Vec<f64> {
        if point.len() < 2 {
            return point;
        }
        let sign = self.side_sign(&point);
        let wrong_side = if self.positive_side { sign < 0.0 } else { sign > 0.0 };
        if wrong_side {
            // Mirror the first two dims across the line's direction.
            let len_sq = self.direction[0].powi(2) + self.direction[1].powi(2);
            if len_sq > 0.0 {
                let dx = point[0] - self.origin[0];
                let dy = point[1] - self.origin[1];
                let t = (dx * self.direction[0] + dy * self.direction[1]) / len_sq;
                let proj_x = self.origin[0] + t * self.direction[0];
                let proj_y = self.origin[1] + t * self.direction[1];
                point[0] = 2.0 * proj_x - point[0];
                point[1] = 2.0 * proj_y - point[1];
            }
        }
        point
    }
}

/// Uniform sampler in `[-diameter/2, +diameter/2]^num_dims`, seeded for
/// reproducibility. Thread-safe: the shared generator is protected by a
/// mutex held for the duration of one sample.
pub struct LayoutRandomizerPlain {
    diameter: f64,
    rng: Mutex<StdRng>,
    /// Present only for the border-constrained variant.
    line: Option<LineSide>,
}

impl LayoutRandomizerPlain {
    pub fn new(diameter: f64, seed: Option<u64>) -> Result<LayoutRandomizerPlain> {
        check_diameter(diameter)?;
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Ok(LayoutRandomizerPlain {
            diameter,
            rng: Mutex::new(rng),
            line: None,
        })
    }

    /// Border-constrained variant: generated points are reflected into
    /// the half-plane given by `line`.
    pub fn with_line_border(diameter: f64, seed: Option<u64>, line: LineSide) -> Result<LayoutRandomizerPlain> {
        let mut r = Self::new(diameter, seed)?;
        r.line = Some(line);
        Ok(r)
    }

    pub fn diameter(&self) -> f64 {
        self.diameter
    }

    pub fn set_diameter(&mut self, diameter: f64) -> Result<()> {
        check_diameter(diameter)?;
        self.diameter = diameter;
        Ok(())
    }

    fn sample_one(&self) -> f64 {
        let dist = Uniform::new_inclusive(-self.diameter / 2.0, self.diameter / 2.0);
        let mut rng = self.rng.lock().expect("randomizer mutex poisoned");
        rng.sample(dist)
    }

    /// Draw one random point in `num_dims` dimensions.
    pub fn get(&self, num_dims: usize) -> Vec<f64> {
        let point: Vec<f64> = (0..num_dims).map(|_| self.sample_one()).collect();
        match &self.line {
            Some(line) => line.fix(point),
            None => point,
        }
    }
}

fn check_diameter(diameter: f64) -> Result<()> {
    if diameter.is_nan() || diameter.is_infinite() || diameter <= 0.0 || diameter > 9999.0 {
        Err(ErrorKind::OptimizationError(format!(
            "invalid randomizer diameter: {diameter}"
        )))
    } else {
        Ok(())
    }
}

/// Diameter for the `table_max_distance` factory.
pub fn diameter_table_max_distance(max_distance: f64) -> f64 {
    max_distance
}

/// Diameter for the `current_layout_area` factory.
pub fn diameter_current_layout_area(bounding_box_diagonal: f64, multiplier: f64) -> f64 {
    bounding_box_diagonal * multiplier
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_stay_within_diameter_box() {
        let r = LayoutRandomizerPlain::new(4.0, Some(42)).unwrap();
        for _ in 0..1000 {
            let p = r.get(2);
            for v in p {
                assert!((-2.0..=2.0).contains(&v));
            }
        }
    }

    #[test]
    fn same_seed_reproducible() {
        let a = LayoutRandomizerPlain::new(4.0, Some(7)).unwrap();
        let b = LayoutRandomizerPlain::new(4.0, Some(7)).unwrap();
        assert_eq!(a.get(3), b.get(3));
    }

    #[test]
    fn rejects_bad_diameter() {
        assert!(LayoutRandomizerPlain::new(f64::NAN, None).is_err());
        assert!(LayoutRandomizerPlain::new(0.0, None).is_err());
        assert!(LayoutRandomizerPlain::new(-1.0, None).is_err());
        assert!(LayoutRandomizerPlain::new(10000.0, None).is_err());
    }

    #[test]
    fn line_border_keeps_points_on_one_side() {
        let line = LineSide {
            origin: [0.0, 0.0],
            direction: [1.0, 0.0],
            positive_side: true,
        };
        let r = LayoutRandomizerPlain::with_line_border(4.0, Some(1), line).unwrap();
        for _ in 0..100 {
            let p = r.get(2);
            assert!(line.side_sign(&p) >= -1e-9);
        }
    }
}
