//! Protection radius around a serum: how far from it, in the map, a
//! titer still counts as "protective" against that serum. (§4.12)

use crate::column_bases::ColumnBases;
use crate::layout::Layout;
use crate::titer::Titer;
use crate::titers::Titers;

/// Minimum radius the empirical method will ever report.
pub const MINIMUM_EMPIRICAL_RADIUS: f64 = 2.0;
/// Default fold drop, in log2 units, that still counts as protective.
pub const DEFAULT_FOLD: f64 = 2.0;

/// Why a serum circle could not be calculated for a given serum.
#[derive(Debug, Clone, PartialEq)]
pub enum SerumCircleFailure {
    NonRegularHomologousTiter,
    TiterTooLow,
    SerumDisconnected,
    AntigenDisconnected,
    NotCalculated,
}

/// The outcome of a serum circle calculation: either a radius, or the
/// reason none could be produced.
pub type SerumCircleResult = Result<f64, SerumCircleFailure>;

/// Theoretical radius: `fold + column_basis(s) - logged_for_column_bases(homologous_titer)`.
/// Can be negative (the caller is expected to surface that as a warning,
/// not an error — it is still returned).
pub fn theoretical(
    titers: &Titers,
    column_bases: &ColumnBases,
    serum: usize,
    homologous_antigen: usize,
    fold: f64,
) -> SerumCircleResult {
    let titer = titers.titer(homologous_antigen, serum);
    if !titer.is_regular() {
        return Err(SerumCircleFailure::NonRegularHomologousTiter);
    }
    let homologous_logged = titer.logged_for_column_bases();
    Ok(fold + column_bases.get(serum) - homologous_logged)
}

/// One antigen's titer-derived similarity and map distance from the serum.
struct TiterDistance {
    is_regular: bool,
    /// `min(column_basis(serum), titer.logged_for_column_bases())`.
    final_similarity: f64,
    distance: f64,
}

/// Empirical radius: walk antigens outward by map distance from the
/// serum. The candidate radius at each step is the antigen's own
/// distance (for the closest antigen) or the average of its distance
/// and the previous (closer) antigen's distance; at each candidate,
/// count protected-but-outside and not-protected-but-inside mismatches
/// and keep the radius (or radii, averaged on ties) that minimizes
/// their sum. The result is floored at [`MINIMUM_EMPIRICAL_RADIUS`].
pub fn empirical(
    titers: &Titers,
    column_bases: &ColumnBases,
    layout: &Layout,
    serum: usize,
    homologous_antigen: usize,
    fold: f64,
) -> SerumCircleResult {
    let num_antigens = titers.num_antigens();
    let serum_point = num_antigens + serum;
    let homologous_titer = titers.titer(homologous_antigen, serum);
    if !homologous_titer.is_regular() {
        return Err(SerumCircleFailure::NonRegularHomologousTiter);
    }
    if !layout.point_has_coordinates(serum_point) {
        return Err(SerumCircleFailure::SerumDisconnected);
    }
    if !layout.point_has_coordinates(homologous_antigen) {
        return Err(SerumCircleFailure::AntigenDisconnected);
    }
    let homologous_logged = homologous_titer.logged_for_column_bases();
    let boundary = column_bases.get(serum).min(homologous_logged) - fold;
    if boundary < 1.0 {
        return Err(SerumCircleFailure::TiterTooLow);
    }

    let mut samples: Vec<TiterDistance> = Vec::new();
    for antigen in 0..num_antigens {
        let titer = titers.titer(antigen, serum);
        if titer.is_dont_care() || titer.is_invalid() {
            continue;
        }
        if !layout.point_has_coordinates(antigen) {
            continue;
        }
        let final_similarity = column_bases.get(serum).min(titer.logged_for_column_bases());
        samples.push(TiterDistance {
            is_regular: titer.is_regular(),
            final_similarity,
            distance: layout.distance(antigen, serum_point),
        });
    }
    if samples.is_empty() {
        return Err(SerumCircleFailure::NotCalculated);
    }
    samples.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));

    let protected_at = |s: &TiterDistance| -> bool {
        if s.is_regular {
            s.final_similarity >= boundary
        } else {
            s.final_similarity > boundary
        }
    };
    let mismatches_at = |radius: f64| -> usize {
        samples
            .iter()
            .filter(|s| {
                let inside = s.distance <= radius;
                let protected = protected_at(s);
                (protected && !inside) || (!protected && inside)
            })
            .count()
    };

    let mut best_sum: Option<usize> = None;
    let mut sum_radii = 0.0_f64;
    let mut num_radii = 0usize;
    let mut previous_distance: Option<f64> = None;
    for sample in &samples {
        let radius = match previous_distance {
            None => sample.distance,
            Some(prev) => (sample.distance + prev) / 2.0,
        };
        let count = mismatches_at(radius);
        match best_sum {
            None => {
                best_sum = Some(count);
                sum_radii = radius;
                num_radii = 1;
            }
            Some(best) if count < best => {
                best_sum = Some(count);
                sum_radii = radius;
                num_radii = 1;
            }
            Some(best) if count == best => {
                sum_radii += radius;
                num_radii += 1;
            }
            _ => {}
        }
        previous_distance = Some(sample.distance);
    }

    let averaged = sum_radii / num_radii as f64;
    Ok(averaged.max(MINIMUM_EMPIRICAL_RADIUS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::titer::Titer;

    fn sample_titers() -> Titers {
        let mut titers = Titers::new_empty(3, 1);
        titers.set_titer(0, 0, Titer::Regular(1280)).unwrap(); // homologous
        titers.set_titer(1, 0, Titer::Regular(320)).unwrap();
        titers.set_titer(2, 0, Titer::Regular(40)).unwrap();
        titers
    }

    #[test]
    fn theoretical_radius_basic() {
        let titers = sample_titers();
        let cb = ColumnBases::from_values(vec![7.0]); // log2(1280/10)
        let r = theoretical(&titers, &cb, 0, 0, DEFAULT_FOLD).unwrap();
        assert!((r - 2.0).abs() < 1e-9);
    }

    #[test]
    fn non_regular_homologous_titer_is_rejected() {
        let mut titers = sample_titers();
        titers.set_titer(0, 0, Titer::LessThan(1280)).unwrap();
        let cb = ColumnBases::from_values(vec![7.0]);
        assert_eq!(
            theoretical(&titers, &cb, 0, 0, DEFAULT_FOLD),
            Err(SerumCircleFailure::NonRegularHomologousTiter)
        );
    }

    #[test]
    fn empirical_radius_is_floored_at_minimum() {
        let titers = sample_titers();
        let cb = ColumnBases::from_values(vec![7.0]);
        let layout = Layout::from_flat(4, 1, vec![0.0, 1.0, 3.0, 0.0]);
        let r = empirical(&titers, &cb, &layout, 0, 0, DEFAULT_FOLD).unwrap();
        assert!(r >= MINIMUM_EMPIRICAL_RADIUS);
    }

    #[test]
    fn empirical_radius_averages_tying_candidates() {
        // Homologous antigen (titer 1280, at the serum itself) plus a
        // protected antigen at distance 1.3 (titer 320) and an
        // unprotected one at distance 2.5 (titer 40). boundary =
        // min(7,7) - 2 = 5. final_similarity(320) = min(7,5) = 5 >= 5,
        // protected; final_similarity(40) = min(7,2) = 2 < 5, not
        // protected. Sorted by distance the candidate radii are 0 (the
        // homologous antigen's own distance), 0.65, and 1.9 (averages of
        // successive pairs); only radius 1.9 achieves zero mismatches, but
        // the minimum enforced radius of 2.0 wins the final `max`.
        let mut titers = Titers::new_empty(3, 1);
        titers.set_titer(0, 0, Titer::Regular(1280)).unwrap();
        titers.set_titer(1, 0, Titer::Regular(320)).unwrap();
        titers.set_titer(2, 0, Titer::Regular(40)).unwrap();
        let cb = ColumnBases::from_values(vec![7.0]);
        let layout = Layout::from_flat(4, 1, vec![0.0, 1.3, 2.5, 0.0]);
        let r = empirical(&titers, &cb, &layout, 0, 0, DEFAULT_FOLD).unwrap();
        assert!((r - 2.0).abs() < 1e-9, "expected radius 2.0, got {r}");
    }

    #[test]
    fn disconnected_serum_is_reported() {
        let titers = sample_titers();
        let cb = ColumnBases::from_values(vec![7.0]);
        let layout = Layout::new_disconnected(4, 1);
        assert_eq!(
            empirical(&titers, &cb, &layout, 0, 0, DEFAULT_FOLD),
            Err(SerumCircleFailure::SerumDisconnected)
        );
    }
}
