//! Which antigens a homologous titer does, and does not, cover. (§4.13)

use crate::err::{ErrorKind, Result};
use crate::titer::Titer;
use crate::titers::Titers;

/// Antigens split by whether their titer against `serum` still counts
/// as covered by a homologous titer `fold` log units above threshold.
#[derive(Debug, Clone, Default)]
pub struct SerumCoverage {
    pub within: Vec<usize>,
    pub outside: Vec<usize>,
}

/// `threshold = logged(homologous_titer) - fold`. Antigens with
/// `logged_for_column_bases >= threshold` are `within`; those with
/// `0 <= logged_for_column_bases < threshold` are `outside`. `DontCare`
/// titers are excluded from both. An empty `within` is not an error —
/// the caller is expected to warn, not abort.
///
/// # Errors
/// [`ErrorKind::SerumCoverageError`] if `homologous_titer` is not
/// `Regular`, or if the resulting threshold is non-positive (the
/// homologous titer is too low to discriminate coverage).
pub fn compute(
    titers: &Titers,
    serum: usize,
    homologous_titer: Titer,
    fold: f64,
) -> Result<SerumCoverage> {
    if !homologous_titer.is_regular() {
        return Err(ErrorKind::SerumCoverageError(format!(
            "cannot handle non-regular homologous titer: {homologous_titer}"
        )));
    }
    let threshold = homologous_titer.logged().expect("regular titer is always logged") - fold;
    if threshold <= 0.0 {
        return Err(ErrorKind::SerumCoverageError(format!(
            "homologous titer is too low: {homologous_titer}"
        )));
    }
    let mut coverage = SerumCoverage::default();
    for antigen in 0..titers.num_antigens() {
        let titer = titers.titer(antigen, serum);
        if titer.is_dont_care() {
            continue;
        }
        let logged = titer.logged_for_column_bases();
        if logged >= threshold {
            coverage.within.push(antigen);
        } else if logged >= 0.0 {
            coverage.outside.push(antigen);
        }
    }
    Ok(coverage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_antigens_by_threshold() {
        let mut titers = Titers::new_empty(3, 1);
        titers.set_titer(0, 0, Titer::Regular(1280)).unwrap();
        titers.set_titer(1, 0, Titer::Regular(80)).unwrap();
        titers.set_titer(2, 0, Titer::DontCare).unwrap();
        let coverage = compute(&titers, 0, Titer::Regular(1280), 2.0).unwrap();
        assert_eq!(coverage.within, vec![0]);
        assert_eq!(coverage.outside, vec![1]);
    }

    #[test]
    fn rejects_non_regular_homologous_titer() {
        let titers = Titers::new_empty(1, 1);
        assert!(matches!(
            compute(&titers, 0, Titer::LessThan(40), 2.0),
            Err(ErrorKind::SerumCoverageError(_))
        ));
    }

    #[test]
    fn rejects_homologous_titer_too_low() {
        let titers = Titers::new_empty(1, 1);
        // logged(10) - 2 = 0 - 2 = -2 <= 0
        assert!(matches!(
            compute(&titers, 0, Titer::Regular(10), 2.0),
            Err(ErrorKind::SerumCoverageError(_))
        ));
    }
}
