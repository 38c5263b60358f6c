//! Flat lists of target (table) distances derived from titers and column
//! bases, split into regular and less-than categories.

use std::collections::HashSet;

use crate::column_bases::ColumnBases;
use crate::titer::Titer;
use crate::titers::Titers;

/// One `(point_i, point_j, target_distance)` entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceEntry {
    pub point_1: usize,
    pub point_2: usize,
    pub distance: f64,
}

/// Per-point multiplicative avidity adjustment (default `1.0`, i.e. no
/// adjustment). Stored per map point (antigens then sera).
#[derive(Debug, Clone)]
pub struct AvidityAdjusts {
    values: Vec<f64>,
}

impl AvidityAdjusts {
    pub fn none(num_points: usize) -> AvidityAdjusts {
        AvidityAdjusts {
            values: vec![1.0; num_points],
        }
    }

    pub fn from_multipliers(values: Vec<f64>) -> AvidityAdjusts {
        AvidityAdjusts { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True if every adjust is (numerically) `1.0`, i.e. a no-op.
    pub fn is_neutral(&self) -> bool {
        self.values.iter().all(|v| (v - 1.0).abs() < 1e-9)
    }

    pub fn set_logged(&mut self, point: usize, logged_adjust: f64) {
        self.values[point] = logged_adjust.exp2();
    }

    /// `log2` of the multiplier for `point`; `0.0` when unset.
    pub fn logged(&self, point: usize) -> f64 {
        self.values[point].log2()
    }
}

/// Two flat vectors of table-distance entries: exact (`regular`) and
/// soft-inequality (`less_than`).
#[derive(Debug, Clone, Default)]
pub struct TableDistances {
    pub regular: Vec<DistanceEntry>,
    pub less_than: Vec<DistanceEntry>,
}

/// Whether dodgy (`~`) titers are routed to the regular list or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DodgyTiterIsRegular {
    Yes,
    No,
}

impl TableDistances {
    /// Compute table distances for every non-dont-care, non-disconnected
    /// cell of `titers`.
    pub fn compute(
        titers: &Titers,
        column_bases: &ColumnBases,
        avidity_adjusts: &AvidityAdjusts,
        dodgy_is_regular: DodgyTiterIsRegular,
        disconnected: &HashSet<usize>,
    ) -> TableDistances {
        let num_antigens = titers.num_antigens();
        let mut out = TableDistances::default();
        for ag in 0..num_antigens {
            if disconnected.contains(&ag) {
                continue;
            }
            for sr in 0..titers.num_sera() {
                let serum_point = num_antigens + sr;
                if disconnected.contains(&serum_point) {
                    continue;
                }
                let titer = titers.titer(ag, sr);
                if titer.is_dont_care() || titer.is_invalid() || titer.is_more_than() {
                    continue;
                }
                if titer.is_dodgy() && dodgy_is_regular == DodgyTiterIsRegular::No {
                    continue;
                }
                let Some(logged) = titer.logged_with_thresholded() else {
                    continue;
                };
                let adjust = avidity_adjusts.logged(ag) + avidity_adjusts.logged(serum_point);
                let distance = (column_bases.get(sr) - logged - adjust).max(0.0);
                let entry = DistanceEntry {
                    point_1: ag,
                    point_2: serum_point,
                    distance,
                };
                if matches!(titer, Titer::LessThan(_)) {
                    out.less_than.push(entry);
                } else {
                    out.regular.push(entry);
                }
            }
        }
        out
    }

    /// All entries (regular then less-than) touching `point`, with the
    /// other endpoint and the target distance.
    pub fn entries_for_point(&self, point: usize) -> Vec<(usize, f64, bool)> {
        let mut result = Vec::new();
        for e in &self.regular {
            if e.point_1 == point {
                result.push((e.point_2, e.distance, false));
            } else if e.point_2 == point {
                result.push((e.point_1, e.distance, false));
            }
        }
        for e in &self.less_than {
            if e.point_1 == point {
                result.push((e.point_2, e.distance, true));
            } else if e.point_2 == point {
                result.push((e.point_1, e.distance, true));
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_titer_goes_to_less_than_bucket() {
        let mut t = Titers::new_empty(2, 1);
        t.set_titer(0, 0, Titer::Regular(40)).unwrap();
        t.set_titer(1, 0, Titer::LessThan(40)).unwrap();
        let cb = ColumnBases::from_values(vec![2.0]); // log2(40/10) = 2
        let aa = AvidityAdjusts::none(3);
        let td = TableDistances::compute(&t, &cb, &aa, DodgyTiterIsRegular::No, &HashSet::new());
        assert_eq!(td.regular.len(), 1);
        assert_eq!(td.less_than.len(), 1);
        assert_eq!(td.regular[0].distance, 0.0);
        assert_eq!(td.less_than[0].distance, 0.0);
    }

    #[test]
    fn more_than_titer_is_discarded() {
        let mut t = Titers::new_empty(1, 1);
        t.set_titer(0, 0, Titer::MoreThan(40)).unwrap();
        let cb = ColumnBases::from_values(vec![2.0]);
        let aa = AvidityAdjusts::none(2);
        let td = TableDistances::compute(&t, &cb, &aa, DodgyTiterIsRegular::No, &HashSet::new());
        assert!(td.regular.is_empty());
        assert!(td.less_than.is_empty());
    }

    #[test]
    fn disconnected_point_contributes_nothing() {
        let mut t = Titers::new_empty(1, 1);
        t.set_titer(0, 0, Titer::Regular(40)).unwrap();
        let cb = ColumnBases::from_values(vec![2.0]);
        let aa = AvidityAdjusts::none(2);
        let mut disconnected = HashSet::new();
        disconnected.insert(0);
        let td = TableDistances::compute(&t, &cb, &aa, DodgyTiterIsRegular::No, &disconnected);
        assert!(td.regular.is_empty());
    }
}
