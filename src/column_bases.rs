//! Per-serum log-scale normalizers.

use crate::err::{ErrorKind, Result};
use crate::titers::Titers;

/// Per-serum column bases, after the minimum-column-basis floor (and any
/// forced per-serum overrides) have been applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnBases {
    values: Vec<f64>,
}

impl ColumnBases {
    /// Compute from `titers`, flooring every serum's raw column basis at
    /// `minimum_column_basis`.
    pub fn compute(titers: &Titers, minimum_column_basis: f64) -> ColumnBases {
        let values = (0..titers.num_sera())
            .map(|sr| titers.raw_column_basis(sr).max(minimum_column_basis))
            .collect();
        ColumnBases { values }
    }

    /// Build directly from a vector of per-serum values (e.g. loaded
    /// from an `.ace` file's forced column bases).
    pub fn from_values(values: Vec<f64>) -> ColumnBases {
        ColumnBases { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, serum: usize) -> f64 {
        self.values[serum]
    }

    pub fn set(&mut self, serum: usize, value: f64) {
        self.values[serum] = value;
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}

/// Parse a `minimum_column_basis` string per the external-interfaces grammar:
/// `"none"`/`""` -> 0, the common titer strings map to their log, and any
/// other string parses as a bare integer that is its own log value.
pub fn parse_minimum_column_basis(s: &str) -> Result<f64> {
    match s {
        "none" | "" => Ok(0.0),
        "1280" => Ok(7.0),
        "640" => Ok(6.0),
        "320" => Ok(5.0),
        "160" => Ok(4.0),
        "80" => Ok(3.0),
        other => other
            .parse::<f64>()
            .map_err(|_| ErrorKind::InvalidData(format!("invalid minimum_column_basis: {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::titer::Titer;

    #[test]
    fn parse_known_strings() {
        assert_eq!(parse_minimum_column_basis("none").unwrap(), 0.0);
        assert_eq!(parse_minimum_column_basis("").unwrap(), 0.0);
        assert_eq!(parse_minimum_column_basis("1280").unwrap(), 7.0);
        assert_eq!(parse_minimum_column_basis("640").unwrap(), 6.0);
        assert_eq!(parse_minimum_column_basis("320").unwrap(), 5.0);
        assert_eq!(parse_minimum_column_basis("160").unwrap(), 4.0);
        assert_eq!(parse_minimum_column_basis("80").unwrap(), 3.0);
        assert_eq!(parse_minimum_column_basis("9").unwrap(), 9.0);
    }

    #[test]
    fn monotonicity_adding_larger_titer_raises_basis() {
        let mut t = Titers::new_empty(1, 1);
        t.set_titer(0, 0, Titer::Regular(40)).unwrap();
        let cb1 = ColumnBases::compute(&t, 0.0);

        let mut t2 = t.clone();
        t2.set_titer(0, 0, Titer::Regular(160)).unwrap();
        let cb2 = ColumnBases::compute(&t2, 0.0);
        assert!(cb2.get(0) >= cb1.get(0));
    }

    #[test]
    fn adding_smaller_titer_never_lowers_basis_with_other_antigens_present() {
        let mut t = Titers::new_empty(2, 1);
        t.set_titer(0, 0, Titer::Regular(160)).unwrap();
        let before = ColumnBases::compute(&t, 0.0).get(0);
        t.set_titer(1, 0, Titer::Regular(20)).unwrap();
        let after = ColumnBases::compute(&t, 0.0).get(0);
        assert!(after >= before);
    }
}
