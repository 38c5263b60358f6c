//! The antigen × serum matrix of [`Titer`] values, with optional
//! per-source layers and layer-merge semantics.

use crate::column_bases::ColumnBases;
use crate::err::{ErrorKind, Result};
use crate::titer::Titer;

/// Fraction of non-dont-care cells above which a table is stored densely.
const DENSE_OCCUPANCY_THRESHOLD: f64 = 0.70;

/// A single antigen's non-dont-care titers, sorted by serum index.
type SparseRow = Vec<(usize, Titer)>;

#[derive(Debug, Clone)]
enum Storage {
    /// Row-major, `num_antigens * num_sera` entries.
    Dense(Vec<Titer>),
    /// One sorted row per antigen; absent entries are `DontCare`.
    Sparse(Vec<SparseRow>),
}

/// The antigen × serum titer matrix, optionally backed by several
/// per-source layers that can be re-merged on request.
#[derive(Debug, Clone)]
pub struct Titers {
    num_antigens: usize,
    num_sera: usize,
    storage: Storage,
    /// Ordered per-source sparse tables; empty if this chart has no layers.
    layers: Vec<Vec<SparseRow>>,
}

/// Diagnostic tag produced by the layer-merge algorithm for one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeTag {
    AllDontCare,
    LessAndMoreThan,
    LessThanOnly,
    MoreThanOnlyAdjustToNext,
    MoreThanOnlyToDontCare,
    SdTooBig,
    RegularOnly,
    LessThanAndRegular,
    MoreThanAndRegular,
}

/// How to resolve a cell whose layers carry only `>` titers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoreThanPolicy {
    /// Emit `>max(values)`.
    AdjustToNext,
    /// Emit `*`.
    ToDontCare,
}

impl Titers {
    /// An all-dont-care dense table of the given shape.
    pub fn new_empty(num_antigens: usize, num_sera: usize) -> Titers {
        Titers {
            num_antigens,
            num_sera,
            storage: Storage::Dense(vec![Titer::DontCare; num_antigens * num_sera]),
            layers: Vec::new(),
        }
    }

    /// Build from a dense row-major buffer, choosing dense or sparse
    /// storage by occupancy.
    pub fn from_dense(num_antigens: usize, num_sera: usize, cells: Vec<Titer>) -> Titers {
        assert_eq!(cells.len(), num_antigens * num_sera);
        let non_dont_care = cells.iter().filter(|t| !t.is_dont_care()).count();
        let occupancy = if cells.is_empty() {
            0.0
        } else {
            non_dont_care as f64 / cells.len() as f64
        };
        let storage = if occupancy >= DENSE_OCCUPANCY_THRESHOLD {
            Storage::Dense(cells)
        } else {
            let mut rows = vec![Vec::new(); num_antigens];
            for ag in 0..num_antigens {
                for sr in 0..num_sera {
                    let t = cells[ag * num_sera + sr];
                    if !t.is_dont_care() {
                        rows[ag].push((sr, t));
                    }
                }
            }
            Storage::Sparse(rows)
        };
        Titers {
            num_antigens,
            num_sera,
            storage,
            layers: Vec::new(),
        }
    }

    /// Build directly from sparse rows (used by the ACE codec for `"d"` tables).
    pub fn from_sparse(num_antigens: usize, num_sera: usize, rows: Vec<SparseRow>) -> Titers {
        assert_eq!(rows.len(), num_antigens);
        let non_dont_care: usize = rows.iter().map(|r| r.len()).sum();
        let total = num_antigens * num_sera;
        let occupancy = if total == 0 {
            0.0
        } else {
            non_dont_care as f64 / total as f64
        };
        let storage = if occupancy >= DENSE_OCCUPANCY_THRESHOLD {
            let mut cells = vec![Titer::DontCare; total];
            for (ag, row) in rows.iter().enumerate() {
                for &(sr, t) in row {
                    cells[ag * num_sera + sr] = t;
                }
            }
            Storage::Dense(cells)
        } else {
            Storage::Sparse(rows)
        };
        Titers {
            num_antigens,
            num_sera,
            storage,
            layers: Vec::new(),
        }
    }

    pub fn num_antigens(&self) -> usize {
        self.num_antigens
    }

    pub fn num_sera(&self) -> usize {
        self.num_sera
    }

    pub fn number_of_layers(&self) -> usize {
        self.layers.len()
    }

    /// The titer at `(antigen, serum)`. O(1) dense, O(log row-len) sparse.
    pub fn titer(&self, antigen: usize, serum: usize) -> Titer {
        match &self.storage {
            Storage::Dense(cells) => cells[antigen * self.num_sera + serum],
            Storage::Sparse(rows) => rows[antigen]
                .binary_search_by_key(&serum, |&(sr, _)| sr)
                .map(|idx| rows[antigen][idx].1)
                .unwrap_or(Titer::DontCare),
        }
    }

    /// Overwrite the titer at `(antigen, serum)`.
    ///
    /// # Errors
    /// Returns [`ErrorKind::TitersCannotBeModified`] if the table has layers.
    pub fn set_titer(&mut self, antigen: usize, serum: usize, titer: Titer) -> Result<()> {
        if self.number_of_layers() >= 1 {
            return Err(ErrorKind::TitersCannotBeModified);
        }
        match &mut self.storage {
            Storage::Dense(cells) => cells[antigen * self.num_sera + serum] = titer,
            Storage::Sparse(rows) => {
                let row = &mut rows[antigen];
                match row.binary_search_by_key(&serum, |&(sr, _)| sr) {
                    Ok(idx) => {
                        if titer.is_dont_care() {
                            row.remove(idx);
                        } else {
                            row[idx].1 = titer;
                        }
                    }
                    Err(idx) => {
                        if !titer.is_dont_care() {
                            row.insert(idx, (serum, titer));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn column_iter(&self, serum: usize) -> impl Iterator<Item = Titer> + '_ {
        (0..self.num_antigens).map(move |ag| self.titer(ag, serum))
    }

    /// The raw column basis for `serum`: the max `logged_for_column_bases`
    /// over every titer against it (`<` counts as regular, `>` as
    /// `logged+1`; dodgy/dont-care contribute their `-1.0` sentinel, which
    /// never wins against the `0.0` floor this starts from).
    pub fn raw_column_basis(&self, serum: usize) -> f64 {
        self.column_iter(serum)
            .map(|t| t.logged_for_column_bases())
            .fold(0.0_f64, f64::max)
    }

    /// Point indices (antigens `0..num_antigens`, sera
    /// `num_antigens..num_antigens+num_sera`) with fewer than `threshold`
    /// `Regular` titers.
    pub fn having_too_few_numeric_titers(&self, threshold: usize) -> Vec<usize> {
        let mut result = Vec::new();
        for ag in 0..self.num_antigens {
            let count = (0..self.num_sera)
                .filter(|&sr| self.titer(ag, sr).is_regular())
                .count();
            if count < threshold {
                result.push(ag);
            }
        }
        for sr in 0..self.num_sera {
            let count = self.column_iter(sr).filter(|t| t.is_regular()).count();
            if count < threshold {
                result.push(self.num_antigens + sr);
            }
        }
        result
    }

    /// `max` over all non-dont-care titers of `cb[serum] - logged_with_thresholded(titer)`.
    pub fn max_distance(&self, column_bases: &ColumnBases) -> f64 {
        let mut max = 0.0_f64;
        for ag in 0..self.num_antigens {
            for sr in 0..self.num_sera {
                let t = self.titer(ag, sr);
                if let Some(logged) = t.logged_with_thresholded() {
                    let d = column_bases.get(sr) - logged;
                    if d > max {
                        max = d;
                    }
                }
            }
        }
        max
    }

    /// Antigens and sera that have a non-dont-care titer in layer `k`.
    ///
    /// # Errors
    /// [`ErrorKind::DataNotAvailable`] if the table has no layers.
    pub fn antigens_sera_of_layer(&self, k: usize) -> Result<(Vec<usize>, Vec<usize>)> {
        let layer = self
            .layers
            .get(k)
            .ok_or_else(|| ErrorKind::DataNotAvailable(format!("no layer {k}")))?;
        let mut antigens = Vec::new();
        let mut sera = std::collections::BTreeSet::new();
        for (ag, row) in layer.iter().enumerate() {
            if !row.is_empty() {
                antigens.push(ag);
            }
            for &(sr, _) in row {
                sera.insert(sr);
            }
        }
        Ok((antigens, sera.into_iter().collect()))
    }

    /// Indices of layers that have a non-dont-care titer for `antigen`.
    ///
    /// # Errors
    /// [`ErrorKind::DataNotAvailable`] if the table has no layers.
    pub fn layers_with_antigen(&self, antigen: usize) -> Result<Vec<usize>> {
        if self.layers.is_empty() {
            return Err(ErrorKind::DataNotAvailable("chart has no layers".into()));
        }
        Ok(self
            .layers
            .iter()
            .enumerate()
            .filter(|(_, layer)| !layer[antigen].is_empty())
            .map(|(k, _)| k)
            .collect())
    }

    /// Indices of layers that have a non-dont-care titer for `serum`.
    ///
    /// # Errors
    /// [`ErrorKind::DataNotAvailable`] if the table has no layers.
    pub fn layers_with_serum(&self, serum: usize) -> Result<Vec<usize>> {
        if self.layers.is_empty() {
            return Err(ErrorKind::DataNotAvailable("chart has no layers".into()));
        }
        Ok(self
            .layers
            .iter()
            .enumerate()
            .filter(|(_, layer)| {
                layer
                    .iter()
                    .any(|row| row.iter().any(|&(sr, _)| sr == serum))
            })
            .map(|(k, _)| k)
            .collect())
    }

    /// Install the layer stack, replacing any previously-merged matrix.
    pub fn set_layers(&mut self, layers: Vec<Vec<SparseRow>>) {
        self.layers = layers;
    }

    /// Merge the layer stack into the main matrix using the given
    /// policy for cells that contain only `>` titers, returning the
    /// per-cell diagnostic tags alongside.
    ///
    /// # Errors
    /// [`ErrorKind::DataNotAvailable`] if the table has no layers.
    pub fn set_from_layers(&mut self, more_than: MoreThanPolicy) -> Result<Vec<Vec<MergeTag>>> {
        if self.layers.is_empty() {
            return Err(ErrorKind::DataNotAvailable("chart has no layers".into()));
        }
        let mut cells = vec![Titer::DontCare; self.num_antigens * self.num_sera];
        let mut tags = vec![vec![MergeTag::AllDontCare; self.num_sera]; self.num_antigens];
        for ag in 0..self.num_antigens {
            for sr in 0..self.num_sera {
                let observed: Vec<Titer> = self
                    .layers
                    .iter()
                    .filter_map(|layer| {
                        layer[ag]
                            .binary_search_by_key(&sr, |&(s, _)| s)
                            .ok()
                            .map(|idx| layer[ag][idx].1)
                    })
                    .collect();
                let (merged, tag) = merge_cell(&observed, more_than);
                cells[ag * self.num_sera + sr] = merged;
                tags[ag][sr] = tag;
            }
        }
        self.storage = Storage::Dense(cells);
        Ok(tags)
    }
}

/// Population standard deviation of `values`.
fn population_std_dev(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

/// Merge the non-dont-care titers observed across layers at one cell,
/// per the layer-merge algorithm.
pub fn merge_cell(observed: &[Titer], more_than: MoreThanPolicy) -> (Titer, MergeTag) {
    if observed.is_empty() {
        return (Titer::DontCare, MergeTag::AllDontCare);
    }
    let has_less = observed.iter().any(Titer::is_less_than);
    let has_more = observed.iter().any(Titer::is_more_than);
    if has_less && has_more {
        return (Titer::DontCare, MergeTag::LessAndMoreThan);
    }

    let regular: Vec<u32> = observed
        .iter()
        .filter_map(|t| matches!(t, Titer::Regular(_)).then(|| t.value().unwrap()))
        .collect();
    let less_vals: Vec<u32> = observed
        .iter()
        .filter_map(|t| matches!(t, Titer::LessThan(_)).then(|| t.value().unwrap()))
        .collect();
    let more_vals: Vec<u32> = observed
        .iter()
        .filter_map(|t| matches!(t, Titer::MoreThan(_)).then(|| t.value().unwrap()))
        .collect();

    if regular.is_empty() {
        if !less_vals.is_empty() {
            let min = *less_vals.iter().min().unwrap();
            return (Titer::LessThan(min), MergeTag::LessThanOnly);
        }
        if !more_vals.is_empty() {
            let max = *more_vals.iter().max().unwrap();
            return match more_than {
                MoreThanPolicy::AdjustToNext => {
                    (Titer::MoreThan(max), MergeTag::MoreThanOnlyAdjustToNext)
                }
                MoreThanPolicy::ToDontCare => (Titer::DontCare, MergeTag::MoreThanOnlyToDontCare),
            };
        }
        // Only dodgy titers observed: fold them in as if regular for the sd check.
    }

    let logged: Vec<f64> = observed
        .iter()
        .filter_map(Titer::logged_with_thresholded)
        .collect();
    if logged.len() > 1 && population_std_dev(&logged) > 1.0 {
        return (Titer::DontCare, MergeTag::SdTooBig);
    }

    if less_vals.is_empty() && more_vals.is_empty() {
        let mean = logged.iter().sum::<f64>() / logged.len() as f64;
        return (Titer::from_logged(mean, ""), MergeTag::RegularOnly);
    }

    if !less_vals.is_empty() {
        let max_less = *less_vals.iter().max().unwrap();
        let max_regular = *regular.iter().max().unwrap();
        if max_less > max_regular {
            let value = less_vals
                .into_iter()
                .filter(|&v| v > max_regular)
                .min()
                .unwrap();
            return (Titer::LessThan(value), MergeTag::LessThanAndRegular);
        }
        return (
            Titer::LessThan(max_regular * 2),
            MergeTag::LessThanAndRegular,
        );
    }

    // Mix of `>` and regular: symmetric to the `<` case.
    let min_more = *more_vals.iter().min().unwrap();
    let min_regular = *regular.iter().min().unwrap();
    if min_more < min_regular {
        let value = more_vals
            .into_iter()
            .filter(|&v| v < min_regular)
            .max()
            .unwrap();
        (Titer::MoreThan(value), MergeTag::MoreThanAndRegular)
    } else {
        (
            Titer::MoreThan(min_regular / 2),
            MergeTag::MoreThanAndRegular,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_vs_sparse_threshold() {
        let mostly_filled = vec![Titer::Regular(40); 10];
        let t = Titers::from_dense(2, 5, mostly_filled);
        assert!(matches!(t.storage, Storage::Dense(_)));

        let mut mostly_empty = vec![Titer::DontCare; 10];
        mostly_empty[0] = Titer::Regular(40);
        let t = Titers::from_dense(2, 5, mostly_empty);
        assert!(matches!(t.storage, Storage::Sparse(_)));
    }

    #[test]
    fn set_titer_rejects_when_layered() {
        let mut t = Titers::new_empty(1, 1);
        t.set_layers(vec![vec![vec![]]]);
        assert_eq!(
            t.set_titer(0, 0, Titer::Regular(40)),
            Err(ErrorKind::TitersCannotBeModified)
        );
    }

    #[test]
    fn raw_column_basis_from_max_regular() {
        let mut t = Titers::new_empty(2, 1);
        t.set_titer(0, 0, Titer::Regular(40)).unwrap();
        t.set_titer(1, 0, Titer::Regular(160)).unwrap();
        assert_eq!(t.raw_column_basis(0), (16.0_f64).log2());
    }

    #[test]
    fn raw_column_basis_zero_when_no_regular() {
        let t = Titers::new_empty(1, 1);
        assert_eq!(t.raw_column_basis(0), 0.0);
    }

    #[test]
    fn raw_column_basis_counts_thresholded_titers_too() {
        let mut less_than = Titers::new_empty(1, 1);
        less_than.set_titer(0, 0, Titer::LessThan(40)).unwrap();
        assert_eq!(less_than.raw_column_basis(0), Titer::LessThan(40).logged_for_column_bases());

        let mut more_than = Titers::new_empty(1, 1);
        more_than.set_titer(0, 0, Titer::MoreThan(40)).unwrap();
        assert_eq!(more_than.raw_column_basis(0), Titer::MoreThan(40).logged_for_column_bases());
    }

    #[test]
    fn merge_regular_only_averages_logged() {
        let (titer, tag) = merge_cell(&[Titer::Regular(40), Titer::Regular(80)], MoreThanPolicy::ToDontCare);
        assert_eq!(tag, MergeTag::RegularOnly);
        // mean(log2(4), log2(8)) = 2.5 -> round(2^2.5 * 10) = 57
        assert_eq!(titer, Titer::Regular(57));
    }

    #[test]
    fn merge_less_than_and_regular_takes_next_above() {
        let (titer, tag) = merge_cell(&[Titer::LessThan(40), Titer::Regular(160)], MoreThanPolicy::ToDontCare);
        assert_eq!(tag, MergeTag::LessThanAndRegular);
        assert_eq!(titer, Titer::LessThan(320));
    }

    #[test]
    fn merge_empty_is_all_dont_care() {
        assert_eq!(merge_cell(&[], MoreThanPolicy::ToDontCare), (Titer::DontCare, MergeTag::AllDontCare));
    }

    #[test]
    fn merge_less_and_more_than_conflict() {
        let (titer, tag) = merge_cell(
            &[Titer::LessThan(40), Titer::MoreThan(80)],
            MoreThanPolicy::ToDontCare,
        );
        assert_eq!(titer, Titer::DontCare);
        assert_eq!(tag, MergeTag::LessAndMoreThan);
    }

    #[test]
    fn merge_more_than_only_policy() {
        let (t, tag) = merge_cell(&[Titer::MoreThan(640)], MoreThanPolicy::AdjustToNext);
        assert_eq!(t, Titer::MoreThan(640));
        assert_eq!(tag, MergeTag::MoreThanOnlyAdjustToNext);

        let (t, tag) = merge_cell(&[Titer::MoreThan(640)], MoreThanPolicy::ToDontCare);
        assert_eq!(t, Titer::DontCare);
        assert_eq!(tag, MergeTag::MoreThanOnlyToDontCare);
    }

    #[test]
    fn too_few_numeric_titers_flags_sparse_rows_and_columns() {
        let mut t = Titers::new_empty(2, 2);
        t.set_titer(0, 0, Titer::Regular(40)).unwrap();
        let flagged = t.having_too_few_numeric_titers(1);
        // antigen 1 and serum 1 have zero regular titers
        assert!(flagged.contains(&1));
        assert!(flagged.contains(&3)); // point index num_antigens(2) + serum(1)
    }
}
