//! The top-level container: antigens, sera, titers, and the projections
//! computed against them.

use std::collections::HashSet;

use rayon::prelude::*;

use crate::column_bases::ColumnBases;
use crate::err::{ErrorKind, Result};
use crate::layout::Layout;
use crate::optimize::{CgPca, LbfgsPca, Optimizer, Precision};
use crate::pca;
use crate::projection::Projection;
use crate::projections::Projections;
use crate::randomizer::LayoutRandomizerPlain;
use crate::stress::Stress;
use crate::table_distances::{AvidityAdjusts, DodgyTiterIsRegular, TableDistances};
use crate::titers::{MergeTag, MoreThanPolicy, Titers};

/// `antigens[i].lineage` / `sera[i].lineage`: B lineage classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Lineage {
    #[serde(rename = "V")]
    Victoria,
    #[serde(rename = "Y")]
    Yamagata,
}

/// Fields shared by antigens and sera that are not otherwise exposed.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct AntigenSerumCommon {
    pub passage: Option<String>,
    pub reassortant: Option<String>,
    pub reference: bool,
    pub egg: bool,
    pub annotations: Vec<String>,
    pub clades: Vec<String>,
    pub lineage: Option<Lineage>,
    pub continent: Option<String>,
    pub aa: Option<String>,
    pub nuc: Option<String>,
}

/// One antigen.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Antigen {
    pub name: String,
    pub date: Option<String>,
    pub lab_ids: Vec<String>,
    #[serde(flatten)]
    pub common: AntigenSerumCommon,
}

/// One serum.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Serum {
    pub name: String,
    pub serum_id: Option<String>,
    pub serum_species: Option<String>,
    pub homologous_antigens: Vec<usize>,
    #[serde(flatten)]
    pub common: AntigenSerumCommon,
}

/// Chart-level metadata.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Info {
    pub virus: Option<String>,
    pub virus_type: Option<String>,
    pub assay: Option<String>,
    pub date: Option<String>,
    pub name: Option<String>,
    pub lab: Option<String>,
    pub rbc_species: Option<String>,
    pub subset: Option<String>,
    #[serde(default)]
    pub sources: Vec<Info>,
}

/// Which gradient-based method a multi-start relaxation should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    LbfgsPca,
    CgPca,
}

/// Tuning knobs for [`Chart::relax`] / [`Chart::incremental_relax`].
#[derive(Debug, Clone)]
pub struct RelaxOptions {
    pub method: Method,
    pub dimension_annealing: bool,
    pub disconnect_having_few_numeric_titers: bool,
    pub dodgy_titer_is_regular: DodgyTiterIsRegular,
    pub num_threads: Option<usize>,
    pub seed: Option<u64>,
}

impl Default for RelaxOptions {
    fn default() -> Self {
        RelaxOptions {
            method: Method::LbfgsPca,
            dimension_annealing: true,
            disconnect_having_few_numeric_titers: false,
            dodgy_titer_is_regular: DodgyTiterIsRegular::No,
            num_threads: None,
            seed: None,
        }
    }
}

/// Antigens, sera, their titers, and the projections optimized against them.
#[derive(Debug, Clone)]
pub struct Chart {
    pub info: Info,
    pub antigens: Vec<Antigen>,
    pub sera: Vec<Serum>,
    pub titers: Titers,
    pub forced_column_bases: Option<ColumnBases>,
    pub projections: Projections,
}

impl Chart {
    pub fn new(
        info: Info,
        antigens: Vec<Antigen>,
        sera: Vec<Serum>,
        titers: Titers,
    ) -> Result<Chart> {
        if antigens.len() != titers.num_antigens() || sera.len() != titers.num_sera() {
            return Err(ErrorKind::InvalidData(
                "antigens/sera count does not match titer matrix shape".into(),
            ));
        }
        Ok(Chart {
            info,
            antigens,
            sera,
            titers,
            forced_column_bases: None,
            projections: Projections::new(),
        })
    }

    pub fn number_of_antigens(&self) -> usize {
        self.antigens.len()
    }

    pub fn number_of_sera(&self) -> usize {
        self.sera.len()
    }

    pub fn number_of_points(&self) -> usize {
        self.antigens.len() + self.sera.len()
    }

    /// Per-serum column bases: forced values if set, else computed from
    /// titers with the given floor.
    pub fn column_bases(&self, minimum_column_basis: f64) -> ColumnBases {
        match &self.forced_column_bases {
            Some(cb) => cb.clone(),
            None => ColumnBases::compute(&self.titers, minimum_column_basis),
        }
    }

    /// Merge the chart's titer layers into the main matrix, following
    /// the two-pass dance: if any layer carries `>` titers, first merge
    /// with `adjust_to_next` to compute forced column bases from the
    /// resulting matrix, then re-merge with `to_dont_care` for the final
    /// titer matrix that those column bases are used against.
    pub fn set_from_layers(&mut self, minimum_column_basis: f64) -> Result<Vec<Vec<MergeTag>>> {
        let probe_tags = self.titers.set_from_layers(MoreThanPolicy::AdjustToNext)?;
        let any_more_than = probe_tags
            .iter()
            .flatten()
            .any(|t| *t == MergeTag::MoreThanOnlyAdjustToNext);
        if any_more_than {
            let forced = ColumnBases::compute(&self.titers, minimum_column_basis);
            self.forced_column_bases = Some(forced);
            let final_tags = self.titers.set_from_layers(MoreThanPolicy::ToDontCare)?;
            Ok(final_tags)
        } else {
            Ok(probe_tags)
        }
    }

    fn too_few_numeric(&self, enabled: bool) -> HashSet<usize> {
        if enabled {
            self.titers.having_too_few_numeric_titers(3).into_iter().collect()
        } else {
            HashSet::new()
        }
    }

    fn build_stress(
        &self,
        num_dims: usize,
        minimum_column_basis: f64,
        options: &RelaxOptions,
        extra_disconnected: &HashSet<usize>,
        extra_unmovable: &HashSet<usize>,
    ) -> (Stress, HashSet<usize>) {
        let column_bases = self.column_bases(minimum_column_basis);
        let mut disconnected = self.too_few_numeric(options.disconnect_having_few_numeric_titers);
        disconnected.extend(extra_disconnected.iter().copied());
        // unmovable wins over disconnected
        for u in extra_unmovable {
            disconnected.remove(u);
        }
        let avidity_adjusts = AvidityAdjusts::none(self.number_of_points());
        let table_distances = TableDistances::compute(
            &self.titers,
            &column_bases,
            &avidity_adjusts,
            options.dodgy_titer_is_regular,
            &disconnected,
        );
        let stress = Stress::new(
            table_distances,
            self.number_of_points(),
            num_dims,
            extra_unmovable.clone(),
            HashSet::new(),
        );
        (stress, disconnected)
    }

    fn optimizer(method: Method) -> Box<dyn Optimizer + Send + Sync> {
        match method {
            Method::LbfgsPca => Box::new(LbfgsPca::default()),
            Method::CgPca => Box::new(CgPca),
        }
    }

    /// One randomize + rough-optimize (+ optional dimension anneal to
    /// `target_dims`) pass, producing a fresh, fully-optimized projection.
    fn one_start(
        &self,
        target_dims: usize,
        start_dims: usize,
        minimum_column_basis: f64,
        options: &RelaxOptions,
        randomizer: &LayoutRandomizerPlain,
        disconnected: &HashSet<usize>,
        unmovable: &HashSet<usize>,
    ) -> Result<Projection> {
        let optimizer = Self::optimizer(options.method);
        let (stress_start, _) =
            self.build_stress(start_dims, minimum_column_basis, options, disconnected, unmovable);

        let mut coords = vec![0.0; self.number_of_points() * start_dims];
        for p in 0..self.number_of_points() {
            if disconnected.contains(&p) {
                for d in 0..start_dims {
                    coords[p * start_dims + d] = f64::NAN;
                }
            } else {
                let point = randomizer.get(start_dims);
                coords[p * start_dims..(p + 1) * start_dims].copy_from_slice(&point);
            }
        }
        // zero any disconnected rows for the optimizer, then restore.
        let mut layout = Layout::from_flat(self.number_of_points(), start_dims, coords);
        {
            let mut guard = crate::layout::DisconnectedGuard::new(&mut layout, disconnected);
            let mut flat = guard.layout().as_flat().to_vec();
            optimizer.optimize(&stress_start, &mut flat, Precision::Rough)?;
            guard.layout().as_flat_mut().copy_from_slice(&flat);
        }

        let mut projection = Projection::new(self.number_of_points(), start_dims, minimum_column_basis);
        projection.set_disconnected(disconnected.clone());
        projection.set_unmovable(unmovable.clone());
        projection.set_layout(layout)?;

        if start_dims > target_dims {
            let projected = pca::project(projection.layout(), target_dims, disconnected)?;
            projection.set_layout(projected)?;
            projection.change_number_of_dimensions(target_dims);

            let (stress_fine, _) = self.build_stress(
                target_dims,
                minimum_column_basis,
                options,
                disconnected,
                unmovable,
            );
            let mut layout = projection.layout().clone();
            {
                let mut guard = crate::layout::DisconnectedGuard::new(&mut layout, disconnected);
                let mut flat = guard.layout().as_flat().to_vec();
                optimizer.optimize(&stress_fine, &mut flat, Precision::Fine)?;
                guard.layout().as_flat_mut().copy_from_slice(&flat);
            }
            projection.set_layout(layout)?;
            let final_value = stress_fine.value(projection.layout().as_flat());
            projection.set_final_stress(final_value);
        } else {
            let final_value = stress_start.value(projection.layout().as_flat());
            projection.set_final_stress(final_value);
        }
        projection.reset_transformation();
        Ok(projection)
    }

    /// Multi-start randomized optimization (§4.9).
    pub fn relax(
        &mut self,
        n: usize,
        minimum_column_basis: f64,
        target_dims: usize,
        options: &RelaxOptions,
        extra_disconnected: HashSet<usize>,
        extra_unmovable: HashSet<usize>,
    ) -> Result<()> {
        let start_dims = if options.dimension_annealing && target_dims < 5 {
            5
        } else {
            target_dims
        };

        let (_, disconnected) = self.build_stress(
            start_dims,
            minimum_column_basis,
            options,
            &extra_disconnected,
            &extra_unmovable,
        );
        let connected = self.number_of_points() - disconnected.len();
        if connected < 3 {
            return Err(ErrorKind::OptimizationError(format!(
                "at least 3 connected points are required to relax, got {connected}"
            )));
        }

        let column_bases = self.column_bases(minimum_column_basis);
        let sample_diameter = self.titers.max_distance(&column_bases).max(1.0);
        let sample_randomizer = LayoutRandomizerPlain::new(sample_diameter, options.seed)?;

        let pool = if let Some(n_threads) = options.num_threads {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n_threads)
                    .build()
                    .map_err(|e| ErrorKind::OptimizationError(e.to_string()))?,
            )
        } else {
            None
        };

        let run_all = |randomizer: &LayoutRandomizerPlain| -> Vec<Result<Projection>> {
            (0..n)
                .into_par_iter()
                .map(|_| {
                    self.one_start(
                        target_dims,
                        start_dims,
                        minimum_column_basis,
                        options,
                        randomizer,
                        &disconnected,
                        &extra_unmovable,
                    )
                })
                .collect()
        };

        let results = match pool {
            Some(p) => p.install(|| run_all(&sample_randomizer)),
            None => run_all(&sample_randomizer),
        };

        let mut projections = Projections::new();
        for r in results {
            projections.push(r?);
        }
        projections.sort();
        self.projections = projections;
        Ok(())
    }

    /// Incrementally relax a chart that just gained new (all-`NaN`)
    /// points, relative to `source` (§4.10).
    pub fn incremental_relax(
        &mut self,
        source: &Projection,
        n: usize,
        minimum_column_basis: f64,
        options: &RelaxOptions,
        caller_disconnected: HashSet<usize>,
        caller_unmovable: HashSet<usize>,
        keep_source: bool,
        fine_tune_top: Option<usize>,
    ) -> Result<()> {
        let target_dims = source.num_dims();
        let mut unmovable: HashSet<usize> = if caller_unmovable.is_empty() {
            (0..self.number_of_points())
                .filter(|&p| source.layout().point_has_coordinates(p))
                .collect()
        } else {
            caller_unmovable.clone()
        };
        unmovable.extend(caller_unmovable);

        let mut disconnected = caller_disconnected;
        disconnected.extend(self.too_few_numeric(options.disconnect_having_few_numeric_titers));
        for u in &unmovable {
            disconnected.remove(u);
        }

        let new_points: Vec<usize> = (0..self.number_of_points())
            .filter(|p| !source.layout().point_has_coordinates(*p) && !disconnected.contains(p))
            .collect();

        let column_bases = self.column_bases(minimum_column_basis);
        let sample_diameter = self.titers.max_distance(&column_bases).max(1.0);
        let randomizer = LayoutRandomizerPlain::new(sample_diameter, options.seed)?;
        let optimizer = Self::optimizer(options.method);

        let mut projections = Vec::with_capacity(n);
        for _ in 0..n {
            let mut layout = source.layout().clone();
            for &p in &new_points {
                let point = randomizer.get(target_dims);
                layout.set_point(p, &point);
            }
            let mut projection = source.clone();
            projection.set_disconnected(disconnected.clone());
            projection.set_unmovable(unmovable.clone());
            projection.set_layout(layout)?;

            let (stress, _) = self.build_stress(
                target_dims,
                minimum_column_basis,
                options,
                &disconnected,
                &unmovable,
            );
            let mut flat_layout = projection.layout().clone();
            {
                let mut guard = crate::layout::DisconnectedGuard::new(&mut flat_layout, &disconnected);
                let mut flat = guard.layout().as_flat().to_vec();
                optimizer.optimize(&stress, &mut flat, Precision::Rough)?;
                guard.layout().as_flat_mut().copy_from_slice(&flat);
            }
            projection.set_layout(flat_layout)?;
            let value = stress.value(projection.layout().as_flat());
            projection.set_final_stress(value);
            projections.push(projection);
        }

        let mut set = Projections::from_vec(projections);
        set.sort();
        if let Some(top) = fine_tune_top {
            let (stress, _) = self.build_stress(
                target_dims,
                minimum_column_basis,
                options,
                &disconnected,
                &unmovable,
            );
            for p in set.iter_mut().take(top) {
                let mut layout = p.layout().clone();
                let mut guard = crate::layout::DisconnectedGuard::new(&mut layout, &disconnected);
                let mut flat = guard.layout().as_flat().to_vec();
                optimizer.optimize(&stress, &mut flat, Precision::Fine)?;
                guard.layout().as_flat_mut().copy_from_slice(&flat);
                drop(guard);
                p.set_layout(layout)?;
                let value = stress.value(p.layout().as_flat());
                p.set_final_stress(value);
            }
            set.sort();
        }

        if keep_source {
            set.push(source.clone());
            set.sort();
        }
        self.projections = set;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::titer::Titer;
    use pretty_assertions::assert_eq;

    fn two_ag_one_sr(t0: Titer, t1: Titer) -> Chart {
        let mut titers = Titers::new_empty(2, 1);
        titers.set_titer(0, 0, t0).unwrap();
        titers.set_titer(1, 0, t1).unwrap();
        Chart::new(
            Info::default(),
            vec![Antigen::default(), Antigen::default()],
            vec![Serum::default()],
            titers,
        )
        .unwrap()
    }

    #[test]
    fn new_rejects_mismatched_shape() {
        let titers = Titers::new_empty(2, 1);
        let err = Chart::new(Info::default(), vec![Antigen::default()], vec![Serum::default()], titers);
        assert!(err.is_err());
    }

    #[test]
    fn column_bases_uses_forced_when_present() {
        let mut chart = two_ag_one_sr(Titer::Regular(40), Titer::Regular(80));
        chart.forced_column_bases = Some(ColumnBases::from_values(vec![9.0]));
        assert_eq!(chart.column_bases(0.0).get(0), 9.0);
    }

    #[test]
    fn relax_requires_at_least_three_connected_points() {
        let mut chart = two_ag_one_sr(Titer::Regular(40), Titer::Regular(80));
        let err = chart.relax(2, 0.0, 2, &RelaxOptions::default(), HashSet::new(), HashSet::new());
        assert!(err.is_err());
    }

    #[test]
    fn relax_produces_sorted_projections_for_a_small_chart() {
        let mut titers = Titers::new_empty(3, 1);
        titers.set_titer(0, 0, Titer::Regular(20)).unwrap();
        titers.set_titer(1, 0, Titer::Regular(40)).unwrap();
        titers.set_titer(2, 0, Titer::Regular(80)).unwrap();
        let mut chart = Chart::new(
            Info::default(),
            vec![Antigen::default(), Antigen::default(), Antigen::default()],
            vec![Serum::default()],
            titers,
        )
        .unwrap();

        let options = RelaxOptions {
            dimension_annealing: false,
            seed: Some(42),
            ..RelaxOptions::default()
        };
        chart
            .relax(4, 0.0, 1, &options, HashSet::new(), HashSet::new())
            .unwrap();

        assert_eq!(chart.projections.len(), 4);
        let stresses: Vec<f64> = chart.projections.iter().map(|p| p.stress().unwrap()).collect();
        let mut sorted = stresses.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(stresses, sorted);
    }
}
