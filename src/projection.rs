//! One optimization result: a layout plus the constraints and bookkeeping
//! that produced it.

use std::collections::HashSet;

use crate::column_bases::ColumnBases;
use crate::err::{ErrorKind, Result};
use crate::layout::Layout;
use crate::table_distances::{AvidityAdjusts, DodgyTiterIsRegular};

/// A `num_dims x num_dims` affine transform (rotation/reflection) plus
/// translation, applied to a layout only for display/export — the
/// stored coordinates themselves are never mutated by it.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformation {
    num_dims: usize,
    /// Row-major `num_dims x num_dims` matrix.
    matrix: Vec<f64>,
    translation: Vec<f64>,
}

impl Transformation {
    pub fn identity(num_dims: usize) -> Transformation {
        let mut matrix = vec![0.0; num_dims * num_dims];
        for i in 0..num_dims {
            matrix[i * num_dims + i] = 1.0;
        }
        Transformation {
            num_dims,
            matrix,
            translation: vec![0.0; num_dims],
        }
    }

    pub fn from_flat(num_dims: usize, matrix: Vec<f64>, translation: Vec<f64>) -> Transformation {
        assert_eq!(matrix.len(), num_dims * num_dims);
        assert_eq!(translation.len(), num_dims);
        Transformation {
            num_dims,
            matrix,
            translation,
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Transformation::identity(self.num_dims)
    }

    pub fn matrix(&self) -> &[f64] {
        &self.matrix
    }

    pub fn translation(&self) -> &[f64] {
        &self.translation
    }

    fn apply_point(&self, point: &[f64]) -> Vec<f64> {
        (0..self.num_dims)
            .map(|row| {
                let mut acc = self.translation[row];
                for col in 0..self.num_dims {
                    acc += self.matrix[row * self.num_dims + col] * point[col];
                }
                acc
            })
            .collect()
    }

    /// Apply this transform to every point of `layout`, producing a new
    /// layout (disconnected rows stay `NaN`).
    pub fn apply(&self, layout: &Layout) -> Layout {
        let mut out = Layout::new_disconnected(layout.num_points(), self.num_dims);
        for p in 0..layout.num_points() {
            if layout.point_has_coordinates(p) {
                out.set_point(p, &self.apply_point(layout.row(p)));
            }
        }
        out
    }
}

/// One projection: a layout together with the constraints it was
/// optimized under.
#[derive(Debug, Clone)]
pub struct Projection {
    layout: Layout,
    transformation: Transformation,
    minimum_column_basis: f64,
    forced_column_bases: Option<ColumnBases>,
    disconnected: HashSet<usize>,
    unmovable: HashSet<usize>,
    unmovable_in_last_dimension: HashSet<usize>,
    avidity_adjusts: AvidityAdjusts,
    dodgy_titer_is_regular: DodgyTiterIsRegular,
    stress: Option<f64>,
    comment: String,
}

impl Projection {
    /// An empty projection (all points disconnected), ready for
    /// randomization.
    pub fn new(num_points: usize, num_dims: usize, minimum_column_basis: f64) -> Projection {
        Projection {
            layout: Layout::new_disconnected(num_points, num_dims),
            transformation: Transformation::identity(num_dims),
            minimum_column_basis,
            forced_column_bases: None,
            disconnected: HashSet::new(),
            unmovable: HashSet::new(),
            unmovable_in_last_dimension: HashSet::new(),
            avidity_adjusts: AvidityAdjusts::none(num_points),
            dodgy_titer_is_regular: DodgyTiterIsRegular::No,
            stress: None,
            comment: String::new(),
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn num_dims(&self) -> usize {
        self.layout.num_dims()
    }

    pub fn num_points(&self) -> usize {
        self.layout.num_points()
    }

    pub fn minimum_column_basis(&self) -> f64 {
        self.minimum_column_basis
    }

    pub fn forced_column_bases(&self) -> Option<&ColumnBases> {
        self.forced_column_bases.as_ref()
    }

    pub fn disconnected(&self) -> &HashSet<usize> {
        &self.disconnected
    }

    pub fn unmovable(&self) -> &HashSet<usize> {
        &self.unmovable
    }

    pub fn unmovable_in_last_dimension(&self) -> &HashSet<usize> {
        &self.unmovable_in_last_dimension
    }

    pub fn avidity_adjusts(&self) -> &AvidityAdjusts {
        &self.avidity_adjusts
    }

    pub fn dodgy_titer_is_regular(&self) -> DodgyTiterIsRegular {
        self.dodgy_titer_is_regular
    }

    pub fn transformation(&self) -> &Transformation {
        &self.transformation
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// The cached final stress, if one has been set by an optimizer run.
    pub fn stress(&self) -> Option<f64> {
        self.stress
    }

    /// The layout with the current transformation applied (what gets
    /// plotted/exported).
    pub fn transformed_layout(&self) -> Layout {
        if self.transformation.is_identity() {
            self.layout.clone()
        } else {
            self.transformation.apply(&self.layout)
        }
    }

    /// Replace the layout wholesale (e.g. after randomization or
    /// optimization) and invalidate the cached stress.
    pub fn set_layout(&mut self, layout: Layout) -> Result<()> {
        if layout.num_points() != self.num_points() {
            return Err(ErrorKind::InvalidData(format!(
                "layout has {} points, projection expects {}",
                layout.num_points(),
                self.num_points()
            )));
        }
        self.layout = layout;
        self.stress = None;
        Ok(())
    }

    /// Generic mutation entry point: invalidates the cached stress and
    /// the as-exported transformed layout, per the spec's "modify()"
    /// contract.
    pub fn modify(&mut self, f: impl FnOnce(&mut Layout)) {
        f(&mut self.layout);
        self.stress = None;
    }

    pub fn set_transformation(&mut self, transformation: Transformation) {
        self.transformation = transformation;
    }

    pub fn reset_transformation(&mut self) {
        self.transformation = Transformation::identity(self.layout.num_dims());
    }

    pub fn set_final_stress(&mut self, stress: f64) {
        self.stress = Some(stress);
    }

    pub fn set_disconnected(&mut self, disconnected: HashSet<usize>) {
        self.disconnected = disconnected;
    }

    pub fn extend_disconnected(&mut self, more: impl IntoIterator<Item = usize>) {
        self.disconnected.extend(more);
    }

    pub fn set_unmovable(&mut self, unmovable: HashSet<usize>) {
        self.unmovable = unmovable;
    }

    pub fn set_unmovable_in_last_dimension(&mut self, points: HashSet<usize>) {
        self.unmovable_in_last_dimension = points;
    }

    pub fn set_forced_column_bases(&mut self, cb: Option<ColumnBases>) {
        self.forced_column_bases = cb;
    }

    pub fn set_avidity_adjusts(&mut self, aa: AvidityAdjusts) {
        self.avidity_adjusts = aa;
    }

    pub fn set_dodgy_titer_is_regular(&mut self, value: DodgyTiterIsRegular) {
        self.dodgy_titer_is_regular = value;
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = comment.into();
    }

    /// Change the number of dimensions of the *current* layout coordinates
    /// (used after dimension annealing). Callers are responsible for
    /// supplying a replacement layout of the new dimensionality via
    /// [`Projection::set_layout`]; this only updates the transformation
    /// so it stays an identity of matching size.
    pub fn change_number_of_dimensions(&mut self, num_dims: usize) {
        self.transformation = Transformation::identity(num_dims);
    }
}
