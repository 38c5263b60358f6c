//! Antigenic cartography: chart model, stress optimization, and map
//! relaxation for HI/neutralization titer tables.

pub mod ace;
pub mod chart;
pub mod column_bases;
pub mod common;
pub mod err;
pub mod export;
pub mod grid_test;
pub mod layout;
pub mod optimize;
pub mod pca;
pub mod projection;
pub mod projections;
pub mod randomizer;
pub mod serum_circle;
pub mod serum_coverage;
pub mod stress;
pub mod table_distances;
pub mod titer;
pub mod titers;

pub use chart::Chart;
pub use err::{ErrorKind, Result};
pub use titer::Titer;
