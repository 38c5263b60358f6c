//! Error taxonomy for the antigenic cartography core.
//!
//! Every fallible operation in this crate returns a typed [`ErrorKind`]
//! rather than relying on panics or out-of-band state.

/// The kinds of errors the core library can report.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ErrorKind {
    /// A titer string did not match the `titer := "*" | digits | ("<"|">"|"~") digits` grammar.
    #[error("invalid titer: {0:?}")]
    InvalidTiter(String),

    /// `set_titer` was called on a `Titers` table that has one or more layers.
    #[error("titers cannot be modified: chart has layers")]
    TitersCannotBeModified,

    /// Layer-level data was requested on a chart that has no layers.
    #[error("data not available: {0}")]
    DataNotAvailable(String),

    /// Malformed projection, inconsistent sizes, or an out-of-range index.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The numerical kernel reported failure, non-convergence, or a non-finite value.
    #[error("optimization error: {0}")]
    OptimizationError(String),

    /// The homologous titer for a serum circle/coverage computation was unusable.
    #[error("serum coverage error: {0}")]
    SerumCoverageError(String),
}

/// Result type used throughout the core library.
pub type Result<T> = std::result::Result<T, ErrorKind>;
