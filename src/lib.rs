//! Sparse unsymmetric LU factorization by the multifrontal method.
//!
//! Given a square matrix in compressed-column form and a column preordering,
//! the crate computes `P * A * Q = L * U` with threshold partial pivoting,
//! packed as a sequence of dense factor blocks indexed by a supercolumn
//! elimination tree, and solves linear systems against that factor.
//!
//! The pipeline mirrors the usual analyze / factor / solve split:
//!
//! ```text
//! let symbolic = mflu::symbolic_factor(&a, &order)?;
//! let factor = mflu::numeric_factor(&a, &symbolic, 1.0, 0, nproc)?;
//! factor.solve_one(&mut x, &b)?;
//! ```

pub mod dense;
pub mod entry;
pub mod lu;
pub mod matrix;
pub mod union_find;

pub use entry::Entry;
pub use lu::{
    CcsFactor, Factor, LuError, LuResult, Symbolic, factor_lu, numeric_factor, symbolic_factor,
};
pub use matrix::csc::{CscBuilder, CscMatrix, Dim};
