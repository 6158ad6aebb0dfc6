//! Frontal and contribution block data model. One factor block per
//! supercolumn holds the pivotal part (`LU1`, lower triangle L1 / upper
//! triangle U1), the sub-pivotal rows (`L2`, the tail rows of the same
//! buffer) and the transposed-stored non-pivot U part (`Ut2`):
//!
//! ```text
//!  +-------+---------------+
//!  |\      |               |
//!  | \ U1  |    (Ut2)'     |
//!  |   \   |               |
//!  | L1  \ |               |
//!  +-------+---------------+
//!  |       |
//!  |  L2   |
//!  +-------+
//! ```
//!
//! The Schur complement travels to ancestors as a [`ContribBlock`], shrinking
//! as pieces are absorbed until it is dropped.

use crate::entry::Entry;
use crate::lu::{LuError, LuResult};

/// Schur-complement piece passed from a descendant front to its ancestors.
/// `rows` / `columns` are the logical identities still alive; `row_loc` /
/// `col_loc` give each one's physical position in `values` (leading
/// dimension `ld`). `m` and `n` shrink as ancestors consume rows and
/// columns; a block with either at zero is freed.
#[derive(Debug)]
pub(crate) struct ContribBlock<T> {
    pub m: usize,
    pub n: usize,
    pub ld: usize,
    pub rows: Vec<usize>,
    pub row_loc: Vec<usize>,
    pub columns: Vec<usize>,
    pub col_loc: Vec<usize>,
    pub values: Vec<T>,
    /// With the only-child pipelining, the physical columns `0..num_cols_in_parent`
    /// are the ones the parent supercolumn will consume.
    pub num_cols_in_parent: usize,
    /// Set while an ancestor assembles: whether rows (L) or columns (U) of
    /// this block were consumed into the ancestor's pivot space.
    pub l_member: bool,
    pub u_member: bool,
}

pub(crate) fn allocate_contrib_block<T: Entry>(
    l_size: usize,
    u_size: usize,
) -> LuResult<ContribBlock<T>> {
    let len = l_size
        .checked_mul(u_size)
        .ok_or(LuError::too_large("contribution block"))?;
    Ok(ContribBlock {
        m: l_size,
        n: u_size,
        ld: l_size,
        rows: vec![0; l_size],
        row_loc: (0..l_size).collect(),
        columns: vec![0; u_size],
        col_loc: (0..u_size).collect(),
        values: vec![T::zero(); len],
        num_cols_in_parent: 0,
        l_member: false,
        u_member: false,
    })
}

/// One supercolumn's slice of the factor. `rows` holds pivot rows first
/// (`row_pivots_number` of them), non-pivot rows after; `cols` holds the
/// pivot columns first, then the non-pivot columns discovered by the U
/// assembly. `lu1` packs L1/U1 and L2 at leading dimension
/// [`FactorBlock::ld_l`]; `ut2` stores the non-pivot U part transposed at
/// leading dimension `non_pivot_cols_number`.
#[derive(Debug)]
pub(crate) struct FactorBlock<T> {
    pub valid: bool,
    pub row_pivots_number: usize,
    pub col_pivots_number: usize,
    pub non_pivot_rows_number: usize,
    pub non_pivot_cols_number: usize,
    pub rows: Vec<usize>,
    pub cols: Vec<usize>,
    pub lu1: Vec<T>,
    pub ut2: Vec<T>,
    pub contrib: Option<Box<ContribBlock<T>>>,
}

impl<T: Entry> FactorBlock<T> {
    pub fn invalid() -> Self {
        FactorBlock {
            valid: false,
            row_pivots_number: 0,
            col_pivots_number: 0,
            non_pivot_rows_number: 0,
            non_pivot_cols_number: 0,
            rows: Vec::new(),
            cols: Vec::new(),
            lu1: Vec::new(),
            ut2: Vec::new(),
            contrib: None,
        }
    }

    /// Leading dimension of `lu1` once compressed: all assembled rows.
    pub fn ld_l(&self) -> usize {
        self.row_pivots_number + self.non_pivot_rows_number
    }

    pub fn pivot_rows(&self) -> &[usize] {
        &self.rows[..self.row_pivots_number]
    }

    pub fn non_pivot_rows(&self) -> &[usize] {
        &self.rows[self.row_pivots_number..self.row_pivots_number + self.non_pivot_rows_number]
    }

    pub fn pivot_cols(&self) -> &[usize] {
        &self.cols[..self.col_pivots_number]
    }

    pub fn non_pivot_cols(&self) -> &[usize] {
        &self.cols[self.col_pivots_number..self.col_pivots_number + self.non_pivot_cols_number]
    }

    /// The sub-pivotal row block: the tail rows of `lu1`, same leading
    /// dimension. Kernel callers index it as `non_pivot_rows_number x
    /// col_pivots_number` at `ld_l()`.
    pub fn l2(&self) -> &[T] {
        &self.lu1[self.row_pivots_number..]
    }
}
