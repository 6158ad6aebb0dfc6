#[derive(Debug, thiserror::Error)]
pub enum LuError {
    // --- Input validation ---
    #[error("factorization only supports square matrices (nrows={nrows}, ncols={ncols})")]
    NonSquareMatrix { nrows: usize, ncols: usize },

    #[error("column order must be a permutation of 0..{n} (length {actual})")]
    BadPermutation { n: usize, actual: usize },

    #[error("column {column} of the input matrix is empty")]
    EmptyColumn { column: usize },

    #[error("the input matrix has no columns")]
    EmptyMatrix,

    #[error("leading dimension too small: ld={ld}, need at least {required}")]
    BadLeadingDimension { ld: usize, required: usize },

    #[error(
        "right-hand side too small: need at least ld*nrhs = {required} entries, got {actual}"
    )]
    RhsTooSmall { required: usize, actual: usize },

    #[error("pivot threshold must lie in (0, 1], got {threshold}")]
    BadThreshold { threshold: f64 },

    // --- Numeric failure ---
    #[error("no acceptable pivot in supercolumn {supercolumn}; matrix is singular or too ill-conditioned for the threshold")]
    SingularBlock { supercolumn: usize },

    // --- Sizing ---
    #[error("problem too large: {context}")]
    TooLarge { context: &'static str },

    // --- Runtime ---
    #[error("failed to start worker pool: {0}")]
    ThreadPool(String),
}

pub type LuResult<T> = Result<T, LuError>;

impl LuError {
    pub(crate) fn too_large(context: &'static str) -> Self {
        Self::TooLarge { context }
    }
}
