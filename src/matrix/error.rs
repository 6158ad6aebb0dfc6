#[derive(Debug, thiserror::Error)]
pub enum CscError {
    #[error("column pointers length mismatch: expected {expected}, got {actual}")]
    InvalidColumnPointersLength { expected: usize, actual: usize },

    #[error("column pointer {index} invalid: expected {expected}, got {actual}")]
    InvalidColumnPointers {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("row indices / values length mismatch: {row_indices} indices, {values} values")]
    RowIndicesValuesLengthMismatch { row_indices: usize, values: usize },

    #[error("index {index} out of bounds (max {max})")]
    OutOfBoundsIndex { index: usize, max: usize },

    #[error("rows of column {index} not strictly increasing: {prev} then {actual}")]
    RowsNotStrictlyIncreasing {
        index: usize,
        prev: usize,
        actual: usize,
    },
}
