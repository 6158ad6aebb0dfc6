use crate::entry::Entry;
use crate::matrix::error::CscError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dim {
    pub nrows: usize,
    pub ncols: usize,
}

/// Compressed Sparse Column matrix
/// - column pointers are the indices of the start and end of each column
/// - row indices are the indices of the rows of the non zero values
/// - values are the non zero values
#[derive(Debug, Clone)]
pub struct CscMatrix<T> {
    pub dim: Dim,
    /// Column pointers, len = ncols + 1
    pub column_pointers: Vec<usize>,
    /// Row indices, len = nnz
    pub row_indices: Vec<usize>,
    /// Nonzero values, len = nnz
    pub values: Vec<T>,
}

impl<T: Entry> CscMatrix<T> {
    /// number of non zero values
    pub fn nnz(&self) -> usize {
        self.row_indices.len()
    }

    pub fn is_square(&self) -> bool {
        self.dim.nrows == self.dim.ncols
    }

    pub fn col_start(&self, j: usize) -> usize {
        self.column_pointers[j]
    }

    pub fn col_end(&self, j: usize) -> usize {
        self.column_pointers[j + 1]
    }

    pub fn row_index(&self, p: usize) -> usize {
        self.row_indices[p]
    }

    pub fn value(&self, p: usize) -> T {
        self.values[p]
    }

    pub fn check_invariants(&self) -> Result<(), CscError> {
        if self.column_pointers.len() != self.dim.ncols + 1 {
            return Err(CscError::InvalidColumnPointersLength {
                expected: self.dim.ncols + 1,
                actual: self.column_pointers.len(),
            });
        }
        if self.column_pointers[0] != 0 {
            return Err(CscError::InvalidColumnPointers {
                index: 0,
                expected: 0,
                actual: self.column_pointers[0],
            });
        }
        if *self.column_pointers.last().unwrap() != self.nnz() {
            return Err(CscError::InvalidColumnPointers {
                index: self.dim.ncols,
                expected: self.nnz(),
                actual: *self.column_pointers.last().unwrap(),
            });
        }
        if self.row_indices.len() != self.values.len() {
            return Err(CscError::RowIndicesValuesLengthMismatch {
                row_indices: self.row_indices.len(),
                values: self.values.len(),
            });
        }
        // per-column sorted & in-range
        for j in 0..self.dim.ncols {
            let (start, end) = (self.column_pointers[j], self.column_pointers[j + 1]);
            if start > end || end > self.nnz() {
                return Err(CscError::InvalidColumnPointers {
                    index: j,
                    expected: start,
                    actual: end,
                });
            }
            let mut prev = None;
            for &r in &self.row_indices[start..end] {
                if r >= self.dim.nrows {
                    return Err(CscError::OutOfBoundsIndex {
                        index: r,
                        max: self.dim.nrows,
                    });
                }
                if let Some(p) = prev {
                    if r <= p {
                        return Err(CscError::RowsNotStrictlyIncreasing {
                            index: j,
                            prev: p,
                            actual: r,
                        });
                    }
                }
                prev = Some(r);
            }
        }
        Ok(())
    }

    /// Return (row_indices, values) slices for column j
    pub fn col(&self, j: usize) -> (&[usize], &[T]) {
        let (s, e) = (self.column_pointers[j], self.column_pointers[j + 1]);
        (&self.row_indices[s..e], &self.values[s..e])
    }

    /// y += alpha * A(:, j) scattered into a dense vector.
    pub fn axpy_into_dense_col(&self, j: usize, x: T, y: &mut [T]) {
        let (rows, vals) = self.col(j);
        for (&i, &a) in rows.iter().zip(vals.iter()) {
            y[i] += x * a;
        }
    }

    /// Transpose into a new CSC matrix. O(n + nnz) with counting sort by row;
    /// output columns come out with strictly increasing row indices.
    pub fn transpose(&self) -> CscMatrix<T> {
        let m = self.dim.nrows;
        let n = self.dim.ncols;
        let nnz = self.nnz();

        let mut column_pointers = vec![0usize; m + 1];
        for &r in &self.row_indices {
            column_pointers[r + 1] += 1;
        }
        for i in 0..m {
            column_pointers[i + 1] += column_pointers[i];
        }

        let mut row_indices = vec![0usize; nnz];
        let mut values = vec![T::zero(); nnz];
        let mut next = column_pointers.clone();

        for j in 0..n {
            let (rows, vals) = self.col(j);
            for (&r, &v) in rows.iter().zip(vals.iter()) {
                let p = next[r];
                row_indices[p] = j;
                values[p] = v;
                next[r] += 1;
            }
        }

        CscMatrix {
            dim: Dim {
                nrows: n,
                ncols: m,
            },
            column_pointers,
            row_indices,
            values,
        }
    }

    /// Replace every row index `r` with `new_of_old[r]`, keeping values in
    /// place, then restore per-column row ordering.
    pub fn permute_rows_inplace(&mut self, new_of_old: &[usize]) {
        debug_assert_eq!(new_of_old.len(), self.dim.nrows);
        for r in self.row_indices.iter_mut() {
            *r = new_of_old[*r];
        }
        self.sort_columns();
    }

    /// Sort row indices (and paired values) within each column.
    pub fn sort_columns(&mut self) {
        for j in 0..self.dim.ncols {
            let (s, e) = (self.column_pointers[j], self.column_pointers[j + 1]);
            let mut entries: Vec<(usize, T)> = self.row_indices[s..e]
                .iter()
                .copied()
                .zip(self.values[s..e].iter().copied())
                .collect();
            entries.sort_unstable_by_key(|&(r, _)| r);
            for (k, (r, v)) in entries.into_iter().enumerate() {
                self.row_indices[s + k] = r;
                self.values[s + k] = v;
            }
        }
    }
}

/// Builder from triplets (COO -> canonical CSC).
///
/// Usage:
///   let mut b = CscBuilder::new(nrows, ncols);
///   b.push(col, row, v)?; ...
///   let a = b.build()?;  // sorted rows per col, duplicates summed, zeros dropped
#[derive(Debug)]
pub struct CscBuilder<T> {
    dim: Dim,
    /// (column, row, value) triplets
    entries: Vec<(usize, usize, T)>,
}

impl<T: Entry> CscBuilder<T> {
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self {
            dim: Dim { nrows, ncols },
            entries: Vec::new(),
        }
    }

    pub fn reserve(&mut self, nnz: usize) {
        self.entries.reserve(nnz);
    }

    /// push a COO (column, row, value) tuple
    pub fn push(&mut self, column: usize, row: usize, value: T) -> Result<(), CscError> {
        if column >= self.dim.ncols {
            return Err(CscError::OutOfBoundsIndex {
                index: column,
                max: self.dim.ncols,
            });
        }
        if row >= self.dim.nrows {
            return Err(CscError::OutOfBoundsIndex {
                index: row,
                max: self.dim.nrows,
            });
        }

        if value != T::zero() {
            self.entries.push((column, row, value));
        }

        Ok(())
    }

    pub fn build(mut self) -> Result<CscMatrix<T>, CscError> {
        let n = self.dim.ncols;

        self.entries.sort_by_key(|&(c, r, _)| (c, r));

        // Combine duplicates and drop zeros
        let mut combined: Vec<(usize, usize, T)> = Vec::with_capacity(self.entries.len());
        for &(c, r, v) in &self.entries {
            match combined.last_mut() {
                Some(&mut (lc, lr, ref mut acc)) if lc == c && lr == r => *acc += v,
                _ => combined.push((c, r, v)),
            }
        }
        combined.retain(|&(_, _, v)| v != T::zero());

        // Build CSC arrays with a counting pass then placement pass
        let mut column_pointers = vec![0usize; n + 1];
        for &(c, _r, _v) in &combined {
            column_pointers[c + 1] += 1;
        }
        for j in 0..n {
            column_pointers[j + 1] += column_pointers[j];
        }

        let nnz = combined.len();
        let mut row_indices = vec![0usize; nnz];
        let mut values = vec![T::zero(); nnz];
        let mut next = column_pointers.clone();
        for (c, r, v) in combined {
            let p = next[c];
            row_indices[p] = r;
            values[p] = v;
            next[c] += 1;
        }

        let a = CscMatrix {
            dim: self.dim,
            column_pointers,
            row_indices,
            values,
        };
        debug_assert!(a.check_invariants().is_ok());
        Ok(a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_access() {
        // A = [ 10  0  3
        //       0 20  0
        //       2  0 30 ]
        let mut b = CscBuilder::new(3, 3);
        b.push(0, 0, 10.0).unwrap();
        b.push(2, 0, 3.0).unwrap();
        b.push(1, 1, 20.0).unwrap();
        b.push(0, 2, 2.0).unwrap();
        b.push(2, 2, 30.0).unwrap();
        // also push a duplicate to test combine
        b.push(2, 2, 5.0).unwrap();

        let a = b.build().unwrap();
        assert_eq!(a.nnz(), 5); // 5 unique nonzeros after combine

        // Column 0 -> rows [0,2] vals [10,2]
        let (r0, v0) = a.col(0);
        assert_eq!(r0, &[0, 2]);
        assert_eq!(v0, &[10.0, 2.0]);

        // Column 2 -> rows [0,2] vals [3,35]
        let (r2, v2) = a.col(2);
        assert_eq!(r2, &[0, 2]);
        assert_eq!(v2, &[3.0, 35.0]);

        assert!(a.check_invariants().is_ok());
    }

    #[test]
    fn transpose_roundtrip() {
        let mut b = CscBuilder::new(3, 3);
        // A = [ 1  2  0
        //       0  0  0
        //       0  3  0 ]
        b.push(0, 0, 1.0).unwrap();
        b.push(1, 0, 2.0).unwrap();
        b.push(1, 2, 3.0).unwrap();
        let a = b.build().unwrap();
        let at = a.transpose();
        assert!(at.check_invariants().is_ok());
        assert_eq!(at.nnz(), a.nnz());

        // (A^T)^T == A
        let att = at.transpose();
        assert_eq!(att.column_pointers, a.column_pointers);
        assert_eq!(att.row_indices, a.row_indices);
        assert_eq!(att.values, a.values);

        // entry (0, 1) of A is entry (1, 0) of A^T
        let (rows, vals) = at.col(0);
        assert_eq!(rows, &[0, 1]);
        assert_eq!(vals, &[1.0, 2.0]);
    }

    #[test]
    fn permute_rows_keeps_columns_sorted() {
        let mut b = CscBuilder::new(3, 2);
        b.push(0, 0, 1.0).unwrap();
        b.push(0, 1, 2.0).unwrap();
        b.push(1, 2, 3.0).unwrap();
        let mut a = b.build().unwrap();

        // rotate rows 0 -> 2 -> 1 -> 0
        a.permute_rows_inplace(&[2, 0, 1]);
        assert!(a.check_invariants().is_ok());
        let (rows, vals) = a.col(0);
        assert_eq!(rows, &[0, 2]);
        assert_eq!(vals, &[2.0, 1.0]);
    }
}
