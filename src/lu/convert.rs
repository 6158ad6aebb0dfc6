//! Materialize the blocked factor as plain compressed-column triangles:
//! walk the blocks to build the row and column orders from the concatenated
//! pivot lists, count the nonzeros, write U through its transpose (per-row
//! sweeps across the diagonal triangle and `Ut2`), and write L with an
//! explicit unit diagonal; then map both through the permutations.

use crate::entry::Entry;
use crate::lu::{Factor, LuResult};
use crate::matrix::csc::{CscMatrix, Dim};

/// The factorization in compressed-column form: `L` unit lower triangular
/// (diagonal stored), `U` upper triangular, both indexed by pivot position,
/// plus the row and column orders mapping positions back to original
/// indices.
#[derive(Debug, Clone)]
pub struct CcsFactor<T> {
    pub l: CscMatrix<T>,
    pub u: CscMatrix<T>,
    /// `row_order[k]` is the original row selected as the k'th pivot row.
    pub row_order: Vec<usize>,
    /// `col_order[k]` is the original column factored at position k.
    pub col_order: Vec<usize>,
}

impl<T: Entry> Factor<T> {
    /// Convert the blocked factor to CCS `L` and `U` with their orders.
    pub fn to_ccs(&self) -> LuResult<CcsFactor<T>> {
        let n = self.n;
        let m = self.m;

        let mut col_order = Vec::with_capacity(n);
        let mut row_order = Vec::with_capacity(m);
        for block in &self.blocks {
            col_order.extend_from_slice(block.pivot_cols());
            row_order.extend_from_slice(block.pivot_rows());
        }
        debug_assert_eq!(col_order.len(), n);
        debug_assert_eq!(row_order.len(), m);

        let mut l_nnz = 0usize;
        let mut ut_nnz = 0usize;
        for block in &self.blocks {
            let pl = block.row_pivots_number;
            let pu = block.col_pivots_number;
            let rl = block.non_pivot_rows_number;
            let ru = block.non_pivot_cols_number;
            l_nnz += (1 + pl) * pl / 2 + (pu - pl) + rl * pu;
            ut_nnz += (1 + 2 * pu - pl) * pl / 2 + ru * pl;
        }

        // U is packed through its transpose: one Ut column per pivot row.
        let mut ut_colptr = vec![0usize; m + 1];
        let mut ut_rowind = vec![0usize; ut_nnz];
        let mut ut_values = vec![T::zero(); ut_nnz];

        let mut col = 0usize;
        let mut loc_u = 0usize;
        for block in &self.blocks {
            let pl = block.row_pivots_number;
            let pu = block.col_pivots_number;
            let ru = block.non_pivot_cols_number;
            let u_size = pu + ru;
            let ld_l = block.ld_l();
            let ld_u = ru;

            ut_colptr[col] = loc_u;
            for j in 1..pl {
                ut_colptr[col + j] = ut_colptr[col + j - 1] + (u_size - j + 1);
            }

            // Pivotal part: the upper triangle of LU1, row by row.
            for j in 0..pl {
                for k in 0..=j {
                    ut_values[ut_colptr[col + k] + j - k] = block.lu1[j * ld_l + k];
                }
            }

            // Index lists and the Ut2 tails.
            for j in 0..pl {
                let at = ut_colptr[col + j];
                ut_rowind[at..at + (u_size - j)].copy_from_slice(&block.cols[j..u_size]);
                ut_values[at + pu - j..at + u_size - j]
                    .copy_from_slice(&block.ut2[j * ld_u..j * ld_u + ru]);
            }

            if pl > 0 {
                loc_u = ut_colptr[col + pl - 1] + (u_size - (pl - 1));
            }
            col += pl;
        }
        debug_assert_eq!(loc_u, ut_nnz);
        debug_assert_eq!(col, m);
        ut_colptr[m] = ut_nnz;

        let mut ut = CscMatrix {
            dim: Dim { nrows: n, ncols: m },
            column_pointers: ut_colptr,
            row_indices: ut_rowind,
            values: ut_values,
        };

        // Ut's row indices are original column numbers; turn them into
        // pivot positions, then transpose to get U.
        let mut col_pos = vec![0usize; n];
        for (k, &c) in col_order.iter().enumerate() {
            col_pos[c] = k;
        }
        ut.permute_rows_inplace(&col_pos);
        let u = ut.transpose();

        // L, with the unit diagonal written explicitly.
        let mut l_colptr = vec![0usize; n + 1];
        let mut l_rowind = vec![0usize; l_nnz];
        let mut l_values = vec![T::zero(); l_nnz];

        let mut col = 0usize;
        let mut loc_l = 0usize;
        for block in &self.blocks {
            let pl = block.row_pivots_number;
            let total = pl + block.non_pivot_rows_number;
            let ld_l = block.ld_l();

            let mut l_size = total;
            for j in 0..pl {
                l_colptr[col + j] = loc_l;
                l_rowind[loc_l..loc_l + l_size].copy_from_slice(&block.rows[j..total]);
                l_values[loc_l] = T::one();
                l_values[loc_l + 1..loc_l + l_size]
                    .copy_from_slice(&block.lu1[j * ld_l + j + 1..j * ld_l + total]);
                loc_l += l_size;
                l_size -= 1;
            }

            col += block.col_pivots_number;
        }
        debug_assert_eq!(loc_l, l_nnz);
        debug_assert_eq!(col, n);
        l_colptr[n] = l_nnz;

        let mut l = CscMatrix {
            dim: Dim { nrows: m, ncols: n },
            column_pointers: l_colptr,
            row_indices: l_rowind,
            values: l_values,
        };

        let mut row_pos = vec![0usize; m];
        for (k, &r) in row_order.iter().enumerate() {
            row_pos[r] = k;
        }
        l.permute_rows_inplace(&row_pos);

        Ok(CcsFactor {
            l,
            u,
            row_order,
            col_order,
        })
    }
}

impl<T: Entry> CcsFactor<T> {
    /// Solve `A x = b` by permuted sparse triangular substitution; the
    /// cross-check path for the blocked solver.
    pub fn solve_one(&self, x: &mut [T], b: &[T]) {
        let n = self.l.dim.ncols;

        let mut y: Vec<T> = (0..n).map(|i| b[self.row_order[i]]).collect();

        // L y = P b; the diagonal is the first entry of each sorted column.
        for col in 0..n {
            let (rows, vals) = self.l.col(col);
            debug_assert_eq!(rows[0], col);
            let ycol = y[col] / vals[0];
            y[col] = ycol;
            for t in 1..rows.len() {
                let upd = vals[t] * ycol;
                y[rows[t]] -= upd;
            }
        }

        // U z = y; the diagonal is the last entry of each sorted column.
        for col in (0..n).rev() {
            let (rows, vals) = self.u.col(col);
            let last = rows.len() - 1;
            debug_assert_eq!(rows[last], col);
            let zcol = y[col] / vals[last];
            y[col] = zcol;
            for t in 0..last {
                let upd = vals[t] * zcol;
                y[rows[t]] -= upd;
            }
        }

        for i in 0..n {
            x[self.col_order[i]] = y[i];
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::lu::factor_lu;
    use crate::matrix::csc::{CscBuilder, CscMatrix};

    fn dense_of(a: &CscMatrix<f64>) -> ndarray::Array2<f64> {
        let mut out = ndarray::Array2::zeros((a.dim.nrows, a.dim.ncols));
        for j in 0..a.dim.ncols {
            let (rows, vals) = a.col(j);
            for (&r, &v) in rows.iter().zip(vals.iter()) {
                out[[r, j]] += v;
            }
        }
        out
    }

    #[test]
    fn two_by_two_produces_expected_triangles() {
        // A = [[4, 3], [6, 3]]; full partial pivoting picks row 1 first.
        let mut b = CscBuilder::new(2, 2);
        b.push(0, 0, 4.0).unwrap();
        b.push(0, 1, 6.0).unwrap();
        b.push(1, 0, 3.0).unwrap();
        b.push(1, 1, 3.0).unwrap();
        let a = b.build().unwrap();

        let f = factor_lu(&a, &[0, 1], 1.0, 1).unwrap();
        let ccs = f.to_ccs().unwrap();

        assert_eq!(ccs.row_order, vec![1, 0]);
        assert_eq!(ccs.col_order, vec![0, 1]);

        let l = dense_of(&ccs.l);
        let u = dense_of(&ccs.u);
        assert!((l[[0, 0]] - 1.0).abs() < 1e-15);
        assert!((l[[1, 0]] - 2.0 / 3.0).abs() < 1e-15);
        assert!((l[[1, 1]] - 1.0).abs() < 1e-15);
        assert!(l[[0, 1]].abs() < 1e-15);
        assert!((u[[0, 0]] - 6.0).abs() < 1e-15);
        assert!((u[[0, 1]] - 3.0).abs() < 1e-15);
        assert!((u[[1, 1]] - 1.0).abs() < 1e-15);
        assert!(u[[1, 0]].abs() < 1e-15);

        // solve through the CCS path
        let mut x = vec![0.0; 2];
        ccs.solve_one(&mut x, &[7.0, 10.0]);
        assert!((x[0] - 1.0).abs() < 1e-14);
        assert!((x[1] - 1.0).abs() < 1e-14);
    }

    #[test]
    fn diag_produces_identity_l() {
        let mut b = CscBuilder::new(4, 4);
        for (i, v) in [2.0, 3.0, 5.0, 7.0].into_iter().enumerate() {
            b.push(i, i, v).unwrap();
        }
        let a = b.build().unwrap();
        let order: Vec<usize> = (0..4).collect();

        let f = factor_lu(&a, &order, 1.0, 1).unwrap();
        let ccs = f.to_ccs().unwrap();

        let l = dense_of(&ccs.l);
        let u = dense_of(&ccs.u);
        let diag = [2.0, 3.0, 5.0, 7.0];
        for i in 0..4 {
            for j in 0..4 {
                let want_l = if i == j { 1.0 } else { 0.0 };
                assert!((l[[i, j]] - want_l).abs() < 1e-15);
                let want_u = if i == j {
                    diag[ccs.col_order[i]]
                } else {
                    0.0
                };
                assert!((u[[i, j]] - want_u).abs() < 1e-15);
            }
        }
    }

    #[test]
    fn ccs_solve_agrees_with_blocked_solve() {
        let n = 20;
        let mut b = CscBuilder::new(n, n);
        for i in 0..n {
            b.push(i, i, 6.0).unwrap();
            if i > 0 {
                b.push(i, i - 1, 2.0).unwrap();
                b.push(i - 1, i, -1.0).unwrap();
            }
            if i >= 5 {
                b.push(i, i - 5, 0.5).unwrap();
            }
        }
        let a = b.build().unwrap();
        let order: Vec<usize> = (0..n).collect();
        let f = factor_lu(&a, &order, 1.0, 1).unwrap();
        let ccs = f.to_ccs().unwrap();

        let rhs: Vec<f64> = (0..n).map(|i| (i as f64) - 7.5).collect();
        let mut x_blocked = vec![0.0; n];
        f.solve_one(&mut x_blocked, &rhs).unwrap();
        let mut x_ccs = vec![0.0; n];
        ccs.solve_one(&mut x_ccs, &rhs);

        for j in 0..n {
            assert!(
                (x_blocked[j] - x_ccs[j]).abs() < 1e-12,
                "row {j}: {} vs {}",
                x_blocked[j],
                x_ccs[j]
            );
        }
    }
}
