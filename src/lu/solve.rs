//! Blocked forward/back substitution over the factor-block sequence.
//!
//! Forward pass (`L y = P b`): walk the blocks in order, gather the pivot
//! rows of the right-hand side, solve against `L1`, and push the `L2` update
//! back into the untouched rows. Back pass (`U z = y`, `x = Q z`): walk in
//! reverse, fold in the non-pivot column updates through `Ut2`, solve
//! against `U1`, and scatter into the output at the pivot columns.

use crate::dense;
use crate::entry::Entry;
use crate::lu::{Factor, LuError, LuResult};

impl<T: Entry> Factor<T> {
    /// Solve `A x = b` for a single right-hand side.
    pub fn solve_one(&self, x: &mut [T], b: &[T]) -> LuResult<()> {
        self.solve_many(1, x, self.n, b, self.m)
    }

    /// Solve `A X = B` for `nrhs` right-hand sides. `B` is `m x nrhs`
    /// column-major with leading dimension `ld_b`; the solution lands in `X`
    /// (`n x nrhs`, leading dimension `ld_x`).
    pub fn solve_many(
        &self,
        nrhs: usize,
        x: &mut [T],
        ld_x: usize,
        b: &[T],
        ld_b: usize,
    ) -> LuResult<()> {
        if ld_b < self.m {
            return Err(LuError::BadLeadingDimension {
                ld: ld_b,
                required: self.m,
            });
        }
        if ld_x < self.n {
            return Err(LuError::BadLeadingDimension {
                ld: ld_x,
                required: self.n,
            });
        }
        if nrhs == 0 {
            return Ok(());
        }
        let b_needed = (nrhs - 1) * ld_b + self.m;
        if b.len() < b_needed {
            return Err(LuError::RhsTooSmall {
                required: b_needed,
                actual: b.len(),
            });
        }
        let x_needed = (nrhs - 1) * ld_x + self.n;
        if x.len() < x_needed {
            return Err(LuError::RhsTooSmall {
                required: x_needed,
                actual: x.len(),
            });
        }

        // The forward pass consumes B destructively; work on a copy.
        let mut b_copy = b[..b_needed].to_vec();
        let mut y = vec![T::zero(); self.n * nrhs];
        let mut t = vec![T::zero(); self.n * nrhs];

        self.solve_blocked_l(&mut y, self.n, &mut b_copy, ld_b, &mut t, nrhs);
        self.solve_blocked_u(x, ld_x, &mut y, self.n, &mut t, nrhs);

        Ok(())
    }

    /// `L Y = P B`, with the row permutation applied through each block's
    /// pivot-row list. `B` is consumed; `T` is an `n x nrhs` scratch.
    fn solve_blocked_l(
        &self,
        y: &mut [T],
        ld_y: usize,
        b: &mut [T],
        ld_b: usize,
        t: &mut [T],
        nrhs: usize,
    ) {
        let ld_t = self.n;
        let mut y_off = 0;

        for block in &self.blocks {
            let rp = block.row_pivots_number;
            let npr = block.non_pivot_rows_number;

            for c in 0..nrhs {
                for (j, &row) in block.pivot_rows().iter().enumerate() {
                    y[y_off + j + c * ld_y] = b[row + c * ld_b];
                }
            }

            dense::unit_lower_left_trisolve(
                &block.lu1,
                block.ld_l(),
                rp,
                nrhs,
                &mut y[y_off..],
                ld_y,
            );

            if npr > 0 {
                for c in 0..nrhs {
                    for (j, &row) in block.non_pivot_rows().iter().enumerate() {
                        t[j + c * ld_t] = b[row + c * ld_b];
                    }
                }

                // T -= L2 * Y0
                dense::c_sub_ab(
                    npr,
                    nrhs,
                    rp,
                    block.l2(),
                    block.ld_l(),
                    &y[y_off..],
                    ld_y,
                    t,
                    ld_t,
                );

                for c in 0..nrhs {
                    for (j, &row) in block.non_pivot_rows().iter().enumerate() {
                        b[row + c * ld_b] = t[j + c * ld_t];
                    }
                }
            }

            y_off += rp;
        }
    }

    /// `U Q^-1 X = Y`, walking the blocks in reverse. `Y` is consumed.
    fn solve_blocked_u(
        &self,
        x: &mut [T],
        ld_x: usize,
        y: &mut [T],
        ld_y: usize,
        t: &mut [T],
        nrhs: usize,
    ) {
        let ld_t = self.n;
        let mut y_off = self.n;

        for block in self.blocks.iter().rev() {
            let cp = block.col_pivots_number;
            let npc = block.non_pivot_cols_number;
            y_off -= cp;

            if npc > 0 {
                for c in 0..nrhs {
                    for (j, &col) in block.non_pivot_cols().iter().enumerate() {
                        t[j + c * ld_t] = x[col + c * ld_x];
                    }
                }

                // Y0 -= U2 * T, with U2 read through its transposed storage.
                dense::c_sub_atb(
                    cp,
                    nrhs,
                    npc,
                    &block.ut2,
                    npc,
                    t,
                    ld_t,
                    &mut y[y_off..],
                    ld_y,
                );
            }

            dense::upper_left_trisolve(
                &block.lu1,
                block.ld_l(),
                cp,
                nrhs,
                &mut y[y_off..],
                ld_y,
            );

            for c in 0..nrhs {
                for (j, &col) in block.pivot_cols().iter().enumerate() {
                    x[col + c * ld_x] = y[y_off + j + c * ld_y];
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::lu::factor_lu;
    use crate::matrix::csc::{CscBuilder, CscMatrix};

    fn matvec(a: &CscMatrix<f64>, x: &[f64]) -> Vec<f64> {
        let mut y = vec![0.0; a.dim.nrows];
        for j in 0..a.dim.ncols {
            a.axpy_into_dense_col(j, x[j], &mut y);
        }
        y
    }

    fn tridiag(n: usize, d: f64, off: f64) -> CscMatrix<f64> {
        let mut b = CscBuilder::new(n, n);
        for i in 0..n {
            b.push(i, i, d).unwrap();
            if i > 0 {
                b.push(i, i - 1, off).unwrap();
                b.push(i - 1, i, off).unwrap();
            }
        }
        b.build().unwrap()
    }

    struct XorShift64 {
        state: u64,
    }

    impl XorShift64 {
        fn new(seed: u64) -> Self {
            Self {
                state: if seed == 0 { 0x9e3779b97f4a7c15 } else { seed },
            }
        }

        fn next_f64(&mut self) -> f64 {
            let mut x = self.state;
            x ^= x >> 12;
            x ^= x << 25;
            x ^= x >> 27;
            self.state = x;
            let v = x.wrapping_mul(0x2545f4914f6cdd1d);
            ((v % 2001) as i64 - 1000) as f64 / 100.0
        }
    }

    #[test]
    fn solve_diag_recovers_inverse() {
        let mut b = CscBuilder::new(4, 4);
        for (i, v) in [2.0, 3.0, 5.0, 7.0].into_iter().enumerate() {
            b.push(i, i, v).unwrap();
        }
        let a = b.build().unwrap();
        let order: Vec<usize> = (0..4).collect();
        let f = factor_lu(&a, &order, 1.0, 1).unwrap();

        let rhs = vec![4.0, 9.0, 25.0, 49.0];
        let mut x = vec![0.0; 4];
        f.solve_one(&mut x, &rhs).unwrap();
        assert_eq!(x, vec![2.0, 3.0, 5.0, 7.0]);
    }

    #[test]
    fn solve_tridiagonal_unit_vector() {
        let a = tridiag(5, 2.0, -1.0);
        let order: Vec<usize> = (0..5).collect();
        let f = factor_lu(&a, &order, 1.0, 1).unwrap();

        let mut b = vec![0.0; 5];
        b[0] = 1.0;
        let mut x = vec![0.0; 5];
        f.solve_one(&mut x, &b).unwrap();

        let expected = [5.0 / 6.0, 4.0 / 6.0, 3.0 / 6.0, 2.0 / 6.0, 1.0 / 6.0];
        for (xi, ei) in x.iter().zip(expected.iter()) {
            assert!((xi - ei).abs() < 1e-14, "got {x:?}");
        }
    }

    #[test]
    fn solve_many_matches_repeated_solve_one() {
        let n = 24;
        let a = tridiag(n, 4.0, 1.0);
        let order: Vec<usize> = (0..n).collect();
        let f = factor_lu(&a, &order, 1.0, 1).unwrap();

        let nrhs = 3;
        let mut rng = XorShift64::new(0x5eed);
        let b: Vec<f64> = (0..n * nrhs).map(|_| rng.next_f64()).collect();

        let mut x_many = vec![0.0; n * nrhs];
        f.solve_many(nrhs, &mut x_many, n, &b, n).unwrap();

        for c in 0..nrhs {
            let mut x_one = vec![0.0; n];
            f.solve_one(&mut x_one, &b[c * n..(c + 1) * n]).unwrap();
            for j in 0..n {
                assert_eq!(x_one[j], x_many[c * n + j], "column {c} row {j}");
            }
        }
    }

    #[test]
    fn solve_residual_is_small() {
        let n = 24;
        let a = tridiag(n, 4.0, 1.0);
        let order: Vec<usize> = (0..n).collect();
        let f = factor_lu(&a, &order, 1.0, 1).unwrap();

        let mut rng = XorShift64::new(42);
        let b: Vec<f64> = (0..n).map(|_| rng.next_f64()).collect();
        let mut x = vec![0.0; n];
        f.solve_one(&mut x, &b).unwrap();

        let ax = matvec(&a, &x);
        let num: f64 = ax
            .iter()
            .zip(b.iter())
            .map(|(p, q)| (p - q) * (p - q))
            .sum::<f64>()
            .sqrt();
        let den: f64 = b.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!(num / den < 1e-12, "relative residual {}", num / den);
    }

    #[test]
    fn solve_rejects_bad_leading_dimension() {
        let a = tridiag(4, 2.0, -1.0);
        let order: Vec<usize> = (0..4).collect();
        let f = factor_lu(&a, &order, 1.0, 1).unwrap();

        let b = vec![1.0; 4];
        let mut x = vec![0.0; 4];
        assert!(f.solve_many(1, &mut x, 3, &b, 4).is_err());
        assert!(f.solve_many(1, &mut x, 4, &b, 3).is_err());
        assert!(f.solve_many(2, &mut x, 4, &b, 4).is_err());
    }
}
