//! Dense kernels consumed by the numeric phase. All blocks are column-major
//! with an explicit leading dimension, so a kernel can operate on a sub-block
//! of a larger front without copying.

use crate::entry::Entry;

/// The threshold LU kernel found no pivot meeting the acceptance bound.
#[derive(Debug, thiserror::Error)]
#[error("no acceptable pivot in column {column}")]
pub struct NoPivot {
    pub column: usize,
}

/// Factor an `m x n` block (`m >= n` rows populated, leading dimension `ld`)
/// in place with threshold partial pivoting: L lands below the diagonal (unit
/// diagonal implicit), U on and above it.
///
/// A row qualifies as pivot for column `j` when `|a| >= threshold * max|a|`
/// over rows `j..m` of that column. With `degrees` supplied, ties among
/// qualifying rows go to the smallest fill-degree estimate; without it the
/// first row attaining the column maximum wins. `rows` (and `degrees`) are
/// permuted alongside the block so callers keep the row identity list.
pub fn lu_threshold<T: Entry>(
    a: &mut [T],
    ld: usize,
    m: usize,
    n: usize,
    threshold: f64,
    mut degrees: Option<&mut [usize]>,
    rows: &mut [usize],
) -> Result<(), NoPivot> {
    debug_assert!(ld >= m);
    debug_assert!(rows.len() >= m);

    let steps = m.min(n);
    for j in 0..steps {
        let col = j * ld;

        let mut best = 0.0f64;
        for i in j..m {
            best = best.max(a[col + i].modulus());
        }
        if best == 0.0 {
            return Err(NoPivot { column: j });
        }

        let piv = match degrees.as_deref() {
            Some(degs) => {
                let limit = threshold * best;
                let mut piv = j;
                let mut piv_deg = usize::MAX;
                for i in j..m {
                    if a[col + i].modulus() >= limit && degs[i] < piv_deg {
                        piv = i;
                        piv_deg = degs[i];
                    }
                }
                piv
            }
            None => {
                let mut piv = j;
                for i in j..m {
                    if a[col + i].modulus() == best {
                        piv = i;
                        break;
                    }
                }
                piv
            }
        };

        if piv != j {
            for k in 0..n {
                a.swap(k * ld + j, k * ld + piv);
            }
            rows.swap(j, piv);
            if let Some(degs) = degrees.as_deref_mut() {
                degs.swap(j, piv);
            }
        }

        let pivot = a[col + j];
        for i in j + 1..m {
            a[col + i] /= pivot;
        }
        for k in j + 1..n {
            let akj = a[k * ld + j];
            if akj != T::zero() {
                for i in j + 1..m {
                    let lij = a[col + i];
                    a[k * ld + i] -= lij * akj;
                }
            }
        }
    }

    Ok(())
}

/// Solve `L1 * X = X` in place. `L1` is the unit lower triangle of a `k x k`
/// block stored at leading dimension `ld_l`; `X` is `k x nrhs` at `ld_x`.
pub fn unit_lower_left_trisolve<T: Entry>(
    l: &[T],
    ld_l: usize,
    k: usize,
    nrhs: usize,
    x: &mut [T],
    ld_x: usize,
) {
    for c in 0..nrhs {
        let xc = c * ld_x;
        for j in 0..k {
            let xj = x[xc + j];
            if xj != T::zero() {
                for i in j + 1..k {
                    let lij = l[j * ld_l + i];
                    x[xc + i] -= lij * xj;
                }
            }
        }
    }
}

/// Solve `U1 * X = X` in place. `U1` is the non-unit upper triangle of a
/// `k x k` block stored at leading dimension `ld_u`; `X` is `k x nrhs`.
pub fn upper_left_trisolve<T: Entry>(
    u: &[T],
    ld_u: usize,
    k: usize,
    nrhs: usize,
    x: &mut [T],
    ld_x: usize,
) {
    for c in 0..nrhs {
        let xc = c * ld_x;
        for j in (0..k).rev() {
            let xj = x[xc + j] / u[j * ld_u + j];
            x[xc + j] = xj;
            if xj != T::zero() {
                for i in 0..j {
                    let uij = u[j * ld_u + i];
                    x[xc + i] -= uij * xj;
                }
            }
        }
    }
}

/// Apply `L1^-1` to a transposed-stored U block: `X` is `m x k` column-major
/// at `ld_x`, where physical column `j` holds row `j` of the logical block.
/// Forward-substitutes `X(:, t) -= L1[t, j] * X(:, j)` for `j < t`.
pub fn unit_lower_right_trisolve<T: Entry>(
    m: usize,
    k: usize,
    l: &[T],
    ld_l: usize,
    x: &mut [T],
    ld_x: usize,
) {
    for j in 0..k {
        for t in j + 1..k {
            let ltj = l[j * ld_l + t];
            if ltj != T::zero() {
                for i in 0..m {
                    let xij = x[j * ld_x + i];
                    x[t * ld_x + i] -= ltj * xij;
                }
            }
        }
    }
}

/// `C -= A * B` where `C` is `m x n`, `A` is `m x k`, `B` is `k x n`.
pub fn c_sub_ab<T: Entry>(
    m: usize,
    n: usize,
    k: usize,
    a: &[T],
    ld_a: usize,
    b: &[T],
    ld_b: usize,
    c: &mut [T],
    ld_c: usize,
) {
    for j in 0..n {
        for t in 0..k {
            let btj = b[j * ld_b + t];
            if btj != T::zero() {
                for i in 0..m {
                    let ait = a[t * ld_a + i];
                    c[j * ld_c + i] -= ait * btj;
                }
            }
        }
    }
}

/// `C -= A * B^T` where `C` is `m x n`, `A` is `m x k`, `B` is `n x k`.
pub fn c_sub_abt<T: Entry>(
    m: usize,
    n: usize,
    k: usize,
    a: &[T],
    ld_a: usize,
    b: &[T],
    ld_b: usize,
    c: &mut [T],
    ld_c: usize,
) {
    for j in 0..n {
        for t in 0..k {
            let bjt = b[t * ld_b + j];
            if bjt != T::zero() {
                for i in 0..m {
                    let ait = a[t * ld_a + i];
                    c[j * ld_c + i] -= ait * bjt;
                }
            }
        }
    }
}

/// `C -= A^T * B` where `C` is `m x n`, `A` is `k x m`, `B` is `k x n`.
pub fn c_sub_atb<T: Entry>(
    m: usize,
    n: usize,
    k: usize,
    a: &[T],
    ld_a: usize,
    b: &[T],
    ld_b: usize,
    c: &mut [T],
    ld_c: usize,
) {
    for j in 0..n {
        for i in 0..m {
            let mut acc = T::zero();
            for t in 0..k {
                let ati = a[i * ld_a + t];
                let btj = b[j * ld_b + t];
                acc += ati * btj;
            }
            c[j * ld_c + i] -= acc;
        }
    }
}

/// Swap physical rows of an `ld x n` column-major block, pair by pair in the
/// order given.
pub fn swap_lines<T: Entry>(a: &mut [T], ld: usize, n: usize, swaps: &[(usize, usize)]) {
    for &(i, j) in swaps {
        if i != j {
            for c in 0..n {
                a.swap(c * ld + i, c * ld + j);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lu_picks_largest_row_at_full_threshold() {
        // [[4, 3], [6, 3]] column-major
        let mut a: Vec<f64> = vec![4.0, 6.0, 3.0, 3.0];
        let mut rows = vec![0usize, 1];
        lu_threshold(&mut a, 2, 2, 2, 1.0, None, &mut rows).unwrap();

        assert_eq!(rows, vec![1, 0]);
        // U = [[6, 3], [0, 1]], L21 = 4/6
        assert!((a[0] - 6.0).abs() < 1e-15);
        assert!((a[1] - 2.0 / 3.0).abs() < 1e-15);
        assert!((a[2] - 3.0).abs() < 1e-15);
        assert!((a[3] - 1.0).abs() < 1e-15);
    }

    #[test]
    fn lu_degree_tie_breaking_under_threshold() {
        // both rows qualify at threshold 0.5; the lighter row wins
        let mut a = vec![2.0, 1.5, 1.0, 1.0];
        let mut rows = vec![7usize, 8];
        let mut degrees = vec![10usize, 2];
        lu_threshold(&mut a, 2, 2, 2, 0.5, Some(&mut degrees), &mut rows).unwrap();
        assert_eq!(rows[0], 8);
    }

    #[test]
    fn lu_reports_zero_column() {
        let mut a = vec![1.0, 2.0, 0.0, 0.0];
        let mut rows = vec![0usize, 1];
        // after eliminating column 0, column 1 becomes exactly zero below the first pivot
        let mut b = vec![1.0, 2.0, 3.0, 6.0];
        let err = lu_threshold(&mut b, 2, 2, 2, 1.0, None, &mut rows).unwrap_err();
        assert_eq!(err.column, 1);

        let mut rows = vec![0usize, 1];
        a[0] = 0.0;
        a[1] = 0.0;
        let err = lu_threshold(&mut a, 2, 2, 2, 1.0, None, &mut rows).unwrap_err();
        assert_eq!(err.column, 0);
    }

    #[test]
    fn trisolves_invert_triangles() {
        // L = [[1,0,0],[2,1,0],[3,4,1]] column-major with ld 3
        let l = vec![1.0, 2.0, 3.0, 0.0, 1.0, 4.0, 0.0, 0.0, 1.0];
        let mut x = vec![1.0, 4.0, 14.0];
        unit_lower_left_trisolve(&l, 3, 3, 1, &mut x, 3);
        assert_eq!(x, vec![1.0, 2.0, 3.0]);

        // U = [[2,1],[0,4]] column-major
        let u = vec![2.0, 0.0, 1.0, 4.0];
        let mut y = vec![6.0, 8.0];
        upper_left_trisolve(&u, 2, 2, 1, &mut y, 2);
        assert_eq!(y, vec![2.0, 2.0]);
    }

    #[test]
    fn right_trisolve_matches_row_elimination() {
        // L1 = [[1,0],[0.5,1]]; logical U rows stored transposed, 1 column each
        let l = vec![1.0, 0.5, 0.0, 1.0];
        // logical rows: row0 = [4], row1 = [6]; expect row1 -= 0.5*row0 -> [4]
        let mut x = vec![4.0, 6.0];
        unit_lower_right_trisolve(1, 2, &l, 2, &mut x, 1);
        assert_eq!(x, vec![4.0, 4.0]);
    }

    #[test]
    fn rank_updates_agree_with_reference() {
        // A = [[1,2],[3,4]] (2x2), B = [[5,6],[7,8]] (2x2)
        let a = vec![1.0, 3.0, 2.0, 4.0];
        let b = vec![5.0, 7.0, 6.0, 8.0];

        let mut c = vec![0.0; 4];
        c_sub_ab(2, 2, 2, &a, 2, &b, 2, &mut c, 2);
        // A*B = [[19,22],[43,50]]
        assert_eq!(c, vec![-19.0, -43.0, -22.0, -50.0]);

        let mut c = vec![0.0; 4];
        c_sub_abt(2, 2, 2, &a, 2, &b, 2, &mut c, 2);
        // A*B^T = [[17,23],[39,53]]
        assert_eq!(c, vec![-17.0, -39.0, -23.0, -53.0]);

        let mut c = vec![0.0; 4];
        c_sub_atb(2, 2, 2, &a, 2, &b, 2, &mut c, 2);
        // A^T*B = [[26,30],[38,44]]
        assert_eq!(c, vec![-26.0, -38.0, -30.0, -44.0]);
    }

    #[test]
    fn swap_lines_reorders_rows() {
        let mut a = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]; // 3x2, ld 3
        swap_lines(&mut a, 3, 2, &[(0, 2)]);
        assert_eq!(a, vec![3.0, 2.0, 1.0, 6.0, 5.0, 4.0]);
    }
}
