//! Symbolic phase: column elimination analysis on the preordered matrix,
//! depth-first postordering of the column etree, supercolumn detection with
//! the overfill bound, leaf relaxation, and assembly of the final
//! [`Symbolic`] structure.

use crate::entry::Entry;
use crate::lu::pool::RowPool;
use crate::lu::{
    EAN_BUFFER, EMPTY, Etree, LuError, LuResult, MAX_OVERFILL_RATIO, MAX_SUPERCOL_SIZE,
    RELAX_RULE_SIZE, Symbolic,
};
use crate::matrix::csc::CscMatrix;
use crate::union_find::UnionFind;

pub(crate) fn analyze<T: Entry>(a: &CscMatrix<T>, column_order: &[usize]) -> LuResult<Symbolic> {
    let n = a.dim.ncols;

    let (parent, l_size, u_size) = elimination_analysis(a, column_order)?;

    // Child lists over 0..=n, with n acting as the virtual super-root that
    // adopts every real root.
    let mut first_child = vec![EMPTY; n + 1];
    let mut next_child = vec![EMPTY; n + 1];
    for i in (0..n).rev() {
        let p = parent[i] as usize;
        next_child[i] = first_child[p];
        first_child[p] = i as isize;
    }

    let (postorder, desc_count_org) = df_postorder(&first_child, &next_child, n);

    // One-child flags and per-position descendant counts in postorder terms.
    let mut one_child = vec![false; n];
    let mut desc_count = vec![0usize; n];
    let mut columns = vec![0usize; n];
    for i in 0..n {
        let col = postorder[i];
        if first_child[col] != EMPTY && next_child[first_child[col] as usize] == EMPTY {
            one_child[i] = true;
        }
        columns[i] = column_order[col];
        desc_count[i] = desc_count_org[col];
    }

    let (number_supercolumns, sc_size, sc_parent) =
        detect_supercol(a, &columns, &one_child, &desc_count, &l_size, &u_size, &postorder);

    // Fill bounds per supercolumn: the j'th column of a supercolumn carries
    // the j earlier pivot rows/columns of the chain on top of its own bound.
    let mut sc_l = vec![0usize; number_supercolumns];
    let mut sc_u = vec![0usize; number_supercolumns];
    let mut firstcol_ind = 0;
    for i in 0..number_supercolumns {
        for j in 0..sc_size[i] {
            sc_l[i] = sc_l[i].max(l_size[postorder[firstcol_ind + j]] + j);
            sc_u[i] = sc_u[i].max(u_size[postorder[firstcol_ind + j]] + j);
        }
        firstcol_ind += sc_size[i];
    }

    let mut symbolic = Symbolic {
        n,
        columns,
        number_supercolumns,
        start_supercolumn: vec![0; number_supercolumns],
        end_supercolumn: vec![0; number_supercolumns],
        supercolumn_size: sc_size,
        supercolumn_covered_columns: vec![0; number_supercolumns],
        l_size: sc_l,
        u_size: sc_u,
        etree: Etree {
            first_root: EMPTY,
            parent: sc_parent,
            first_child: vec![EMPTY; number_supercolumns],
            next_child: vec![EMPTY; number_supercolumns],
            first_desc_index: vec![EMPTY; number_supercolumns],
            last_desc_index: vec![EMPTY; number_supercolumns],
        },
    };

    complete_symbolic(&mut symbolic);

    Ok(symbolic)
}

/// Column elimination analysis on the row-merge model. For pivot step `i`
/// (column `column_order[i]`) produces the column-etree parent (`n` marks a
/// root), the L column count bound `l_size[i]` and the merged U row width
/// `u_size[i]`.
fn elimination_analysis<T: Entry>(
    a: &CscMatrix<T>,
    column_order: &[usize],
) -> LuResult<(Vec<isize>, Vec<usize>, Vec<usize>)> {
    let n = a.dim.ncols;
    let m = a.dim.nrows;
    let nnz = a.nnz();

    // The merge bookkeeping is keyed by set representatives, which can reach
    // the pivot step index itself; size everything n + 1.
    let mut firstcol = vec![n; m];
    let mut root = vec![0usize; n + 1];
    let mut rdegs = vec![0usize; n + 1];
    let mut rnums = vec![0usize; n + 1];
    let mut sets = UnionFind::new(n);
    let mut col_cleared = vec![false; n];
    let mut row_cleared = vec![false; m];
    let mut col_mmb = vec![false; n];
    let mut rows_start = vec![0usize; m];
    let mut rows_size = vec![0usize; m];

    let pool_capacity = nnz
        .checked_add(
            EAN_BUFFER
                .checked_mul(n)
                .ok_or(LuError::too_large("row pool capacity"))?,
        )
        .ok_or(LuError::too_large("row pool capacity"))?;
    let mut pool = RowPool::new(pool_capacity);

    // Seed the pool with the row patterns of A (one segment per row).
    for &r in &a.row_indices {
        rows_size[r] += 1;
    }
    for i in 1..m {
        rows_start[i] = rows_start[i - 1] + rows_size[i - 1];
    }
    rows_size.fill(0);
    for i in 0..n {
        for p in a.col_start(i)..a.col_end(i) {
            let row = a.row_index(p);
            pool.set(rows_start[row] + rows_size[row], i);
            rows_size[row] += 1;
        }
    }
    pool.set_free(nnz);

    let mut parent = vec![n as isize; n];
    let mut l_size = vec![0usize; n + 1];
    let mut u_size = vec![0usize; n + 1];

    for col in 0..n {
        // The merged row can only contain the n - col columns still alive.
        if !pool.has_room(n - col) {
            pool.compact(&mut rows_start, &rows_size, &row_cleared);
        }
        let row_start = pool.free_at();
        let mut row_size = 0usize;

        let org_col = column_order[col];
        if a.col_start(org_col) == a.col_end(org_col) {
            return Err(LuError::EmptyColumn { column: org_col });
        }

        let mut cset = col;
        root[cset] = col;
        parent[col] = n as isize;
        rdegs[cset] = 0;

        for p in a.col_start(org_col)..a.col_end(org_col) {
            let row = a.row_index(p);
            let fcol = firstcol[row];

            if fcol == n {
                // First appearance of this row: absorb its original pattern.
                firstcol[row] = col;
                rdegs[cset] += 1;

                for j in 0..rows_size[row] {
                    let c = pool.get(rows_start[row] + j);
                    if !col_cleared[c] && !col_mmb[c] {
                        pool.push(c);
                        col_mmb[c] = true;
                        row_size += 1;
                    }
                }

                row_cleared[row] = true;
            } else {
                let rset = sets.find(fcol);
                let rroot = root[rset];
                if rroot != col {
                    // Merge the class's surviving row pattern.
                    let rnum = rnums[rset];
                    for j in 0..rows_size[rnum] {
                        let c = pool.get(rows_start[rnum] + j);
                        if !col_cleared[c] && !col_mmb[c] {
                            pool.push(c);
                            col_mmb[c] = true;
                            row_size += 1;
                        }
                    }
                    row_cleared[rnum] = true;

                    parent[rroot] = col as isize;
                    let cset_old = cset;
                    let merged = sets.union(cset, rset);
                    rdegs[merged] = rdegs[cset_old] + rdegs[rset];
                    root[merged] = col;
                    cset = merged;
                }
            }
        }

        l_size[col] = rdegs[cset];
        debug_assert!(row_size > 0);
        u_size[col] = row_size;
        // The pivot row itself is eliminated.
        rdegs[cset] = rdegs[cset].saturating_sub(1);

        // Label the merged row by the first nonzero row of the pivot column.
        let rnum = a.row_index(a.col_start(org_col));
        rnums[cset] = rnum;
        rows_start[rnum] = row_start;
        rows_size[rnum] = row_size;
        row_cleared[rnum] = false;

        for j in 0..row_size {
            col_mmb[pool.get(row_start + j)] = false;
        }

        col_cleared[org_col] = true;
    }

    Ok((parent, l_size, u_size))
}

/// Depth-first postorder of the forest hanging off the virtual root, with
/// descendant counts (self included). Iterative: the stacks live on the
/// heap, so skewed trees cannot blow the call stack.
fn df_postorder(
    first_child: &[isize],
    next_child: &[isize],
    root: usize,
) -> (Vec<usize>, Vec<usize>) {
    let mut postorder = vec![0usize; root];
    let mut desc_count = vec![0usize; root];
    let mut stack_vertex = vec![0usize; root + 1];
    let mut stack_child = vec![EMPTY; root + 1];

    let mut postnum = 0;
    let mut depth: isize = 0;
    stack_vertex[0] = root;
    stack_child[0] = first_child[root];

    while depth >= 0 {
        let d = depth as usize;
        if stack_child[d] != EMPTY {
            let c = stack_child[d] as usize;
            stack_vertex[d + 1] = c;
            stack_child[d + 1] = first_child[c];
            depth += 1;
        } else {
            let vertex = stack_vertex[d];
            if vertex != root {
                debug_assert!(vertex < root);
                postorder[postnum] = vertex;
                desc_count[vertex] = 1;
                let mut child = first_child[vertex];
                while child != EMPTY {
                    desc_count[vertex] += desc_count[child as usize];
                    child = next_child[child as usize];
                }
                postnum += 1;
            }

            depth -= 1;
            if depth >= 0 {
                let d = depth as usize;
                stack_child[d] = next_child[stack_child[d] as usize];
            }
        }
    }

    debug_assert_eq!(postnum, root);
    (postorder, desc_count)
}

/// Replay the row-merge process over the postordered columns, classifying
/// them into supercolumns: a chain of one-child columns keeps growing while
/// the overfill bound holds, then a relaxation pass unites small subtrees
/// into their parent's cluster. Returns the supercolumn count, sizes, and
/// parent pointers.
fn detect_supercol<T: Entry>(
    a: &CscMatrix<T>,
    columns: &[usize],
    one_child: &[bool],
    desc_count: &[usize],
    l_size: &[usize],
    u_size: &[usize],
    postorder: &[usize],
) -> (usize, Vec<usize>, Vec<isize>) {
    let n = a.dim.ncols;
    let m = a.dim.nrows;

    let mut firstcol = vec![n; m];
    let mut map_col_supercol = vec![0usize; n];
    let mut lastcol = vec![0usize; n + 1];
    let mut root = vec![0usize; n + 1];
    let mut sets = UnionFind::new(n);

    let mut sc_size = vec![0usize; n + 1];
    let mut sc_parent = vec![EMPTY; n + 1];

    let mut fsc_num: isize = -1;
    let (mut max_lsize, mut max_usize) = (0i64, 0i64);
    let (mut sc_lsize, mut sc_usize) = (0i64, 0i64);

    for col in 0..n {
        let org_col = columns[col];
        let mut cset = col;

        let mut new_supercol = !one_child[col]
            || (MAX_SUPERCOL_SIZE >= 0
                && fsc_num >= 0
                && sc_size[fsc_num as usize] == MAX_SUPERCOL_SIZE as usize);

        root[cset] = col;

        for p in a.col_start(org_col)..a.col_end(org_col) {
            let row = a.row_index(p);
            let fcol = firstcol[row];

            if fcol == n {
                firstcol[row] = col;
            } else {
                let rset = sets.find(fcol);
                let rroot = root[rset];
                if rroot != col {
                    sc_parent[map_col_supercol[rroot]] = col as isize;
                    cset = sets.union(cset, rset);
                    root[cset] = col;
                }
            }
        }

        // In a chain: does appending this column break the overfill bound?
        if !new_supercol {
            let f = fsc_num as usize;
            let inc_sc_size = (sc_size[f] + 1) as i64;

            max_lsize += l_size[postorder[col]] as i64;
            max_usize += u_size[postorder[col]] as i64;
            sc_lsize = sc_lsize.max(l_size[postorder[col]] as i64 + sc_size[f] as i64);
            sc_usize = sc_usize.max(u_size[postorder[col]] as i64 + sc_size[f] as i64);

            if sc_lsize * inc_sc_size > MAX_OVERFILL_RATIO * max_lsize
                || sc_usize * inc_sc_size > MAX_OVERFILL_RATIO * max_usize
            {
                new_supercol = true;
            }
        }

        if new_supercol {
            fsc_num += 1;
            let f = fsc_num as usize;
            sc_size[f] = 1;
            lastcol[f] = col;
            map_col_supercol[col] = f;
            max_lsize = l_size[postorder[col]] as i64;
            max_usize = u_size[postorder[col]] as i64;
            sc_lsize = max_lsize;
            sc_usize = max_usize;
        } else {
            let f = fsc_num as usize;
            sc_size[f] += 1;
            lastcol[f] = col;
            map_col_supercol[col] = f;
        }
    }

    let fsc_num = (fsc_num + 1) as usize;

    // Parent pointers were recorded as columns; map them to supercolumns.
    for i in 0..fsc_num {
        if sc_parent[i] != EMPTY {
            sc_parent[i] = map_col_supercol[sc_parent[i] as usize] as isize;
        }
        if sc_parent[i] == i as isize {
            sc_parent[i] = EMPTY;
        }
    }

    if RELAX_RULE_SIZE <= 1 {
        sc_size.truncate(fsc_num);
        sc_parent.truncate(fsc_num);
        return (fsc_num, sc_size, sc_parent);
    }

    // Relaxation: walk the fundamental supercolumns in order, accumulating a
    // cluster. A root, or a supercolumn whose parent's last column already
    // has RELAX_RULE_SIZE descendants, closes the cluster; smaller subtrees
    // keep merging into their parent's cluster.
    let map_fsc_rsc = &mut map_col_supercol;
    let mut sc_num = 0usize;
    let mut cscs = 0usize;
    for i in 0..fsc_num {
        cscs += sc_size[i];
        map_fsc_rsc[i] = sc_num;
        lastcol[sc_num] = i;
        let closes = match sc_parent[i] {
            EMPTY => true,
            p => desc_count[lastcol[p as usize]] >= RELAX_RULE_SIZE,
        };
        if closes {
            sc_size[sc_num] = cscs;
            cscs = 0;
            sc_num += 1;
        }
    }
    debug_assert_eq!(cscs, 0);

    // Rebuild the parent pointers for the relaxed supercolumns.
    for i in 0..sc_num {
        let org_parent = sc_parent[lastcol[i]];
        sc_parent[i] = if org_parent != EMPTY {
            map_fsc_rsc[org_parent as usize] as isize
        } else {
            EMPTY
        };
    }

    sc_size.truncate(sc_num);
    sc_parent.truncate(sc_num);
    (sc_num, sc_size, sc_parent)
}

/// Fill in supercolumn start/end positions, build the child lists and root
/// list from the parent pointers, derive the descendant index ranges in a
/// single pass over the postorder, and accumulate covered-column counts
/// bottom-up.
fn complete_symbolic(symbolic: &mut Symbolic) {
    let s = symbolic.number_supercolumns;

    symbolic.start_supercolumn[0] = 0;
    symbolic.end_supercolumn[0] = symbolic.supercolumn_size[0] - 1;
    for i in 1..s {
        symbolic.start_supercolumn[i] = symbolic.end_supercolumn[i - 1] + 1;
        symbolic.end_supercolumn[i] =
            symbolic.start_supercolumn[i] + symbolic.supercolumn_size[i] - 1;
    }
    debug_assert_eq!(symbolic.end_supercolumn[s - 1], symbolic.n - 1);

    let etree = &mut symbolic.etree;
    for i in 0..s {
        match etree.parent[i] {
            EMPTY => {
                etree.next_child[i] = etree.first_root;
                etree.first_root = i as isize;
            }
            p => {
                etree.next_child[i] = etree.first_child[p as usize];
                etree.first_child[p as usize] = i as isize;
            }
        }
    }

    // Descendant index ranges. Every child has already propagated its own
    // first-descendant before its parent is visited, so one ascending pass
    // suffices.
    for i in 0..s {
        if etree.first_desc_index[i] != EMPTY {
            etree.last_desc_index[i] = i as isize - 1;
        }

        let parent = etree.parent[i];
        if parent != EMPTY {
            let p = parent as usize;
            if etree.first_desc_index[p] == EMPTY {
                etree.first_desc_index[p] = if etree.first_desc_index[i] == EMPTY {
                    i as isize
                } else {
                    etree.first_desc_index[i]
                };
            }
        }
    }

    for i in 0..s {
        symbolic.supercolumn_covered_columns[i] += symbolic.supercolumn_size[i];
        let parent = symbolic.etree.parent[i];
        if parent != EMPTY {
            symbolic.supercolumn_covered_columns[parent as usize] +=
                symbolic.supercolumn_covered_columns[i];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lu::symbolic_factor;
    use crate::matrix::csc::CscBuilder;

    fn diag(values: &[f64]) -> CscMatrix<f64> {
        let n = values.len();
        let mut b = CscBuilder::new(n, n);
        for (i, &v) in values.iter().enumerate() {
            b.push(i, i, v).unwrap();
        }
        b.build().unwrap()
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

    /// Dense last row and column, diagonal elsewhere.
    fn arrow(n: usize) -> CscMatrix<f64> {
        let mut b = CscBuilder::new(n, n);
        for i in 0..n - 1 {
            b.push(i, i, 10.0 + i as f64).unwrap();
            b.push(i, n - 1, 1.0).unwrap();
            b.push(n - 1, i, 1.0).unwrap();
        }
        b.push(n - 1, n - 1, 5.0).unwrap();
        b.build().unwrap()
    }

    fn identity_order(n: usize) -> Vec<usize> {
        (0..n).collect()
    }

    fn check_structure(symbolic: &Symbolic) {
        let s = symbolic.number_supercolumns;
        // coverage
        assert_eq!(symbolic.supercolumn_size.iter().sum::<usize>(), symbolic.n);
        assert_eq!(symbolic.start_supercolumn[0], 0);
        assert_eq!(symbolic.end_supercolumn[s - 1], symbolic.n - 1);
        for i in 1..s {
            assert_eq!(
                symbolic.end_supercolumn[i - 1] + 1,
                symbolic.start_supercolumn[i]
            );
        }
        // postorder: parents come after children
        for i in 0..s {
            if symbolic.etree.parent[i] != EMPTY {
                assert!(symbolic.etree.parent[i] > i as isize);
            }
        }
        // descendant ranges are contiguous and end just before the node
        for i in 0..s {
            let fd = symbolic.etree.first_desc_index[i];
            let ld = symbolic.etree.last_desc_index[i];
            assert_eq!(fd == EMPTY, ld == EMPTY);
            if fd != EMPTY {
                assert!(fd <= ld);
                assert_eq!(ld, i as isize - 1);
            }
        }
        // covered columns accumulate subtree sizes
        let mut covered = vec![0usize; s];
        for i in 0..s {
            covered[i] += symbolic.supercolumn_size[i];
            if symbolic.etree.parent[i] != EMPTY {
                covered[symbolic.etree.parent[i] as usize] += covered[i];
            }
        }
        assert_eq!(covered, symbolic.supercolumn_covered_columns);
    }

    #[test]
    fn diagonal_matrix_gives_singleton_supercolumns() {
        let a = diag(&[2.0, 3.0, 5.0, 7.0]);
        let symbolic = symbolic_factor(&a, &identity_order(4)).unwrap();

        assert_eq!(symbolic.number_supercolumns, 4);
        assert_eq!(symbolic.supercolumn_size, vec![1, 1, 1, 1]);
        for i in 0..4 {
            assert_eq!(symbolic.etree.parent[i], EMPTY);
            assert_eq!(symbolic.l_size[i], 1);
            assert_eq!(symbolic.u_size[i], 1);
        }
        check_structure(&symbolic);
    }

    #[test]
    fn dense_two_by_two_amalgamates() {
        let mut b = CscBuilder::new(2, 2);
        b.push(0, 0, 4.0).unwrap();
        b.push(0, 1, 6.0).unwrap();
        b.push(1, 0, 3.0).unwrap();
        b.push(1, 1, 3.0).unwrap();
        let a = b.build().unwrap();

        let symbolic = symbolic_factor(&a, &identity_order(2)).unwrap();
        assert_eq!(symbolic.number_supercolumns, 1);
        assert_eq!(symbolic.supercolumn_size, vec![2]);
        assert_eq!(symbolic.l_size[0], 2);
        check_structure(&symbolic);
    }

    #[test]
    fn tridiagonal_relaxes_into_one_front() {
        let a = tridiag(5, 2.0, -1.0);
        let symbolic = symbolic_factor(&a, &identity_order(5)).unwrap();
        // the whole chain is far below the relaxation threshold
        assert_eq!(symbolic.number_supercolumns, 1);
        assert_eq!(symbolic.supercolumn_size, vec![5]);
        check_structure(&symbolic);
    }

    #[test]
    fn large_arrow_keeps_head_cluster_separate() {
        let n = 30;
        let a = arrow(n);
        let symbolic = symbolic_factor(&a, &identity_order(n)).unwrap();

        assert!(symbolic.number_supercolumns >= 2);
        // the arrow head is factored last
        let s = symbolic.number_supercolumns;
        let last_cols_start = symbolic.start_supercolumn[s - 1];
        assert!(
            symbolic.columns[last_cols_start..].contains(&(n - 1)),
            "head column must live in the last supercolumn"
        );
        check_structure(&symbolic);
    }

    #[test]
    fn analysis_is_deterministic() {
        let a = arrow(12);
        let order = identity_order(12);
        let s1 = symbolic_factor(&a, &order).unwrap();
        let s2 = symbolic_factor(&a, &order).unwrap();

        assert_eq!(s1.columns, s2.columns);
        assert_eq!(s1.number_supercolumns, s2.number_supercolumns);
        assert_eq!(s1.supercolumn_size, s2.supercolumn_size);
        assert_eq!(s1.l_size, s2.l_size);
        assert_eq!(s1.u_size, s2.u_size);
        assert_eq!(s1.etree.parent, s2.etree.parent);
    }

    #[test]
    fn empty_column_is_reported() {
        let mut b = CscBuilder::new(3, 3);
        b.push(0, 0, 1.0).unwrap();
        b.push(2, 1, 1.0).unwrap();
        b.push(2, 2, 1.0).unwrap();
        let a = b.build().unwrap();

        let err = symbolic_factor(&a, &identity_order(3)).unwrap_err();
        assert!(matches!(err, LuError::EmptyColumn { column: 1 }));
    }

    #[test]
    fn bad_permutation_is_rejected() {
        let a = diag(&[1.0, 2.0]);
        assert!(matches!(
            symbolic_factor(&a, &[0, 0]),
            Err(LuError::BadPermutation { .. })
        ));
        assert!(matches!(
            symbolic_factor(&a, &[0]),
            Err(LuError::BadPermutation { .. })
        ));
    }

    #[test]
    fn fill_bounds_dominate_per_column_bounds() {
        // sc bounds must never undercut any member column's own bound; on the
        // identity-ordered tridiagonal the postorder is the identity, so the
        // per-column analysis output lines up with supercolumn positions.
        let n = 40;
        let a = tridiag(n, 4.0, 1.0);
        let order = identity_order(n);
        let symbolic = symbolic_factor(&a, &order).unwrap();
        check_structure(&symbolic);

        let (_, l_size, u_size) = elimination_analysis(&a, &order).unwrap();

        let mut pos = 0;
        for s in 0..symbolic.number_supercolumns {
            let size = symbolic.supercolumn_size[s];
            for j in 0..size {
                assert!(symbolic.l_size[s] >= l_size[pos + j] + j);
                assert!(symbolic.u_size[s] >= u_size[pos + j] + j);
            }
            pos += size;
        }
        assert_eq!(pos, n);
    }
}
