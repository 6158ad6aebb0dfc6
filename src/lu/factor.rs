//! Numeric phase: the factorization context, the focus (assembly)
//! operations, the per-supercolumn dense factorization step, and the
//! sequential and parallel tree schedulers.

use std::cell::UnsafeCell;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::dense;
use crate::entry::Entry;
use crate::lu::align_add::align_add_from;
use crate::lu::front::{FactorBlock, allocate_contrib_block};
use crate::lu::{EMPTY, Factor, LuError, LuResult, MIN_COVER_SPRS_SPAWN, Symbolic};
use crate::matrix::csc::CscMatrix;

/// Per-task scratch: inverse maps from original row/column numbers to
/// physical positions in the front under assembly, -1 meaning absent. A map
/// pair leaves the pool all -1 and must come back all -1; each supercolumn
/// clears the entries it set, so the reset cost is paid once at first
/// allocation.
pub(crate) struct ScratchMaps {
    pub map_rows: Vec<isize>,
    pub map_cols: Vec<isize>,
}

struct BlockCell<T>(UnsafeCell<Option<FactorBlock<T>>>);

// SAFETY: cells are handed out per the tree schedule, see `Context::block_mut`.
unsafe impl<T: Send> Sync for BlockCell<T> {}

/// Everything one factorization run needs: the matrix and its transpose (to
/// enumerate nonzeros by row), the symbolic data, the factor being built,
/// and the shared scratch state.
pub(crate) struct Context<'a, T> {
    a: &'a CscMatrix<T>,
    at: CscMatrix<T>,
    symbolic: &'a Symbolic,
    thresh: f64,
    nproc: usize,
    blocks: Vec<BlockCell<T>>,
    row_cleared: Vec<AtomicBool>,
    column_cleared: Vec<AtomicBool>,
    map_pool: Mutex<Vec<ScratchMaps>>,
    failed: AtomicBool,
    too_large: AtomicBool,
}

impl<'a, T: Entry> Context<'a, T> {
    fn new(a: &'a CscMatrix<T>, symbolic: &'a Symbolic, thresh: f64, nproc: usize) -> Self {
        let s = symbolic.number_supercolumns;
        Context {
            a,
            at: a.transpose(),
            symbolic,
            thresh,
            nproc,
            blocks: (0..s).map(|_| BlockCell(UnsafeCell::new(None))).collect(),
            row_cleared: (0..a.dim.nrows).map(|_| AtomicBool::new(false)).collect(),
            column_cleared: (0..a.dim.ncols).map(|_| AtomicBool::new(false)).collect(),
            map_pool: Mutex::new(Vec::new()),
            failed: AtomicBool::new(false),
            too_large: AtomicBool::new(false),
        }
    }

    /// Exclusive access to the factor block slot of supercolumn `s`.
    ///
    /// SAFETY: the tree schedule serializes all access to a slot. A block is
    /// created and filled only by the task processing `s`; ancestors consume
    /// its contribution only after that task's join point; sibling subtrees
    /// touch disjoint slots. Callers must not hold two references to the
    /// same slot at once.
    #[allow(clippy::mut_from_ref)]
    unsafe fn block_mut(&self, s: usize) -> &mut Option<FactorBlock<T>> {
        unsafe { &mut *self.blocks[s].0.get() }
    }

    fn acquire_maps(&self) -> ScratchMaps {
        if let Some(maps) = self.map_pool.lock().unwrap().pop() {
            return maps;
        }
        ScratchMaps {
            map_rows: vec![-1; self.a.dim.nrows],
            map_cols: vec![-1; self.a.dim.ncols],
        }
    }

    fn release_maps(&self, maps: ScratchMaps) {
        // A failed run can abandon maps mid-supercolumn; those never go back.
        if self.failed() {
            return;
        }
        debug_assert!(maps.map_rows.iter().all(|&v| v == -1));
        debug_assert!(maps.map_cols.iter().all(|&v| v == -1));
        self.map_pool.lock().unwrap().push(maps);
    }

    fn is_row_cleared(&self, row: usize) -> bool {
        self.row_cleared[row].load(Ordering::Relaxed)
    }

    fn set_row_cleared(&self, row: usize) {
        self.row_cleared[row].store(true, Ordering::Relaxed);
    }

    fn is_column_cleared(&self, col: usize) -> bool {
        self.column_cleared[col].load(Ordering::Relaxed)
    }

    fn set_column_cleared(&self, col: usize) {
        self.column_cleared[col].store(true, Ordering::Relaxed);
    }

    fn failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }

    fn set_failed(&self) {
        self.failed.store(true, Ordering::Relaxed);
    }

    fn set_too_large(&self) {
        self.too_large.store(true, Ordering::Relaxed);
        self.set_failed();
    }
}

pub(crate) fn numeric_factor<T: Entry>(
    a: &CscMatrix<T>,
    symbolic: &Symbolic,
    thresh: f64,
    max_depth: usize,
    nproc: usize,
) -> LuResult<Factor<T>> {
    let ctx = Context::new(a, symbolic, thresh, nproc);

    if nproc > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(nproc)
            .build()
            .map_err(|e| LuError::ThreadPool(e.to_string()))?;
        pool.install(|| {
            rayon::scope(|scope| {
                for root in symbolic.etree.roots() {
                    let ctx = &ctx;
                    scope.spawn(move |_| {
                        recursive_factorize_supercolumn(ctx, root, 0, max_depth);
                    });
                }
            });
        });
    } else {
        sequential_factorize(&ctx);
    }

    if ctx.too_large.load(Ordering::Relaxed) {
        return Err(LuError::too_large("frontal block"));
    }

    let mut blocks = Vec::with_capacity(symbolic.number_supercolumns);
    for s in 0..symbolic.number_supercolumns {
        // SAFETY: all tasks have joined; this is the only accessor left.
        match unsafe { ctx.block_mut(s) }.take() {
            Some(block) if block.valid => blocks.push(block),
            _ => return Err(LuError::SingularBlock { supercolumn: s }),
        }
    }

    Ok(Factor {
        blocks,
        m: a.dim.nrows,
        n: a.dim.ncols,
    })
}

/// Walk the supercolumns in postorder, assembling and factoring each one in
/// turn with a single scratch-map pair.
fn sequential_factorize<T: Entry>(ctx: &Context<T>) {
    let etree = &ctx.symbolic.etree;
    let mut maps = ctx.acquire_maps();

    for s in 0..ctx.symbolic.number_supercolumns {
        if ctx.failed() {
            break;
        }
        if ctx.symbolic.l_size[s] == 0 {
            continue;
        }

        allocate_factor_block(ctx, s);
        for child in etree.children(s) {
            focus_supercolumn_from_child(ctx, s, child, &mut maps);
        }
        focus_supercolumn_from_A(ctx, s, &mut maps);

        factorize_supercolumn(ctx, s, &mut maps);
    }

    ctx.release_maps(maps);
}

/// Parallel scheduler: each subtree is a task. While the depth limit and the
/// covered-column heuristic allow, spawn one task per child and join before
/// processing the supercolumn itself; otherwise cut over to sequential
/// processing of the whole subtree.
fn recursive_factorize_supercolumn<T: Entry>(
    ctx: &Context<T>,
    pivot_supercol: usize,
    depth: usize,
    max_depth: usize,
) {
    if ctx.failed() {
        return;
    }
    let symbolic = ctx.symbolic;
    let etree = &symbolic.etree;

    let no_child_spawn = MIN_COVER_SPRS_SPAWN >= 0
        && symbolic.supercolumn_covered_columns[pivot_supercol] < MIN_COVER_SPRS_SPAWN as usize;

    if (max_depth == 0 || depth + 1 < max_depth) && !no_child_spawn {
        let have_job_here = symbolic.l_size[pivot_supercol] != 0;
        let one_child = etree.one_child(pivot_supercol);

        rayon::scope(|scope| {
            for child in etree.children(pivot_supercol) {
                scope.spawn(move |_| {
                    recursive_factorize_supercolumn(ctx, child, depth + 1, max_depth);
                });
            }
        });

        if ctx.failed() || !have_job_here {
            return;
        }

        let mut maps = ctx.acquire_maps();
        if !one_child {
            // A one-child node defers assembly into the L-portion step so the
            // child's delayed update lands first.
            allocate_factor_block(ctx, pivot_supercol);
            for child in etree.children(pivot_supercol) {
                focus_supercolumn_from_child(ctx, pivot_supercol, child, &mut maps);
            }
            focus_supercolumn_from_A(ctx, pivot_supercol, &mut maps);
        }
        factorize_supercolumn(ctx, pivot_supercol, &mut maps);
        ctx.release_maps(maps);
    } else {
        let mut maps = ctx.acquire_maps();

        if etree.first_desc_index[pivot_supercol] != EMPTY {
            let first = etree.first_desc_index[pivot_supercol] as usize;
            for desc in first..pivot_supercol {
                if ctx.failed() {
                    break;
                }
                if symbolic.l_size[desc] == 0 {
                    continue;
                }
                if !etree.one_child(desc) {
                    allocate_factor_block(ctx, desc);
                    for child in etree.children(desc) {
                        focus_supercolumn_from_child(ctx, desc, child, &mut maps);
                    }
                    focus_supercolumn_from_A(ctx, desc, &mut maps);
                }
                factorize_supercolumn(ctx, desc, &mut maps);
            }
        }

        if symbolic.l_size[pivot_supercol] == 0 || ctx.failed() {
            ctx.release_maps(maps);
            return;
        }

        if !etree.one_child(pivot_supercol) {
            allocate_factor_block(ctx, pivot_supercol);
            for child in etree.children(pivot_supercol) {
                focus_supercolumn_from_child(ctx, pivot_supercol, child, &mut maps);
            }
            focus_supercolumn_from_A(ctx, pivot_supercol, &mut maps);
        }
        factorize_supercolumn(ctx, pivot_supercol, &mut maps);
        ctx.release_maps(maps);
    }
}

/// Reserve the factor block of `s` at its symbolic upper-bound sizes: the
/// pivot-column list, the row list, a zeroed `LU1` of `l_size x size`, and
/// the `Ut2` buffer. Blocks are allocated lazily, as the tree frontier
/// reaches them, so peak memory tracks the frontier rather than the tree.
fn allocate_factor_block<T: Entry>(ctx: &Context<T>, s: usize) {
    let symbolic = ctx.symbolic;
    let size = symbolic.supercolumn_size[s];
    let ml_size = symbolic.l_size[s];
    let mu_size = symbolic.u_size[s];

    // SAFETY: only the task processing `s` creates its block.
    let cell = unsafe { ctx.block_mut(s) };
    debug_assert!(cell.is_none());

    let block = match (ml_size.checked_mul(size), mu_size.checked_mul(size)) {
        (Some(lu1_len), Some(ut2_len)) => {
            let mut cols = Vec::with_capacity(mu_size);
            cols.extend_from_slice(
                &symbolic.columns
                    [symbolic.start_supercolumn[s]..=symbolic.end_supercolumn[s]],
            );
            FactorBlock {
                valid: true,
                row_pivots_number: 0,
                col_pivots_number: 0,
                non_pivot_rows_number: 0,
                non_pivot_cols_number: 0,
                rows: Vec::with_capacity(ml_size),
                cols,
                lu1: vec![T::zero(); lu1_len],
                ut2: vec![T::zero(); ut2_len],
                contrib: None,
            }
        }
        _ => {
            ctx.set_too_large();
            FactorBlock::invalid()
        }
    };
    *cell = Some(block);
}

/// Assemble into `supercol`'s front everything the subtree under `child`
/// still holds for its pivot columns: every descendant's contribution block
/// plus the child's own.
fn focus_supercolumn_from_child<T: Entry>(
    ctx: &Context<T>,
    supercol: usize,
    child: usize,
    maps: &mut ScratchMaps,
) {
    let etree = &ctx.symbolic.etree;
    if etree.first_desc_index[child] != EMPTY {
        for desc in etree.first_desc_index[child] as usize..child {
            focus_supercolumn_from_contrib(ctx, supercol, desc, maps);
        }
    }
    focus_supercolumn_from_contrib(ctx, supercol, child, maps);

    // Row mapping stays live: the align-add pass reuses it.
}

/// Assemble the parts of `supercol`'s pivot columns held by one descendant's
/// contribution block, consuming (and possibly freeing) the matched columns.
fn focus_supercolumn_from_contrib<T: Entry>(
    ctx: &Context<T>,
    supercol: usize,
    contrib: usize,
    maps: &mut ScratchMaps,
) {
    debug_assert_ne!(supercol, contrib);
    if ctx.failed() {
        return;
    }

    // SAFETY: disjoint slots; the descendant finished before its ancestor's
    // assembly started.
    let Some(desc_block) = (unsafe { ctx.block_mut(contrib) }).as_mut() else {
        return;
    };
    if desc_block.contrib.is_none() {
        return;
    }
    // SAFETY: `supercol != contrib`, so this is a different slot.
    let fb = unsafe { ctx.block_mut(supercol) }.as_mut().expect("front allocated");
    if !fb.valid {
        return;
    }

    let symbolic = ctx.symbolic;
    let max_size = symbolic.l_size[supercol];
    let sc_size = symbolic.supercolumn_size[supercol];

    for col_c in 0..sc_size {
        let Some(cb) = desc_block.contrib.as_deref_mut() else {
            break;
        };
        let column = symbolic.columns[symbolic.start_supercolumn[supercol] + col_c];

        let Some(loc_arr) = cb.columns[..cb.n].iter().position(|&c| c == column) else {
            continue;
        };
        let loc_val = cb.col_loc[loc_arr];

        for j in 0..cb.m {
            let row = cb.rows[j];
            debug_assert!(!ctx.is_row_cleared(row));

            let j_loc = cb.row_loc[j];
            let val = cb.values[loc_val * cb.ld + j_loc];

            if maps.map_rows[row] != -1 {
                fb.lu1[col_c * max_size + maps.map_rows[row] as usize] += val;
            } else {
                let size = fb.rows.len();
                fb.rows.push(row);
                fb.lu1[col_c * max_size + size] = val;
                maps.map_rows[row] = size as isize;
            }
        }
        debug_assert!(fb.rows.len() <= max_size);

        // Shrink the contribution; kill it when its last column goes.
        cb.n -= 1;
        if cb.n == 0 {
            desc_block.contrib = None;
            break;
        }
        cb.columns[loc_arr] = cb.columns[cb.n];
        cb.col_loc[loc_arr] = cb.col_loc[cb.n];
        cb.u_member = true;
    }
}

/// Assemble the original-matrix part of `supercol`'s pivot columns.
#[allow(non_snake_case)]
fn focus_supercolumn_from_A<T: Entry>(ctx: &Context<T>, supercol: usize, maps: &mut ScratchMaps) {
    if ctx.failed() {
        return;
    }
    let symbolic = ctx.symbolic;
    let max_size = symbolic.l_size[supercol];

    // SAFETY: this task owns the slot.
    let fb = unsafe { ctx.block_mut(supercol) }.as_mut().expect("front allocated");
    if !fb.valid {
        return;
    }

    for col_c in 0..symbolic.supercolumn_size[supercol] {
        let column = fb.cols[col_c];
        debug_assert!(!ctx.is_column_cleared(column));

        for p in ctx.a.col_start(column)..ctx.a.col_end(column) {
            let row = ctx.a.row_index(p);
            if ctx.is_row_cleared(row) {
                continue;
            }

            if maps.map_rows[row] != -1 {
                fb.lu1[col_c * max_size + maps.map_rows[row] as usize] += ctx.a.value(p);
            } else {
                let size = fb.rows.len();
                fb.rows.push(row);
                fb.lu1[col_c * max_size + size] = ctx.a.value(p);
                maps.map_rows[row] = size as isize;
            }
        }

        ctx.set_column_cleared(column);
        debug_assert!(fb.rows.len() <= max_size);
    }
}

/// Assemble the U part for the pivot rows of `supercol`: first the surviving
/// original-matrix entries (by row, through the transpose), then every live
/// descendant contribution, consuming matched rows. Returns the number of
/// non-pivot columns discovered.
fn focus_rows<T: Entry>(ctx: &Context<T>, supercol: usize, maps: &mut ScratchMaps) -> usize {
    let symbolic = ctx.symbolic;
    let etree = &symbolic.etree;
    let max_size = symbolic.u_size[supercol];

    // SAFETY: this task owns the slot.
    let fb = unsafe { ctx.block_mut(supercol) }.as_mut().expect("front allocated");
    let number = fb.row_pivots_number;

    // Holes are possible, so zero the destination first.
    for v in fb.ut2[..max_size * number].iter_mut() {
        *v = T::zero();
    }

    let mut size = 0usize;

    for row_ind in 0..number {
        let row = fb.rows[row_ind];
        debug_assert!(!ctx.is_row_cleared(row));

        for p in ctx.at.col_start(row)..ctx.at.col_end(row) {
            let column = ctx.at.row_index(p);
            if ctx.is_column_cleared(column) {
                continue;
            }

            if maps.map_cols[column] != -1 {
                fb.ut2[row_ind * max_size + maps.map_cols[column] as usize] = ctx.at.value(p);
            } else {
                fb.cols.push(column);
                fb.ut2[row_ind * max_size + size] = ctx.at.value(p);
                maps.map_cols[column] = size as isize;
                size += 1;
            }
        }

        ctx.set_row_cleared(row);
        debug_assert!(size <= max_size);
    }

    // Contributions of every descendant that still holds one.
    if etree.first_desc_index[supercol] != EMPTY {
        for c in etree.first_desc_index[supercol] as usize..supercol {
            // SAFETY: disjoint slots, descendant completed.
            let Some(desc_block) = (unsafe { ctx.block_mut(c) }).as_mut() else {
                continue;
            };

            for row_ind in 0..number {
                let Some(cb) = desc_block.contrib.as_deref_mut() else {
                    break;
                };
                let row = fb.rows[row_ind];

                let Some(loc_arr) = cb.rows[..cb.m].iter().position(|&r| r == row) else {
                    continue;
                };
                let loc_val = cb.row_loc[loc_arr];

                for i in 0..cb.n {
                    let col = cb.columns[i];
                    debug_assert!(!ctx.is_column_cleared(col));

                    let i_loc = cb.col_loc[i];
                    let val = cb.values[i_loc * cb.ld + loc_val];

                    if maps.map_cols[col] != -1 {
                        fb.ut2[row_ind * max_size + maps.map_cols[col] as usize] += val;
                    } else {
                        fb.cols.push(col);
                        fb.ut2[row_ind * max_size + size] = val;
                        maps.map_cols[col] = size as isize;
                        size += 1;
                    }
                }
                debug_assert!(size <= max_size);

                cb.m -= 1;
                if cb.m == 0 {
                    desc_block.contrib = None;
                    break;
                }
                cb.rows[loc_arr] = cb.rows[cb.m];
                cb.row_loc[loc_arr] = cb.row_loc[cb.m];
                cb.l_member = true;
            }
        }
    }

    // Column mapping stays live for the align-add pass.
    size
}

/// Reorder the non-pivot columns so the ones shared with the parent
/// supercolumn come first, updating the identity list and the column map in
/// lockstep with the physical row swaps of `Ut2`. Returns how many columns
/// the parent will consume.
fn rearrange_non_pivot_cols<T: Entry>(
    ctx: &Context<T>,
    supercol: usize,
    row_b_size: usize,
    ru_size: usize,
    maps: &mut ScratchMaps,
) -> usize {
    let symbolic = ctx.symbolic;
    let parent = symbolic.etree.parent[supercol];
    if parent == EMPTY {
        return 0;
    }
    let parent = parent as usize;

    // SAFETY: this task owns the slot.
    let fb = unsafe { ctx.block_mut(supercol) }.as_mut().expect("front allocated");
    let col_b = fb.col_pivots_number;

    let mut swaps = Vec::new();
    let mut num_inparent = 0usize;
    for col_c in 0..symbolic.supercolumn_size[parent] {
        let column = symbolic.columns[symbolic.start_supercolumn[parent] + col_c];
        if maps.map_cols[column] == -1 {
            continue;
        }

        let column_location = maps.map_cols[column] as usize;
        let switched_column = fb.cols[col_b + num_inparent];
        swaps.push((num_inparent, column_location));

        fb.cols[col_b + num_inparent] = column;
        fb.cols[col_b + column_location] = switched_column;
        maps.map_cols[switched_column] = column_location as isize;
        maps.map_cols[column] = num_inparent as isize;
        num_inparent += 1;
    }

    if num_inparent > 0 {
        dense::swap_lines(&mut fb.ut2, ru_size, row_b_size, &swaps);
    }

    num_inparent
}

/// Per-row fill-degree estimates feeding the threshold kernel's
/// tie-breaking: surviving original-row lengths plus the widths of every
/// live descendant contribution touching the row.
fn prepare_degree_array<T: Entry>(
    ctx: &Context<T>,
    supercol: usize,
    rows: &[usize],
    maps: &ScratchMaps,
) -> Vec<usize> {
    let etree = &ctx.symbolic.etree;
    let mut degrees = vec![0usize; rows.len()];

    for (i, &row) in rows.iter().enumerate() {
        for p in ctx.at.col_start(row)..ctx.at.col_end(row) {
            if !ctx.is_column_cleared(ctx.at.row_index(p)) {
                degrees[i] += 1;
            }
        }
    }

    if etree.first_desc_index[supercol] != EMPTY {
        for c in etree.first_desc_index[supercol] as usize..supercol {
            // SAFETY: disjoint slots, read-only peek at a finished descendant.
            let Some(desc_block) = (unsafe { ctx.block_mut(c) }).as_ref() else {
                continue;
            };
            let Some(cb) = desc_block.contrib.as_deref() else {
                continue;
            };
            for j in 0..cb.m {
                let row = cb.rows[j];
                if maps.map_rows[row] != -1 {
                    degrees[maps.map_rows[row] as usize] += cb.n;
                }
            }
        }
    }

    degrees
}

/// Compress a column-major block in place from leading dimension `ld` to
/// leading dimension `m` over `n` columns, then drop the tail.
fn compress_values_block<T: Entry>(values: &mut Vec<T>, m: usize, n: usize, ld: usize) {
    if m == 0 || n == 0 {
        values.clear();
        values.shrink_to_fit();
        return;
    }
    if m != ld {
        for c in 1..n {
            for i in 0..m {
                values[c * m + i] = values[c * ld + i];
            }
        }
    }
    values.truncate(m * n);
}

/// Compress the assembled front, run the dense threshold LU on the pivotal
/// part, and split the row list into pivots and non-pivots. In the parallel
/// mode a one-child supercolumn first lands its only child's delayed
/// in-parent update and performs its own (deferred) assembly here.
fn factorize_l_portion<T: Entry>(
    ctx: &Context<T>,
    pivot_supercol: usize,
    maps: &mut ScratchMaps,
    one_child: bool,
) {
    let symbolic = ctx.symbolic;
    let etree = &symbolic.etree;

    if one_child && ctx.nproc > 1 {
        let child = etree.first_child[pivot_supercol] as usize;

        // SAFETY: the child subtree joined before this task resumed.
        if let Some(child_fb) = (unsafe { ctx.block_mut(child) }).as_mut() {
            let ld_l = child_fb.ld_l();
            let row_b = child_fb.row_pivots_number;
            let col_b = child_fb.col_pivots_number;
            let ru = child_fb.non_pivot_cols_number;
            let FactorBlock { lu1, ut2, contrib, .. } = child_fb;
            if let Some(cb) = contrib.as_deref_mut() {
                if cb.num_cols_in_parent > 0 {
                    dense::c_sub_abt(
                        cb.m,
                        cb.num_cols_in_parent,
                        col_b,
                        &lu1[row_b..],
                        ld_l,
                        ut2.as_slice(),
                        ru,
                        &mut cb.values,
                        cb.ld,
                    );
                }
            }
        }

        allocate_factor_block(ctx, pivot_supercol);
        focus_supercolumn_from_child(ctx, pivot_supercol, child, maps);
        focus_supercolumn_from_A(ctx, pivot_supercol, maps);
    }

    if ctx.failed() {
        return;
    }

    // SAFETY: this task owns the slot.
    let fb = unsafe { ctx.block_mut(pivot_supercol) }.as_mut().expect("front allocated");
    if !fb.valid {
        return;
    }

    let ml_size = symbolic.l_size[pivot_supercol];
    let l_size = fb.rows.len();
    let col_b_size = symbolic.supercolumn_size[pivot_supercol];
    debug_assert!(l_size > 0);

    if l_size < col_b_size {
        // Fewer candidate rows than pivot columns: structurally deficient.
        fb.valid = false;
        ctx.set_failed();
        return;
    }

    compress_values_block(&mut fb.lu1, l_size, col_b_size, ml_size);

    let mut degrees = if ctx.thresh < 1.0 {
        Some(prepare_degree_array(ctx, pivot_supercol, &fb.rows, maps))
    } else {
        None
    };

    if dense::lu_threshold(
        &mut fb.lu1,
        l_size,
        l_size,
        col_b_size,
        ctx.thresh,
        degrees.as_deref_mut(),
        &mut fb.rows,
    )
    .is_err()
    {
        fb.valid = false;
        ctx.set_failed();
        return;
    }

    let row_b_size = l_size.min(col_b_size);
    fb.row_pivots_number = row_b_size;
    fb.col_pivots_number = col_b_size;
    fb.non_pivot_rows_number = l_size - row_b_size;
}

/// The full per-supercolumn step: L portion (compress + dense LU), the U
/// assembly and triangular solve, the Schur block build with align-add from
/// the descendants, and the rank-k update. The column and row maps set along
/// the way are cleared before returning.
pub(crate) fn factorize_supercolumn<T: Entry>(
    ctx: &Context<T>,
    pivot_supercol: usize,
    maps: &mut ScratchMaps,
) {
    if ctx.failed() {
        return;
    }
    let symbolic = ctx.symbolic;
    let etree = &symbolic.etree;

    let (only_child, parent_has_job) = if ctx.nproc > 1 {
        let parent = etree.parent[pivot_supercol];
        (
            etree.only_child(pivot_supercol),
            parent != EMPTY && symbolic.l_size[parent as usize] > 0,
        )
    } else {
        (false, false)
    };
    let one_child = etree.one_child(pivot_supercol);

    factorize_l_portion(ctx, pivot_supercol, maps, one_child);

    // The only child's delayed "rest" update: the columns the parent will
    // not consume. Runs after the L portion (which already landed the
    // in-parent slice) and before this front's U assembly reads the block.
    if one_child && ctx.nproc > 1 && !ctx.failed() {
        let child = etree.first_child[pivot_supercol] as usize;
        // SAFETY: the child subtree joined before this task resumed.
        if let Some(child_fb) = (unsafe { ctx.block_mut(child) }).as_mut() {
            let ld_l = child_fb.ld_l();
            let row_b = child_fb.row_pivots_number;
            let col_b = child_fb.col_pivots_number;
            let ru = child_fb.non_pivot_cols_number;
            let FactorBlock { lu1, ut2, contrib, .. } = child_fb;
            if let Some(cb) = contrib.as_deref_mut() {
                let num_inparent = cb.num_cols_in_parent;
                if ru > num_inparent {
                    dense::c_sub_abt(
                        cb.m,
                        ru - num_inparent,
                        col_b,
                        &lu1[row_b..],
                        ld_l,
                        &ut2[num_inparent..],
                        ru,
                        &mut cb.values[num_inparent * cb.ld..],
                        cb.ld,
                    );
                }
            }
        }
    }

    if ctx.failed() {
        return;
    }
    // SAFETY: this task owns the slot.
    let fb = unsafe { ctx.block_mut(pivot_supercol) }.as_mut().expect("front allocated");
    if !fb.valid {
        return;
    }

    let mu_size = symbolic.u_size[pivot_supercol];
    let l_size = fb.rows.len();
    let col_b_size = symbolic.supercolumn_size[pivot_supercol];
    let row_b_size = l_size.min(col_b_size);

    let mut ru_size = 0usize;
    if l_size > 0 {
        ru_size = focus_rows(ctx, pivot_supercol, maps);

        // Re-borrow: focus_rows went through the cell as well.
        let fb = unsafe { ctx.block_mut(pivot_supercol) }.as_mut().expect("front allocated");
        compress_values_block(&mut fb.ut2, ru_size, row_b_size, mu_size);
        fb.non_pivot_cols_number = ru_size;

        if ru_size > 0 {
            let num_cols_in_parent = if only_child && parent_has_job {
                rearrange_non_pivot_cols(ctx, pivot_supercol, row_b_size, ru_size, maps)
            } else {
                0
            };

            let fb = unsafe { ctx.block_mut(pivot_supercol) }.as_mut().expect("front allocated");
            dense::unit_lower_right_trisolve(
                ru_size,
                row_b_size,
                &fb.lu1,
                l_size,
                &mut fb.ut2,
                ru_size,
            );

            // Row map now points into the contribution block: non-pivot rows
            // only, at their contribution-relative positions.
            for i in 0..l_size - row_b_size {
                maps.map_rows[fb.rows[row_b_size + i]] = i as isize;
            }

            if l_size - row_b_size > 0 {
                match allocate_contrib_block::<T>(l_size - row_b_size, ru_size) {
                    Err(_) => {
                        fb.valid = false;
                        ctx.set_too_large();
                        return;
                    }
                    Ok(mut cb) => {
                        cb.num_cols_in_parent = num_cols_in_parent;
                        cb.rows.copy_from_slice(&fb.rows[row_b_size..l_size]);
                        cb.columns
                            .copy_from_slice(&fb.cols[col_b_size..col_b_size + ru_size]);
                        fb.contrib = Some(Box::new(cb));
                    }
                }

                // Fold in the descendants' leftovers first, then this
                // front's own update.
                if etree.first_desc_index[pivot_supercol] != EMPTY {
                    let first = etree.first_desc_index[pivot_supercol] as usize;
                    for desc in first..pivot_supercol {
                        // SAFETY: disjoint slots; descendants completed.
                        let Some(desc_block) = (unsafe { ctx.block_mut(desc) }).as_mut() else {
                            continue;
                        };
                        let live = desc_block
                            .contrib
                            .as_deref()
                            .is_some_and(|cb| cb.l_member || cb.u_member);
                        if live {
                            let addto = fb.contrib.as_deref_mut().expect("just built");
                            align_add_from(ctx.nproc, addto, desc_block, maps);
                        }
                    }
                }

                if !(only_child && parent_has_job) {
                    let FactorBlock { lu1, ut2, contrib, .. } = fb;
                    let cb = contrib.as_deref_mut().expect("just built");
                    dense::c_sub_abt(
                        cb.m,
                        cb.n,
                        col_b_size,
                        &lu1[row_b_size..],
                        l_size,
                        ut2.as_slice(),
                        ru_size,
                        &mut cb.values,
                        cb.ld,
                    );
                }
            }
        }
    }

    // Re-borrow for the final bookkeeping.
    let fb = unsafe { ctx.block_mut(pivot_supercol) }.as_mut().expect("front allocated");
    fb.row_pivots_number = row_b_size;
    fb.col_pivots_number = col_b_size;
    fb.non_pivot_rows_number = l_size - row_b_size;
    fb.non_pivot_cols_number = ru_size;

    // No contribution block here means nothing of the descendants' blocks
    // was moved; drop their membership marks.
    if (fb.non_pivot_rows_number == 0 || fb.non_pivot_cols_number == 0)
        && etree.first_desc_index[pivot_supercol] != EMPTY
    {
        let first = etree.first_desc_index[pivot_supercol] as usize;
        for desc in first..pivot_supercol {
            // SAFETY: disjoint slots.
            if let Some(desc_block) = (unsafe { ctx.block_mut(desc) }).as_mut() {
                if let Some(cb) = desc_block.contrib.as_deref_mut() {
                    cb.l_member = false;
                    cb.u_member = false;
                }
            }
        }
    }

    // Clear the row and column indications for the next supercolumn.
    for i in 0..fb.row_pivots_number {
        maps.map_rows[fb.rows[i]] = -1;
    }
    for i in 0..fb.non_pivot_rows_number {
        maps.map_rows[fb.rows[fb.row_pivots_number + i]] = -1;
    }
    for i in 0..fb.non_pivot_cols_number {
        maps.map_cols[fb.cols[fb.col_pivots_number + i]] = -1;
    }
}
