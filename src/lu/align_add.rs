//! Extend-add: scatter a descendant's Schur contribution into the front
//! being built, translating logical row/column identities through the
//! inverse position maps. Rectangles larger than [`ALIGN_ADD_SMALL`] along a
//! dimension are split in two and scattered as independent tasks.

use crate::entry::Entry;
use crate::lu::ALIGN_ADD_SMALL;
use crate::lu::factor::ScratchMaps;
use crate::lu::front::{ContribBlock, FactorBlock};

/// Raw destination pointer shared by the scatter halves.
///
/// SAFETY: each (row, column) identity pair of the source maps to a unique
/// element of the destination, so the two halves of any split write disjoint
/// element sets; the source block and the maps are only read.
#[derive(Clone, Copy)]
struct Dst<T>(*mut T, usize);
unsafe impl<T> Send for Dst<T> {}
unsafe impl<T> Sync for Dst<T> {}

/// Scatter whatever the front consumed of `desc`'s contribution into the
/// freshly built `addto` block, then compact or free the contribution.
pub(crate) fn align_add_from<T: Entry>(
    nproc: usize,
    addto: &mut ContribBlock<T>,
    desc: &mut FactorBlock<T>,
    maps: &ScratchMaps,
) {
    let Some(cb) = desc.contrib.as_deref_mut() else {
        return;
    };
    let parallel = nproc > 1;
    let dst = Dst(addto.values.as_mut_ptr(), addto.ld);

    if cb.l_member && cb.u_member {
        // LUSon: every row and column of the contribution appears in the
        // destination; no membership checks needed.
        scatter_full(dst, cb, maps, 0, cb.m, 0, cb.n, parallel);
        cb.n = 0;
    } else if cb.l_member {
        // Lson: rows may be absent from the destination, columns are all in.
        scatter_rows(dst, cb, maps, 0, cb.m, 0, cb.n, parallel);

        // Take the absorbed rows out of the contribution.
        let mut i = 0;
        while i < cb.m {
            if maps.map_rows[cb.rows[i]] != -1 {
                cb.m -= 1;
                cb.rows[i] = cb.rows[cb.m];
                cb.row_loc[i] = cb.row_loc[cb.m];
            } else {
                i += 1;
            }
        }
    } else if cb.u_member {
        // Uson: the symmetric case on columns.
        scatter_cols(dst, cb, maps, 0, cb.m, 0, cb.n, parallel);

        let mut i = 0;
        while i < cb.n {
            if maps.map_cols[cb.columns[i]] != -1 {
                cb.n -= 1;
                cb.columns[i] = cb.columns[cb.n];
                cb.col_loc[i] = cb.col_loc[cb.n];
            } else {
                i += 1;
            }
        }
    }

    if cb.n == 0 || cb.m == 0 {
        desc.contrib = None;
    } else {
        cb.l_member = false;
        cb.u_member = false;
    }
}

fn split<T: Entry>(
    dst: Dst<T>,
    addfrom: &ContribBlock<T>,
    maps: &ScratchMaps,
    m0: usize,
    m1: usize,
    n0: usize,
    n1: usize,
    leaf: fn(Dst<T>, &ContribBlock<T>, &ScratchMaps, usize, usize, usize, usize, bool),
) -> bool {
    if n1 - n0 > ALIGN_ADD_SMALL {
        let nhalf = (n0 + n1) / 2;
        rayon::join(
            || leaf(dst, addfrom, maps, m0, m1, n0, nhalf, true),
            || leaf(dst, addfrom, maps, m0, m1, nhalf, n1, true),
        );
        return true;
    }
    if m1 - m0 > ALIGN_ADD_SMALL {
        let mhalf = (m0 + m1) / 2;
        rayon::join(
            || leaf(dst, addfrom, maps, m0, mhalf, n0, n1, true),
            || leaf(dst, addfrom, maps, mhalf, m1, n0, n1, true),
        );
        return true;
    }
    false
}

fn scatter_full<T: Entry>(
    dst: Dst<T>,
    addfrom: &ContribBlock<T>,
    maps: &ScratchMaps,
    m0: usize,
    m1: usize,
    n0: usize,
    n1: usize,
    parallel: bool,
) {
    if parallel && split(dst, addfrom, maps, m0, m1, n0, n1, scatter_full::<T>) {
        return;
    }

    for j in n0..n1 {
        let j_loc = addfrom.col_loc[j];
        debug_assert_ne!(maps.map_cols[addfrom.columns[j]], -1);
        let j_to = maps.map_cols[addfrom.columns[j]] as usize;
        for i in m0..m1 {
            let i_loc = addfrom.row_loc[i];
            debug_assert_ne!(maps.map_rows[addfrom.rows[i]], -1);
            let i_to = maps.map_rows[addfrom.rows[i]] as usize;
            // SAFETY: see `Dst`; distinct (i, j) pairs hit distinct elements.
            unsafe {
                *dst.0.add(j_to * dst.1 + i_to) += addfrom.values[j_loc * addfrom.ld + i_loc];
            }
        }
    }
}

fn scatter_rows<T: Entry>(
    dst: Dst<T>,
    addfrom: &ContribBlock<T>,
    maps: &ScratchMaps,
    m0: usize,
    m1: usize,
    n0: usize,
    n1: usize,
    parallel: bool,
) {
    if parallel && split(dst, addfrom, maps, m0, m1, n0, n1, scatter_rows::<T>) {
        return;
    }

    for i in m0..m1 {
        let i_loc = addfrom.row_loc[i];
        let i_to = maps.map_rows[addfrom.rows[i]];
        if i_to == -1 {
            continue;
        }
        let i_to = i_to as usize;
        for j in n0..n1 {
            let j_loc = addfrom.col_loc[j];
            debug_assert_ne!(maps.map_cols[addfrom.columns[j]], -1);
            let j_to = maps.map_cols[addfrom.columns[j]] as usize;
            // SAFETY: see `Dst`.
            unsafe {
                *dst.0.add(j_to * dst.1 + i_to) += addfrom.values[j_loc * addfrom.ld + i_loc];
            }
        }
    }
}

fn scatter_cols<T: Entry>(
    dst: Dst<T>,
    addfrom: &ContribBlock<T>,
    maps: &ScratchMaps,
    m0: usize,
    m1: usize,
    n0: usize,
    n1: usize,
    parallel: bool,
) {
    if parallel && split(dst, addfrom, maps, m0, m1, n0, n1, scatter_cols::<T>) {
        return;
    }

    for j in n0..n1 {
        let j_loc = addfrom.col_loc[j];
        let j_to = maps.map_cols[addfrom.columns[j]];
        if j_to == -1 {
            continue;
        }
        let j_to = j_to as usize;
        for i in m0..m1 {
            let i_loc = addfrom.row_loc[i];
            debug_assert_ne!(maps.map_rows[addfrom.rows[i]], -1);
            let i_to = maps.map_rows[addfrom.rows[i]] as usize;
            // SAFETY: see `Dst`.
            unsafe {
                *dst.0.add(j_to * dst.1 + i_to) += addfrom.values[j_loc * addfrom.ld + i_loc];
            }
        }
    }
}
