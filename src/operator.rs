//! Sparse weighted remapping operators.
//!
//! A [`WeightedOperator`] is a sparse linear map from a source dense-index
//! space to a destination dense-index space, carrying a per-row weight
//! (the destination cell area covered by the map) and a per-column weight.
//! It is constructed once, persisted, then released; it is never mutated
//! after creation.
//!
//! Two weighting policies exist. A *conservative* operator keeps raw
//! area-weighted sums so the area integral of the mapped quantity is
//! preserved exactly. A *scaled* operator normalizes each destination row
//! to sum 1, producing a weighted average; it is not conservative in
//! general. Both are derived from the same triplets; only the row weight
//! application differs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sparse matrix entry in dense indices: (row, col, value).
pub type Triplet = (usize, usize, f64);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WeightedOperator {
    /// Per-destination-row weight: row sums of the unscaled matrix.
    pub wm: Vec<f64>,
    /// Matrix entries, sorted by (row, col), duplicates coalesced.
    pub m: Vec<Triplet>,
    /// Per-source-column weight: column sums of the unscaled matrix.
    pub mw: Vec<f64>,
    /// True when entries are raw area integrals (`scale = false`).
    pub conservative: bool,
}

impl WeightedOperator {
    /// Build from accumulated triplets.
    ///
    /// Duplicate (row, col) pairs are summed. With `scale = true` each
    /// nonempty row is divided by its weight afterwards; the weight
    /// vectors always describe the unscaled matrix.
    pub fn from_triplets(
        triplets: impl IntoIterator<Item = Triplet>,
        nrows: usize,
        ncols: usize,
        scale: bool,
    ) -> Self {
        let mut acc: HashMap<(usize, usize), f64> = HashMap::new();
        for (row, col, value) in triplets {
            debug_assert!(row < nrows && col < ncols);
            *acc.entry((row, col)).or_default() += value;
        }
        let mut m: Vec<Triplet> = acc
            .into_iter()
            .map(|((row, col), value)| (row, col, value))
            .collect();
        m.sort_unstable_by_key(|&(row, col, _)| (row, col));

        let mut wm = vec![0.0; nrows];
        let mut mw = vec![0.0; ncols];
        for &(row, col, value) in &m {
            wm[row] += value;
            mw[col] += value;
        }
        if scale {
            for entry in &mut m {
                entry.2 /= wm[entry.0];
            }
        }
        Self {
            wm,
            m,
            mw,
            conservative: !scale,
        }
    }

    pub fn nrows(&self) -> usize {
        self.wm.len()
    }

    pub fn ncols(&self) -> usize {
        self.mw.len()
    }

    /// Entries grouped by row; empty rows yield empty groups.
    pub fn rows(&self) -> Vec<Vec<(usize, f64)>> {
        let mut rows = vec![Vec::new(); self.nrows()];
        for &(row, col, value) in &self.m {
            rows[row].push((col, value));
        }
        rows
    }
}

/// Derive the display-resolution operator `I2vX` from an already-built
/// `IvX` operator, replacing its fine-grid destination axis by the much
/// coarser display grid.
///
/// `i2vi` holds the overlaps between the display grid and the fine grid
/// in dense indices (an independent accumulator run clipped to the
/// chunk's I cells). No overlap against the full-resolution grid is
/// recomputed; everything here is matrix algebra:
///
/// - `wM(I2vX) = I2vI . diag(1/colsum(I2vI)) . wM(IvX)`
/// - scaled:        `M(I2vX) = diag(1/rowsum(I2vI)) . I2vI . M(IvX)`
/// - conservative:  `M(I2vX) = I2vI . diag(1/wM(IvX)) . M(IvX)`
/// - `Mw(I2vX) = Mw(IvX)`
pub fn downsample_display(
    ivx: &WeightedOperator,
    i2vi: &[Triplet],
    n_i2: usize,
    scale: bool,
) -> WeightedOperator {
    let n_i = ivx.nrows();

    let mut rowsum = vec![0.0; n_i2];
    let mut colsum = vec![0.0; n_i];
    for &(r, c, v) in i2vi {
        rowsum[r] += v;
        colsum[c] += v;
    }

    // Destination weights: spread each fine-row weight over the display
    // cells covering it, in proportion to the overlap fraction.
    let mut wm = vec![0.0; n_i2];
    for &(r, c, v) in i2vi {
        if colsum[c] > 0.0 {
            wm[r] += v / colsum[c] * ivx.wm[c];
        }
    }

    let ivx_rows = ivx.rows();
    let mut acc: HashMap<(usize, usize), f64> = HashMap::new();
    for &(r, k, v) in i2vi {
        let factor = if scale {
            v / rowsum[r]
        } else if ivx.wm[k] > 0.0 {
            v / ivx.wm[k]
        } else {
            continue;
        };
        for &(c, mv) in &ivx_rows[k] {
            *acc.entry((r, c)).or_default() += factor * mv;
        }
    }
    let mut m: Vec<Triplet> = acc
        .into_iter()
        .map(|((row, col), value)| (row, col, value))
        .collect();
    m.sort_unstable_by_key(|&(row, col, _)| (row, col));

    WeightedOperator {
        wm,
        m,
        mw: ivx.mw.clone(),
        conservative: ivx.conservative,
    }
}
