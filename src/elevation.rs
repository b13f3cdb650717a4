//! Elevation classes and the combined A x class indexing for the E grid.
//!
//! An elevation class is a discretized band of surface elevation used to
//! stratify each coarse cell into sub-cells for energy and mass-balance
//! purposes. The E axis is the cartesian product of the A axis and the
//! class list, flattened with A varying fastest so that E sparse ids stay
//! stable grid-wide and can be combined across chunks.

use crate::errors::{IcegridError, IcegridResult};
use serde::{Deserialize, Serialize};

/// Generate the ordered class elevations from (low, high, step) [m].
pub fn elevation_classes(low: f64, high: f64, step: f64) -> IcegridResult<Vec<f64>> {
    if !(step > 0.0) || high < low || !low.is_finite() || !high.is_finite() {
        return Err(IcegridError::BadElevationClasses(format!(
            "low={low} high={high} step={step}"
        )));
    }
    let mut hcdefs = Vec::new();
    let mut elev = low;
    // Tolerate rounding at the top of the range
    while elev <= high + step * 1e-9 {
        hcdefs.push(elev);
        elev += step;
    }
    Ok(hcdefs)
}

/// How an ice cell's elevation is distributed over the class list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterpStyle {
    /// Linear interpolation between the two bracketing classes.
    #[default]
    ZInterp,
    /// All weight on the nearest class.
    Nearest,
}

/// Class weights for one elevation: at most two (class, weight) pairs
/// summing to 1. The second pair has zero weight when a single class
/// takes everything; callers skip zero weights.
pub fn class_weights(hcdefs: &[f64], elev: f64, style: InterpStyle) -> [(usize, f64); 2] {
    debug_assert!(!hcdefs.is_empty());
    let last = hcdefs.len() - 1;
    match style {
        InterpStyle::ZInterp => {
            if elev <= hcdefs[0] {
                return [(0, 1.0), (0, 0.0)];
            }
            if elev >= hcdefs[last] {
                return [(last, 1.0), (last, 0.0)];
            }
            let k = hcdefs.partition_point(|&h| h <= elev) - 1;
            let frac = (elev - hcdefs[k]) / (hcdefs[k + 1] - hcdefs[k]);
            [(k, 1.0 - frac), (k + 1, frac)]
        }
        InterpStyle::Nearest => {
            let mut best = 0;
            for (k, &h) in hcdefs.iter().enumerate() {
                if (elev - h).abs() < (elev - hcdefs[best]).abs() {
                    best = k;
                }
            }
            [(best, 1.0), (best, 0.0)]
        }
    }
}

/// Deterministic bijection between E sparse ids and (A cell id, class
/// index) tuples, A varying fastest (stride 1).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Indexing {
    /// Sparse extent of the A axis (full grid, not just cells with ice)
    pub n_a: usize,
    /// Number of elevation classes
    pub n_hc: usize,
}

impl Indexing {
    pub fn new(n_a: usize, n_hc: usize) -> Self {
        Self { n_a, n_hc }
    }

    /// E sparse id for an A cell and a class index.
    pub fn to_e(&self, cell_a: usize, ihc: usize) -> usize {
        debug_assert!(cell_a < self.n_a && ihc < self.n_hc);
        ihc * self.n_a + cell_a
    }

    /// Inverse of [`to_e`](Self::to_e): (A cell id, class index).
    pub fn from_e(&self, cell_e: usize) -> (usize, usize) {
        (cell_e % self.n_a, cell_e / self.n_a)
    }

    /// Sparse extent of the E axis.
    pub fn extent(&self) -> usize {
        self.n_a * self.n_hc
    }
}
