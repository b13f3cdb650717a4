//! The exchange grid and its overlap accumulator.
//!
//! The exchange grid is the authoritative record of nonzero overlaps
//! between the coarse (A) and fine (I) grids for one chunk; every
//! operator the chunk produces is derived from it. [`ExchAccum`] sits
//! between the overlap stream and the exchange grid: events whose I-side
//! cell carries the NaN sentinel in the validity mask are discarded, all
//! others are appended and both cell ids registered in their sparse
//! dimension registries.
//!
//! A global run accumulates tens of millions of entries and can take a
//! long time, so the accumulator reports entry counts through a
//! [`ProgressSink`] at a fixed interval rather than printing from inside
//! the loop; tests install a silent sink.

use crate::sparse::SparseDim;
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

/// Entries between progress reports.
pub const PROGRESS_INTERVAL: usize = 100_000;

/// One overlap between an A cell and an I cell, sparse ids.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExchangeEntry {
    pub cell_a: usize,
    pub cell_i: usize,
    pub area: f64,
}

/// Ordered collection of exchange entries for one chunk.
///
/// Entry order follows the scan order of the overlap stream. Consumers
/// must not rely on it for correctness, only for reproducible logging.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExchangeGrid {
    entries: Vec<ExchangeEntry>,
}

impl ExchangeGrid {
    pub fn add(&mut self, cell_a: usize, cell_i: usize, area: f64) {
        self.entries.push(ExchangeEntry {
            cell_a,
            cell_i,
            area,
        });
    }

    pub fn entries(&self) -> &[ExchangeEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Receives running entry counts during accumulation.
pub trait ProgressSink {
    fn entries(&mut self, count: usize);
}

/// Progress sink that reports through the `log` facade.
#[derive(Debug, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn entries(&mut self, count: usize) {
        log::info!("exchange grid size = {count}");
    }
}

/// Progress sink that discards all reports.
#[derive(Debug, Default)]
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn entries(&mut self, _count: usize) {}
}

/// Accumulates overlap events into an [`ExchangeGrid`], filtering by the
/// chunk's validity mask and registering touched cells.
pub struct ExchAccum<'a, 'm, P: ProgressSink> {
    exgrid: &'a mut ExchangeGrid,
    /// Elevation where ice is present, NaN sentinel elsewhere; full I grid.
    elevmask: ArrayView2<'m, f64>,
    dim_a: &'a mut SparseDim,
    dim_i: &'a mut SparseDim,
    progress: P,
    interval: usize,
}

impl<'a, 'm, P: ProgressSink> ExchAccum<'a, 'm, P> {
    pub fn new(
        exgrid: &'a mut ExchangeGrid,
        elevmask: ArrayView2<'m, f64>,
        dim_a: &'a mut SparseDim,
        dim_i: &'a mut SparseDim,
        progress: P,
    ) -> Self {
        Self {
            exgrid,
            elevmask,
            dim_a,
            dim_i,
            progress,
            interval: PROGRESS_INTERVAL,
        }
    }

    /// Override the progress interval (tests run at small scales).
    pub fn with_interval(mut self, interval: usize) -> Self {
        self.interval = interval;
        self
    }

    /// Consume one overlap event from the interpolation engine.
    pub fn add(&mut self, cell_a: usize, cell_i: usize, area: f64) {
        let im = self.elevmask.ncols();
        if self.elevmask[[cell_i / im, cell_i % im]].is_nan() {
            return;
        }
        self.exgrid.add(cell_a, cell_i, area);
        if self.exgrid.len() % self.interval == 0 {
            self.progress.entries(self.exgrid.len());
        }
        self.dim_a.add_dense(cell_a);
        self.dim_i.add_dense(cell_i);
    }
}
