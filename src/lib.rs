//! Conservative regridding operators between the grids of a coupled
//! climate model: a coarse atmosphere/ocean grid (A), a fine ice-sheet
//! grid (I) and a derived elevation-class grid (E).
//!
//! The fine grid can hold tens of millions of cells, so the operators are
//! never built in one pass. The crate's core is a chunked, memory-bounded
//! pipeline: [`chunk`] partitions the globe into segments bounded by an
//! ice-cell count, [`exchange`] accumulates sparse geometric overlaps per
//! chunk, [`regrid`] assembles the coupling topology and generates the
//! five directed operators, and [`output`] flushes each operator to disk
//! before the next one is built. An external build script (emitted by
//! planning mode) runs the chunks one at a time and combines the results.

pub mod chunk;
pub mod elevation;
pub mod exchange;
pub mod grid;
pub mod input;
pub mod operator;
pub mod output;
pub mod overlap;
pub mod regrid;
pub mod sparse;

pub mod errors;
