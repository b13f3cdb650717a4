//! Chunk partitioning of the coarse-grid scan.
//!
//! A chunk is a memory-bounded subdivision of the global coarse grid,
//! processed independently and combined afterwards. Planning mode scans
//! the coarse grid in row-major order counting fine ice cells and closes
//! a chunk as soon as the running count reaches the threshold, including
//! the coarse cell that crossed it; consecutive chunks partition the scan
//! with no gaps or overlaps, and a boundary never splits a coarse cell's
//! fine-grid block. Execution mode re-scans one chunk's range and builds
//! the validity mask the rest of the pipeline runs on, which keeps every
//! downstream stage chunk-agnostic.
//!
//! Planning mode also emits a makefile with one target per chunk and an
//! aggregate target invoking the external combiner. The makefile is
//! marked `.NOTPARALLEL`: each chunk invocation is individually memory
//! bounded, but running several at once could still exhaust the machine.

use crate::errors::{IcegridError, IcegridResult};
use crate::grid::GridSpec;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Default limit on fine ice cells per chunk. Larger means more memory
/// per chunk; smaller means more chunks. Not a hard limit: the coarse
/// cell that crosses it still joins the chunk.
pub const DEFAULT_CHUNK_THRESHOLD: usize = 4_000_000;

/// Partitioner knobs, threaded explicitly so tests can run at small
/// scales.
#[derive(Clone, Copy, Debug)]
pub struct ChunkParams {
    pub threshold: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_CHUNK_THRESHOLD,
        }
    }
}

/// One chunk of the coarse-grid scan: `start` inclusive, `end` exclusive,
/// both (row, col) positions in row-major scan order. `end` may be
/// (jm, 0), one past the last row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpec {
    pub id: usize,
    pub start: (usize, usize),
    pub end: (usize, usize),
}

impl ChunkSpec {
    pub fn start_linear(&self, grid: &GridSpec) -> usize {
        self.start.0 * grid.im + self.start.1
    }

    pub fn end_linear(&self, grid: &GridSpec) -> usize {
        self.end.0 * grid.im + self.end.1
    }

    fn from_linear(id: usize, start: usize, end: usize, grid: &GridSpec) -> Self {
        Self {
            id,
            start: (start / grid.im, start % grid.im),
            end: (end / grid.im, end % grid.im),
        }
    }

    /// Parse the CLI form `id,j0,i0,j1,i1`.
    pub fn parse(arg: &str) -> IcegridResult<Self> {
        let fields: Vec<usize> = arg
            .split(',')
            .map(|s| s.trim().parse::<usize>())
            .collect::<Result<_, _>>()
            .map_err(|_| IcegridError::BadChunkDescriptor(arg.to_string()))?;
        if fields.len() != 5 {
            return Err(IcegridError::BadChunkDescriptor(format!(
                "{arg} (expected 5 values)"
            )));
        }
        Ok(Self {
            id: fields[0],
            start: (fields[1], fields[2]),
            end: (fields[3], fields[4]),
        })
    }

    /// Inverse of [`parse`](Self::parse), for the generated makefile.
    pub fn to_arg(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.id, self.start.0, self.start.1, self.end.0, self.end.1
        )
    }

    fn check_bounds(&self, grid: &GridSpec) -> IcegridResult<()> {
        let (start, end) = (self.start_linear(grid), self.end_linear(grid));
        if start > end || end > grid.ncells() {
            return Err(IcegridError::BadChunkDescriptor(format!(
                "{} out of bounds for grid {}",
                self.to_arg(),
                grid.name
            )));
        }
        Ok(())
    }
}

/// Count fine ice cells in the block under one coarse cell.
fn block_ice_count(
    fgice_i: &ArrayView2<f64>,
    j: usize,
    i: usize,
    mult_j: usize,
    mult_i: usize,
) -> usize {
    let mut n = 0;
    for jj in j * mult_j..(j + 1) * mult_j {
        for ii in i * mult_i..(i + 1) * mult_i {
            if fgice_i[[jj, ii]] != 0.0 {
                n += 1;
            }
        }
    }
    n
}

/// Planning mode: split the full coarse-grid scan into chunks bounded by
/// `params.threshold` fine ice cells. The final partial chunk is always
/// emitted.
pub fn plan_chunks(
    grid_o: &GridSpec,
    grid_i: &GridSpec,
    fgice_o: ArrayView2<'_, f64>,
    fgice_i: ArrayView2<'_, f64>,
    params: &ChunkParams,
) -> IcegridResult<Vec<ChunkSpec>> {
    let (mult_j, mult_i) = grid_i.multiple_of(grid_o)?;

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut nice = 0usize;
    for lin in 0..grid_o.ncells() {
        let (j, i) = grid_o.cell_coords(lin);
        if fgice_o[[j, i]] != 0.0 {
            nice += block_ice_count(&fgice_i, j, i, mult_j, mult_i);
        }
        if nice >= params.threshold {
            let chunk = ChunkSpec::from_linear(chunks.len(), start, lin + 1, grid_o);
            log::info!("chunk {}: nice={} {:?}..{:?}", chunk.id, nice, chunk.start, chunk.end);
            chunks.push(chunk);
            start = lin + 1;
            nice = 0;
        }
    }
    if start < grid_o.ncells() {
        let chunk = ChunkSpec::from_linear(chunks.len(), start, grid_o.ncells(), grid_o);
        log::info!("chunk {}: nice={} {:?}..{:?}", chunk.id, nice, chunk.start, chunk.end);
        chunks.push(chunk);
    }
    Ok(chunks)
}

/// Execution mode: build the validity mask for one chunk.
///
/// The mask covers the full fine grid; cells outside the chunk's coarse
/// block range, and cells without ice, stay at the NaN sentinel. Cells
/// inside get their elevation copied from the global elevation field.
pub fn chunk_validity_mask(
    chunk: &ChunkSpec,
    grid_o: &GridSpec,
    grid_i: &GridSpec,
    fgice_o: ArrayView2<'_, f64>,
    fgice_i: ArrayView2<'_, f64>,
    elev_i: ArrayView2<'_, f64>,
) -> IcegridResult<Array2<f64>> {
    let (mult_j, mult_i) = grid_i.multiple_of(grid_o)?;
    chunk.check_bounds(grid_o)?;

    let mut elevmask = Array2::from_elem((grid_i.jm, grid_i.im), f64::NAN);
    for lin in chunk.start_linear(grid_o)..chunk.end_linear(grid_o) {
        let (j, i) = grid_o.cell_coords(lin);
        if fgice_o[[j, i]] == 0.0 {
            continue;
        }
        for jj in j * mult_j..(j + 1) * mult_j {
            for ii in i * mult_i..(i + 1) * mult_i {
                if fgice_i[[jj, ii]] != 0.0 {
                    elevmask[[jj, ii]] = elev_i[[jj, ii]];
                }
            }
        }
    }
    Ok(elevmask)
}

/// Write the chunk-generating makefile next to the chunk plan.
///
/// `argv` is the planning invocation verbatim; each chunk target re-runs
/// it with `--runchunk`. The aggregate target hands every chunk artifact
/// (both section runtypes) to the external combiner once all chunk
/// targets have succeeded.
pub fn write_chunk_makefile(
    ofname: &str,
    argv: &[String],
    chunks: &[ChunkSpec],
) -> IcegridResult<String> {
    let mk_path = format!("{ofname}.mk");
    let file = File::create(Path::new(&mk_path))?;
    let mut out = BufWriter::new(file);

    // Chunk processes are memory bounded individually, not collectively
    writeln!(out, ".NOTPARALLEL:")?;
    writeln!(out)?;

    let stamps: Vec<String> = chunks
        .iter()
        .map(|c| format!("{ofname}-standard-{:02}", c.id))
        .collect();
    let artifacts: Vec<String> = chunks
        .iter()
        .flat_map(|c| {
            [
                format!("{ofname}-mismatched-{:02}", c.id),
                format!("{ofname}-standard-{:02}", c.id),
            ]
        })
        .collect();

    writeln!(out, "{ofname} : {mk_path} {}", stamps.join(" "))?;
    writeln!(out, "\ticegrid-combine {}", artifacts.join(" "))?;
    writeln!(out)?;

    for (chunk, stamp) in chunks.iter().zip(&stamps) {
        writeln!(out, "{stamp} : {mk_path}")?;
        writeln!(out, "\t{} --runchunk {}", argv.join(" "), chunk.to_arg())?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(mk_path)
}
