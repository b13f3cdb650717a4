//! Regridder assembly and operator generation.
//!
//! A [`GcmRegridder`] couples one coarse grid (ocean or atmosphere) to
//! the fine ice grid through an exchange grid, for one chunk. It owns the
//! sparsified ("abbreviated") A grid, the elevation-class list, the E
//! indexing and its ice sub-regridders; it is created fresh per chunk and
//! dropped after the chunk's matrices are written.
//!
//! The *standard* variant couples directly against the validity mask.
//! The *mismatched* variant wraps a standard ocean regridder and
//! reconciles it with the GCM's own notion of ocean extent, which can
//! differ from the ice-derived extent: two ocean-cover fields from the
//! topography source (fractional and rounded 0/1) are attached and the
//! exchange-grid areas rescaled accordingly before any operator is built.

use crate::elevation::{class_weights, Indexing, InterpStyle};
use crate::errors::{IcegridError, IcegridResult};
use crate::exchange::{ExchAccum, ExchangeEntry, ExchangeGrid, ProgressSink};
use crate::grid::GridSpec;
use crate::operator::{Triplet, WeightedOperator};
use crate::overlap::overlap_lonlat;
use crate::sparse::SparseDim;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Knobs shared by every operator build.
#[derive(Clone, Copy, Debug)]
pub struct RegridParams {
    /// true: rows normalized to sum 1; false: conservative (area-true)
    pub scale: bool,
    /// Earth radius [m] for the area weighting
    pub eq_rad: f64,
}

/// The five directed operators of a chunk, named destination-first
/// ("AvI" maps I to A). Generation follows [`GENERATION_ORDER`]: the two
/// fine-grid-row operators come last and are downsampled immediately, so
/// the largest objects stay resident only briefly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatorKind {
    AvI,
    EvI,
    IvE,
    IvA,
    AvE,
}

pub const GENERATION_ORDER: [OperatorKind; 5] = [
    OperatorKind::AvI,
    OperatorKind::EvI,
    OperatorKind::IvE,
    OperatorKind::IvA,
    OperatorKind::AvE,
];

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperatorKind::AvI => "AvI",
            OperatorKind::EvI => "EvI",
            OperatorKind::IvE => "IvE",
            OperatorKind::IvA => "IvA",
            OperatorKind::AvE => "AvE",
        })
    }
}

/// One ice sheet coupled to the A grid: the realized fine grid, its
/// exchange grid against A and the class-interpolation style.
#[derive(Clone, Debug)]
pub struct IceRegridder {
    pub grid_i: GridSpec,
    /// Only the I cells touched by ice
    pub dim_i: SparseDim,
    pub exgrid: ExchangeGrid,
    pub interp_style: InterpStyle,
}

/// Coupling of one coarse grid to the ice grid(s) for one chunk.
#[derive(Clone, Debug)]
pub struct GcmRegridder {
    /// Human-readable grid role ("Ocean", "Atmosphere")
    pub label: String,
    pub grid_a: GridSpec,
    /// Only the A cells touched by ice
    pub dim_a: SparseDim,
    /// Elevation-class elevations [m], ascending
    pub hcdefs: Vec<f64>,
    pub indexing: Indexing,
    pub ice_regridders: Vec<IceRegridder>,
}

/// Build a standard regridder for one chunk: run the overlap stream for
/// the (A, I) pair through the accumulator, realize the touched cells on
/// both sides, and attach the elevation-class indexing.
pub fn assemble_standard<P: ProgressSink>(
    label: &str,
    grid_a: &GridSpec,
    grid_i: &GridSpec,
    hcdefs: &[f64],
    elevmask: ArrayView2<'_, f64>,
    params: &RegridParams,
    progress: P,
) -> IcegridResult<GcmRegridder> {
    grid_i.multiple_of(grid_a)?;
    if elevmask.dim() != (grid_i.jm, grid_i.im) {
        return Err(IcegridError::FieldShape {
            field: "elevmask".to_string(),
            found: vec![elevmask.nrows(), elevmask.ncols()],
            expected: vec![grid_i.jm, grid_i.im],
        });
    }
    if hcdefs.is_empty() {
        return Err(IcegridError::BadElevationClasses("empty class list".into()));
    }

    log::info!("Computing overlaps for {label} ({})", grid_a.name);
    let mut exgrid = ExchangeGrid::default();
    let mut dim_a = SparseDim::new(grid_a.ncells());
    let mut dim_i = SparseDim::new(grid_i.ncells());
    {
        let mut accum = ExchAccum::new(&mut exgrid, elevmask, &mut dim_a, &mut dim_i, progress);
        overlap_lonlat(grid_a, grid_i, params.eq_rad, |_| true, |a, i, area| {
            accum.add(a, i, area)
        });
    }

    Ok(GcmRegridder {
        label: label.to_string(),
        grid_a: grid_a.clone(),
        dim_a,
        hcdefs: hcdefs.to_vec(),
        indexing: Indexing::new(grid_a.ncells(), hcdefs.len()),
        ice_regridders: vec![IceRegridder {
            grid_i: grid_i.clone(),
            dim_i,
            exgrid,
            interp_style: InterpStyle::ZInterp,
        }],
    })
}

/// Standard ocean regridder plus the GCM's ocean-cover fields.
#[derive(Clone, Debug)]
pub struct MismatchedRegridder {
    pub inner: GcmRegridder,
    /// Fractional ocean cover derived from ice extent (FOCEANF)
    pub focean_p: Array2<f64>,
    /// Rounded 0/1 ocean cover as the GCM runs it (FOCEAN)
    pub focean_m: Array2<f64>,
}

impl MismatchedRegridder {
    /// Wrap an ocean regridder with the topography fields. Malformed
    /// fields (wrong shape, rounded values other than 0/1) are fatal for
    /// the chunk.
    pub fn new(
        inner: GcmRegridder,
        focean_p: Array2<f64>,
        focean_m: Array2<f64>,
    ) -> IcegridResult<Self> {
        let shape = (inner.grid_a.jm, inner.grid_a.im);
        for (name, field) in [("FOCEANF", &focean_p), ("FOCEAN", &focean_m)] {
            if field.dim() != shape {
                return Err(IcegridError::FieldShape {
                    field: name.to_string(),
                    found: field.shape().to_vec(),
                    expected: vec![shape.0, shape.1],
                });
            }
        }
        for ((j, i), &v) in focean_m.indexed_iter() {
            if v != 0.0 && v != 1.0 {
                return Err(IcegridError::BadCell {
                    j,
                    i,
                    reason: format!("rounded ocean cover must be 0 or 1, got {v}"),
                });
            }
        }
        Ok(Self {
            inner,
            focean_p,
            focean_m,
        })
    }

    /// Operator factory over the reconciled exchange grid.
    ///
    /// Reconciliation per coarse cell with ice: cells the GCM runs as
    /// pure ocean are dropped; for the rest, overlap areas are magnified
    /// by the reciprocal fractional continent cover, extending the
    /// ice-derived partial cell to the full continental cell the GCM
    /// sees. A cell carrying ice but with zero fractional continent
    /// cannot be reconciled and aborts the chunk.
    pub fn regrid_matrices<'a>(
        &'a self,
        elevmask: ArrayView2<'a, f64>,
    ) -> IcegridResult<RegridMatrices<'a>> {
        let grid_a = &self.inner.grid_a;
        let mut reconciled = Vec::with_capacity(self.inner.ice_regridders.len());
        for sheet in &self.inner.ice_regridders {
            let mut entries = Vec::with_capacity(sheet.exgrid.len());
            for entry in sheet.exgrid.entries() {
                let (j, i) = grid_a.cell_coords(entry.cell_a);
                let fcont_m = 1.0 - self.focean_m[[j, i]]; // 0 or 1
                if fcont_m == 0.0 {
                    continue; // GCM runs this cell as pure ocean
                }
                let fcont_p = 1.0 - self.focean_p[[j, i]];
                if fcont_p <= 0.0 {
                    return Err(IcegridError::BadCell {
                        j,
                        i,
                        reason: "cell has ice overlaps but zero fractional continent cover"
                            .to_string(),
                    });
                }
                entries.push(ExchangeEntry {
                    area: entry.area / fcont_p,
                    ..*entry
                });
            }
            reconciled.push(entries);
        }
        Ok(RegridMatrices {
            gcm: &self.inner,
            elevmask,
            reconciled: Some(reconciled),
        })
    }
}

impl GcmRegridder {
    /// Operator factory for this chunk's exchange grid.
    pub fn regrid_matrices<'a>(&'a self, elevmask: ArrayView2<'a, f64>) -> RegridMatrices<'a> {
        RegridMatrices {
            gcm: self,
            elevmask,
            reconciled: None,
        }
    }

    pub fn nhc(&self) -> usize {
        self.hcdefs.len()
    }
}

/// Generates the five directed operators, all derived from the
/// same exchange grid; the scale policy only changes how row weights are
/// applied during construction, never the overlap computation.
pub struct RegridMatrices<'a> {
    gcm: &'a GcmRegridder,
    elevmask: ArrayView2<'a, f64>,
    /// Mismatched variant: per-sheet reconciled entries
    reconciled: Option<Vec<Vec<ExchangeEntry>>>,
}

impl<'a> RegridMatrices<'a> {
    fn for_each_entry(&self, mut f: impl FnMut(&IceRegridder, &ExchangeEntry)) {
        for (s, sheet) in self.gcm.ice_regridders.iter().enumerate() {
            match &self.reconciled {
                Some(per_sheet) => {
                    for entry in &per_sheet[s] {
                        f(sheet, entry);
                    }
                }
                None => {
                    for entry in sheet.exgrid.entries() {
                        f(sheet, entry);
                    }
                }
            }
        }
    }

    fn elevation(&self, sheet: &IceRegridder, cell_i: usize) -> f64 {
        let (j, i) = sheet.grid_i.cell_coords(cell_i);
        self.elevmask[[j, i]]
    }

    /// Build one operator, materializing its dimension maps on demand.
    ///
    /// The dimension registries are shared across the five builds of a
    /// chunk, so dense assignments stay consistent between operators.
    pub fn matrix(
        &self,
        kind: OperatorKind,
        dim_dst: &mut SparseDim,
        dim_src: &mut SparseDim,
        params: &RegridParams,
    ) -> WeightedOperator {
        let indexing = &self.gcm.indexing;
        let mut triplets: Vec<Triplet> = Vec::new();

        self.for_each_entry(|sheet, entry| {
            let &ExchangeEntry {
                cell_a,
                cell_i,
                area,
            } = entry;
            match kind {
                OperatorKind::AvI => {
                    triplets.push((dim_dst.add_dense(cell_a), dim_src.add_dense(cell_i), area));
                }
                OperatorKind::IvA => {
                    triplets.push((dim_dst.add_dense(cell_i), dim_src.add_dense(cell_a), area));
                }
                OperatorKind::EvI | OperatorKind::IvE | OperatorKind::AvE => {
                    let elev = self.elevation(sheet, cell_i);
                    for (ihc, weight) in class_weights(&self.gcm.hcdefs, elev, sheet.interp_style)
                    {
                        if weight == 0.0 {
                            continue;
                        }
                        let cell_e = indexing.to_e(cell_a, ihc);
                        let value = area * weight;
                        triplets.push(match kind {
                            OperatorKind::EvI => {
                                (dim_dst.add_dense(cell_e), dim_src.add_dense(cell_i), value)
                            }
                            OperatorKind::IvE => {
                                (dim_dst.add_dense(cell_i), dim_src.add_dense(cell_e), value)
                            }
                            _ => (dim_dst.add_dense(cell_a), dim_src.add_dense(cell_e), value),
                        });
                    }
                }
            }
        });

        WeightedOperator::from_triplets(
            triplets,
            dim_dst.dense_extent(),
            dim_src.dense_extent(),
            params.scale,
        )
    }
}

/// Compute the display-grid overlap matrix I2vI in dense indices,
/// clipped to the I cells already registered for this chunk. This is an
/// independent accumulator run over the small display grid, not a
/// recomputation against the full fine grid.
pub fn display_overlap(
    grid_i2: &GridSpec,
    grid_i: &GridSpec,
    dim_i: &SparseDim,
    dim_i2: &mut SparseDim,
    eq_rad: f64,
) -> Vec<Triplet> {
    let mut triplets = Vec::new();
    overlap_lonlat(
        grid_i2,
        grid_i,
        eq_rad,
        |cell_i| dim_i.to_dense(cell_i).is_some(),
        |cell_i2, cell_i, area| {
            // Clip guarantees the lookup succeeds
            if let Some(dense_i) = dim_i.to_dense(cell_i) {
                triplets.push((dim_i2.add_dense(cell_i2), dense_i, area));
            }
        },
    );
    triplets
}
