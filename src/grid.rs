//! Regular longitude-latitude grid specifications.
//!
//! Three grids take part in a run: the coarse ocean/atmosphere grid (A),
//! the fine ice-sheet grid (I) and a reduced "display" ice grid (I2).
//! All of them are regular lon-lat grids spanning the globe, so a single
//! [`GridSpec`] type covers them. Cells are indexed row-major with the
//! latitude row as the slow dimension; the resulting flat index is the
//! *sparse id* used throughout the rest of the crate.

use crate::errors::{IcegridError, IcegridResult};
use serde::{Deserialize, Serialize};

/// Radius of the earth [m], as used by the GCM.
pub const EQ_RAD: f64 = 6_375_000.0;

/// A regular longitude-latitude grid covering the globe.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GridSpec {
    /// Short name used in logs and artifact metadata (eg "g1qx1")
    pub name: String,
    /// Number of cells in longitude
    pub im: usize,
    /// Number of cells in latitude
    pub jm: usize,
    /// Longitude of the western edge of cell column 0, relative to the
    /// dateline [degrees east]
    pub offset_lon: f64,
}

impl GridSpec {
    pub fn new(name: &str, im: usize, jm: usize) -> Self {
        Self {
            name: name.to_string(),
            im,
            jm,
            offset_lon: 0.0,
        }
    }

    /// Total number of cells; also the sparse extent of the grid.
    pub fn ncells(&self) -> usize {
        self.im * self.jm
    }

    /// Grid shape as (rows, cols), matching artifact metadata order.
    pub fn shape(&self) -> [usize; 2] {
        [self.jm, self.im]
    }

    /// Flat row-major cell index (the grid-wide sparse id).
    pub fn cell_index(&self, j: usize, i: usize) -> usize {
        debug_assert!(j < self.jm && i < self.im);
        j * self.im + i
    }

    /// Inverse of [`cell_index`](Self::cell_index).
    pub fn cell_coords(&self, index: usize) -> (usize, usize) {
        (index / self.im, index % self.im)
    }

    /// Cell width [degrees longitude].
    pub fn dlon(&self) -> f64 {
        360.0 / self.im as f64
    }

    /// Cell height [degrees latitude].
    pub fn dlat(&self) -> f64 {
        180.0 / self.jm as f64
    }

    /// Southern edge of latitude row `j` [degrees north]. Valid for
    /// `j == jm`, which gives the north pole.
    pub fn lat_edge(&self, j: usize) -> f64 {
        -90.0 + j as f64 * self.dlat()
    }

    /// Western edge of longitude column `i` [degrees east of the dateline].
    pub fn lon_edge(&self, i: usize) -> f64 {
        -180.0 + self.offset_lon + i as f64 * self.dlon()
    }

    /// Spherical area of any cell in latitude row `j` [m^2].
    pub fn cell_area(&self, j: usize, eq_rad: f64) -> f64 {
        let lat_s = self.lat_edge(j).to_radians();
        let lat_n = self.lat_edge(j + 1).to_radians();
        self.dlon().to_radians() * (lat_n.sin() - lat_s.sin()) * eq_rad * eq_rad
    }

    /// Check that this (fine) grid is an exact integer multiple of
    /// `coarse` in both dimensions, returning the (row, col) multiples.
    ///
    /// The whole pipeline maps fine-grid blocks onto coarse cells with
    /// integer arithmetic, so a non-multiple pair must be rejected before
    /// any overlap computation begins.
    pub fn multiple_of(&self, coarse: &GridSpec) -> IcegridResult<(usize, usize)> {
        let mult_j = self.jm / coarse.jm;
        let mult_i = self.im / coarse.im;
        if mult_j * coarse.jm != self.jm
            || mult_i * coarse.im != self.im
            || mult_j == 0
            || mult_i == 0
            || self.offset_lon != coarse.offset_lon
        {
            return Err(IcegridError::GridMismatch {
                fine: format!("{} ({}x{})", self.name, self.im, self.jm),
                coarse: format!("{} ({}x{})", coarse.name, coarse.im, coarse.jm),
            });
        }
        Ok((mult_j, mult_i))
    }

    /// GCM atmosphere grid corresponding to an ocean grid: half the
    /// resolution in each dimension.
    pub fn atmosphere_from_ocean(&self) -> IcegridResult<GridSpec> {
        if self.im % 2 != 0 || self.jm % 2 != 0 {
            return Err(IcegridError::Error(format!(
                "Ocean grid {} ({}x{}) has no half-resolution atmosphere grid",
                self.name, self.im, self.jm
            )));
        }
        Ok(GridSpec {
            name: format!("{}-atm", self.name),
            im: self.im / 2,
            jm: self.jm / 2,
            offset_lon: self.offset_lon,
        })
    }
}

/// Resolve a grid name from the table of standard GCM grids.
///
/// Unknown names of the form `IMxJM` (eg "16x8") are accepted as ad-hoc
/// grids, which keeps small test configurations expressible from the
/// command line.
pub fn grid_by_name(name: &str) -> IcegridResult<GridSpec> {
    let known: &[(&str, usize, usize)] = &[
        ("g2hx2", 144, 90),     // 2.5 x 2 degree (ModelE atmosphere)
        ("g1qx1", 288, 180),    // 1.25 x 1 degree (ModelE ocean)
        ("ghxh", 720, 360),     // half degree (display)
        ("g10mx10m", 2160, 1080),
        ("g5mx5m", 4320, 2160),
        ("g2mx2m", 10800, 5400),
        ("g1mx1m", 21600, 10800), // 1 arcminute (ETOPO1 ice topography)
    ];
    for &(n, im, jm) in known {
        if n == name {
            return Ok(GridSpec::new(name, im, jm));
        }
    }
    if let Some((sim, sjm)) = name.split_once('x') {
        if let (Ok(im), Ok(jm)) = (sim.parse::<usize>(), sjm.parse::<usize>()) {
            if im > 0 && jm > 0 {
                return Ok(GridSpec::new(name, im, jm));
            }
        }
    }
    Err(IcegridError::UnknownGrid(name.to_string()))
}
