//! Geometric overlap computation between two lon-lat grids.
//!
//! This is the crate's seam to the grid-interpolation engine: given two
//! grid specifications and an area weighting (the earth radius), it
//! produces a finite stream of (source-cell, dest-cell, overlap-area)
//! events covering every intersecting cell pair, delivered synchronously
//! to a caller-supplied sink. The overlap accumulator in [`crate::exchange`]
//! is one such sink; the display-grid run clips the dest side to the cells
//! already registered for the chunk.
//!
//! Overlaps are exact for regular lon-lat grids: the intersection of two
//! cells is a lon-lat rectangle whose spherical area is the product of the
//! longitude overlap (radians) and the overlap in sin(latitude), scaled by
//! the squared radius.

use crate::grid::GridSpec;

/// Relative tolerance below which an overlap is considered a shared edge,
/// not an intersection.
const EDGE_TOL: f64 = 1e-12;

/// Emit every intersecting (src-cell, dst-cell, area) pair.
///
/// Events are emitted in row-major scan order of the source grid, dest
/// cells row-major within each source cell. `clip` filters on the dest
/// sparse id before the event is emitted; pass `|_| true` for no clipping.
pub fn overlap_lonlat<C, F>(src: &GridSpec, dst: &GridSpec, eq_rad: f64, mut clip: C, mut sink: F)
where
    C: FnMut(usize) -> bool,
    F: FnMut(usize, usize, f64),
{
    let rr = eq_rad * eq_rad;
    for js in 0..src.jm {
        let sin_s = src.lat_edge(js).to_radians().sin();
        let sin_n = src.lat_edge(js + 1).to_radians().sin();

        // First dest row whose northern edge lies above our southern edge
        let jd0 = ((src.lat_edge(js) + 90.0) / dst.dlat()).floor().max(0.0) as usize;
        for jd in jd0..dst.jm {
            if dst.lat_edge(jd) >= src.lat_edge(js + 1) {
                break;
            }
            let dsin = sin_n.min(dst.lat_edge(jd + 1).to_radians().sin())
                - sin_s.max(dst.lat_edge(jd).to_radians().sin());
            if dsin <= EDGE_TOL * (sin_n - sin_s) {
                continue;
            }

            for is in 0..src.im {
                let lon_w = src.lon_edge(is);
                let lon_e = src.lon_edge(is + 1);
                let id0 = ((lon_w - dst.lon_edge(0)) / dst.dlon()).floor().max(0.0) as usize;
                for id in id0..dst.im {
                    if dst.lon_edge(id) >= lon_e {
                        break;
                    }
                    let dlon = lon_e.min(dst.lon_edge(id + 1)) - lon_w.max(dst.lon_edge(id));
                    if dlon <= EDGE_TOL * src.dlon() {
                        continue;
                    }
                    let dst_id = dst.cell_index(jd, id);
                    if !clip(dst_id) {
                        continue;
                    }
                    let area = dlon.to_radians() * dsin * rr;
                    sink(src.cell_index(js, is), dst_id, area);
                }
            }
        }
    }
}
